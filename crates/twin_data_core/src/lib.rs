pub mod chapters;
pub mod domain;
pub mod html;
pub mod ports;
pub mod search;

pub use domain::{
    BookMain, ChapterExtraction, ChapterText, CourseBuild, CourseLesson, CourseStatus, DiaryAnalysis,
    DiaryAnalysisEntry, ImageAnalysis, IndexingEvent, JobOpportunity, JobStatus, MortgageDocument,
    MortgageDocumentView, MortgageReport, PageText, SemistructuredDocument, Subtema, TocEntry,
};
pub use ports::{
    BlobStorage, ChatCompletionService, DocumentQuery, DocumentStore, EmbeddingService, EventPublisher,
    PortError, PortResult, SearchIndexClient,
};
