//! crates/twin_data_core/src/domain.rs
//!
//! Defines the pure, core data structures for the digital twin data services.
//! Persisted entities are independent of the wire format used by the document
//! store; the LLM-facing envelopes at the bottom of the file are the exact JSON
//! shapes the models are asked to produce, so they carry serde derives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Produces a fresh document identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

//=========================================================================================
// Record Store Entities
//=========================================================================================

/// The main record of a book owned by a twin.
#[derive(Debug, Clone, PartialEq)]
pub struct BookMain {
    pub id: String,
    pub twin_id: String,
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookMain {
    /// A new, not yet persisted book. The id is assigned by the store.
    pub fn new(twin_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            twin_id: twin_id.into(),
            title: title.into(),
            author: None,
            content: content.into(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseStatus {
    Draft,
    Building,
    Ready,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "Draft",
            CourseStatus::Building => "Building",
            CourseStatus::Ready => "Ready",
            CourseStatus::Archived => "Archived",
        }
    }
}

impl FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(CourseStatus::Draft),
            "building" => Ok(CourseStatus::Building),
            "ready" => Ok(CourseStatus::Ready),
            "archived" => Ok(CourseStatus::Archived),
            other => Err(format!("unknown course status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseLesson {
    pub title: String,
    pub summary: String,
    pub duration_minutes: Option<u32>,
}

/// A course built for a twin (the "curso" build payload).
#[derive(Debug, Clone, PartialEq)]
pub struct CourseBuild {
    pub id: String,
    pub twin_id: String,
    pub name: String,
    pub description: String,
    pub instructor: Option<String>,
    pub platform: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub status: CourseStatus,
    pub lessons: Vec<CourseLesson>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseBuild {
    pub fn new(twin_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            twin_id: twin_id.into(),
            name: name.into(),
            description: String::new(),
            instructor: None,
            platform: None,
            category: None,
            language: None,
            status: CourseStatus::Draft,
            lessons: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The structured report an AI model produced for a mortgage statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MortgageReport {
    pub lender: Option<String>,
    pub loan_amount: Option<f64>,
    pub interest_rate: Option<f64>,
    pub term_years: Option<u32>,
    pub monthly_payment: Option<f64>,
    pub summary: String,
    pub html_report: String,
}

/// A mortgage document attached to a home of a twin.
#[derive(Debug, Clone, PartialEq)]
pub struct MortgageDocument {
    pub id: String,
    pub twin_id: String,
    pub home_id: String,
    pub file_name: String,
    pub container_name: String,
    pub file_path: String,
    pub report: MortgageReport,
    /// The unparsed model response, kept as a backup of `report`.
    pub raw_ai_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A mortgage document plus a temporary URL for downloading the attached file.
#[derive(Debug, Clone, PartialEq)]
pub struct MortgageDocumentView {
    pub document: MortgageDocument,
    pub download_url: Option<String>,
}

/// Lifecycle states of a job application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Aplicado,
    Entrevista,
    Esperando,
    Rechazado,
    Aceptado,
    Retirado,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Aplicado => "Aplicado",
            JobStatus::Entrevista => "Entrevista",
            JobStatus::Esperando => "Esperando",
            JobStatus::Rechazado => "Rechazado",
            JobStatus::Aceptado => "Aceptado",
            JobStatus::Retirado => "Retirado",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aplicado" => Ok(JobStatus::Aplicado),
            "entrevista" => Ok(JobStatus::Entrevista),
            "esperando" => Ok(JobStatus::Esperando),
            "rechazado" => Ok(JobStatus::Rechazado),
            "aceptado" => Ok(JobStatus::Aceptado),
            "retirado" => Ok(JobStatus::Retirado),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A job opportunity tracked by a twin.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOpportunity {
    pub id: String,
    pub twin_id: String,
    pub puesto: String,
    pub empresa: String,
    pub estado: JobStatus,
    pub ubicacion: Option<String>,
    pub salario: Option<String>,
    pub url_oferta: Option<String>,
    pub descripcion: Option<String>,
    pub fecha_aplicacion: Option<DateTime<Utc>>,
    pub fecha_entrevista: Option<DateTime<Utc>>,
    /// Free-text history. Status changes append to it.
    pub notas: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobOpportunity {
    pub fn new(twin_id: impl Into<String>, puesto: impl Into<String>, empresa: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            twin_id: twin_id.into(),
            puesto: puesto.into(),
            empresa: empresa.into(),
            estado: JobStatus::Aplicado,
            ubicacion: None,
            salario: None,
            url_oferta: None,
            descripcion: None,
            fecha_aplicacion: Some(now),
            fecha_entrevista: None,
            notas: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

//=========================================================================================
// Search-backed Entities
//=========================================================================================

/// The outcome of analysing one diary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryAnalysis {
    pub diary_entry_id: String,
    pub twin_id: String,
    pub success: bool,
    pub executive_summary: String,
    pub html_report: String,
    pub processing_time_ms: i64,
    pub analyzed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A diary analysis as read back from the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryAnalysisEntry {
    pub document_id: String,
    pub analysis: DiaryAnalysis,
}

/// A document whose structure was extracted into a plain-text report.
#[derive(Debug, Clone, PartialEq)]
pub struct SemistructuredDocument {
    pub id: String,
    pub twin_id: String,
    pub document_type: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub reporte_texto_plano: String,
    pub processed_at: DateTime<Utc>,
}

//=========================================================================================
// Chapter Extraction (ephemeral, never persisted)
//=========================================================================================

/// The text lines of one page of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: u32,
    pub lines: Vec<String>,
}

/// One row of a table of contents.
#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub title: String,
    pub start_page: u32,
    pub end_page: Option<u32>,
}

/// The text span attributed to one chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterText {
    pub title: String,
    pub page_from: u32,
    pub page_to: u32,
    pub full_text: String,
    pub total_tokens: usize,
}

/// One sub-topic the model carved out of a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subtema {
    pub titulo: String,
    #[serde(default)]
    pub pagina_de: Option<u32>,
    #[serde(default)]
    pub pagina_a: Option<u32>,
    pub texto_completo: String,
    #[serde(default)]
    pub total_tokens: usize,
}

/// The JSON envelope expected back from the chapter extraction prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChapterExtraction {
    pub titulo: String,
    #[serde(default)]
    pub resumen: String,
    #[serde(default)]
    pub subtemas: Vec<Subtema>,
}

/// The JSON envelope expected back from the image analysis prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageAnalysis {
    pub description: String,
    pub detected_text: Option<String>,
    pub objects: Vec<String>,
    pub people_count: u32,
    pub tags: Vec<String>,
    pub setting: Option<String>,
    pub html_report: Option<String>,
}

//=========================================================================================
// Outbox Events
//=========================================================================================

/// Published by record stores after a successful primary write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexingEvent {
    BookCreated { twin_id: String, book_id: String },
    BookUpdated { twin_id: String, book_id: String },
    BookDeleted { twin_id: String, book_id: String },
}
