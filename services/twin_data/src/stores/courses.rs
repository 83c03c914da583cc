//! services/twin_data/src/stores/courses.rs

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use twin_data_core::domain::{CourseBuild, CourseLesson, CourseStatus};
use twin_data_core::ports::{DocumentQuery, DocumentStore, PortResult};

use super::collection::{Envelope, RecordCollection, WireRecord};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LessonRecord {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    duration_minutes: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CourseRecord {
    #[serde(flatten)]
    envelope: Envelope,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    instructor: Option<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    language: Option<String>,
    status: String,
    #[serde(default)]
    lessons: Vec<LessonRecord>,
}

impl WireRecord for CourseRecord {
    type Domain = CourseBuild;

    const COLLECTION: &'static str = "cursos";
    const SCHEMA_VERSION: u32 = 1;

    fn from_domain(course: &CourseBuild) -> Self {
        Self {
            envelope: Envelope::new(&course.id, &course.twin_id, course.created_at, course.updated_at),
            name: course.name.clone(),
            description: course.description.clone(),
            instructor: course.instructor.clone(),
            platform: course.platform.clone(),
            category: course.category.clone(),
            language: course.language.clone(),
            status: course.status.as_str().to_string(),
            lessons: course
                .lessons
                .iter()
                .map(|l| LessonRecord {
                    title: l.title.clone(),
                    summary: l.summary.clone(),
                    duration_minutes: l.duration_minutes,
                })
                .collect(),
        }
    }

    fn into_domain(self) -> CourseBuild {
        CourseBuild {
            id: self.envelope.id,
            twin_id: self.envelope.twin_id,
            name: self.name,
            description: self.description,
            instructor: self.instructor,
            platform: self.platform,
            category: self.category,
            language: self.language,
            // Older records may carry free-form statuses.
            status: self.status.parse().unwrap_or(CourseStatus::Draft),
            lessons: self
                .lessons
                .into_iter()
                .map(|l| CourseLesson { title: l.title, summary: l.summary, duration_minutes: l.duration_minutes })
                .collect(),
            created_at: self.envelope.created_at,
            updated_at: self.envelope.updated_at,
        }
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

#[derive(Clone)]
pub struct CourseStore {
    records: RecordCollection<CourseRecord>,
}

impl CourseStore {
    /// Creates a new `CourseStore`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { records: RecordCollection::new(store) }
    }

    /// Persists a course build. An empty id is replaced by a generated one.
    pub async fn create_course(&self, course: &CourseBuild) -> PortResult<CourseBuild> {
        self.records.create(course).await
    }

    pub async fn get_course(&self, id: &str, twin_id: &str) -> PortResult<CourseBuild> {
        self.records.get(id, twin_id).await
    }

    pub async fn list_courses(&self, twin_id: &str, status: Option<CourseStatus>) -> PortResult<Vec<CourseBuild>> {
        let mut query = DocumentQuery::new().order_by("CreatedAt", true);
        if let Some(status) = status {
            query = query.equals("Status", status.as_str());
        }
        self.records.list(twin_id, &query).await
    }

    pub async fn update_course(&self, course: &CourseBuild) -> PortResult<CourseBuild> {
        self.records.update(course).await
    }

    pub async fn delete_course(&self, id: &str, twin_id: &str) -> PortResult<()> {
        self.records.delete(id, twin_id).await
    }
}
