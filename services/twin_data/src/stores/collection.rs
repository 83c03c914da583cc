//! services/twin_data/src/stores/collection.rs
//!
//! The create / read / list / merge-update / delete cycle shared by every record
//! store. Each entity supplies a versioned wire record (`WireRecord`) that maps
//! to and from its domain struct; this module owns the envelope fields, the
//! partition key and the logging around every document store call.

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use twin_data_core::domain::new_id;
use twin_data_core::ports::{require, DocumentQuery, DocumentStore, PortError, PortResult};

/// Timestamps are stored as RFC 3339 with millisecond precision so that
/// string ordering in the store matches chronological ordering.
pub(crate) mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

const ID_FIELD: &str = "id";
const TWIN_FIELD: &str = "TwinID";
const CREATED_FIELD: &str = "CreatedAt";
const UPDATED_FIELD: &str = "UpdatedAt";
const VERSION_FIELD: &str = "SchemaVersion";

/// The fields every stored record carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "TwinID")]
    pub twin_id: String,
    #[serde(rename = "SchemaVersion", default = "legacy_version")]
    pub schema_version: u32,
    #[serde(rename = "CreatedAt", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn legacy_version() -> u32 {
    1
}

impl Envelope {
    pub fn new(id: &str, twin_id: &str, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            twin_id: twin_id.to_string(),
            schema_version: legacy_version(),
            created_at,
            updated_at,
        }
    }
}

/// The stored representation of one entity type.
pub(crate) trait WireRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Domain: Send;

    const COLLECTION: &'static str;
    const SCHEMA_VERSION: u32;

    fn from_domain(domain: &Self::Domain) -> Self;
    fn into_domain(self) -> Self::Domain;
    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;
}

fn decode<W: WireRecord>(body: Value) -> PortResult<W> {
    let version = body.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(1);
    if version > W::SCHEMA_VERSION as u64 {
        return Err(PortError::Permanent(format!(
            "{} record has schema version {}, newest supported is {}",
            W::COLLECTION,
            version,
            W::SCHEMA_VERSION
        )));
    }
    Ok(serde_json::from_value(body)?)
}

/// Typed access to one collection of the document store.
pub(crate) struct RecordCollection<W: WireRecord> {
    store: Arc<dyn DocumentStore>,
    _record: PhantomData<fn() -> W>,
}

impl<W: WireRecord> Clone for RecordCollection<W> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), _record: PhantomData }
    }
}

impl<W: WireRecord> RecordCollection<W> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, _record: PhantomData }
    }

    /// Writes a new record. Assigns an id when the caller left it empty and
    /// stamps both timestamps.
    pub async fn create(&self, domain: &W::Domain) -> PortResult<W::Domain> {
        let mut record = W::from_domain(domain);
        let envelope = record.envelope_mut();
        require("TwinID", &envelope.twin_id)?;
        if envelope.id.trim().is_empty() {
            envelope.id = new_id();
        }
        let stamp = now();
        envelope.created_at = stamp;
        envelope.updated_at = stamp;
        envelope.schema_version = W::SCHEMA_VERSION;
        let (id, twin_id) = (envelope.id.clone(), envelope.twin_id.clone());

        let body = serde_json::to_value(&record)?;
        if let Err(e) = self.store.create(W::COLLECTION, &twin_id, &id, body).await {
            error!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Failed to create record");
            return Err(e);
        }
        info!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Record created");
        Ok(record.into_domain())
    }

    /// Point read by `(id, twin_id)`.
    pub async fn get(&self, id: &str, twin_id: &str) -> PortResult<W::Domain> {
        require("id", id)?;
        require("TwinID", twin_id)?;
        let result = async {
            let body = self.store.read(W::COLLECTION, twin_id, id).await?;
            decode::<W>(body)
        }
        .await;

        match result {
            Ok(record) => Ok(record.into_domain()),
            Err(e) if e.is_not_found() => {
                debug!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Record not found");
                Err(e)
            }
            Err(e) => {
                error!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Failed to read record");
                Err(e)
            }
        }
    }

    /// Partition-scoped query. Rows that no longer decode are skipped with a warning.
    pub async fn list(&self, twin_id: &str, query: &DocumentQuery) -> PortResult<Vec<W::Domain>> {
        require("TwinID", twin_id)?;
        let rows = self.store.query(W::COLLECTION, twin_id, query).await.map_err(|e| {
            error!(collection = W::COLLECTION, twin_id = %twin_id, error = %e, "Failed to query records");
            e
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default().to_string();
            match decode::<W>(row) {
                Ok(record) => records.push(record.into_domain()),
                Err(e) => warn!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Skipping undecodable record"),
            }
        }
        debug!(collection = W::COLLECTION, twin_id = %twin_id, count = records.len(), "Records listed");
        Ok(records)
    }

    /// Read-modify-write: the new record's fields are laid over the stored
    /// document, keeping its id, partition and creation time. Last writer wins.
    pub async fn update(&self, domain: &W::Domain) -> PortResult<W::Domain> {
        let record = W::from_domain(domain);
        let (id, twin_id) = (record.envelope().id.clone(), record.envelope().twin_id.clone());
        require("id", &id)?;
        require("TwinID", &twin_id)?;

        let existing = match self.store.read(W::COLLECTION, &twin_id, &id).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                warn!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Cannot update a record that does not exist");
                return Err(e);
            }
            Err(e) => {
                error!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Failed to read record for update");
                return Err(e);
            }
        };

        let Value::Object(mut merged) = existing else {
            return Err(PortError::Permanent(format!("{} record {} is not a JSON object", W::COLLECTION, id)));
        };
        if let Value::Object(incoming) = serde_json::to_value(&record)? {
            for (field, value) in incoming {
                if matches!(field.as_str(), ID_FIELD | TWIN_FIELD | CREATED_FIELD) {
                    continue;
                }
                merged.insert(field, value);
            }
        }
        merged.insert(UPDATED_FIELD.to_string(), serde_json::to_value(timestamp_string(now()))?);
        merged.insert(VERSION_FIELD.to_string(), Value::from(W::SCHEMA_VERSION));

        let merged = Value::Object(merged);
        let updated: W = decode(merged.clone())?;
        if let Err(e) = self.store.upsert(W::COLLECTION, &twin_id, &id, merged).await {
            error!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Failed to write updated record");
            return Err(e);
        }
        info!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Record updated");
        Ok(updated.into_domain())
    }

    /// Deletes by key. A missing record is reported as `NotFound`.
    pub async fn delete(&self, id: &str, twin_id: &str) -> PortResult<()> {
        require("id", id)?;
        require("TwinID", twin_id)?;
        match self.store.delete(W::COLLECTION, twin_id, id).await {
            Ok(()) => {
                info!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Record deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, "Record to delete was not found");
                Err(e)
            }
            Err(e) => {
                error!(collection = W::COLLECTION, id = %id, twin_id = %twin_id, error = %e, "Failed to delete record");
                Err(e)
            }
        }
    }
}

fn timestamp_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryDocumentStore;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        twin_id: String,
        text: String,
        tag: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct NoteRecord {
        #[serde(flatten)]
        envelope: Envelope,
        text: String,
        #[serde(default)]
        tag: Option<String>,
    }

    impl WireRecord for NoteRecord {
        type Domain = Note;
        const COLLECTION: &'static str = "notes";
        const SCHEMA_VERSION: u32 = 2;

        fn from_domain(n: &Note) -> Self {
            Self {
                envelope: Envelope::new(&n.id, &n.twin_id, n.created_at, n.updated_at),
                text: n.text.clone(),
                tag: n.tag.clone(),
            }
        }

        fn into_domain(self) -> Note {
            Note {
                id: self.envelope.id,
                twin_id: self.envelope.twin_id,
                text: self.text,
                tag: self.tag,
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

    fn note(twin: &str, text: &str) -> Note {
        let at = now();
        Note { id: String::new(), twin_id: twin.into(), text: text.into(), tag: None, created_at: at, updated_at: at }
    }

    fn collection() -> (Arc<InMemoryDocumentStore>, RecordCollection<NoteRecord>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        (store.clone(), RecordCollection::new(store))
    }

    #[tokio::test]
    async fn create_assigns_id_and_round_trips() {
        let (_, notes) = collection();
        let created = notes.create(&note("t1", "hello")).await.unwrap();
        assert!(!created.id.is_empty());

        let read = notes.get(&created.id, "t1").await.unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn supplied_id_is_kept() {
        let (_, notes) = collection();
        let mut n = note("t1", "hello");
        n.id = "fixed".into();
        assert_eq!(notes.create(&n).await.unwrap().id, "fixed");
    }

    #[tokio::test]
    async fn blank_twin_is_rejected_before_any_call() {
        let (store, notes) = collection();
        let err = notes.create(&note(" ", "hello")).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_keeps_identity_and_creation_time() {
        let (_, notes) = collection();
        let created = notes.create(&note("t1", "first")).await.unwrap();

        let mut changed = created.clone();
        changed.text = "second".into();
        changed.created_at = created.created_at + chrono::Duration::days(3);
        let updated = notes.update(&changed).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.text, "second");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let (_, notes) = collection();
        let mut n = note("t1", "ghost");
        n.id = "missing".into();
        assert!(notes.update(&n).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_preserves_fields_unknown_to_the_record() {
        let (store, notes) = collection();
        store
            .create(
                "notes",
                "t1",
                "n1",
                json!({
                    "id": "n1", "TwinID": "t1", "SchemaVersion": 1,
                    "CreatedAt": "2024-01-01T00:00:00.000Z", "UpdatedAt": "2024-01-01T00:00:00.000Z",
                    "Text": "legacy", "LegacyField": 7
                }),
            )
            .await
            .unwrap();

        let mut n = notes.get("n1", "t1").await.unwrap();
        n.text = "modern".into();
        notes.update(&n).await.unwrap();

        let raw = store.read("notes", "t1", "n1").await.unwrap();
        assert_eq!(raw["LegacyField"], 7);
        assert_eq!(raw["Text"], "modern");
        assert_eq!(raw["SchemaVersion"], 2);
        assert_eq!(raw["CreatedAt"], "2024-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn newer_schema_versions_are_rejected() {
        let (store, notes) = collection();
        store
            .create(
                "notes",
                "t1",
                "n1",
                json!({
                    "id": "n1", "TwinID": "t1", "SchemaVersion": 9,
                    "CreatedAt": "2024-01-01T00:00:00.000Z", "UpdatedAt": "2024-01-01T00:00:00.000Z",
                    "Text": "future"
                }),
            )
            .await
            .unwrap();
        assert!(matches!(notes.get("n1", "t1").await, Err(PortError::Permanent(_))));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_, notes) = collection();
        let created = notes.create(&note("t1", "bye")).await.unwrap();
        notes.delete(&created.id, "t1").await.unwrap();
        assert!(notes.get(&created.id, "t1").await.unwrap_err().is_not_found());
        assert!(notes.delete(&created.id, "t1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_only_returns_the_requested_partition() {
        let (_, notes) = collection();
        notes.create(&note("t1", "a")).await.unwrap();
        notes.create(&note("t2", "b")).await.unwrap();
        notes.create(&note("t1", "c")).await.unwrap();

        let listed = notes.list("t1", &DocumentQuery::new()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|n| n.twin_id == "t1"));
    }
}
