use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{Acknowledgment, WriteConcern},
    Collection,
};

use crate::error::Error;
use crate::job::JobRecord;

// large worker-side fields are kept out of every projected read; callers
// that need logs or metric series go through a separately scoped accessor
const EXCLUDED_FIELDS: [&str; 4] = ["logs", "metric_data", "workers", "metrics"];

/// Durability/latency trade-off for a write: wait for confirmation from the
/// store, or fire and forget. Status transitions that matter for
/// correctness should use [`AckMode::Acknowledged`]; best-effort telemetry
/// may use [`AckMode::FireAndForget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Acknowledged,
    FireAndForget,
}

impl AckMode {
    fn write_concern(&self) -> WriteConcern {
        match self {
            AckMode::Acknowledged => WriteConcern::majority(),
            AckMode::FireAndForget => WriteConcern::builder()
                .w(Acknowledgment::Nodes(0))
                .build(),
        }
    }
}

// document-oriented interface to the metadata store, keyed by job id.
// injected into the registry so tests can run against an in-memory double.
#[async_trait]
pub trait JobStore: Send + Sync {
    // persists the record and returns the assigned id as hex
    async fn insert(&self, record: &JobRecord) -> Result<String, Error>;

    // projected read; streaming fields are excluded
    async fn fetch(&self, job_id: &str) -> Result<Option<JobRecord>, Error>;

    // merges `fields` into the stored document
    async fn update(&self, job_id: &str, fields: Document, ack: AckMode) -> Result<(), Error>;

    // removing an absent id is a no-op
    async fn remove(&self, job_id: &str) -> Result<(), Error>;
}

pub struct MongoJobStore {
    collection: Collection<JobRecord>,
}

impl MongoJobStore {
    pub fn new(database: &mongodb::Database) -> Self {
        MongoJobStore {
            collection: database.collection::<JobRecord>("job"),
        }
    }
}

fn persistence(e: mongodb::error::Error) -> Error {
    Error::Persistence(e.to_string())
}

fn parse_oid(job_id: &str) -> Result<ObjectId, Error> {
    ObjectId::parse_str(job_id).map_err(|_| Error::NotFound(job_id.to_string()))
}

#[async_trait]
impl JobStore for MongoJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<String, Error> {
        let inserted = self
            .collection
            .insert_one(record)
            .await
            .map_err(persistence)?;
        inserted
            .inserted_id
            .as_object_id()
            .map(|oid| oid.to_hex())
            .ok_or_else(|| Error::Persistence("store returned a non-ObjectId key".to_string()))
    }

    async fn fetch(&self, job_id: &str) -> Result<Option<JobRecord>, Error> {
        let oid = parse_oid(job_id)?;
        let mut projection = Document::new();
        for field in EXCLUDED_FIELDS {
            projection.insert(field, 0);
        }
        self.collection
            .find_one(doc! { "_id": oid })
            .projection(projection)
            .await
            .map_err(persistence)
    }

    async fn update(&self, job_id: &str, fields: Document, ack: AckMode) -> Result<(), Error> {
        let oid = parse_oid(job_id)?;
        self.collection
            .update_one(doc! { "_id": oid }, doc! { "$set": fields })
            .write_concern(ack.write_concern())
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<(), Error> {
        // an id that does not even parse cannot name a stored job
        let Ok(oid) = ObjectId::parse_str(job_id) else {
            return Ok(());
        };
        self.collection
            .delete_one(doc! { "_id": oid })
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
