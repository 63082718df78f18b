#![allow(dead_code)]

// in-memory doubles for the three collaborator boundaries

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::{self, oid::ObjectId, Document};

use jobmon::blob::BlobStore;
use jobmon::cluster::ControlPlane;
use jobmon::error::Error;
use jobmon::job::JobRecord;
use jobmon::store::{AckMode, JobStore};
use jobmon::workload::WorkloadSpec;

#[derive(Default)]
pub struct MemoryJobStore {
    pub documents: Mutex<HashMap<String, Document>>,
}

impl MemoryJobStore {
    pub fn count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<String, Error> {
        let mut document =
            bson::to_document(record).map_err(|e| Error::Persistence(e.to_string()))?;
        let oid = ObjectId::new();
        document.insert("_id", oid);
        self.documents
            .lock()
            .unwrap()
            .insert(oid.to_hex(), document);
        Ok(oid.to_hex())
    }

    async fn fetch(&self, job_id: &str) -> Result<Option<JobRecord>, Error> {
        let documents = self.documents.lock().unwrap();
        documents
            .get(job_id)
            .map(|d| {
                bson::from_document(d.clone()).map_err(|e| Error::Persistence(e.to_string()))
            })
            .transpose()
    }

    async fn update(
        &self,
        job_id: &str,
        fields: Document,
        _ack: AckMode,
    ) -> Result<(), Error> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(document) = documents.get_mut(job_id) {
            for (key, value) in fields {
                document.insert(key, value);
            }
        }
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<(), Error> {
        self.documents.lock().unwrap().remove(job_id);
        Ok(())
    }
}

pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub metadata: Document,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    pub blobs: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    // seed a blob directly, bypassing pack()
    pub fn seed(&self, bytes: Vec<u8>) -> String {
        let handle = ObjectId::new().to_hex();
        self.blobs.lock().unwrap().insert(
            handle.clone(),
            StoredBlob {
                bytes,
                filename: "seeded.tgz".to_string(),
                metadata: Document::new(),
            },
        );
        handle
    }

    pub fn metadata_of(&self, handle: &str) -> Option<Document> {
        self.blobs
            .lock()
            .unwrap()
            .get(handle)
            .map(|b| b.metadata.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        metadata: Document,
    ) -> Result<String, Error> {
        let handle = ObjectId::new().to_hex();
        self.blobs.lock().unwrap().insert(
            handle.clone(),
            StoredBlob {
                bytes,
                filename: filename.to_string(),
                metadata,
            },
        );
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>, Error> {
        self.blobs
            .lock()
            .unwrap()
            .get(handle)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| Error::Storage(format!("no blob `{handle}`")))
    }
}

#[derive(Default)]
pub struct RecordingControlPlane {
    pub reject_submissions: bool,
    pub submitted: Mutex<Vec<WorkloadSpec>>,
    pub removed: Mutex<Vec<String>>,
}

impl RecordingControlPlane {
    pub fn rejecting() -> Self {
        RecordingControlPlane {
            reject_submissions: true,
            ..Default::default()
        }
    }

    pub fn last_submitted(&self) -> Option<WorkloadSpec> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn submit(&self, spec: &WorkloadSpec) -> Result<(), Error> {
        if self.reject_submissions {
            return Err(Error::Dispatch("rejected by test double".to_string()));
        }
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), Error> {
        // absent workloads are tolerated, like the real control plane
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
