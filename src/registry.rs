use std::sync::Arc;

use log::info;
use mongodb::bson::{self, doc, Document};

use crate::error::Error;
use crate::job::{self, JobRecord, JobStatus, JobSubmission};
use crate::store::{AckMode, JobStore};

/// CRUD and status stamping over job records. The registry exclusively owns
/// persistence; callers hold a hex job id and re-read fresh state on every
/// access instead of caching records.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        JobRegistry { store }
    }

    /// Validate and persist a submission. Stamps `status = CREATED`,
    /// `creation_time = now` and `registered_workers = 0`; nothing is
    /// persisted when validation fails.
    pub async fn register(&self, submission: &JobSubmission) -> Result<String, Error> {
        let user = submission.resolved_user();
        job::validate(submission, &user)?;

        let record = JobRecord {
            id: None,
            user,
            project: submission.project.clone(),
            experiment: submission.experiment.clone(),
            job: submission.job.clone(),
            n_workers: submission.n_workers,
            registered_workers: 0,
            config: submission.config_overrides.clone(),
            annotations: submission.annotations.clone(),
            environment: submission.environment.clone(),
            status: JobStatus::Created,
            creation_time: bson::DateTime::now(),
            schedule_time: None,
            priority: submission.priority,
        };
        let job_id = self.store.insert(&record).await?;
        info!(
            "Registered job `{}/{}/{}` as `{job_id}`.",
            record.project, record.experiment, record.job
        );
        Ok(job_id)
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, Error> {
        self.store
            .fetch(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(job_id.to_string()))
    }

    /// Merge fields into the stored record. The registry stores whatever
    /// status it is given; transition legality (in particular, not
    /// resurrecting a terminal record) is the caller's responsibility.
    pub async fn update(
        &self,
        job_id: &str,
        fields: Document,
        ack: AckMode,
    ) -> Result<(), Error> {
        self.store.update(job_id, fields, ack).await
    }

    // first transition to SCHEDULED; acknowledged, since dispatch
    // correctness depends on it
    pub(crate) async fn mark_scheduled(&self, job_id: &str) -> Result<(), Error> {
        let fields = doc! {
            "status": bson::to_bson(&JobStatus::Scheduled)
                .map_err(|e| Error::Persistence(e.to_string()))?,
            "schedule_time": bson::DateTime::now(),
        };
        self.update(job_id, fields, AckMode::Acknowledged).await
    }

    /// Idempotent: deleting an absent id is a no-op, not an error.
    pub async fn delete(&self, job_id: &str) -> Result<(), Error> {
        self.store.remove(job_id).await
    }
}
