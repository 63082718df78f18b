use std::cmp;
use std::sync::Arc;

use log::info;
use uuid::Uuid;

use crate::cluster::ControlPlane;
use crate::error::Error;
use crate::registry::JobRegistry;
use crate::workload::{ResourceRequest, Volumes, WorkloadKind, WorkloadSpec};

// worker binary invoked inside the container
const WORKER_COMMAND: &str = "jobrun";
const QUEUE_FLAG: &str = "--queue-mode";

// injected into every workload so the worker knows where results go
pub const RESULTS_DIR_VAR: &str = "JOBMON_RESULTS_DIR";
pub const DEFAULT_RESULTS_DIR: &str = "/scratch/results";

const APP_LABEL: &str = "jobmon";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub image: String,
    pub volumes: Volumes,
    pub resources: ResourceRequest,
    pub env: Vec<(String, String)>,
    pub results_dir: String,
}

impl DispatchOptions {
    pub fn new(image: impl Into<String>, volumes: Volumes) -> Self {
        DispatchOptions {
            image: image.into(),
            volumes,
            resources: ResourceRequest::default(),
            env: vec![],
            results_dir: DEFAULT_RESULTS_DIR.to_string(),
        }
    }

    fn workload_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(RESULTS_DIR_VAR.to_string(), self.results_dir.clone())];
        env.extend(self.env.iter().cloned());
        env
    }
}

/// Translates job records into workloads and submits them. Dispatch and the
/// follow-up status update are two independent network calls; a crash in
/// between leaves a running workload behind a `CREATED` record, and the
/// control plane's own state is authoritative for what actually runs.
pub struct ClusterDispatcher {
    registry: JobRegistry,
    control_plane: Arc<dyn ControlPlane>,
}

impl ClusterDispatcher {
    pub fn new(registry: JobRegistry, control_plane: Arc<dyn ControlPlane>) -> Self {
        ClusterDispatcher {
            registry,
            control_plane,
        }
    }

    /// Submit one job as a one-shot workload, then mark the record
    /// `SCHEDULED`. When submission is rejected the record keeps its prior
    /// status. Returns the workload name.
    pub async fn dispatch_single(
        &self,
        job_id: &str,
        options: &DispatchOptions,
    ) -> Result<String, Error> {
        let record = self.registry.get(job_id).await?;

        // short and human-scannable; collisions under concurrent
        // submissions by the same user are not guarded against
        let short_id = &job_id[job_id.len().saturating_sub(6)..];
        let name = format!("{}-{}", record.user, short_id);

        let labels = vec![
            ("app".to_string(), APP_LABEL.to_string()),
            ("user".to_string(), record.user.clone()),
            ("project".to_string(), record.project.clone()),
            ("experiment".to_string(), record.experiment.clone()),
            ("job".to_string(), record.job.clone()),
            ("job_id".to_string(), job_id.to_string()),
        ];
        let spec = WorkloadSpec::build(
            name.clone(),
            options.image.clone(),
            vec![WORKER_COMMAND.to_string(), job_id.to_string()],
            options.resources,
            options.workload_env(),
            &options.volumes,
            labels,
            WorkloadKind::Single,
        );

        self.control_plane.submit(&spec).await?;
        self.registry.mark_scheduled(job_id).await?;
        info!("Dispatched job `{job_id}` as workload `{name}`.");
        Ok(name)
    }

    /// Submit a batch of job ids as one parallel work-queue workload: one
    /// completion per job id, at most `min(parallelism, ids)` workers at a
    /// time, no relaunch of failed attempts. Workers report their own
    /// per-job status, so no records are touched here.
    pub async fn dispatch_queue(
        &self,
        job_ids: &[String],
        user: &str,
        options: &DispatchOptions,
        parallelism: u32,
    ) -> Result<String, Error> {
        if job_ids.is_empty() {
            return Err(Error::Dispatch("refusing to submit an empty queue".to_string()));
        }

        let suffix = Uuid::new_v4().simple().to_string()[..6].to_string();
        let name = format!("{user}-queue-{suffix}");

        let completions = job_ids.len() as u32;
        let parallelism = cmp::min(parallelism, completions);

        let mut command = vec![WORKER_COMMAND.to_string(), QUEUE_FLAG.to_string()];
        command.extend(job_ids.iter().cloned());

        let labels = vec![
            ("app".to_string(), APP_LABEL.to_string()),
            ("user".to_string(), user.to_string()),
        ];
        let spec = WorkloadSpec::build(
            name.clone(),
            options.image.clone(),
            command,
            options.resources,
            options.workload_env(),
            &options.volumes,
            labels,
            WorkloadKind::Queue {
                completions,
                parallelism,
            },
        );

        self.control_plane.submit(&spec).await?;
        info!(
            "Dispatched `{completions}` jobs as queue workload `{name}` \
             with parallelism `{parallelism}`."
        );
        Ok(name)
    }

    /// Cascading removal of a previously dispatched workload.
    pub async fn delete(&self, workload_name: &str) -> Result<(), Error> {
        self.control_plane.remove(workload_name).await
    }
}
