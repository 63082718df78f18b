mod common;

use std::sync::Arc;

use common::{MemoryJobStore, RecordingControlPlane};
use jobmon::dispatch::{ClusterDispatcher, DispatchOptions, RESULTS_DIR_VAR};
use jobmon::error::Error;
use jobmon::job::{CloneSource, JobStatus, JobSubmission, RuntimeEnvironment};
use jobmon::registry::JobRegistry;
use jobmon::workload::{ResourceRequest, Volumes, WorkloadKind};

fn submission(job: &str) -> JobSubmission {
    let mut s = JobSubmission::new(
        "sgd",
        "lr-sweep",
        job,
        RuntimeEnvironment {
            clone: CloneSource::Path("/mlodata1/code/sgd".to_string()),
            script: "train.py".to_string(),
        },
    );
    s.user = Some("alice".to_string());
    s
}

fn options() -> DispatchOptions {
    let mut options = DispatchOptions::new(
        "registry.example.com/worker",
        Volumes::Named(vec!["pv-data".to_string()]),
    );
    options.resources = ResourceRequest {
        gpus: 1,
        memory_gb: 9,
        cpu_cores: 3,
    };
    options
}

fn harness(
    control_plane: Arc<RecordingControlPlane>,
) -> (JobRegistry, ClusterDispatcher) {
    let registry = JobRegistry::new(Arc::new(MemoryJobStore::default()));
    let dispatcher = ClusterDispatcher::new(registry.clone(), control_plane);
    (registry, dispatcher)
}

#[tokio::test]
async fn single_dispatch_schedules_the_record() {
    let control_plane = Arc::new(RecordingControlPlane::default());
    let (registry, dispatcher) = harness(control_plane.clone());

    let job_id = registry.register(&submission("baseline")).await.unwrap();
    let before = registry.get(&job_id).await.unwrap();
    assert_eq!(before.status, JobStatus::Created);

    let workload = dispatcher.dispatch_single(&job_id, &options()).await.unwrap();
    assert_eq!(workload, format!("alice-{}", &job_id[job_id.len() - 6..]));

    let spec = control_plane.last_submitted().unwrap();
    assert_eq!(spec.name, workload);
    assert_eq!(spec.kind, WorkloadKind::Single);
    assert_eq!(
        spec.command,
        vec![
            "/entrypoint.sh".to_string(),
            "jobrun".to_string(),
            job_id.clone()
        ]
    );
    assert!(spec
        .labels
        .contains(&("job_id".to_string(), job_id.clone())));
    assert!(spec
        .env
        .contains(&(RESULTS_DIR_VAR.to_string(), "/scratch/results".to_string())));

    // everything else about the record is unchanged
    let after = registry.get(&job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Scheduled);
    assert!(after.schedule_time.is_some());
    assert_eq!(after.registered_workers, 0);
    assert_eq!(after.creation_time, before.creation_time);
}

#[tokio::test]
async fn rejected_submission_leaves_the_record_untouched() {
    let control_plane = Arc::new(RecordingControlPlane::rejecting());
    let (registry, dispatcher) = harness(control_plane);

    let job_id = registry.register(&submission("baseline")).await.unwrap();
    let err = dispatcher
        .dispatch_single(&job_id, &options())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Dispatch(_)));

    let record = registry.get(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Created);
    assert!(record.schedule_time.is_none());
}

#[tokio::test]
async fn dispatching_an_unknown_job_fails_without_a_submission() {
    let control_plane = Arc::new(RecordingControlPlane::default());
    let (_, dispatcher) = harness(control_plane.clone());

    let absent = mongodb::bson::oid::ObjectId::new().to_hex();
    assert!(matches!(
        dispatcher.dispatch_single(&absent, &options()).await,
        Err(Error::NotFound(_))
    ));
    assert!(control_plane.last_submitted().is_none());
}

#[tokio::test]
async fn queue_parallelism_is_clamped_to_completions() {
    let control_plane = Arc::new(RecordingControlPlane::default());
    let (registry, dispatcher) = harness(control_plane.clone());

    let mut job_ids = vec![];
    for i in 0..7 {
        let id = registry
            .register(&submission(&format!("run-{i}")))
            .await
            .unwrap();
        job_ids.push(id);
    }

    let workload = dispatcher
        .dispatch_queue(&job_ids, "alice", &options(), 10)
        .await
        .unwrap();
    assert!(workload.starts_with("alice-queue-"));

    let spec = control_plane.last_submitted().unwrap();
    assert_eq!(
        spec.kind,
        WorkloadKind::Queue {
            completions: 7,
            parallelism: 7,
        }
    );
    assert_eq!(spec.command[1], "jobrun");
    assert_eq!(spec.command[2], "--queue-mode");
    assert_eq!(&spec.command[3..], &job_ids[..]);

    // per-job status stays with the workers
    for job_id in &job_ids {
        let record = registry.get(job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Created);
    }
}

#[tokio::test]
async fn an_empty_queue_is_refused() {
    let control_plane = Arc::new(RecordingControlPlane::default());
    let (_, dispatcher) = harness(control_plane);
    assert!(matches!(
        dispatcher.dispatch_queue(&[], "alice", &options(), 4).await,
        Err(Error::Dispatch(_))
    ));
}

#[tokio::test]
async fn deleting_an_absent_workload_succeeds() {
    let control_plane = Arc::new(RecordingControlPlane::default());
    let (_, dispatcher) = harness(control_plane.clone());

    dispatcher.delete("alice-queue-gone").await.unwrap();
    assert_eq!(
        control_plane.removed.lock().unwrap().as_slice(),
        &["alice-queue-gone".to_string()]
    );
}
