use std::env;

use mongodb::bson::{self, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use crate::error::{Issue, ValidationError};

// job lifecycle:
//   CREATED -> SCHEDULED -> (RUNNING -> FINISHED | FAILED) | CANCELLED
// CREATED is the only initial state; FINISHED, FAILED and CANCELLED are
// terminal. status is only ever mutated through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::Scheduled => write!(f, "SCHEDULED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Finished => write!(f, "FINISHED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// where the worker gets the code to run: a previously uploaded code
// package(referenced by its blob store handle), or a path that already
// exists on the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneSource {
    CodePackage(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    pub clone: CloneSource,

    // entry point executed by the worker, relative to the cloned code
    pub script: String,
}

// what a caller hands to the registry; the registry stamps identity,
// status and timestamps on top of this
#[derive(Debug, Clone)]
pub struct JobSubmission {
    // defaults to $USER when left unset
    pub user: Option<String>,
    pub project: String,
    pub experiment: String,
    pub job: String,

    pub config_overrides: Document,
    pub annotations: Option<Document>,

    pub environment: RuntimeEnvironment,

    pub n_workers: u32,
    pub priority: i32,
}

impl JobSubmission {
    pub fn new(
        project: impl Into<String>,
        experiment: impl Into<String>,
        job: impl Into<String>,
        environment: RuntimeEnvironment,
    ) -> Self {
        JobSubmission {
            user: None,
            project: project.into(),
            experiment: experiment.into(),
            job: job.into(),
            config_overrides: Document::new(),
            annotations: None,
            environment,
            n_workers: 1,
            priority: 1,
        }
    }

    pub fn resolved_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| env::var("USER").ok())
            .unwrap_or_default()
    }
}

// mongodb database model for one unit of work.
// callers hold only the hex id, never a live reference to this document;
// every access is a fresh read through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user: String,
    pub project: String,
    pub experiment: String,
    pub job: String,

    pub n_workers: u32,
    // incremented by workers as they check in; 0 <= registered_workers <= n_workers
    pub registered_workers: u32,

    pub config: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Document>,

    pub environment: RuntimeEnvironment,

    pub status: JobStatus,
    pub creation_time: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<bson::DateTime>,

    // higher = more important; interpretation is left to the control plane
    pub priority: i32,
}

impl JobRecord {
    pub fn hex_id(&self) -> Option<String> {
        self.id.map(|oid| oid.to_hex())
    }
}

/// Check a submission against the shape the workers rely on. Every failing
/// field is reported, not just the first. No side effects; the same input
/// always yields the same outcome (given the same resolved user).
pub fn validate(submission: &JobSubmission, resolved_user: &str) -> Result<(), ValidationError> {
    let mut issues = vec![];

    let mut require_text = |field: &'static str, value: &str| {
        if value.trim().is_empty() {
            issues.push(Issue {
                field,
                problem: "must be non-empty text".to_string(),
            });
        }
    };

    require_text("user", resolved_user);
    require_text("project", &submission.project);
    require_text("experiment", &submission.experiment);
    require_text("job", &submission.job);

    match &submission.environment.clone {
        CloneSource::CodePackage(handle) => {
            require_text("environment.clone.code_package", handle)
        }
        CloneSource::Path(path) => require_text("environment.clone.path", path),
    }
    require_text("environment.script", &submission.environment.script);

    if submission.n_workers == 0 {
        issues.push(Issue {
            field: "n_workers",
            problem: "must be a positive integer".to_string(),
        });
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> JobSubmission {
        let mut s = JobSubmission::new(
            "sgd",
            "lr-sweep",
            "baseline",
            RuntimeEnvironment {
                clone: CloneSource::Path("/code/sgd".to_string()),
                script: "train.py".to_string(),
            },
        );
        s.user = Some("alice".to_string());
        s
    }

    #[test]
    fn accepts_a_complete_submission() {
        let s = submission();
        assert!(validate(&s, &s.resolved_user()).is_ok());
    }

    #[test]
    fn reports_every_failing_field() {
        let mut s = submission();
        s.project = "".to_string();
        s.job = " ".to_string();
        s.environment.script = "".to_string();
        s.n_workers = 0;

        let err = validate(&s, "alice").unwrap_err();
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field).collect();
        assert_eq!(
            fields,
            vec!["project", "job", "environment.script", "n_workers"]
        );
    }

    #[test]
    fn rejects_an_empty_clone_target() {
        let mut s = submission();
        s.environment.clone = CloneSource::CodePackage("".to_string());
        let err = validate(&s, "alice").unwrap_err();
        assert_eq!(err.issues[0].field, "environment.clone.code_package");
    }

    #[test]
    fn clone_source_serializes_with_its_shape_tag() {
        let pkg = bson::to_bson(&CloneSource::CodePackage("abc123".to_string())).unwrap();
        assert_eq!(
            pkg.as_document().unwrap().get_str("code_package").unwrap(),
            "abc123"
        );
        let path = bson::to_bson(&CloneSource::Path("/code".to_string())).unwrap();
        assert_eq!(path.as_document().unwrap().get_str("path").unwrap(), "/code");
    }

    #[test]
    fn status_round_trips_as_screaming_case() {
        let b = bson::to_bson(&JobStatus::Scheduled).unwrap();
        assert_eq!(b.as_str().unwrap(), "SCHEDULED");
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
