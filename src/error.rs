use std::fmt;

use thiserror::Error;

// error taxonomy for the submission core. every failure surfaces to the
// immediate caller; there is no retry layer in here.

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    // metadata store is unreachable or rejected a write
    #[error("metadata store error: {0}")]
    Persistence(String),

    // blob upload/download did not complete
    #[error("blob storage error: {0}")]
    Storage(String),

    // malicious or corrupt archive; extraction aborted before any write
    #[error("archive entry `{0}` escapes the extraction root")]
    PathTraversal(String),

    // the control plane rejected the workload
    #[error("workload submission rejected: {0}")]
    Dispatch(String),

    #[error("no job with id `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

// a single rejected field of a job submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub field: &'static str,
    pub problem: String,
}

// all failing fields of a submission, not just the first
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for issue in &self.issues {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", issue.field, issue.problem)?;
            first = false;
        }
        Ok(())
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}
