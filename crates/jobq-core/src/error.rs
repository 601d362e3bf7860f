use thiserror::Error;

/// The closed set of ways a handler invocation can end early.
///
/// Only `Terminate` is fatal to the worker; the dispatcher recovers from
/// every other variant and reduces it to a status code.
#[derive(Error, Debug)]
pub enum JobError {
    /// The handler chose to abandon the job. Counted as a clean completion.
    #[error("job cancelled by handler")]
    Cancelled,

    /// The job was cut short while a shutdown signal was being processed
    /// concurrently with it. Counted as a clean completion.
    #[error("job interrupted by worker shutdown")]
    Interrupted,

    /// The handler is asking the whole worker to stop. Recorded as the
    /// worker's fatal error and re-raised from `start()` after the drain.
    #[error("worker termination requested: {0}")]
    Terminate(String),

    /// Any other handler failure. Logged and counted as a logical failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// True for the one variant that must cross component boundaries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::Terminate(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_terminate_is_fatal() {
        assert!(JobError::Terminate("disk full".into()).is_fatal());
        assert!(!JobError::Cancelled.is_fatal());
        assert!(!JobError::Interrupted.is_fatal());
        assert!(!JobError::Other(anyhow::anyhow!("boom")).is_fatal());
    }

    #[test]
    fn test_other_wraps_anyhow_context() {
        let err: JobError = anyhow::anyhow!("parse failed").into();
        assert!(err.to_string().contains("parse failed"));
    }
}
