//! Error carrier for upload job execution.
//!
//! The queue decides between retrying a job and failing it permanently
//! from a single bit the handler attaches to its error. The queue never
//! inspects the error itself, it only reads the tag.

use std::fmt;

/// An upload job failure, tagged with whether another attempt could
/// plausibly succeed.
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// Tag an error as permanent: retrying cannot change the outcome
    /// (bad configuration, missing staged bytes, rejected input).
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Tag an error as transient, leaving the job eligible for the
    /// queue's backoff schedule.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Untagged errors default to transient; permanence has to be claimed
    /// explicitly.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Shorthand for converting a `Result`'s error into a permanent
/// [`JobError`] at the call site.
pub trait JobResultExt<T> {
    fn unrecoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecoverable_error() {
        let err = JobError::unrecoverable(anyhow::anyhow!("S3 client not configured"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn recoverable_error() {
        let err = JobError::recoverable(anyhow::anyhow!("connection reset"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn from_anyhow_defaults_to_recoverable() {
        let err: JobError = anyhow::anyhow!("some error").into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn result_ext() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = result.unrecoverable().unwrap_err();
        assert!(!err.is_recoverable());
    }
}
