//! Precondition failures that stop a pipeline stage before any work starts.

use std::path::PathBuf;

use thiserror::Error;

/// Stage-fatal conditions callers may want to match on.
///
/// Transient remote failures never surface as these; they are retried and,
/// once exhausted, reported as plain `anyhow` errors for the entity or batch
/// that hit them.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One or more required environment credentials are unset or blank.
    #[error("missing environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// A stage input artifact does not exist.
    #[error("required input {0:?} not found")]
    MissingInput(PathBuf),

    /// A stage input artifact exists but has the wrong shape.
    #[error("malformed input {path:?}: {reason}")]
    MalformedInput {
        /// Offending artifact.
        path: PathBuf,
        /// What was expected instead.
        reason: String,
    },

    /// A stage ran but produced nothing usable.
    #[error("{0} produced no output")]
    EmptyStage(&'static str),
}
