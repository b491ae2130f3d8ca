//! Error taxonomy for the execution-and-verdict pipeline.
//!
//! Most of these never reach a learner: sandbox errors are folded into
//! `ExecutionOutcome`, verdict errors trigger the local fallback, and duplicate
//! completions are absorbed as no-ops. Catalog and unknown-id errors are the
//! ones that propagate to the application shell.

use thiserror::Error;

/// Failures of the embedded interpreter.
///
/// `Clone` because a single in-flight initialization hands its result to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("failed to initialize interpreter: {0}")]
    Initialization(String),

    #[error("interpreter worker exited unexpectedly: {0}")]
    Crashed(String),

    #[error("interpreter protocol error: {0}")]
    Protocol(String),

    /// Bytes were waiting on the wire before a request was sent. Nothing ran.
    #[error("interpreter had unexpected output pending: {0}")]
    Stale(String),

    #[error("output exceeded {0} bytes; the run was stopped")]
    OutputLimit(usize),
}

/// Reasons the external verdict endpoint could not be used.
#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("verdict endpoint not configured")]
    Disabled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unusable response: {0}")]
    Malformed(String),

    #[error("endpoint did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Structural problems in catalog data. These are hard errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog has no levels")]
    Empty,

    #[error("duplicate level id '{0}'")]
    DuplicateLevel(String),

    #[error("levels '{first}' and '{second}' share ordinal {order}")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },

    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),

    #[error("level '{0}' has no tasks")]
    EmptyLevel(String),

    #[error("task '{task}' declares level '{declared}' but is listed under '{actual}'")]
    ParentMismatch {
        task: String,
        declared: String,
        actual: String,
    },

    #[error("task '{0}' must reward a positive amount of XP")]
    ZeroXp(String),

    #[error("level '{level}' lists unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite { level: String, prerequisite: String },
}

/// Rejected progress transitions (ids that are not part of the catalog).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("unknown level '{0}'")]
    UnknownLevel(String),

    /// The learner's snapshot could not be loaded; nothing was changed.
    #[error("progress store unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The file for one learner holds another learner's snapshot.
    #[error("snapshot for '{expected}' belongs to '{found}'")]
    Mismatch { expected: String, found: String },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures surfaced by the application shell (HTTP / WebSocket).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("bad request: {0}")]
    BadRequest(String),
}
