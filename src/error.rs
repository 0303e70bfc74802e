// src/error.rs

//! Central error type for the mortar library.
//!
//! Every operation in the library returns [`Result`]. Variants carry the
//! domain failure they describe; [`Error::exit_code`] maps them onto the
//! process exit codes the CLI contract promises.

use std::path::PathBuf;
use thiserror::Error;

/// Library-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced by mortar operations
#[derive(Error, Debug)]
pub enum Error {
    /// A recipe, package, manifest or record could not be located
    #[error("not found: {0}")]
    NotFound(String),

    /// A recipe file failed to parse
    #[error("parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    /// A recipe violated a structural invariant
    #[error("lint error in {field}: {reason}")]
    Lint { field: String, reason: String },

    /// A single download attempt failed (retried internally)
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Downloaded or cached content did not match its expected SHA-256
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// All download attempts and mirrors were exhausted
    #[error("fetch exhausted for {0}")]
    FetchExhausted(String),

    /// A detached signature failed verification
    #[error("signature verification failed for {0}")]
    SignatureInvalid(PathBuf),

    /// An archive extension we do not know how to unpack
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// A patch in the recipe's patch list failed to apply
    #[error("patch {index} failed: {reason}")]
    PatchFailed { index: usize, reason: String },

    /// A build stage exited non-zero
    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// The dependency graph contains a cycle; all member nodes listed
    #[error("dependency cycle detected: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// A named lock could not be acquired within its timeout
    #[error("timed out waiting for lock '{0}'")]
    LockTimeout(String),

    /// Uninstall refused because other installed packages depend on this one
    #[error("{name} is required by: {}", .dependents.join(", "))]
    ReverseDepsPresent {
        name: String,
        dependents: Vec<String>,
    },

    /// Upgrade refused because the candidate EVR is older than the installed one
    #[error("refusing downgrade of {name} from {installed} to {candidate}")]
    DowngradeRefused {
        name: String,
        installed: String,
        candidate: String,
    },

    /// An installed file no longer matches its manifest hash
    #[error("verify mismatch at {0}")]
    VerifyMismatch(PathBuf),

    /// A required host program is not on PATH
    #[error("required host command not found: {0}")]
    MissingHostCommand(String),

    /// The operation was interrupted by a signal
    #[error("interrupted")]
    Interrupted,

    /// Configuration file or value problem
    #[error("config error: {0}")]
    Config(String),

    /// Installed-database record problem
    #[error("database error: {0}")]
    Db(String),

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the documented process exit codes.
    ///
    /// 0 success, 1 domain error, 2 usage/not-found, 127 missing host
    /// command, 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_)
            | Error::Parse { .. }
            | Error::Lint { .. }
            | Error::ReverseDepsPresent { .. }
            | Error::DowngradeRefused { .. } => 2,
            Error::MissingHostCommand(_) => 127,
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}
