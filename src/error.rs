//! Error taxonomy for the index store, scanner, watcher, snapshot codec and
//! query engine (spec §7).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type. Each variant corresponds to one of §7's error
/// categories. `Cancelled` and per-entry `ScanIo` failures are recoverable
/// and are usually logged and swallowed by the caller rather than
/// propagated; `InvariantViolation` is never handled — see
/// [`abort_on_invariant_violation`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("scan error at {path}: {message}")]
    ScanIo { path: PathBuf, message: String },

    #[error("snapshot load failed: {message}")]
    LoadCorruption { message: String },

    #[error("snapshot save failed: {message}")]
    SaveIo { message: String },

    #[error("query parse error near {token:?}: {message}")]
    QueryParse { token: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl Error {
    pub fn scan_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ScanIo {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn load_corruption(message: impl Into<String>) -> Self {
        Error::LoadCorruption {
            message: message.into(),
        }
    }

    pub fn save_io(message: impl Into<String>) -> Self {
        Error::SaveIo {
            message: message.into(),
        }
    }
}

/// A non-fatal diagnostic attached to a successfully parsed query whose
/// construction still contained one or more malformed atoms (§7
/// `QueryParse`): the offending atom is downgraded to "match everything"
/// and the query still runs, but the caller is told which token was bad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDiagnostic {
    pub token: String,
    pub message: String,
}

/// Logs an invariant violation at `error!` and aborts the process. Every
/// call site that can observe `InvariantViolation` (sorted-array/remove
/// mismatches, a missing ancestor during path reconstruction) must route
/// through here rather than handling the error, per §7: these are
/// programming errors, not recoverable conditions.
#[track_caller]
pub fn abort_on_invariant_violation(message: impl Into<String>) -> ! {
    let message = message.into();
    log::error!("invariant violation: {message}");
    panic!("invariant violation: {message}");
}
