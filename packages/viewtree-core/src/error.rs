use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable failures surfaced to the calling client. Peer connections
/// never observe these; they only see committed state.
///
/// Protocol misuse (nested transactions, a second root embed) is a caller
/// bypassing the public API and panics instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("stale change id: expected {expected}, current {current}")]
    StaleChangeId { expected: u64, current: u64 },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("unknown id: {0}")]
    UnknownId(String),
}
