use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// "Key not found" is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from creating, growing, reading or renaming a run file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A run file holds fewer bytes than its recorded length.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Rejected construction parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal merge/flush precondition did not hold.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// The key is one of the sentinel bounds of a memtable run.
    #[error("Key is reserved as a run sentinel")]
    ReservedKey,

    /// The value is the tombstone marker.
    #[error("Value is reserved as the tombstone marker")]
    ReservedValue,

    /// The background compaction thread panicked.
    #[error("Background compaction panicked")]
    CompactionPanicked,

    /// An earlier flush or merge failed; the engine refuses further work.
    #[error("Engine unusable after an earlier failure: {0}")]
    EngineFailed(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
