use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recoverable failures surfaced by the slot registry.
///
/// Irrecoverable conditions (torn state with no salvageable backup, fsync
/// failure after a rename has been published) panic instead; the host server
/// maps that to crash recovery, which re-runs startup restoration
/// deterministically.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("invalid replication slot name \"{name}\": {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("replication slot name \"{name}\" is too long")]
    NameTooLong { name: String },
    #[error("replication slot \"{name}\" already exists")]
    Duplicate { name: String },
    #[error("replication slot \"{name}\" does not exist")]
    NotFound { name: String },
    #[error("replication slot \"{name}\" is already active")]
    InUse { name: String },
    #[error("all replication slots are in use")]
    Capacity,
    #[error("replication slots can only be used if max_slots > 0")]
    SlotsDisabled,
    #[error("replication slots can only be used if wal_level >= archive")]
    WalLevelTooLow,
    #[error("{op} failed for \"{path}\": {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SlotError {
    pub(crate) fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> SlotError {
        SlotError::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
