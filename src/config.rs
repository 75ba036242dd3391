use crate::error::SlotError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// WAL detail levels, ordered from least to most verbose. Slot operations
/// require `Archive` or higher.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WalLevel {
    Minimal,
    #[default]
    Archive,
    HotStandby,
    Logical,
}

/// Slot subsystem settings, read once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Capacity of the slot table; zero disables the subsystem.
    pub max_slots: usize,
    pub wal_level: WalLevel,
    /// Root directory holding one subdirectory per slot.
    pub slot_dir: PathBuf,
}

impl SlotConfig {
    pub fn new(max_slots: usize, wal_level: WalLevel, slot_dir: impl Into<PathBuf>) -> SlotConfig {
        SlotConfig {
            max_slots,
            wal_level,
            slot_dir: slot_dir.into(),
        }
    }

    /// Whether the server's configuration supports using replication slots.
    pub fn check_requirements(&self) -> Result<(), SlotError> {
        if self.max_slots == 0 {
            return Err(SlotError::SlotsDisabled);
        }
        if self.wal_level < WalLevel::Archive {
            return Err(SlotError::WalLevelTooLow);
        }
        Ok(())
    }
}
