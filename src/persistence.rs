//! File layout manager: crash-safe creation and write-back of the per-slot
//! directories, plus the checkpoint-time flusher.
//!
//! Layout under the registry root:
//! `<name>/state` live record, `<name>/state.backup` second copy written on
//! every save, `<name>/state.tmp` transient write target, `<name>.tmp`
//! transient directory during create and drop.

use crate::error::SlotError;
use crate::fsutil;
use crate::manager::SlotManager;
use crate::ondisk::SlotRecord;
use crate::table::Slot;
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) const STATE_FILE: &str = "state";
pub(crate) const STATE_TMP_FILE: &str = "state.tmp";
pub(crate) const STATE_BACKUP_FILE: &str = "state.backup";

impl SlotManager {
    pub(crate) fn slot_dir(&self, name: &str) -> PathBuf {
        self.config.slot_dir.join(name)
    }

    pub(crate) fn tmp_slot_dir(&self, name: &str) -> PathBuf {
        self.config.slot_dir.join(format!("{name}.tmp"))
    }

    /// Builds the on-disk directory for a freshly populated slot entry.
    ///
    /// The directory is assembled under `<name>.tmp` and renamed into place
    /// only once its state file is durable, so a crash at any point leaves
    /// either no trace or a complete slot.
    pub(crate) fn create_slot_on_disk(&self, slot: &Slot, name: &str) -> Result<(), SlotError> {
        let dir = self.slot_dir(name);
        let tmp_dir = self.tmp_slot_dir(name);

        // A previous create or drop of this name may have crashed and left
        // a temp directory lying around.
        fsutil::remove_tree(&tmp_dir).map_err(|err| SlotError::io("remove", &tmp_dir, err))?;

        fsutil::create_private_dir(&tmp_dir)
            .map_err(|err| SlotError::io("create directory", &tmp_dir, err))?;
        fsutil::fsync_dir(&tmp_dir).map_err(|err| SlotError::io("fsync", &tmp_dir, err))?;

        // Force the write; the save path skips clean slots.
        slot.lock().dirty = true;
        self.save_slot_to_path(slot, &tmp_dir)?;

        std::fs::rename(&tmp_dir, &dir).map_err(|err| SlotError::io("rename", &tmp_dir, err))?;

        // Past the rename we cannot report failure: we would not know
        // whether the slot survives an OS crash. Panic and let the restart
        // retry the fsync until it works.
        if let Err(err) = fsutil::fsync_dir(&dir) {
            panic!("could not fsync directory {dir:?}: {err}");
        }
        if let Err(err) = fsutil::fsync_dir(&self.config.slot_dir) {
            panic!(
                "could not fsync directory {:?}: {err}",
                self.config.slot_dir
            );
        }

        if !self.server.recovery_in_progress() {
            info!("created replication slot \"{name}\" on disk");
        }
        Ok(())
    }

    /// Writes the slot's persistent subset into `dir` if the slot is dirty.
    pub(crate) fn save_slot_to_path(&self, slot: &Slot, dir: &Path) -> Result<(), SlotError> {
        // First check whether there is anything to write out.
        let was_dirty = {
            let mut inner = slot.lock();
            let was_dirty = inner.dirty;
            inner.just_dirtied = false;
            was_dirty
        };
        if !was_dirty {
            return Ok(());
        }

        // Serialize against other writers of this slot's files.
        let _io = slot.io_lock().write();

        // Snapshot the persistent subset once; both copies written below
        // must be byte-identical for the salvage path to be sound.
        let record = SlotRecord::new(slot.lock().data.clone());
        let bytes = record.encode();

        let backup_path = dir.join(STATE_BACKUP_FILE);
        let tmp_path = dir.join(STATE_TMP_FILE);
        // Backup first: at any crash instant either no new state file
        // exists and the backup holds a complete record, or the rename
        // below has happened and both files decode.
        write_record_file(&backup_path, &bytes)?;
        write_record_file(&tmp_path, &bytes)?;

        let state_path = dir.join(STATE_FILE);
        std::fs::rename(&tmp_path, &state_path)
            .map_err(|err| SlotError::io("rename", &tmp_path, err))?;

        // The rename is published; failing to make it durable now would
        // leave the on-disk generation ambiguous.
        if let Err(err) = fsutil::fsync_file(&state_path) {
            panic!("could not fsync file {state_path:?}: {err}");
        }
        if let Err(err) = fsutil::fsync_dir(dir) {
            panic!("could not fsync directory {dir:?}: {err}");
        }
        if let Err(err) = fsutil::fsync_dir(&self.config.slot_dir) {
            panic!(
                "could not fsync directory {:?}: {err}",
                self.config.slot_dir
            );
        }

        // Wrote successfully; unset the dirty bit unless somebody dirtied
        // the slot again while we were writing.
        {
            let mut inner = slot.lock();
            if !inner.just_dirtied {
                inner.dirty = false;
            }
        }
        Ok(())
    }

    /// Walks the table at checkpoint time and persists every dirty slot.
    /// Per-slot failures are logged and never fail the checkpoint.
    pub fn checkpoint(&self) {
        if self.config.max_slots == 0 {
            return;
        }
        debug!("performing replication slot checkpoint");

        // Holding the allocation lock shared freezes the in_use flags
        // without blocking concurrent acquire or release.
        let _alloc = self.table.allocation_lock.read();
        for slot in self.table.slots() {
            if !slot.in_use() {
                continue;
            }
            let name = slot.name_snapshot();
            let dir = self.slot_dir(&name);
            let result = if dir.exists() {
                self.save_slot_to_path(slot, &dir)
            } else {
                self.create_slot_on_disk(slot, &name)
            };
            if let Err(err) = result {
                warn!("event=slot_checkpoint_save_failed slot={name} error={err}");
            }
        }
    }
}

fn write_record_file(path: &Path, bytes: &[u8]) -> Result<(), SlotError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|err| SlotError::io("create", path, err))?;
    file.write_all(bytes)
        .map_err(|err| SlotError::io("write", path, err))?;
    file.sync_all()
        .map_err(|err| SlotError::io("fsync", path, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_record_file_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.tmp");
        write_record_file(&path, b"first-generation-bytes").unwrap();
        write_record_file(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
