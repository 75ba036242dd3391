//! Startup restorer: scans the slot directory before crash recovery,
//! salvages or discards each entry, rebuilds the in-memory table and
//! recomputes the published aggregates.
//!
//! Anything irrecoverable here panics. Crash recovery re-runs the same
//! restoration deterministically, so a panic is the mechanism by which an
//! interrupted fsync gets retried until it sticks.

use crate::error::SlotError;
use crate::fsutil;
use crate::manager::SlotManager;
use crate::ondisk::{RecordError, SlotRecord, ONDISK_TOTAL_SIZE};
use crate::persistence::{STATE_BACKUP_FILE, STATE_FILE, STATE_TMP_FILE};
use crate::types::SlotPersistency;
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

impl SlotManager {
    /// Loads all slots from disk into memory at process start. Must run
    /// before crash recovery begins replaying WAL.
    pub fn startup(&self) -> Result<(), SlotError> {
        if self.config.max_slots == 0 {
            return Ok(());
        }
        debug!("starting up replication slots");

        let root = &self.config.slot_dir;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fsutil::create_private_dir(root)
                    .map_err(|err| SlotError::io("create directory", root, err))?;
                fsutil::fsync_dir(root).map_err(|err| SlotError::io("fsync", root, err))?;
                return Ok(());
            }
            Err(err) => return Err(SlotError::io("open directory", root, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|err| SlotError::io("read directory", root, err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| SlotError::io("stat", entry.path(), err))?;
            // Only slot directories belong to us; leave foreign files alone.
            if !file_type.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if name.ends_with(".tmp") {
                // We crashed while this slot was being created or dropped.
                if let Err(err) = fsutil::remove_tree(&entry.path()) {
                    warn!(
                        "event=slot_tmp_cleanup_failed path={} error={err}",
                        entry.path().display()
                    );
                    continue;
                }
                fsutil::fsync_dir(root).map_err(|err| SlotError::io("fsync", root, err))?;
                continue;
            }

            self.restore_one(name);
        }

        // All surviving slots are in memory; republish the horizons they pin.
        self.recompute_required_xmin(false);
        self.recompute_required_lsn();
        Ok(())
    }

    /// Restores a single slot directory, salvaging from the backup copy if
    /// the primary state file is corrupt.
    fn restore_one(&self, name: &str) {
        let dir = self.slot_dir(name);

        let tmp_path = dir.join(STATE_TMP_FILE);
        let had_tmp = match fsutil::remove_file_if_exists(&tmp_path) {
            Ok(had_tmp) => had_tmp,
            Err(err) => panic!("could not unlink file {tmp_path:?}: {err}"),
        };
        // A leftover temp file means a save was cut short, and the backup
        // written by that save no longer matches the live state file.
        let mut ignore_backup = had_tmp;
        if had_tmp {
            let backup_path = dir.join(STATE_BACKUP_FILE);
            if let Err(err) = fsutil::remove_file_if_exists(&backup_path) {
                panic!("could not unlink file {backup_path:?}: {err}");
            }
        }

        debug!("restoring replication slot from {:?}", dir.join(STATE_FILE));

        let mut from_backup = false;
        let record = loop {
            let path = if from_backup {
                dir.join(STATE_BACKUP_FILE)
            } else {
                dir.join(STATE_FILE)
            };
            match read_state_file(&path, &dir) {
                Ok(record) => break record,
                Err(err) if !ignore_backup => {
                    warn!(
                        "event=slot_state_corrupt path={} error={err} action=try_backup",
                        path.display()
                    );
                    ignore_backup = true;
                    from_backup = true;
                }
                Err(err) => panic!("replication slot file {path:?} is corrupt: {err}"),
            }
        };

        // A slot that never became persistent did not survive the crash.
        if record.data.persistency != SlotPersistency::Persistent {
            if let Err(err) = fsutil::remove_tree(&dir) {
                warn!(
                    "event=slot_cleanup_failed path={} error={err}",
                    dir.display()
                );
            }
            if let Err(err) = fsutil::fsync_dir(&self.config.slot_dir) {
                panic!(
                    "could not fsync directory {:?}: {err}",
                    self.config.slot_dir
                );
            }
            return;
        }

        if from_backup {
            self.recover_state_file(&record, name);
        }

        // Nothing can be active yet, so no locks are needed.
        let mut restored = false;
        for slot in self.table.slots() {
            if slot.in_use() {
                continue;
            }
            {
                let mut inner = slot.lock();
                inner.data = record.data.clone();
                inner.effective_xmin = inner.data.xmin;
                inner.effective_catalog_xmin = inner.data.catalog_xmin;
                inner.clear_candidates();
                inner.active = false;
                inner.dirty = false;
                inner.just_dirtied = false;
            }
            slot.set_in_use(true);
            restored = true;
            break;
        }
        if !restored {
            panic!("too many replication slots active before shutdown; increase max_slots and restart");
        }
    }

    /// Rewrites the primary state file from a record that was verified
    /// against the backup copy.
    fn recover_state_file(&self, record: &SlotRecord, name: &str) {
        let path = self.slot_dir(name).join(STATE_FILE);
        warn!("event=slot_state_recovered slot={name} source=backup");

        let bytes = record.encode();
        let mut file = match OpenOptions::new().write(true).truncate(true).open(&path) {
            Ok(file) => file,
            Err(err) => panic!("recover failed, could not open slot file {path:?}: {err}"),
        };
        if let Err(err) = file.write_all(&bytes) {
            panic!("recover failed, could not write to slot file {path:?}: {err}");
        }
        if let Err(err) = file.sync_all() {
            panic!("recover failed, could not fsync slot file {path:?}: {err}");
        }
    }
}

/// Reads and decodes one state file. I/O failures panic; only decode
/// failures are reported back so the caller can fall over to the backup.
fn read_state_file(path: &Path, parent: &Path) -> Result<SlotRecord, RecordError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        // The directory was renamed into place only after the state file
        // was fsynced, so an unopenable state file is not a salvage case.
        Err(err) => panic!("could not open file {path:?}: {err}"),
    };

    // Sync before reading: we may have crashed before this file reached
    // disk and must not restore on that basis.
    if let Err(err) = file.sync_all() {
        panic!("could not fsync file {path:?}: {err}");
    }
    if let Err(err) = fsutil::fsync_dir(parent) {
        panic!("could not fsync directory {parent:?}: {err}");
    }

    let mut bytes = [0u8; ONDISK_TOTAL_SIZE];
    if let Err(err) = file.read_exact(&mut bytes) {
        panic!(
            "could not read file {path:?}, expected {ONDISK_TOTAL_SIZE} bytes: {err}"
        );
    }
    SlotRecord::decode(&bytes)
}
