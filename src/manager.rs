//! Lifecycle controller: the public operations that allocate, acquire,
//! mutate, persist and drop slots.

use crate::config::SlotConfig;
use crate::error::SlotError;
use crate::fsutil;
use crate::name::validate_slot_name;
use crate::ondisk::SlotPersistentData;
use crate::publish::{ProcArraySink, ServerState, WalSink};
use crate::table::SlotTable;
use crate::types::{DatabaseId, Lsn, SlotPersistency, TransactionId};
use log::{info, warn};
use std::sync::Arc;

/// Session-scoped ownership of one acquired slot.
///
/// Returned by [`SlotManager::create`] and [`SlotManager::acquire`]; consumed
/// by [`SlotManager::release`] and [`SlotManager::drop_acquired`]. Exactly one
/// owner exists per active slot, which is what makes the mutating operations
/// below safe without further coordination between sessions.
#[must_use = "an acquired slot must be released or dropped"]
#[derive(Debug)]
pub struct SlotOwner {
    pub(crate) index: usize,
}

/// The slot registry: a fixed table of descriptors plus the operations that
/// drive a slot through `free -> allocated -> owned -> free`.
pub struct SlotManager {
    pub(crate) config: SlotConfig,
    pub(crate) table: SlotTable,
    pub(crate) proc_array: Arc<dyn ProcArraySink>,
    pub(crate) wal: Arc<dyn WalSink>,
    pub(crate) server: Arc<dyn ServerState>,
}

impl SlotManager {
    /// Builds the zero-initialized slot table. The registry is inert until
    /// [`SlotManager::startup`] has rebuilt state from disk.
    pub fn new(
        config: SlotConfig,
        proc_array: Arc<dyn ProcArraySink>,
        wal: Arc<dyn WalSink>,
        server: Arc<dyn ServerState>,
    ) -> SlotManager {
        let table = SlotTable::new(config.max_slots);
        SlotManager {
            config,
            table,
            proc_array,
            wal,
            server,
        }
    }

    /// Memory footprint of the slot table for a given capacity.
    pub fn table_memory_size(max_slots: usize) -> usize {
        if max_slots == 0 {
            return 0;
        }
        SlotTable::memory_size(max_slots)
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    /// Whether the server's configuration supports using replication slots.
    pub fn check_requirements(&self) -> Result<(), SlotError> {
        self.config.check_requirements()
    }

    /// Creates a new slot, persists it, and hands it to the calling session.
    ///
    /// A name collision fails with [`SlotError::Duplicate`] for both physical
    /// and logical slots; physical callers that want to attach to the
    /// existing slot should call [`SlotManager::acquire`] on that error.
    pub fn create(
        &self,
        name: &str,
        persistency: SlotPersistency,
        is_dummy_standby: bool,
        database: DatabaseId,
        restart_lsn: Lsn,
    ) -> Result<SlotOwner, SlotError> {
        self.check_requirements()?;
        validate_slot_name(name)?;

        // Serializes against other creates and drops for the whole
        // create sequence, so nobody can observe a half-constructed
        // directory or race us for the same name.
        let _alloc = self.table.allocation_lock.write();

        // Holding the control lock shared keeps the in_use flags stable
        // while we look for collisions and a free entry.
        let index = {
            let _control = self.table.control_lock.read();
            let mut free = None;
            let mut duplicate = false;
            for (index, slot) in self.table.slots().iter().enumerate() {
                if slot.in_use() {
                    if slot.lock().data.name == name {
                        duplicate = true;
                        break;
                    }
                } else if free.is_none() {
                    free = Some(index);
                }
            }
            if duplicate {
                if !database.is_logical() {
                    warn!("replication slot \"{name}\" already exists");
                }
                return Err(SlotError::Duplicate {
                    name: name.to_string(),
                });
            }
            match free {
                Some(index) => index,
                None => {
                    for slot in self.table.slots().iter().filter(|s| s.in_use()) {
                        info!("in-use slot: {}", slot.name_snapshot());
                    }
                    return Err(SlotError::Capacity);
                }
            }
        };

        // The entry is unused and we hold the allocation lock, so nobody
        // else can be looking at anything but its in_use flag.
        let slot = self.table.slot(index);
        {
            let mut inner = slot.lock();
            inner.data = SlotPersistentData {
                name: name.to_string(),
                database,
                persistency,
                xmin: TransactionId::INVALID,
                catalog_xmin: TransactionId::INVALID,
                restart_lsn,
                is_dummy_standby,
            };
            inner.effective_xmin = TransactionId::INVALID;
            inner.effective_catalog_xmin = TransactionId::INVALID;
            inner.clear_candidates();
            inner.active = false;
            inner.dirty = false;
            inner.just_dirtied = false;
        }

        // The slot is not marked allocated yet, so no cleanup is needed if
        // this fails.
        self.create_slot_on_disk(slot, name)?;

        // Briefly lock out table scans while the in_use flag flips; active
        // must be set under the same lock or a concurrent acquire could
        // grab the slot first.
        {
            let _control = self.table.control_lock.write();
            slot.set_in_use(true);
            slot.lock().active = true;
        }

        Ok(SlotOwner { index })
    }

    /// Finds a previously created slot and marks it owned by this session.
    pub fn acquire(&self, name: &str, is_dummy_standby: bool) -> Result<SlotOwner, SlotError> {
        self.check_requirements()?;
        validate_slot_name(name)?;

        let mut found = None;
        {
            let _control = self.table.control_lock.read();
            for (index, slot) in self.table.slots().iter().enumerate() {
                if !slot.in_use() {
                    continue;
                }
                let mut inner = slot.lock();
                if inner.data.name != name {
                    continue;
                }
                let was_active = inner.active;
                inner.active = true;
                found = Some((
                    index,
                    was_active,
                    inner.data.database,
                    inner.data.is_dummy_standby,
                ));
                break;
            }
        }

        let Some((index, was_active, database, slot_dummy)) = found else {
            return Err(SlotError::NotFound {
                name: name.to_string(),
            });
        };
        if was_active {
            if database.is_logical() || is_dummy_standby != slot_dummy {
                return Err(SlotError::InUse {
                    name: name.to_string(),
                });
            }
            // A physical consumer reconnecting after a crashed session.
            warn!("replication slot \"{name}\" is already active");
        }

        if database.is_logical() {
            self.table.slot(index).lock().clear_candidates();
        }

        Ok(SlotOwner { index })
    }

    /// Whether an in-use slot with this name exists.
    pub fn find(&self, name: &str) -> Result<bool, SlotError> {
        validate_slot_name(name)?;
        if self.config.max_slots == 0 {
            return Ok(false);
        }
        let _control = self.table.control_lock.read();
        Ok(self
            .table
            .slots()
            .iter()
            .any(|slot| slot.in_use() && slot.lock().data.name == name))
    }

    /// Disconnects the session from its slot. The slot and the resources it
    /// pins are preserved, except for ephemeral slots, which are deleted.
    pub fn release(&self, owner: SlotOwner) {
        let slot = self.table.slot(owner.index);
        let (persistency, active, name) = {
            let inner = slot.lock();
            (inner.data.persistency, inner.active, inner.data.name.clone())
        };
        if !active {
            return;
        }

        if persistency == SlotPersistency::Ephemeral {
            if let Err(err) = self.drop_acquired(owner) {
                warn!("event=slot_drop_failed slot={name} error={err}");
            }
            self.proc_array.clear_logical_decoding_flag();
            return;
        }

        slot.lock().active = false;

        // If the slot temporarily restrained the xmin horizon to build a
        // catalog snapshot, lift that constraint now; it only holds while
        // the initial snapshot is still acquired.
        let clear_transient = {
            let inner = slot.lock();
            !inner.data.xmin.is_valid() && inner.effective_xmin.is_valid()
        };
        if clear_transient {
            slot.lock().effective_xmin = TransactionId::INVALID;
            self.recompute_required_xmin(false);
        }

        self.proc_array.clear_logical_decoding_flag();
    }

    /// Permanently drops the slot identified by name.
    pub fn drop_slot(&self, name: &str) -> Result<(), SlotError> {
        let owner = self.acquire(name, false)?;
        let is_logical = self.table.slot(owner.index).lock().data.database.is_logical();
        self.drop_acquired(owner)?;
        if is_logical && self.server.is_running() && !self.server.recovery_in_progress() {
            self.wal.log_slot_drop(name);
        }
        Ok(())
    }

    /// Permanently drops the currently acquired slot.
    pub fn drop_acquired(&self, owner: SlotOwner) -> Result<(), SlotError> {
        let slot = self.table.slot(owner.index);
        let (name, persistency) = {
            let inner = slot.lock();
            (inner.data.name.clone(), inner.data.persistency)
        };

        // Nobody may create a slot under this name until the old directory
        // is gone, and nobody may drop it twice.
        let _alloc = self.table.allocation_lock.write();

        let dir = self.slot_dir(&name);
        let tmp_dir = self.tmp_slot_dir(&name);

        // Renaming the directory is the point of no return: afterwards the
        // slot no longer exists to a restarting server.
        match std::fs::rename(&dir, &tmp_dir) {
            Ok(()) => {
                // The rename and its parent must be durable before the
                // in-memory entry is freed; an un-fsynced rename could
                // resurrect the slot after a crash.
                if let Err(err) = fsutil::fsync_dir(&tmp_dir) {
                    panic!("could not fsync directory {tmp_dir:?}: {err}");
                }
                if let Err(err) = fsutil::fsync_dir(&self.config.slot_dir) {
                    panic!(
                        "could not fsync directory {:?}: {err}",
                        self.config.slot_dir
                    );
                }
            }
            Err(err) => {
                slot.lock().active = false;
                // An ephemeral drop may run during error handling; the
                // caller does not expect the slot to survive, so fail
                // softly and leave on-disk residue for startup to sweep.
                if persistency == SlotPersistency::Ephemeral {
                    warn!(
                        "event=slot_drop_rename_failed slot={name} from={} to={} error={err}",
                        dir.display(),
                        tmp_dir.display()
                    );
                    return Ok(());
                }
                return Err(SlotError::io("rename", &dir, err));
            }
        }

        // Lock out concurrent scans long enough to kill the entry. Nobody
        // can be attached to the slot anymore, we held the only owner.
        {
            let _control = self.table.control_lock.write();
            slot.lock().active = false;
            slot.set_in_use(false);
        }

        // The slot no longer pins anything; published limits may loosen.
        self.recompute_required_xmin(false);
        self.recompute_required_lsn();

        // Failure here only blocks reuse of the name until the next
        // restart sweeps the .tmp directory.
        if let Err(err) = fsutil::remove_tree(&tmp_dir) {
            warn!(
                "event=slot_drop_cleanup_failed path={} error={err}",
                tmp_dir.display()
            );
        }

        Ok(())
    }

    /// Serializes the acquired slot's state to disk, guaranteeing it
    /// survives a crash.
    pub fn save(&self, owner: &SlotOwner) -> Result<(), SlotError> {
        let slot = self.table.slot(owner.index);
        let name = slot.name_snapshot();
        let dir = self.slot_dir(&name);
        // The directory can be legitimately absent after a point-in-time
        // recovery; rebuild it rather than failing the save.
        if !dir.exists() {
            return self.create_slot_on_disk(slot, &name);
        }
        self.save_slot_to_path(slot, &dir)
    }

    /// Flags the acquired slot for write-back. Cheap; the flush happens at
    /// the next explicit save or checkpoint.
    pub fn mark_dirty(&self, owner: &SlotOwner) {
        let mut inner = self.table.slot(owner.index).lock();
        inner.just_dirtied = true;
        inner.dirty = true;
    }

    /// Upgrades an ephemeral slot to persistent and flushes it.
    pub fn persist(&self, owner: &SlotOwner) -> Result<(), SlotError> {
        let slot = self.table.slot(owner.index);
        debug_assert_ne!(slot.lock().data.persistency, SlotPersistency::Persistent);
        {
            let _upgrade = self.table.persist_lock.lock();
            slot.lock().data.persistency = SlotPersistency::Persistent;
        }
        self.mark_dirty(owner);
        self.save(owner)
    }

    /// Invalidates the restart LSN of an acquired dummy-standby slot.
    pub fn set_dummy_standby_lsn_invalid(&self, owner: &SlotOwner) {
        let slot = self.table.slot(owner.index);
        let needs_clear = {
            let inner = slot.lock();
            debug_assert!(inner.data.is_dummy_standby);
            inner.data.restart_lsn.is_valid()
        };
        if needs_clear {
            slot.lock().data.restart_lsn = Lsn::INVALID;
            self.mark_dirty(owner);
            self.recompute_required_lsn();
        }
    }

    /// Records consumer feedback: the oldest transaction the consumer still
    /// needs. Takes effect immediately and tightens the published horizon.
    pub fn update_xmin(&self, owner: &SlotOwner, xmin: TransactionId) {
        {
            let mut inner = self.table.slot(owner.index).lock();
            inner.data.xmin = xmin;
            inner.effective_xmin = xmin;
        }
        self.mark_dirty(owner);
        self.recompute_required_xmin(false);
    }

    /// Records consumer feedback: the oldest WAL position the consumer
    /// still needs.
    pub fn update_restart_lsn(&self, owner: &SlotOwner, restart_lsn: Lsn) {
        self.table.slot(owner.index).lock().data.restart_lsn = restart_lsn;
        self.mark_dirty(owner);
        self.recompute_required_lsn();
    }

    /// Publishes an xmin to reclamation without persisting it, for the
    /// snapshot-building phase of a logical slot. [`SlotManager::release`]
    /// lifts the constraint if the slot never persists an xmin of its own.
    pub fn set_snapshot_build_xmin(&self, owner: &SlotOwner, xmin: TransactionId) {
        self.table.slot(owner.index).lock().effective_xmin = xmin;
        self.recompute_required_xmin(false);
    }

    /// Proposes a catalog xmin that becomes effective once the consumer
    /// confirms a flush past `valid_from`.
    pub fn propose_catalog_xmin(
        &self,
        owner: &SlotOwner,
        valid_from: Lsn,
        xmin: TransactionId,
    ) {
        let updated = {
            let mut inner = self.table.slot(owner.index).lock();
            if inner.data.catalog_xmin.is_valid() && !inner.data.catalog_xmin.precedes(xmin) {
                false
            } else {
                inner.candidate_catalog_xmin = xmin;
                inner.candidate_xmin_lsn = valid_from;
                true
            }
        };
        if updated {
            self.mark_dirty(owner);
        }
    }

    /// Proposes a restart LSN that becomes effective once the consumer
    /// confirms a flush past `valid_from`.
    pub fn propose_restart_lsn(&self, owner: &SlotOwner, valid_from: Lsn, restart_lsn: Lsn) {
        let updated = {
            let mut inner = self.table.slot(owner.index).lock();
            if inner.candidate_restart_valid.is_valid()
                && restart_lsn <= inner.candidate_restart_lsn
            {
                false
            } else {
                inner.candidate_restart_lsn = restart_lsn;
                inner.candidate_restart_valid = valid_from;
                true
            }
        };
        if updated {
            self.mark_dirty(owner);
        }
    }

    /// Promotes any candidate values whose validity point the consumer has
    /// confirmed flushing past, persists the slot, and loosens the
    /// published aggregates accordingly.
    pub fn confirm_flush(&self, owner: &SlotOwner, confirmed: Lsn) -> Result<(), SlotError> {
        let slot = self.table.slot(owner.index);
        let (updated_xmin, updated_restart) = {
            let mut inner = slot.lock();
            let mut updated_xmin = false;
            let mut updated_restart = false;
            if inner.candidate_xmin_lsn.is_valid() && inner.candidate_xmin_lsn <= confirmed {
                inner.data.catalog_xmin = inner.candidate_catalog_xmin;
                inner.candidate_catalog_xmin = TransactionId::INVALID;
                inner.candidate_xmin_lsn = Lsn::INVALID;
                updated_xmin = true;
            }
            if inner.candidate_restart_valid.is_valid()
                && inner.candidate_restart_valid <= confirmed
            {
                inner.data.restart_lsn = inner.candidate_restart_lsn;
                inner.candidate_restart_lsn = Lsn::INVALID;
                inner.candidate_restart_valid = Lsn::INVALID;
                updated_restart = true;
            }
            (updated_xmin, updated_restart)
        };

        if !updated_xmin && !updated_restart {
            return Ok(());
        }

        self.mark_dirty(owner);
        self.save(owner)?;

        if updated_xmin {
            {
                let mut inner = slot.lock();
                inner.effective_catalog_xmin = inner.data.catalog_xmin;
            }
            self.recompute_required_xmin(false);
        }
        if updated_restart {
            self.recompute_required_lsn();
        }
        Ok(())
    }

    /// Read-only snapshot of an acquired slot's persistent fields.
    pub fn acquired_data(&self, owner: &SlotOwner) -> SlotPersistentData {
        self.table.slot(owner.index).lock().data.clone()
    }
}
