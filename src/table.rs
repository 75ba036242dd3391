//! The process-wide slot table and its lock discipline.
//!
//! Lock order, outermost first: allocation lock, control lock, process-array
//! lock (owned by the collaborator behind [`crate::publish::ProcArraySink`]),
//! per-slot io lock, per-slot mutex. The per-slot mutex guards every mutable
//! field except `in_use` and is only ever held for plain field copies, never
//! across I/O or another lock acquisition.

use crate::ondisk::SlotPersistentData;
use crate::types::{Lsn, TransactionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

/// Mutable portion of a slot descriptor, guarded by the per-slot mutex.
#[derive(Debug, Default)]
pub(crate) struct SlotInner {
    pub(crate) active: bool,
    pub(crate) data: SlotPersistentData,
    /// Values currently published to reclamation; equal to the persistent
    /// `data.xmin`/`data.catalog_xmin` in steady state, but may be set
    /// earlier while a logical slot builds its initial snapshot.
    pub(crate) effective_xmin: TransactionId,
    pub(crate) effective_catalog_xmin: TransactionId,
    pub(crate) candidate_catalog_xmin: TransactionId,
    pub(crate) candidate_xmin_lsn: Lsn,
    pub(crate) candidate_restart_lsn: Lsn,
    pub(crate) candidate_restart_valid: Lsn,
    /// Memory differs from disk; cleared by a completed save.
    pub(crate) dirty: bool,
    /// Set together with `dirty`, cleared when a save starts; a save that
    /// finds it set again at the end must leave `dirty` in place.
    pub(crate) just_dirtied: bool,
}

impl SlotInner {
    pub(crate) fn clear_candidates(&mut self) {
        self.candidate_catalog_xmin = TransactionId::INVALID;
        self.candidate_xmin_lsn = Lsn::INVALID;
        self.candidate_restart_lsn = Lsn::INVALID;
        self.candidate_restart_valid = Lsn::INVALID;
    }
}

/// One entry of the slot table.
#[derive(Debug)]
pub(crate) struct Slot {
    in_use: AtomicBool,
    mutex: Mutex<SlotInner>,
    io_lock: RwLock<()>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            in_use: AtomicBool::new(false),
            mutex: Mutex::new(SlotInner::default()),
            io_lock: RwLock::new(()),
        }
    }

    /// Stable while the control lock is held in either mode, or while the
    /// allocation lock freezes allocation and drop.
    pub(crate) fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Callers must hold the control lock exclusively, except during
    /// single-threaded startup restoration.
    pub(crate) fn set_in_use(&self, value: bool) {
        self.in_use.store(value, Ordering::Release);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.mutex.lock()
    }

    /// Serializes saves of this slot; never held during memory mutation.
    pub(crate) fn io_lock(&self) -> &RwLock<()> {
        &self.io_lock
    }

    pub(crate) fn name_snapshot(&self) -> String {
        self.mutex.lock().data.name.clone()
    }
}

/// Fixed-capacity table of slot descriptors, zero-initialized once at
/// process start.
#[derive(Debug)]
pub(crate) struct SlotTable {
    pub(crate) allocation_lock: RwLock<()>,
    pub(crate) control_lock: RwLock<()>,
    /// Serializes ephemeral-to-persistent upgrades.
    pub(crate) persist_lock: Mutex<()>,
    slots: Box<[Slot]>,
}

impl SlotTable {
    pub(crate) fn new(capacity: usize) -> SlotTable {
        SlotTable {
            allocation_lock: RwLock::new(()),
            control_lock: RwLock::new(()),
            persist_lock: Mutex::new(()),
            slots: (0..capacity).map(|_| Slot::new()).collect(),
        }
    }

    pub(crate) fn memory_size(capacity: usize) -> usize {
        std::mem::size_of::<SlotTable>() + capacity * std::mem::size_of::<Slot>()
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }
}
