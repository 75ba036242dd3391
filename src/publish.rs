//! Seams towards the modules that consume published retention limits.
//!
//! The registry never decides when reclamation runs; it only pushes the
//! aggregated limits through these traits. The in-memory implementations
//! exist for embedding in tests and single-process tools.

use crate::types::{Lsn, TransactionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Role of the local node, as seen by the WAL retention computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMode {
    Primary,
    /// Promotion in flight; treated like a primary for retention purposes.
    Pending,
    Standby,
}

/// Consumer of the aggregated transaction-id horizon (the process array in
/// the host server).
pub trait ProcArraySink: Send + Sync {
    /// Publishes the oldest xmin / catalog xmin any slot still needs.
    /// `already_locked` is set when the caller already holds the process
    /// array's own lock and acquisition must be skipped.
    fn set_replication_slot_xmin(
        &self,
        xmin: TransactionId,
        catalog_xmin: TransactionId,
        already_locked: bool,
    );

    /// Clears the session-level "in logical decoding" flag on release.
    fn clear_logical_decoding_flag(&self);
}

/// Consumer of the aggregated LSN horizon (the WAL module in the host
/// server).
pub trait WalSink: Send + Sync {
    fn set_replication_slot_minimum_lsn(&self, min_required: Lsn);
    fn set_replication_slot_maximum_lsn(&self, max_required: Lsn);

    /// Emits a durable drop record for a logical slot.
    fn log_slot_drop(&self, name: &str);
}

/// Read-only view of server lifecycle state the registry needs.
pub trait ServerState: Send + Sync {
    fn server_mode(&self) -> ServerMode;
    fn is_running(&self) -> bool;
    fn recovery_in_progress(&self) -> bool;
}

/// Records published xmins instead of forwarding them.
#[derive(Debug, Default)]
pub struct InMemoryProcArray {
    slot_xmin: Mutex<(TransactionId, TransactionId)>,
    logical_decoding: AtomicBool,
}

impl InMemoryProcArray {
    pub fn new() -> InMemoryProcArray {
        InMemoryProcArray::default()
    }

    pub fn slot_xmin(&self) -> (TransactionId, TransactionId) {
        *self.slot_xmin.lock()
    }

    pub fn in_logical_decoding(&self) -> bool {
        self.logical_decoding.load(Ordering::Acquire)
    }

    pub fn set_logical_decoding_flag(&self) {
        self.logical_decoding.store(true, Ordering::Release);
    }
}

impl ProcArraySink for InMemoryProcArray {
    fn set_replication_slot_xmin(
        &self,
        xmin: TransactionId,
        catalog_xmin: TransactionId,
        _already_locked: bool,
    ) {
        *self.slot_xmin.lock() = (xmin, catalog_xmin);
    }

    fn clear_logical_decoding_flag(&self) {
        self.logical_decoding.store(false, Ordering::Release);
    }
}

/// Records published LSN limits and drop records instead of forwarding them.
#[derive(Debug, Default)]
pub struct InMemoryWalSink {
    min_required: AtomicU64,
    max_required: AtomicU64,
    dropped: Mutex<Vec<String>>,
}

impl InMemoryWalSink {
    pub fn new() -> InMemoryWalSink {
        InMemoryWalSink::default()
    }

    pub fn minimum_lsn(&self) -> Lsn {
        Lsn(self.min_required.load(Ordering::Acquire))
    }

    pub fn maximum_lsn(&self) -> Lsn {
        Lsn(self.max_required.load(Ordering::Acquire))
    }

    pub fn dropped_slots(&self) -> Vec<String> {
        self.dropped.lock().clone()
    }
}

impl WalSink for InMemoryWalSink {
    fn set_replication_slot_minimum_lsn(&self, min_required: Lsn) {
        self.min_required.store(min_required.0, Ordering::Release);
    }

    fn set_replication_slot_maximum_lsn(&self, max_required: Lsn) {
        self.max_required.store(max_required.0, Ordering::Release);
    }

    fn log_slot_drop(&self, name: &str) {
        self.dropped.lock().push(name.to_string());
    }
}

/// Fixed server-state answers for embedding and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticServerState {
    pub mode: ServerMode,
    pub running: bool,
    pub recovery: bool,
}

impl StaticServerState {
    pub fn primary() -> StaticServerState {
        StaticServerState {
            mode: ServerMode::Primary,
            running: true,
            recovery: false,
        }
    }

    pub fn standby() -> StaticServerState {
        StaticServerState {
            mode: ServerMode::Standby,
            running: true,
            recovery: true,
        }
    }
}

impl ServerState for StaticServerState {
    fn server_mode(&self) -> ServerMode {
        self.mode
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn recovery_in_progress(&self) -> bool {
        self.recovery
    }
}
