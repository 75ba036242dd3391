//! Aggregation queries over the slot table. All scans run under the shared
//! control lock; per-slot fields are copied out under the slot mutex and
//! compared afterwards.

use crate::manager::SlotManager;
use crate::publish::ServerMode;
use crate::types::{DatabaseId, Lsn, TransactionId};
use log::info;
use serde::Serialize;

/// LSN range the registry currently requires the WAL module to retain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotRetentionState {
    pub min_required: Lsn,
    pub max_required: Lsn,
    pub exists_in_use: bool,
}

/// Logical slots bound to one database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DbSlotCounts {
    pub nslots: usize,
    pub nactive: usize,
}

impl DbSlotCounts {
    pub fn any(&self) -> bool {
        self.nslots > 0
    }
}

impl SlotManager {
    /// Publishes the oldest effective xmin and catalog xmin across all
    /// in-use slots to the process array. Transaction-id minima use the
    /// wrap-aware precedence relation, never numeric order.
    ///
    /// `already_locked` is forwarded to the sink for callers that already
    /// hold the process array's lock.
    pub fn recompute_required_xmin(&self, already_locked: bool) {
        let mut agg_xmin = TransactionId::INVALID;
        let mut agg_catalog_xmin = TransactionId::INVALID;
        {
            let _control = self.table.control_lock.read();
            for slot in self.table.slots() {
                if !slot.in_use() {
                    continue;
                }
                let (effective_xmin, effective_catalog_xmin) = {
                    let inner = slot.lock();
                    (inner.effective_xmin, inner.effective_catalog_xmin)
                };
                if effective_xmin.is_valid()
                    && (!agg_xmin.is_valid() || effective_xmin.precedes(agg_xmin))
                {
                    agg_xmin = effective_xmin;
                }
                if effective_catalog_xmin.is_valid()
                    && (!agg_catalog_xmin.is_valid()
                        || effective_catalog_xmin.precedes(agg_catalog_xmin))
                {
                    agg_catalog_xmin = effective_catalog_xmin;
                }
            }
        }
        // Control lock dropped before touching the process array, per the
        // lock order.
        self.proc_array
            .set_replication_slot_xmin(agg_xmin, agg_catalog_xmin, already_locked);
    }

    /// Publishes the restart-LSN range across all in-use slots to the WAL
    /// module and returns it. An invalid restart LSN is neutral: it never
    /// lowers the minimum nor raises the maximum.
    pub fn recompute_required_lsn(&self) -> SlotRetentionState {
        if self.config.max_slots == 0 {
            return SlotRetentionState::default();
        }

        // Physical slots cannot legitimately pin WAL unless the local
        // server is a primary or about to become one.
        let retains_physical = matches!(
            self.server.server_mode(),
            ServerMode::Primary | ServerMode::Pending
        );

        let mut state = SlotRetentionState::default();
        {
            let _control = self.table.control_lock.read();
            for slot in self.table.slots() {
                if !slot.in_use() {
                    continue;
                }
                let (restart_lsn, database) = {
                    let inner = slot.lock();
                    (inner.data.restart_lsn, inner.data.database)
                };
                if !retains_physical && !database.is_logical() {
                    continue;
                }
                state.exists_in_use = true;
                if restart_lsn.is_valid()
                    && (!state.min_required.is_valid() || restart_lsn < state.min_required)
                {
                    state.min_required = restart_lsn;
                }
                if state.max_required < restart_lsn {
                    state.max_required = restart_lsn;
                }
            }
        }

        self.wal.set_replication_slot_minimum_lsn(state.min_required);
        self.wal.set_replication_slot_maximum_lsn(state.max_required);
        state
    }

    /// Oldest WAL position required by logical slots only; invalid if none
    /// exist. Not memoized, callers are infrequent.
    pub fn logical_restart_lsn(&self) -> Lsn {
        let mut result = Lsn::INVALID;
        let _control = self.table.control_lock.read();
        for slot in self.table.slots() {
            if !slot.in_use() {
                continue;
            }
            let (restart_lsn, database) = {
                let inner = slot.lock();
                (inner.data.restart_lsn, inner.data.database)
            };
            if !database.is_logical() {
                continue;
            }
            if restart_lsn.is_valid() && (!result.is_valid() || restart_lsn < result) {
                result = restart_lsn;
            }
        }
        result
    }

    /// Counts the logical slots bound to the given database.
    pub fn count_db_slots(&self, database: DatabaseId) -> DbSlotCounts {
        let mut counts = DbSlotCounts::default();
        if self.config.max_slots == 0 {
            return counts;
        }
        let _control = self.table.control_lock.read();
        for slot in self.table.slots() {
            if !slot.in_use() {
                continue;
            }
            let inner = slot.lock();
            if inner.data.database != database || !inner.data.database.is_logical() {
                continue;
            }
            counts.nslots += 1;
            if inner.active {
                counts.nactive += 1;
            }
        }
        counts
    }

    /// Emits one log line per in-use slot with its restart LSN.
    pub fn report_restart_lsn(&self) {
        if self.config.max_slots == 0 {
            return;
        }
        let _control = self.table.control_lock.read();
        for slot in self.table.slots() {
            if !slot.in_use() {
                continue;
            }
            let inner = slot.lock();
            info!(
                "event=slot_restart_lsn slot={} dummy={} restart_lsn={}",
                inner.data.name, inner.data.is_dummy_standby, inner.data.restart_lsn
            );
        }
    }
}
