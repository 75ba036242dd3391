//! Replication slot registry for a clustered relational database node.
//!
//! Slots record, on behalf of WAL consumers, the oldest log position and the
//! oldest transaction ids the node must retain, so that log trimming and
//! vacuum never remove data a replica or logical decoder has not consumed.
//! The registry keeps a fixed-capacity table of slot descriptors in memory,
//! persists each slot crash-safely under its own directory, and publishes
//! the aggregated retention limits through the seams in [`publish`].
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod aggregates;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod manager;
pub mod name;
pub mod ondisk;
mod persistence;
pub mod publish;
mod startup;
mod table;
pub mod types;

pub use aggregates::{DbSlotCounts, SlotRetentionState};
pub use config::{SlotConfig, WalLevel};
pub use error::SlotError;
pub use manager::{SlotManager, SlotOwner};
pub use name::{validate_slot_name, NAME_MAX};
pub use ondisk::{
    RecordError, SlotPersistentData, SlotRecord, ONDISK_CONSTANT_SIZE, ONDISK_DYNAMIC_SIZE,
    ONDISK_TOTAL_SIZE, SLOT_MAGIC, SLOT_VERSION,
};
pub use publish::{
    InMemoryProcArray, InMemoryWalSink, ProcArraySink, ServerMode, ServerState, StaticServerState,
    WalSink,
};
pub use types::{DatabaseId, Lsn, SlotPersistency, TransactionId};
