#![allow(dead_code)]

use replslot::{
    InMemoryProcArray, InMemoryWalSink, SlotConfig, SlotManager, StaticServerState, WalLevel,
};
use std::path::Path;
use std::sync::Arc;

pub struct Harness {
    pub manager: SlotManager,
    pub proc_array: Arc<InMemoryProcArray>,
    pub wal: Arc<InMemoryWalSink>,
}

pub fn build(root: &Path, max_slots: usize, server: StaticServerState) -> Harness {
    let proc_array = Arc::new(InMemoryProcArray::new());
    let wal = Arc::new(InMemoryWalSink::new());
    let manager = SlotManager::new(
        SlotConfig::new(max_slots, WalLevel::Logical, root),
        proc_array.clone(),
        wal.clone(),
        Arc::new(server),
    );
    Harness {
        manager,
        proc_array,
        wal,
    }
}

pub fn primary(root: &Path, max_slots: usize) -> Harness {
    build(root, max_slots, StaticServerState::primary())
}

pub fn standby(root: &Path, max_slots: usize) -> Harness {
    build(root, max_slots, StaticServerState::standby())
}
