mod common;

use replslot::{DatabaseId, Lsn, SlotError, SlotPersistency};
use tempfile::tempdir;

#[test]
fn create_then_find_and_release() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "s1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn(0x1000),
        )
        .unwrap();
    assert!(h.manager.find("s1").unwrap());
    assert!(!h.manager.find("s2").unwrap());
    assert_eq!(h.manager.acquired_data(&owner).restart_lsn, Lsn(0x1000));

    h.manager.release(owner);
    assert!(h.manager.find("s1").unwrap());

    // Released, so a fresh acquire succeeds without complaint.
    let owner = h.manager.acquire("s1", false).unwrap();
    h.manager.release(owner);
}

#[test]
fn duplicate_create_fails_for_both_kinds() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "s1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        )
        .unwrap();
    h.manager.release(owner);

    let physical = h.manager.create(
        "s1",
        SlotPersistency::Persistent,
        false,
        DatabaseId::NONE,
        Lsn::INVALID,
    );
    assert!(matches!(physical, Err(SlotError::Duplicate { .. })));

    let logical = h.manager.create(
        "s1",
        SlotPersistency::Persistent,
        false,
        DatabaseId(5),
        Lsn::INVALID,
    );
    assert!(matches!(logical, Err(SlotError::Duplicate { .. })));

    // The table still holds exactly one usable s1.
    assert!(h.manager.find("s1").unwrap());
    let owner = h.manager.acquire("s1", false).unwrap();
    h.manager.release(owner);
}

#[test]
fn capacity_exhaustion_keeps_existing_slots() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 2);
    h.manager.startup().unwrap();

    let a = h
        .manager
        .create(
            "s1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        )
        .unwrap();
    let b = h
        .manager
        .create(
            "s2",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        )
        .unwrap();

    let overflow = h.manager.create(
        "s3",
        SlotPersistency::Persistent,
        false,
        DatabaseId::NONE,
        Lsn::INVALID,
    );
    assert!(matches!(overflow, Err(SlotError::Capacity)));
    assert!(h.manager.find("s1").unwrap());
    assert!(h.manager.find("s2").unwrap());
    assert!(!h.manager.find("s3").unwrap());

    h.manager.release(a);
    h.manager.release(b);
}

#[test]
fn acquire_reports_missing_and_busy_slots() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    assert!(matches!(
        h.manager.acquire("ghost", false),
        Err(SlotError::NotFound { .. })
    ));

    // Active logical slots are exclusive.
    let logical = h
        .manager
        .create(
            "dec1",
            SlotPersistency::Persistent,
            false,
            DatabaseId(7),
            Lsn::INVALID,
        )
        .unwrap();
    assert!(matches!(
        h.manager.acquire("dec1", false),
        Err(SlotError::InUse { .. })
    ));
    h.manager.release(logical);

    // An active physical slot with matching standby kind can be taken over,
    // covering recovery from a crashed consumer session.
    let _physical = h
        .manager
        .create(
            "phys1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        )
        .unwrap();
    let takeover = h.manager.acquire("phys1", false).unwrap();
    // A mismatched standby kind is refused instead.
    assert!(matches!(
        h.manager.acquire("phys1", true),
        Err(SlotError::InUse { .. })
    ));
    h.manager.release(takeover);
}

#[test]
fn ephemeral_release_drops_slot() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "e1",
            SlotPersistency::Ephemeral,
            false,
            DatabaseId(3),
            Lsn(0x500),
        )
        .unwrap();
    assert!(root.join("e1/state").is_file());

    h.proc_array.set_logical_decoding_flag();
    h.manager.release(owner);
    assert!(!h.manager.find("e1").unwrap());
    assert!(!root.join("e1").exists());
    // Ephemeral deletion emits no durable drop record.
    assert!(h.wal.dropped_slots().is_empty());
    // The deletion path disconnects the session like any other release.
    assert!(!h.proc_array.in_logical_decoding());
}

#[test]
fn drop_slot_frees_name_and_logs_logical_drop() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "dec1",
            SlotPersistency::Persistent,
            false,
            DatabaseId(7),
            Lsn(0x900),
        )
        .unwrap();
    h.manager.release(owner);

    h.manager.drop_slot("dec1").unwrap();
    assert!(!h.manager.find("dec1").unwrap());
    assert!(!root.join("dec1").exists());
    assert_eq!(h.wal.dropped_slots(), vec!["dec1".to_string()]);

    // The name is reusable immediately.
    let owner = h
        .manager
        .create(
            "dec1",
            SlotPersistency::Persistent,
            false,
            DatabaseId(7),
            Lsn::INVALID,
        )
        .unwrap();
    h.manager.release(owner);
}

#[test]
fn physical_drop_emits_no_drop_record() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "phys1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        )
        .unwrap();
    h.manager.release(owner);
    h.manager.drop_slot("phys1").unwrap();
    assert!(h.wal.dropped_slots().is_empty());
}

#[test]
fn drop_during_recovery_skips_drop_record() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::standby(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "dec1",
            SlotPersistency::Persistent,
            false,
            DatabaseId(7),
            Lsn::INVALID,
        )
        .unwrap();
    h.manager.release(owner);
    h.manager.drop_slot("dec1").unwrap();
    assert!(h.wal.dropped_slots().is_empty());
}

#[test]
fn release_clears_logical_decoding_flag() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "dec1",
            SlotPersistency::Persistent,
            false,
            DatabaseId(7),
            Lsn::INVALID,
        )
        .unwrap();
    h.proc_array.set_logical_decoding_flag();
    h.manager.release(owner);
    assert!(!h.proc_array.in_logical_decoding());
}

#[test]
fn invalid_names_are_rejected_by_every_entry_point() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    for name in ["", "Upper", "has space", "x/y"] {
        assert!(matches!(
            h.manager.create(
                name,
                SlotPersistency::Persistent,
                false,
                DatabaseId::NONE,
                Lsn::INVALID,
            ),
            Err(SlotError::InvalidName { .. })
        ));
        assert!(matches!(
            h.manager.acquire(name, false),
            Err(SlotError::InvalidName { .. })
        ));
        assert!(matches!(
            h.manager.find(name),
            Err(SlotError::InvalidName { .. })
        ));
    }

    let long = "y".repeat(replslot::NAME_MAX);
    assert!(matches!(
        h.manager.create(
            &long,
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        ),
        Err(SlotError::NameTooLong { .. })
    ));
}

#[test]
fn disabled_subsystem_rejects_or_ignores_every_operation() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 0);

    h.manager.startup().unwrap();
    h.manager.checkpoint();

    assert!(matches!(
        h.manager.create(
            "s1",
            SlotPersistency::Persistent,
            false,
            DatabaseId::NONE,
            Lsn::INVALID,
        ),
        Err(SlotError::SlotsDisabled)
    ));
    assert!(matches!(
        h.manager.acquire("s1", false),
        Err(SlotError::SlotsDisabled)
    ));
    assert!(matches!(
        h.manager.drop_slot("s1"),
        Err(SlotError::SlotsDisabled)
    ));
    assert!(!h.manager.find("s1").unwrap());

    // Nothing to publish either.
    assert_eq!(
        h.manager.recompute_required_lsn(),
        replslot::SlotRetentionState::default()
    );
    assert_eq!(h.manager.logical_restart_lsn(), Lsn::INVALID);
    assert!(!h.manager.count_db_slots(DatabaseId(1)).any());
}

#[test]
fn persist_upgrades_ephemeral_slot() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "e1",
            SlotPersistency::Ephemeral,
            false,
            DatabaseId(3),
            Lsn(0x700),
        )
        .unwrap();
    h.manager.persist(&owner).unwrap();
    assert_eq!(
        h.manager.acquired_data(&owner).persistency,
        SlotPersistency::Persistent
    );

    // Now survives release.
    h.manager.release(owner);
    assert!(h.manager.find("e1").unwrap());
    assert!(root.join("e1/state").is_file());
}

#[test]
fn dummy_standby_lsn_can_be_invalidated() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("replslot");
    let h = common::primary(&root, 4);
    h.manager.startup().unwrap();

    let owner = h
        .manager
        .create(
            "dummy1",
            SlotPersistency::Persistent,
            true,
            DatabaseId::NONE,
            Lsn(0x4000),
        )
        .unwrap();
    assert_eq!(h.manager.recompute_required_lsn().min_required, Lsn(0x4000));

    h.manager.set_dummy_standby_lsn_invalid(&owner);
    assert_eq!(h.manager.acquired_data(&owner).restart_lsn, Lsn::INVALID);
    assert_eq!(h.wal.minimum_lsn(), Lsn::INVALID);
    h.manager.release(owner);
}
