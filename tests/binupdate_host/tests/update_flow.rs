// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for slot writes, activation and the selftest runner
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 14 tests
//!
//! TEST_SCOPE:
//!   - Valid upgrade written, re-read and activated
//!   - Corrupt (+1) checksum rejected at activation
//!   - Same-version allocation refused
//!   - Partial payload and truncated source failures
//!   - Onboarding of a binary under a new name
//!   - State-changed callback registration rules
//!   - Full selftest batches (inline and deferred activation)
//!
//! TEST_SCENARIOS:
//!   - test_valid_upgrade_activates_next_version(): micom v3 -> v4
//!   - test_corrupt_image_keeps_active_version(): stored = content + 1, v3 stays
//!   - test_corrupt_after_upgrade_keeps_upgraded_version(): v4 active, corrupt v5 ignored
//!   - test_same_version_write_is_refused(): allocation failure surfaces
//!   - test_partial_payload_then_retry(): capacity limit, stale slot replaced
//!   - test_truncated_source_is_partial_read(): short payload aborts copy
//!   - test_onboarding_adds_inventory_entry(): newapp 20200421 appears once
//!   - test_callback_registration_rules(): double register / stray unregister
//!   - test_callback_sees_promotions_only(): corrupt slots never notify
//!   - test_selftest_batch_inline(): three clean iterations
//!   - test_selftest_batch_deferred(): activation lands within the grace period
//!   - test_selftest_until_cancelled(): token stops the open-ended batch
//!   - test_selftest_counts_stuck_activation(): missed upgrades are failures
//!   - stored_checksum_independent_of_chunk_size(): proptest over copy chunking

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use binupdate::{
    image_checksum, open_source, verify_image, Activation, AuthorityError, BinaryUpdateInfo,
    BinaryUpdateInfoList, MemSlotStore, RegistryError, SlotAuthority, StateChange,
    StateChangedCallback, UpdateError, WriteStage, HEADER_SIZE,
};
use binupdate_selftest::{demo_image, CancelToken, Orchestrator, SelftestConfig};
use proptest::prelude::*;

fn seeded(activation: Activation) -> MemSlotStore {
    let store = MemSlotStore::new(activation);
    store.seed(&demo_image("micom", "3", 1024).unwrap()).unwrap();
    store
}

fn upgrade(store: &MemSlotStore, corrupt: bool) -> Result<binupdate::SlotReceipt, UpdateError> {
    let (header, payload) = open_source(store, "micom", 3, 512)?;
    binupdate::write_update(store, &header, payload, "micom", 4, corrupt)
}

fn fast_config() -> SelftestConfig {
    SelftestConfig { reload_grace_ms: 0, ..SelftestConfig::default() }
}

#[test]
fn test_valid_upgrade_activates_next_version() {
    let store = seeded(Activation::Inline);
    let receipt = upgrade(&store, false).unwrap();
    assert_eq!(receipt.payload_bytes, 1024);
    assert!(!receipt.is_corrupt());

    let mut bytes = Vec::new();
    store.open_entry("micom", 4).unwrap().read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 1024);
    let header = verify_image(&bytes).unwrap();
    assert_eq!(header.version().unwrap(), "4");
    assert_eq!(header.checksum, receipt.stored_checksum);
    assert_eq!(image_checksum(&header, &bytes[HEADER_SIZE..]), receipt.stored_checksum);

    store.update_binary("micom").unwrap();
    assert_eq!(store.get_update_info("micom").unwrap().version, "4");
}

#[test]
fn test_corrupt_image_keeps_active_version() {
    let store = seeded(Activation::Inline);
    let receipt = upgrade(&store, true).unwrap();
    assert_eq!(receipt.stored_checksum, receipt.content_checksum.wrapping_add(1));

    let bytes = store.slot_bytes("micom", 4).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 1024);
    assert_eq!(&bytes[..4], &receipt.stored_checksum.to_le_bytes());
    assert!(verify_image(&bytes).is_err());

    store.update_binary("micom").unwrap();
    assert_eq!(store.get_update_info("micom").unwrap().version, "3");
}

#[test]
fn test_corrupt_after_upgrade_keeps_upgraded_version() {
    let store = seeded(Activation::Inline);
    upgrade(&store, false).unwrap();
    store.update_binary("micom").unwrap();
    assert_eq!(store.get_update_info("micom").unwrap().version, "4");

    let (header, payload) = open_source(&store, "micom", 4, 512).unwrap();
    assert_eq!(header.bin_size, 1024);
    let receipt = binupdate::write_update(&store, &header, payload, "micom", 5, true).unwrap();
    assert_eq!(receipt.version, 5);
    assert!(verify_image(&store.slot_bytes("micom", 5).unwrap()).is_err());

    store.update_binary("micom").unwrap();
    assert_eq!(store.get_update_info("micom").unwrap().version, "4");
    assert_eq!(store.slot_versions("micom"), vec![3, 4, 5]);
}

#[test]
fn test_same_version_write_is_refused() {
    let store = seeded(Activation::Inline);
    let (header, payload) = open_source(&store, "micom", 3, 512).unwrap();
    let err = binupdate::write_update(&store, &header, payload, "micom", 3, false).unwrap_err();
    assert!(matches!(err, UpdateError::SlotAllocation(AuthorityError::Duplicate { version: 3, .. })));
    assert_eq!(store.slot_versions("micom"), vec![3]);
}

#[test]
fn test_partial_payload_then_retry() {
    let store = seeded(Activation::Inline);
    store.set_partition_size("micom", (HEADER_SIZE + 600) as u64).unwrap();
    let err = upgrade(&store, false).unwrap_err();
    assert!(matches!(
        err,
        UpdateError::PartialWrite { stage: WriteStage::Payload, expected: 512, actual: 88 }
    ));
    store.update_binary("micom").unwrap();
    assert_eq!(store.active_version("micom"), Some(3));

    store.set_partition_size("micom", 64 * 1024).unwrap();
    upgrade(&store, false).unwrap();
    store.update_binary("micom").unwrap();
    assert_eq!(store.active_version("micom"), Some(4));
}

#[test]
fn test_truncated_source_is_partial_read() {
    let store = seeded(Activation::Inline);
    store.with_raw_slot("micom", 3, |bytes| bytes.truncate(HEADER_SIZE + 700)).unwrap();
    let err = upgrade(&store, false).unwrap_err();
    assert!(matches!(err, UpdateError::PartialRead { expected: 512, actual: 188 }));
    assert!(verify_image(&store.slot_bytes("micom", 4).unwrap()).is_err());
}

#[test]
fn test_onboarding_adds_inventory_entry() {
    let store = seeded(Activation::Inline);
    let before = store.get_update_info_all().unwrap().bin_count();
    let (header, payload) = open_source(&store, "micom", 3, 512).unwrap();
    binupdate::write_update(&store, &header, payload, "newapp", 20_200_421, false).unwrap();
    assert!(matches!(store.get_update_info("newapp"), Err(AuthorityError::NotFound(_))));

    store.update_binary("newapp").unwrap();
    let list = store.get_update_info_all().unwrap();
    assert_eq!(list.bin_count(), before + 1);
    assert_eq!(list.find("newapp").unwrap().version, "20200421");

    store.remove_entry("newapp", 20_200_421).unwrap();
    assert_eq!(store.get_update_info_all().unwrap().bin_count(), before);
}

#[test]
fn test_callback_registration_rules() {
    let store = seeded(Activation::Inline);
    assert!(matches!(
        store.unregister_state_changed_callback(),
        Err(AuthorityError::Registry(RegistryError::NotRegistered))
    ));
    store.register_state_changed_callback(Arc::new(|_| {})).unwrap();
    assert!(matches!(
        store.register_state_changed_callback(Arc::new(|_| {})),
        Err(AuthorityError::Registry(RegistryError::AlreadyRegistered))
    ));
    store.unregister_state_changed_callback().unwrap();
    store.register_state_changed_callback(Arc::new(|_| {})).unwrap();
}

#[test]
fn test_callback_sees_promotions_only() {
    let store = seeded(Activation::Inline);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store
        .register_state_changed_callback(Arc::new(move |change: &StateChange| {
            sink.lock().unwrap().push(change.clone());
        }))
        .unwrap();

    upgrade(&store, true).unwrap();
    store.update_binary("micom").unwrap();
    assert!(seen.lock().unwrap().is_empty());

    upgrade(&store, false).unwrap();
    store.update_binary("micom").unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![StateChange { name: "micom".into(), version: "4".into() }]
    );
}

#[test]
fn test_selftest_batch_inline() {
    let mut orch = Orchestrator::new(seeded(Activation::Inline), fast_config());
    let summary = orch.run_ntimes(3);
    assert!(summary.is_clean(), "{summary:?}");
    assert_eq!(summary.runs, 3);
    assert_eq!(summary.scenarios, 18);
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(orch.authority().active_version("micom"), Some(6));
    assert_eq!(orch.notifications(), 3);
}

#[test]
fn test_selftest_batch_deferred() {
    let store = seeded(Activation::Deferred(Duration::from_millis(10)));
    let config = SelftestConfig { reload_grace_ms: 300, ..SelftestConfig::default() };
    let mut orch = Orchestrator::new(store, config);
    let summary = orch.run_ntimes(1);
    assert!(summary.is_clean(), "{summary:?}");
    assert_eq!(orch.authority().active_version("micom"), Some(4));
}

#[test]
fn test_selftest_until_cancelled() {
    let mut orch = Orchestrator::new(seeded(Activation::Inline), fast_config());
    let token = CancelToken::new();
    let stopper = token.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stopper.cancel();
    });
    let summary = orch.run_until_cancelled(&token);
    handle.join().unwrap();
    assert!(summary.runs >= 1);
    assert!(summary.is_clean(), "{summary:?}");
    assert_eq!(summary.scenarios, summary.runs * 6);
}

/// Authority whose reload requests are accepted but never acted on.
struct StuckAuthority(MemSlotStore);

impl SlotAuthority for StuckAuthority {
    type Writer = <MemSlotStore as SlotAuthority>::Writer;
    type Reader = <MemSlotStore as SlotAuthority>::Reader;

    fn open_new_entry(&self, name: &str, version: u32) -> Result<Self::Writer, AuthorityError> {
        self.0.open_new_entry(name, version)
    }
    fn open_entry(&self, name: &str, version: u32) -> Result<Self::Reader, AuthorityError> {
        self.0.open_entry(name, version)
    }
    fn entry_size(&self, name: &str, version: u32) -> Result<u64, AuthorityError> {
        self.0.entry_size(name, version)
    }
    fn remove_entry(&self, name: &str, version: u32) -> Result<(), AuthorityError> {
        self.0.remove_entry(name, version)
    }
    fn get_update_info(&self, name: &str) -> Result<BinaryUpdateInfo, AuthorityError> {
        self.0.get_update_info(name)
    }
    fn get_update_info_all(&self) -> Result<BinaryUpdateInfoList, AuthorityError> {
        self.0.get_update_info_all()
    }
    fn update_binary(&self, _name: &str) -> Result<(), AuthorityError> {
        Ok(())
    }
    fn register_state_changed_callback(
        &self,
        callback: StateChangedCallback,
    ) -> Result<(), AuthorityError> {
        self.0.register_state_changed_callback(callback)
    }
    fn unregister_state_changed_callback(&self) -> Result<(), AuthorityError> {
        self.0.unregister_state_changed_callback()
    }
}

#[test]
fn test_selftest_counts_stuck_activation() {
    let mut orch = Orchestrator::new(StuckAuthority(seeded(Activation::Inline)), fast_config());
    let summary = orch.run_ntimes(1);
    // Valid upgrade and onboarding both miss their activation.
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.succeeded(), 0);
    assert_eq!(orch.authority().0.active_version("micom"), Some(3));
    assert!(orch.authority().0.slot_versions("newapp").is_empty());
}

proptest! {
    #[test]
    fn stored_checksum_independent_of_chunk_size(chunk in 1usize..2048, len in 0usize..4096) {
        let store = MemSlotStore::new(Activation::Inline);
        store.seed(&demo_image("micom", "3", len).unwrap()).unwrap();
        let (header, payload) = open_source(&store, "micom", 3, chunk).unwrap();
        let receipt = binupdate::write_update(&store, &header, payload, "micom", 4, false).unwrap();
        let bytes = store.slot_bytes("micom", 4).unwrap();
        let stored = verify_image(&bytes).unwrap();
        prop_assert_eq!(stored.checksum, receipt.stored_checksum);
        prop_assert_eq!(receipt.payload_bytes, len as u64);
    }
}
