// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Scenario sequence driving the update pipeline against an authority
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + tests/binupdate_host
//!
//! One iteration runs, in order: same-version rejection, invalid-binary
//! rejection, callback registration, valid upgrade, callback
//! unregistration, fresh-binary onboarding. A failing scenario is counted
//! and the sequence continues.
//!
//! Activation on the authority side is asynchronous, so every reload is
//! followed by a fixed grace period before metadata is queried again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use binupdate::{
    open_source, parse_version, write_update, AuthorityError, BinaryUpdateInfo, HeaderError,
    SlotAuthority, SlotReceipt, StateChange, UpdateError,
};
use log::{debug, error, info, warn};

use crate::batch::{BatchRunContext, BatchSummary, CancelToken, ScenarioKind, UpdateOutcome};
use crate::config::SelftestConfig;
use crate::report;

/// Runs update scenarios against `A`.
pub struct Orchestrator<A> {
    authority: A,
    config: SelftestConfig,
    notifications: Arc<AtomicU64>,
    silenced_at: Option<u64>,
}

impl<A: SlotAuthority> Orchestrator<A> {
    pub fn new(authority: A, config: SelftestConfig) -> Self {
        Self { authority, config, notifications: Arc::new(AtomicU64::new(0)), silenced_at: None }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn config(&self) -> &SelftestConfig {
        &self.config
    }

    /// State-change notifications delivered to this orchestrator's callback.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::SeqCst)
    }

    pub fn run_ntimes(&mut self, repetitions: u64) -> BatchSummary {
        info!("** binary update selftest: executes {repetitions} times");
        let mut ctx = BatchRunContext::new();
        for _ in 0..repetitions {
            self.run_iteration(&mut ctx);
        }
        ctx.finish()
    }

    /// Repeats iterations until `token` is cancelled.
    pub fn run_until_cancelled(&mut self, token: &CancelToken) -> BatchSummary {
        info!("** binary update selftest: executes until cancelled");
        let mut ctx = BatchRunContext::new();
        while !token.is_cancelled() {
            self.run_iteration(&mut ctx);
        }
        ctx.finish()
    }

    /// Runs the six scenarios once and returns their outcomes.
    pub fn run_iteration(&mut self, ctx: &mut BatchRunContext) -> Vec<UpdateOutcome> {
        ctx.begin_iteration();
        let mut outcomes = Vec::with_capacity(ScenarioKind::ALL.len() + 1);
        for kind in ScenarioKind::ALL {
            let outcome = self.run_scenario(kind);
            ctx.record(&outcome);
            outcomes.push(outcome);
        }
        if let Some(late) = self.check_silenced() {
            ctx.record(&late);
            outcomes.push(late);
        }
        outcomes
    }

    pub fn run_scenario(&mut self, kind: ScenarioKind) -> UpdateOutcome {
        match kind {
            ScenarioKind::SameVersionRejection => self.same_version_rejection(),
            ScenarioKind::InvalidBinaryRejection => self.invalid_binary_rejection(),
            ScenarioKind::CallbackRegistration => self.register_callback(),
            ScenarioKind::ValidUpgrade => self.valid_upgrade(),
            ScenarioKind::CallbackUnregistration => self.unregister_callback(),
            ScenarioKind::FreshBinaryOnboarding => self.fresh_binary_onboarding(),
        }
    }

    /// Allocating a slot at the active version must fail.
    pub fn same_version_rejection(&mut self) -> UpdateOutcome {
        let kind = ScenarioKind::SameVersionRejection;
        let app = self.config.app_name.clone();
        let info = match self.getinfo(&app) {
            Ok(info) => info,
            Err(detail) => return UpdateOutcome::fail(kind, detail),
        };
        let version = match info.version_as_integer() {
            Ok(version) => version,
            Err(err) => return UpdateOutcome::fail(kind, format!("active version: {err}")),
        };
        let pre = Some(info.version.clone());
        match self.authority.open_new_entry(&app, version) {
            Err(err) => UpdateOutcome::pass(kind, format!("allocation at v{version} refused: {err}"))
                .with_versions(pre.clone(), pre),
            Ok(handle) => {
                drop(handle);
                UpdateOutcome::fail(kind, format!("allocation at active v{version} succeeded"))
                    .with_versions(pre.clone(), pre)
            }
        }
    }

    /// A corrupt image must not replace the active version.
    pub fn invalid_binary_rejection(&mut self) -> UpdateOutcome {
        self.upgrade_cycle(ScenarioKind::InvalidBinaryRejection, true)
    }

    /// A valid image one version up must become active.
    pub fn valid_upgrade(&mut self) -> UpdateOutcome {
        self.upgrade_cycle(ScenarioKind::ValidUpgrade, false)
    }

    pub fn register_callback(&mut self) -> UpdateOutcome {
        let kind = ScenarioKind::CallbackRegistration;
        let notifications = self.notifications.clone();
        let callback = Arc::new(move |change: &StateChange| {
            notifications.fetch_add(1, Ordering::SeqCst);
            info!(" ==========================================================================");
            info!("   state changed callback: {} is now v{}", change.name, change.version);
            info!(" ==========================================================================");
        });
        match self.authority.register_state_changed_callback(callback) {
            Ok(()) => {
                self.silenced_at = None;
                UpdateOutcome::pass(kind, "state changed callback registered")
            }
            Err(err) => UpdateOutcome::fail(kind, format!("register failed: {err}")),
        }
    }

    pub fn unregister_callback(&mut self) -> UpdateOutcome {
        let kind = ScenarioKind::CallbackUnregistration;
        match self.authority.unregister_state_changed_callback() {
            Ok(()) => {
                self.silenced_at = Some(self.notifications());
                UpdateOutcome::pass(kind, "state changed callback unregistered")
            }
            Err(err) => UpdateOutcome::fail(kind, format!("unregister failed: {err}")),
        }
    }

    /// Copies the active app image under a new name and version, activates it
    /// and checks it shows up in the inventory; the copy is removed afterwards.
    pub fn fresh_binary_onboarding(&mut self) -> UpdateOutcome {
        let kind = ScenarioKind::FreshBinaryOnboarding;
        let app = self.config.app_name.clone();
        let new_name = self.config.new_app_name.clone();

        let new_version = match parse_version(&self.config.new_app_version) {
            Ok(version) => version,
            Err(err) => return UpdateOutcome::fail(kind, format!("new version: {err}")),
        };
        let source = match self.getinfo(&app) {
            Ok(info) => info,
            Err(detail) => return UpdateOutcome::fail(kind, detail),
        };
        let source_version = match source.version_as_integer() {
            Ok(version) => version,
            Err(err) => return UpdateOutcome::fail(kind, format!("active version: {err}")),
        };
        let file_size = match self.authority.entry_size(&app, source_version) {
            Ok(size) => size,
            Err(err) => return UpdateOutcome::fail(kind, format!("source size: {err}")),
        };
        if file_size == 0 || source.available_size == 0 || file_size >= source.available_size {
            return UpdateOutcome::fail(
                kind,
                format!(
                    "can't copy image, size {file_size}, available size {}",
                    source.available_size
                ),
            );
        }

        let before = match self.authority.get_update_info_all() {
            Ok(list) => list,
            Err(err) => return UpdateOutcome::fail(kind, format!("inventory: {err}")),
        };
        let pre_version = before.find(&new_name).map(|info| info.version.clone());
        let expected_count = before.bin_count() + usize::from(pre_version.is_none());

        let written = open_source(&self.authority, &app, source_version, self.config.chunk_size)
            .and_then(|(header, payload)| {
                write_update(&self.authority, &header, payload, &new_name, new_version, false)
            });
        let outcome = match written {
            Ok(_) => {
                info!("download binary {new_name} done");
                self.onboarding_check(&new_name, expected_count, pre_version)
            }
            // A refused allocation created nothing; the slot at that version is not ours.
            Err(err @ UpdateError::SlotAllocation(_)) => {
                error!("download of {new_name} failed: {err}");
                return UpdateOutcome::fail(kind, format!("download failed: {err}"))
                    .with_versions(pre_version, None);
            }
            Err(err) => {
                error!("download of {new_name} failed: {err}");
                UpdateOutcome::fail(kind, format!("download failed: {err}"))
                    .with_versions(pre_version, None)
            }
        };

        self.unlink_onboarded(&new_name, new_version);
        outcome
    }

    fn unlink_onboarded(&self, name: &str, version: u32) {
        match self.authority.remove_entry(name, version) {
            Ok(()) | Err(AuthorityError::NotFound(_)) => {}
            Err(err) => warn!("failed to unlink {name} v{version}: {err}"),
        }
    }

    fn onboarding_check(
        &self,
        new_name: &str,
        expected_count: usize,
        pre_version: Option<String>,
    ) -> UpdateOutcome {
        let kind = ScenarioKind::FreshBinaryOnboarding;
        if let Err(detail) = self.reload(new_name) {
            return UpdateOutcome::fail(kind, detail).with_versions(pre_version, None);
        }
        let info = match self.getinfo(new_name) {
            Ok(info) => info,
            Err(detail) => return UpdateOutcome::fail(kind, detail).with_versions(pre_version, None),
        };
        let list = match self.authority.get_update_info_all() {
            Ok(list) => list,
            Err(err) => {
                return UpdateOutcome::fail(kind, format!("inventory: {err}"))
                    .with_versions(pre_version, Some(info.version));
            }
        };
        report::log_lines(&report::binary_info_list_lines(&list));

        let post = Some(info.version.clone());
        if list.find(new_name).is_none() {
            return UpdateOutcome::fail(kind, format!("{new_name} missing from inventory"))
                .with_versions(pre_version, post);
        }
        if list.bin_count() != expected_count {
            return UpdateOutcome::fail(
                kind,
                format!("inventory holds {} binaries, expected {expected_count}", list.bin_count()),
            )
            .with_versions(pre_version, post);
        }
        UpdateOutcome::pass(kind, format!("{new_name} v{} onboarded", info.version))
            .with_versions(pre_version, post)
    }

    fn upgrade_cycle(&mut self, kind: ScenarioKind, corrupt: bool) -> UpdateOutcome {
        let app = self.config.app_name.clone();
        let pre = match self.getinfo(&app) {
            Ok(info) => info,
            Err(detail) => return UpdateOutcome::fail(kind, detail),
        };
        let pre_version = Some(pre.version.clone());

        if let Err(err) = self.download(&pre, corrupt) {
            error!("download of {app} failed: {err}");
            return UpdateOutcome::fail(kind, format!("download failed: {err}"))
                .with_versions(pre_version, None);
        }
        if let Err(detail) = self.reload(&app) {
            return UpdateOutcome::fail(kind, detail).with_versions(pre_version, None);
        }
        let cur = match self.getinfo(&app) {
            Ok(info) => info,
            Err(detail) => return UpdateOutcome::fail(kind, detail).with_versions(pre_version, None),
        };
        report::log_lines(&report::version_check_lines(&app, &pre.version, &cur.version));

        let changed = pre.version != cur.version;
        let outcome = match (corrupt, changed) {
            (false, true) => UpdateOutcome::pass(kind, "loaded valid higher version binary"),
            (false, false) => UpdateOutcome::fail(kind, "valid higher version binary not loaded"),
            (true, false) => UpdateOutcome::pass(kind, "no update with invalid binary"),
            (true, true) => UpdateOutcome::fail(kind, "invalid binary was loaded"),
        }
        .with_versions(pre_version, Some(cur.version.clone()));

        if outcome.accepted && !corrupt {
            self.unlink_superseded(&app, &pre);
        }
        outcome
    }

    fn download(&self, info: &BinaryUpdateInfo, corrupt: bool) -> Result<SlotReceipt, UpdateError> {
        let version = info.version_as_integer()?;
        let (header, payload) =
            open_source(&self.authority, &info.name, version, self.config.chunk_size)?;
        let new_version = header.version_as_integer()?.checked_add(1).ok_or_else(|| {
            HeaderError::Version(header.version().unwrap_or_default().to_string())
        })?;
        let receipt =
            write_update(&self.authority, &header, payload, &info.name, new_version, corrupt)?;
        debug!(
            "wrote {} v{}: checksum {:#010x} (content {:#010x})",
            receipt.name, receipt.version, receipt.stored_checksum, receipt.content_checksum
        );
        Ok(receipt)
    }

    fn unlink_superseded(&self, app: &str, pre: &BinaryUpdateInfo) {
        match pre.version_as_integer() {
            Ok(version) => {
                if let Err(err) = self.authority.remove_entry(app, version) {
                    warn!("failed to unlink {app} v{version}: {err}");
                }
            }
            Err(err) => warn!("cannot unlink {app}: {err}"),
        }
    }

    fn reload(&self, name: &str) -> Result<(), String> {
        info!("** binary update RELOAD [{name}]");
        self.authority.update_binary(name).map_err(|err| format!("reload {name} failed: {err}"))?;
        thread::sleep(self.config.reload_grace());
        Ok(())
    }

    fn getinfo(&self, name: &str) -> Result<BinaryUpdateInfo, String> {
        match self.authority.get_update_info(name) {
            Ok(info) => {
                report::log_lines(&report::binary_info_lines(&info));
                Ok(info)
            }
            Err(err) => Err(format!("get binary info {name} failed: {err}")),
        }
    }

    /// Flags callbacks that ran after a successful unregister.
    fn check_silenced(&self) -> Option<UpdateOutcome> {
        let silenced_at = self.silenced_at?;
        let now = self.notifications();
        (now != silenced_at).then(|| {
            UpdateOutcome::fail(
                ScenarioKind::CallbackUnregistration,
                format!("callback invoked {} time(s) after unregister", now - silenced_at),
            )
        })
    }
}
