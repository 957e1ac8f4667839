// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-batch bookkeeping: scenario outcomes, failure counter, cancellation.

use std::fmt;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

/// Scenarios run by one iteration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    SameVersionRejection,
    InvalidBinaryRejection,
    CallbackRegistration,
    ValidUpgrade,
    CallbackUnregistration,
    FreshBinaryOnboarding,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::SameVersionRejection,
        ScenarioKind::InvalidBinaryRejection,
        ScenarioKind::CallbackRegistration,
        ScenarioKind::ValidUpgrade,
        ScenarioKind::CallbackUnregistration,
        ScenarioKind::FreshBinaryOnboarding,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ScenarioKind::SameVersionRejection => "same-version rejection",
            ScenarioKind::InvalidBinaryRejection => "invalid-binary rejection",
            ScenarioKind::CallbackRegistration => "callback registration",
            ScenarioKind::ValidUpgrade => "valid upgrade",
            ScenarioKind::CallbackUnregistration => "callback unregistration",
            ScenarioKind::FreshBinaryOnboarding => "fresh-binary onboarding",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub kind: ScenarioKind,
    /// Whether the observed behaviour matched the expected one.
    pub accepted: bool,
    pub pre_version: Option<String>,
    pub post_version: Option<String>,
    pub detail: String,
}

impl UpdateOutcome {
    pub fn pass(kind: ScenarioKind, detail: impl Into<String>) -> Self {
        Self { kind, accepted: true, pre_version: None, post_version: None, detail: detail.into() }
    }

    pub fn fail(kind: ScenarioKind, detail: impl Into<String>) -> Self {
        Self { kind, accepted: false, pre_version: None, post_version: None, detail: detail.into() }
    }

    pub fn with_versions(mut self, pre: Option<String>, post: Option<String>) -> Self {
        self.pre_version = pre;
        self.post_version = post;
        self
    }
}

/// Running totals for one batch. Reset when a batch finishes.
#[derive(Debug, Default)]
pub struct BatchRunContext {
    iterations: u64,
    scenarios: u64,
    failures: u64,
}

impl BatchRunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_iteration(&mut self) -> u64 {
        self.iterations += 1;
        info!("** binary update selftest: iteration {}", self.iterations);
        self.iterations
    }

    /// Folds an outcome into the totals.
    pub fn record(&mut self, outcome: &UpdateOutcome) {
        self.scenarios += 1;
        if outcome.accepted {
            info!("[{}] ok: {}", outcome.kind, outcome.detail);
        } else {
            self.failures += 1;
            warn!("[{}] FAIL: {}", outcome.kind, outcome.detail);
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Closes the batch, logs the ratio and resets the counters.
    pub fn finish(&mut self) -> BatchSummary {
        let summary = BatchSummary {
            runs: self.iterations,
            scenarios: self.scenarios,
            failures: self.failures,
        };
        info!("*** binary update selftest finished (run {} times)", summary.runs);
        info!(" - success: {}, fail: {}", summary.succeeded(), summary.failures);
        *self = Self::default();
        summary
    }
}

/// Totals reported at the end of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub runs: u64,
    pub scenarios: u64,
    pub failures: u64,
}

impl BatchSummary {
    pub fn succeeded(&self) -> u64 {
        self.runs.saturating_sub(self.failures)
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Stops an open-ended batch; checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Blocks until `reader` yields a line, then cancels. End of input or a
    /// read error leaves the token untouched and returns `false`.
    pub fn cancel_on_line<R: BufRead>(&self, mut reader: R) -> bool {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => false,
            Ok(_) => {
                self.cancel();
                true
            }
            Err(err) => {
                warn!("stop input unreadable: {err}");
                false
            }
        }
    }
}
