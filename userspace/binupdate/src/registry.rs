// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Single-slot registry for "binary state changed" callbacks
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Event delivered to the registered callback after an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: String,
    pub version: String,
}

/// Callback invoked on binary state changes.
pub type StateChangedCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a state-changed callback is already registered")]
    AlreadyRegistered,
    #[error("no state-changed callback is registered")]
    NotRegistered,
}

/// Holds at most one callback.
#[derive(Default)]
pub struct NotificationRegistry {
    slot: Mutex<Option<StateChangedCallback>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: StateChangedCallback) -> Result<(), RegistryError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(RegistryError::AlreadyRegistered);
        }
        *slot = Some(callback);
        Ok(())
    }

    pub fn unregister(&self) -> Result<(), RegistryError> {
        self.slot.lock().take().map(|_| ()).ok_or(RegistryError::NotRegistered)
    }

    pub fn is_registered(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Invokes the registered callback, if any. Returns whether one ran.
    ///
    /// The lock is released before the call so a callback may re-register.
    pub fn notify(&self, change: &StateChange) -> bool {
        let callback = self.slot.lock().clone();
        match callback {
            Some(callback) => {
                callback(change);
                true
            }
            None => false,
        }
    }
}

impl core::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationRegistry").field("registered", &self.is_registered()).finish()
    }
}
