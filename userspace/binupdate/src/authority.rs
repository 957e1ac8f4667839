// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Boundary to the slot-storage authority (binary manager)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Exercised through MemSlotStore tests and tests/binupdate_host
//!
//! The authority owns slot storage, version bookkeeping and activation.
//! The update pipeline only borrows read/write handles from it for the
//! duration of one operation.

use std::fmt;
use std::io::{self, Read, Seek, Write};

use thiserror::Error;

use crate::header::{parse_version, HeaderError};
use crate::registry::{RegistryError, StateChangedCallback};

/// Metadata snapshot for one binary family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryUpdateInfo {
    pub name: String,
    /// Currently active version.
    pub version: String,
    /// Bytes available for writing a new version.
    pub available_size: u64,
}

impl BinaryUpdateInfo {
    pub fn version_as_integer(&self) -> Result<u32, HeaderError> {
        parse_version(&self.version)
    }
}

impl fmt::Display for BinaryUpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({} bytes available)", self.name, self.version, self.available_size)
    }
}

/// Point-in-time inventory of all active binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryUpdateInfoList {
    pub entries: Vec<BinaryUpdateInfo>,
}

impl BinaryUpdateInfoList {
    pub fn bin_count(&self) -> usize {
        self.entries.len()
    }

    pub fn find(&self, name: &str) -> Option<&BinaryUpdateInfo> {
        self.entries.iter().find(|info| info.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BinaryUpdateInfo> {
        self.entries.iter()
    }
}

/// Errors reported by the authority.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Requested version is not newer than the active one, or already exists.
    #[error("slot {name} v{version} rejected: not newer than the active version or already present")]
    Duplicate { name: String, version: u32 },
    /// Not enough room for the requested slot.
    #[error("insufficient capacity for {name}: need {required} bytes, {available} available")]
    InsufficientCapacity { name: String, required: u64, available: u64 },
    /// No such binary or slot.
    #[error("{0} not found")]
    NotFound(String),
    /// Slot name or version not representable.
    #[error("invalid slot request: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("storage io: {0}")]
    Io(#[from] io::Error),
}

/// Narrow interface consumed from the slot-storage authority.
pub trait SlotAuthority {
    /// Writable handle for a freshly allocated slot.
    type Writer: Write + Seek;
    /// Readable handle over an existing slot.
    type Reader: Read;

    /// Allocates a new slot for `name` at `version`.
    fn open_new_entry(&self, name: &str, version: u32) -> Result<Self::Writer, AuthorityError>;

    /// Opens an existing slot for reading from its first byte.
    fn open_entry(&self, name: &str, version: u32) -> Result<Self::Reader, AuthorityError>;

    /// Stored byte length of a slot.
    fn entry_size(&self, name: &str, version: u32) -> Result<u64, AuthorityError>;

    /// Unlinks a slot.
    fn remove_entry(&self, name: &str, version: u32) -> Result<(), AuthorityError>;

    fn get_update_info(&self, name: &str) -> Result<BinaryUpdateInfo, AuthorityError>;

    fn get_update_info_all(&self) -> Result<BinaryUpdateInfoList, AuthorityError>;

    /// Requests activation of the newest valid slot of `name`. Activation
    /// may complete after this call returns.
    fn update_binary(&self, name: &str) -> Result<(), AuthorityError>;

    fn register_state_changed_callback(
        &self,
        callback: StateChangedCallback,
    ) -> Result<(), AuthorityError>;

    fn unregister_state_changed_callback(&self) -> Result<(), AuthorityError>;
}
