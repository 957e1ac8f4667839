// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: In-memory slot-storage authority for host runs and tests
//! OWNERS: @runtime
//! STATUS: Functional (host-only)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + tests/binupdate_host
//!
//! Models the binary manager: binary families with a partition capacity,
//! numbered slots, and an active version. Activation verifies candidate
//! slots newest-first and promotes the first one that checks out; it runs
//! inline or on a background thread after a delay.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::authority::{AuthorityError, BinaryUpdateInfo, BinaryUpdateInfoList, SlotAuthority};
use crate::checksum::verify_image;
use crate::registry::{NotificationRegistry, StateChange, StateChangedCallback};

/// Partition size given to families created by `open_new_entry`.
pub const DEFAULT_PARTITION_SIZE: u64 = 64 * 1024;

/// When `update_binary` performs the activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Before `update_binary` returns.
    Inline,
    /// On a background thread after the given delay.
    Deferred(Duration),
}

type SlotBuf = Arc<Mutex<Vec<u8>>>;

struct Family {
    partition_size: u64,
    active: Option<u32>,
    slots: BTreeMap<u32, SlotBuf>,
}

impl Family {
    fn new(partition_size: u64) -> Self {
        Self { partition_size, active: None, slots: BTreeMap::new() }
    }
}

struct Shared {
    families: Mutex<BTreeMap<String, Family>>,
    registry: NotificationRegistry,
    activation: Activation,
    default_partition: u64,
}

/// Cloneable handle to one in-memory store.
#[derive(Clone)]
pub struct MemSlotStore {
    shared: Arc<Shared>,
}

impl MemSlotStore {
    pub fn new(activation: Activation) -> Self {
        Self::with_default_partition(activation, DEFAULT_PARTITION_SIZE)
    }

    pub fn with_default_partition(activation: Activation, default_partition: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                families: Mutex::new(BTreeMap::new()),
                registry: NotificationRegistry::new(),
                activation,
                default_partition,
            }),
        }
    }

    /// Installs a verified image and makes it active if it is newer than
    /// the current version.
    pub fn seed(&self, image: &[u8]) -> Result<BinaryUpdateInfo, AuthorityError> {
        let header = verify_image(image).map_err(|_| AuthorityError::Invalid("seed image"))?;
        let name = header.name().map_err(|_| AuthorityError::Invalid("bin_name"))?.to_string();
        let version = header.version_as_integer().map_err(|_| AuthorityError::Invalid("bin_ver"))?;
        {
            let mut families = self.shared.families.lock();
            let family = families
                .entry(name.clone())
                .or_insert_with(|| Family::new(self.shared.default_partition));
            family.slots.insert(version, Arc::new(Mutex::new(image.to_vec())));
            if family.active.map_or(true, |active| version > active) {
                family.active = Some(version);
            }
        }
        self.get_update_info(&name)
    }

    /// Sets the capacity used for future slots of `name`.
    pub fn set_partition_size(&self, name: &str, bytes: u64) -> Result<(), AuthorityError> {
        let mut families = self.shared.families.lock();
        let family = families.get_mut(name).ok_or_else(|| AuthorityError::NotFound(name.into()))?;
        family.partition_size = bytes;
        Ok(())
    }

    /// Copy of a slot's stored bytes.
    pub fn slot_bytes(&self, name: &str, version: u32) -> Option<Vec<u8>> {
        let slot = self.slot(name, version).ok()?;
        let bytes = slot.lock().clone();
        Some(bytes)
    }

    /// Direct access to stored bytes, for corruption fixtures.
    pub fn with_raw_slot<T>(
        &self,
        name: &str,
        version: u32,
        f: impl FnOnce(&mut Vec<u8>) -> T,
    ) -> Result<T, AuthorityError> {
        let slot = self.slot(name, version)?;
        let mut bytes = slot.lock();
        Ok(f(&mut bytes))
    }

    /// Versions with a slot, ascending.
    pub fn slot_versions(&self, name: &str) -> Vec<u32> {
        self.shared
            .families
            .lock()
            .get(name)
            .map(|family| family.slots.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn active_version(&self, name: &str) -> Option<u32> {
        self.shared.families.lock().get(name).and_then(|family| family.active)
    }

    fn slot(&self, name: &str, version: u32) -> Result<SlotBuf, AuthorityError> {
        let families = self.shared.families.lock();
        families
            .get(name)
            .and_then(|family| family.slots.get(&version))
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("{name}_{version}")))
    }

    /// Promotes the newest valid slot above the active version.
    fn activate(&self, name: &str) {
        let change = {
            let mut families = self.shared.families.lock();
            let Some(family) = families.get_mut(name) else {
                warn!("activation skipped: {name} vanished");
                return;
            };
            let floor = family.active;
            let mut promoted = None;
            for (version, slot) in family.slots.iter().rev() {
                if floor.is_some_and(|active| *version <= active) {
                    break;
                }
                let bytes = slot.lock();
                match verify_image(&bytes) {
                    Ok(header)
                        if header.name().ok() == Some(name)
                            && header.version_as_integer().ok() == Some(*version) =>
                    {
                        promoted = Some(*version);
                        break;
                    }
                    Ok(_) => warn!("rejecting {name} v{version}: header does not match slot"),
                    Err(err) => warn!("rejecting {name} v{version}: {err}"),
                }
            }
            match promoted {
                Some(version) => {
                    family.active = Some(version);
                    info!("activated {name} v{version}");
                    Some(StateChange { name: name.to_string(), version: version.to_string() })
                }
                None => {
                    debug!("no newer valid slot for {name}; keeping {:?}", floor);
                    None
                }
            }
        };
        if let Some(change) = change {
            self.shared.registry.notify(&change);
        }
    }
}

impl core::fmt::Debug for MemSlotStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemSlotStore")
            .field("families", &self.shared.families.lock().len())
            .field("activation", &self.shared.activation)
            .finish()
    }
}

/// Write handle for a freshly allocated slot. Writes beyond the partition
/// capacity are short.
pub struct MemSlotWriter {
    buf: SlotBuf,
    pos: u64,
    capacity: u64,
}

impl Write for MemSlotWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.capacity.saturating_sub(self.pos);
        let n = (data.len() as u64).min(room) as usize;
        if n == 0 {
            return Ok(0);
        }
        let mut bytes = self.buf.lock();
        let start = self.pos as usize;
        let end = start + n;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&data[..n]);
        self.pos = end as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemSlotWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buf.lock().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of slot"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl SlotAuthority for MemSlotStore {
    type Writer = MemSlotWriter;
    type Reader = Cursor<Vec<u8>>;

    fn open_new_entry(&self, name: &str, version: u32) -> Result<Self::Writer, AuthorityError> {
        if name.is_empty() {
            return Err(AuthorityError::Invalid("empty binary name"));
        }
        let mut families = self.shared.families.lock();
        // Refused requests must not leave an empty family behind.
        let partition_size = match families.get(name) {
            Some(family) => {
                if family.active.is_some_and(|active| version <= active) {
                    return Err(AuthorityError::Duplicate { name: name.into(), version });
                }
                if let Some(existing) = family.slots.get(&version) {
                    if verify_image(&existing.lock()).is_ok() {
                        return Err(AuthorityError::Duplicate { name: name.into(), version });
                    }
                    debug!("replacing incomplete slot {name} v{version}");
                }
                family.partition_size
            }
            None => self.shared.default_partition,
        };
        if partition_size == 0 {
            return Err(AuthorityError::InsufficientCapacity {
                name: name.into(),
                required: 1,
                available: 0,
            });
        }
        let family =
            families.entry(name.to_string()).or_insert_with(|| Family::new(partition_size));
        let buf: SlotBuf = Arc::new(Mutex::new(Vec::new()));
        family.slots.insert(version, buf.clone());
        Ok(MemSlotWriter { buf, pos: 0, capacity: partition_size })
    }

    fn open_entry(&self, name: &str, version: u32) -> Result<Self::Reader, AuthorityError> {
        let slot = self.slot(name, version)?;
        let bytes = slot.lock().clone();
        Ok(Cursor::new(bytes))
    }

    fn entry_size(&self, name: &str, version: u32) -> Result<u64, AuthorityError> {
        let slot = self.slot(name, version)?;
        let len = slot.lock().len() as u64;
        Ok(len)
    }

    fn remove_entry(&self, name: &str, version: u32) -> Result<(), AuthorityError> {
        let mut families = self.shared.families.lock();
        let family = families
            .get_mut(name)
            .ok_or_else(|| AuthorityError::NotFound(format!("{name}_{version}")))?;
        if family.slots.remove(&version).is_none() {
            return Err(AuthorityError::NotFound(format!("{name}_{version}")));
        }
        if family.active == Some(version) {
            family.active = None;
        }
        if family.slots.is_empty() {
            families.remove(name);
        }
        debug!("removed slot {name} v{version}");
        Ok(())
    }

    fn get_update_info(&self, name: &str) -> Result<BinaryUpdateInfo, AuthorityError> {
        let families = self.shared.families.lock();
        let family = families.get(name).ok_or_else(|| AuthorityError::NotFound(name.into()))?;
        let version = family.active.ok_or_else(|| AuthorityError::NotFound(name.into()))?;
        Ok(BinaryUpdateInfo {
            name: name.to_string(),
            version: version.to_string(),
            available_size: family.partition_size,
        })
    }

    fn get_update_info_all(&self) -> Result<BinaryUpdateInfoList, AuthorityError> {
        let families = self.shared.families.lock();
        let entries = families
            .iter()
            .filter_map(|(name, family)| {
                family.active.map(|version| BinaryUpdateInfo {
                    name: name.clone(),
                    version: version.to_string(),
                    available_size: family.partition_size,
                })
            })
            .collect();
        Ok(BinaryUpdateInfoList { entries })
    }

    fn update_binary(&self, name: &str) -> Result<(), AuthorityError> {
        if !self.shared.families.lock().contains_key(name) {
            return Err(AuthorityError::NotFound(name.into()));
        }
        match self.shared.activation {
            Activation::Inline => self.activate(name),
            Activation::Deferred(delay) => {
                let store = self.clone();
                let name = name.to_string();
                thread::spawn(move || {
                    thread::sleep(delay);
                    store.activate(&name);
                });
            }
        }
        Ok(())
    }

    fn register_state_changed_callback(
        &self,
        callback: StateChangedCallback,
    ) -> Result<(), AuthorityError> {
        Ok(self.shared.registry.register(callback)?)
    }

    fn unregister_state_changed_callback(&self) -> Result<(), AuthorityError> {
        Ok(self.shared.registry.unregister()?)
    }
}
