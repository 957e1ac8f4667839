// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Slot writer (allocate -> header -> payload -> checksum backpatch)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests against MemSlotStore + tests/binupdate_host
//!
//! A slot only becomes loadable once header, payload and checksum are all
//! in place. Any short write aborts the operation; the half-written slot is
//! left to the authority, which never activates an image whose checksum
//! does not verify.

use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, info};

use crate::authority::SlotAuthority;
use crate::checksum::ChecksumState;
use crate::error::{Result, UpdateError, WriteStage};
use crate::header::{BinaryHeader, HeaderError, CHECKSUM_SIZE, HEADER_SIZE};
use crate::source::PayloadReader;

/// What a completed write left in the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReceipt {
    pub name: String,
    pub version: u32,
    /// Checksum of the written header tail + payload.
    pub content_checksum: u32,
    /// Value stored in the checksum field.
    pub stored_checksum: u32,
    pub payload_bytes: u64,
}

impl SlotReceipt {
    pub fn is_corrupt(&self) -> bool {
        self.content_checksum != self.stored_checksum
    }
}

/// Writes a new slot for `target_name` at `new_version`, copying the payload
/// from `payload`. With `corrupt` set, the stored checksum is the real one
/// plus one, so the slot is complete but must fail verification.
///
/// Both handles are dropped before returning, on every path.
pub fn write_update<A, R>(
    authority: &A,
    source_header: &BinaryHeader,
    mut payload: PayloadReader<R>,
    target_name: &str,
    new_version: u32,
    corrupt: bool,
) -> Result<SlotReceipt>
where
    A: SlotAuthority,
    R: Read,
{
    let mut header = source_header.clone();
    header.set_name(target_name)?;
    header.set_version(&new_version.to_string())?;
    header.checksum = 0;
    if payload.total() != header.bin_size as u64 || payload.consumed() != 0 {
        return Err(HeaderError::Field("bin_size").into());
    }

    let mut slot =
        authority.open_new_entry(target_name, new_version).map_err(UpdateError::SlotAllocation)?;
    debug!("allocated slot {} v{}", target_name, new_version);

    let written = slot.write(&header.to_bytes())?;
    if written != HEADER_SIZE {
        return Err(UpdateError::PartialWrite {
            stage: WriteStage::Header,
            expected: HEADER_SIZE,
            actual: written,
        });
    }

    let total = payload.total();
    let mut state = ChecksumState::init().update_header(&header);
    let mut last_percent = 0;
    while let Some(chunk) = payload.next_chunk()? {
        let written = slot.write(chunk)?;
        if written != chunk.len() {
            return Err(UpdateError::PartialWrite {
                stage: WriteStage::Payload,
                expected: chunk.len(),
                actual: written,
            });
        }
        state = state.update(chunk);
        let percent = payload.consumed() * 100 / total.max(1);
        if percent / 10 != last_percent / 10 || percent == 100 {
            debug!("copy {} v{} [{}%]", target_name, new_version, percent);
            last_percent = percent;
        }
    }

    let content_checksum = state.finalize();
    let stored_checksum =
        if corrupt { content_checksum.wrapping_add(1) } else { content_checksum };

    let pos = slot.seek(SeekFrom::Start(0))?;
    if pos != 0 {
        return Err(UpdateError::PartialWrite {
            stage: WriteStage::Checksum,
            expected: CHECKSUM_SIZE,
            actual: 0,
        });
    }
    let written = slot.write(&stored_checksum.to_le_bytes())?;
    if written != CHECKSUM_SIZE {
        return Err(UpdateError::PartialWrite {
            stage: WriteStage::Checksum,
            expected: CHECKSUM_SIZE,
            actual: written,
        });
    }
    slot.flush()?;

    info!("download binary {} version {} done", target_name, new_version);
    Ok(SlotReceipt {
        name: target_name.to_string(),
        version: new_version,
        content_checksum,
        stored_checksum,
        payload_bytes: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityError;
    use crate::checksum::{assemble_image, verify_image, IntegrityError};
    use crate::source::{open_source, DEFAULT_CHUNK_SIZE};
    use crate::store::{Activation, MemSlotStore};

    fn seeded() -> MemSlotStore {
        let store = MemSlotStore::new(Activation::Inline);
        let header = BinaryHeader::new("micom", "3", 0).unwrap();
        let payload: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
        store.seed(&assemble_image(&header, &payload)).unwrap();
        store
    }

    #[test]
    fn valid_write_verifies() {
        let store = seeded();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let receipt = write_update(&store, &header, payload, "micom", 4, false).unwrap();
        assert!(!receipt.is_corrupt());
        assert_eq!(receipt.payload_bytes, 1024);

        let image = store.slot_bytes("micom", 4).unwrap();
        let written = verify_image(&image).unwrap();
        assert_eq!(written.version().unwrap(), "4");
        assert_eq!(written.checksum, receipt.content_checksum);
    }

    #[test]
    fn corrupt_write_is_off_by_one() {
        let store = seeded();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let receipt = write_update(&store, &header, payload, "micom", 4, true).unwrap();
        assert_eq!(receipt.stored_checksum, receipt.content_checksum.wrapping_add(1));

        let image = store.slot_bytes("micom", 4).unwrap();
        assert_eq!(image.len(), HEADER_SIZE + 1024);
        assert_eq!(
            verify_image(&image),
            Err(IntegrityError::Mismatch {
                stored: receipt.content_checksum.wrapping_add(1),
                computed: receipt.content_checksum,
            })
        );
    }

    #[test]
    fn same_version_allocation_fails() {
        let store = seeded();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let err = write_update(&store, &header, payload, "micom", 3, false).unwrap_err();
        assert!(matches!(err, UpdateError::SlotAllocation(AuthorityError::Duplicate { .. })));
    }

    #[test]
    fn capacity_limit_is_partial_payload_write() {
        let store = seeded();
        store.set_partition_size("micom", (HEADER_SIZE + 600) as u64).unwrap();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let err = write_update(&store, &header, payload, "micom", 4, false).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::PartialWrite { stage: WriteStage::Payload, expected: 512, actual: 88 }
        ));
        store.update_binary("micom").unwrap();
        assert_eq!(store.get_update_info("micom").unwrap().version, "3");
    }

    #[test]
    fn capacity_below_header_is_partial_header_write() {
        let store = seeded();
        store.set_partition_size("micom", 10).unwrap();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let err = write_update(&store, &header, payload, "micom", 4, false).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::PartialWrite { stage: WriteStage::Header, expected: HEADER_SIZE, actual: 10 }
        ));
    }

    #[test]
    fn truncated_source_aborts_with_partial_read() {
        let store = seeded();
        store.with_raw_slot("micom", 3, |bytes| bytes.truncate(HEADER_SIZE + 700)).unwrap();
        let (header, payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        let err = write_update(&store, &header, payload, "micom", 4, false).unwrap_err();
        assert!(matches!(err, UpdateError::PartialRead { expected: 512, actual: 188 }));
    }

    #[test]
    fn rename_writes_new_family() {
        let store = seeded();
        let (header, payload) = open_source(&store, "micom", 3, 100).unwrap();
        write_update(&store, &header, payload, "newapp", 20_200_421, false).unwrap();
        let image = store.slot_bytes("newapp", 20_200_421).unwrap();
        let written = verify_image(&image).unwrap();
        assert_eq!(written.name().unwrap(), "newapp");
        assert_eq!(written.version().unwrap(), "20200421");
    }

    #[test]
    fn consumed_reader_is_rejected_before_allocation() {
        let store = seeded();
        let (header, mut payload) = open_source(&store, "micom", 3, DEFAULT_CHUNK_SIZE).unwrap();
        while payload.next_chunk().unwrap().is_some() {}
        let err = write_update(&store, &header, payload, "micom", 4, false).unwrap_err();
        assert!(matches!(err, UpdateError::Format(HeaderError::Field("bin_size"))));
        assert!(store.slot_bytes("micom", 4).is_none());
    }
}
