// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Binary image update library (header format, CRC streaming, slot writes)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests per module + integration tests (via tests/binupdate_host)
//!   - header parse/serialize round-trip
//!   - checksum chunking invariance
//!   - slot write: valid, corrupt (+1), partial write/read
//!   - authority allocation rules and activation
//!   - single-slot callback registry
//!
//! PUBLIC API:
//!   - BinaryHeader: fixed-layout image header
//!   - ChecksumState: incremental CRC-32
//!   - SlotAuthority: boundary to the slot-storage authority
//!   - open_source / PayloadReader: chunked image reader
//!   - write_update: allocate -> header -> payload -> checksum backpatch
//!   - NotificationRegistry: state-changed callback slot
//!   - MemSlotStore: in-memory authority for host runs
//!
//! DEPENDENCIES:
//!   - crc32fast: image checksum
//!   - parking_lot: store and registry locks
//!   - log: diagnostics
//!   - thiserror: error types

#![forbid(unsafe_code)]

pub mod authority;
pub mod checksum;
pub mod error;
pub mod header;
pub mod registry;
pub mod source;
pub mod store;
pub mod writer;

pub use authority::{AuthorityError, BinaryUpdateInfo, BinaryUpdateInfoList, SlotAuthority};
pub use checksum::{assemble_image, image_checksum, verify_image, ChecksumState, IntegrityError};
pub use error::{Result, UpdateError, WriteStage};
pub use header::{parse_version, BinaryHeader, HeaderError, CHECKSUM_SIZE, HEADER_SIZE};
pub use registry::{NotificationRegistry, RegistryError, StateChange, StateChangedCallback};
pub use source::{open_source, read_header, PayloadReader, DEFAULT_CHUNK_SIZE};
pub use store::{Activation, MemSlotStore, MemSlotWriter, DEFAULT_PARTITION_SIZE};
pub use writer::{write_update, SlotReceipt};
