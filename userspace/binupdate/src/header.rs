// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Fixed-layout binary image header (v1)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests + proptest round-trip
//!
//! Wire layout (little-endian, packed, 62 bytes):
//!
//! | Offset | Size | Field              |
//! |--------|------|--------------------|
//! | 0      | 4    | checksum           |
//! | 4      | 2    | header_size        |
//! | 6      | 16   | bin_name           |
//! | 22     | 16   | bin_ver            |
//! | 38     | 4    | bin_size           |
//! | 42     | 1    | bin_type           |
//! | 43     | 1    | compression_type   |
//! | 44     | 2    | bin_priority       |
//! | 46     | 4    | bin_ram_size       |
//! | 50     | 8    | kernel_ver         |
//! | 58     | 4    | jump_addr          |
//!
//! `header_size` counts the bytes following the checksum field that the
//! checksum covers; it never exceeds [`HEADER_TAIL_SIZE`].

use thiserror::Error;

/// Size of the leading checksum field.
pub const CHECKSUM_SIZE: usize = 4;
/// Maximum bytes of `bin_name` (NUL padded, terminator optional).
pub const BIN_NAME_MAX: usize = 16;
/// Maximum bytes of `bin_ver` (NUL padded, terminator optional).
pub const BIN_VER_MAX: usize = 16;
/// Maximum bytes of `kernel_ver`.
pub const KERNEL_VER_MAX: usize = 8;
/// Total size of the serialized header record.
pub const HEADER_SIZE: usize = 62;
/// Header bytes after the checksum field.
pub const HEADER_TAIL_SIZE: usize = HEADER_SIZE - CHECKSUM_SIZE;

const OFF_HEADER_SIZE: usize = CHECKSUM_SIZE;
const OFF_NAME: usize = OFF_HEADER_SIZE + 2;
const OFF_VERSION: usize = OFF_NAME + BIN_NAME_MAX;
const OFF_BIN_SIZE: usize = OFF_VERSION + BIN_VER_MAX;
const OFF_BIN_TYPE: usize = OFF_BIN_SIZE + 4;
const OFF_COMPRESSION: usize = OFF_BIN_TYPE + 1;
const OFF_PRIORITY: usize = OFF_COMPRESSION + 1;
const OFF_RAM_SIZE: usize = OFF_PRIORITY + 2;
const OFF_KERNEL_VER: usize = OFF_RAM_SIZE + 4;
const OFF_JUMP_ADDR: usize = OFF_KERNEL_VER + KERNEL_VER_MAX;

const _: () = assert!(OFF_JUMP_ADDR + 4 == HEADER_SIZE);

/// Header decoding and field errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// Byte length differs from the fixed record size.
    #[error("header length {actual} (expected {expected})")]
    Length { actual: usize, expected: usize },
    /// A field could not be decoded or does not fit its slot.
    #[error("invalid header field: {0}")]
    Field(&'static str),
    /// The version string is not a non-negative integer.
    #[error("version {0:?} is not a non-negative integer")]
    Version(String),
}

/// Decoded binary header. Byte fields keep their padding so that
/// `BinaryHeader::parse(b)?.to_bytes() == b` holds for every accepted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHeader {
    pub checksum: u32,
    pub header_size: u16,
    name: [u8; BIN_NAME_MAX],
    version: [u8; BIN_VER_MAX],
    pub bin_size: u32,
    pub bin_type: u8,
    pub compression_type: u8,
    pub priority: u16,
    pub ram_size: u32,
    kernel_version: [u8; KERNEL_VER_MAX],
    pub jump_addr: u32,
}

impl BinaryHeader {
    /// Builds a header for a `bin_size`-byte payload with an unset checksum.
    pub fn new(name: &str, version: &str, bin_size: u32) -> Result<Self, HeaderError> {
        let mut header = Self {
            checksum: 0,
            header_size: HEADER_TAIL_SIZE as u16,
            name: [0; BIN_NAME_MAX],
            version: [0; BIN_VER_MAX],
            bin_size,
            bin_type: 0,
            compression_type: 0,
            priority: 0,
            ram_size: 0,
            kernel_version: [0; KERNEL_VER_MAX],
            jump_addr: 0,
        };
        header.set_name(name)?;
        header.set_version(version)?;
        Ok(header)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::Length { actual: bytes.len(), expected: HEADER_SIZE });
        }
        let header_size = read_u16(bytes, OFF_HEADER_SIZE);
        if header_size as usize > HEADER_TAIL_SIZE {
            return Err(HeaderError::Field("header_size"));
        }
        Ok(Self {
            checksum: read_u32(bytes, 0),
            header_size,
            name: read_array(bytes, OFF_NAME),
            version: read_array(bytes, OFF_VERSION),
            bin_size: read_u32(bytes, OFF_BIN_SIZE),
            bin_type: bytes[OFF_BIN_TYPE],
            compression_type: bytes[OFF_COMPRESSION],
            priority: read_u16(bytes, OFF_PRIORITY),
            ram_size: read_u32(bytes, OFF_RAM_SIZE),
            kernel_version: read_array(bytes, OFF_KERNEL_VER),
            jump_addr: read_u32(bytes, OFF_JUMP_ADDR),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.checksum.to_le_bytes());
        out[OFF_HEADER_SIZE..OFF_HEADER_SIZE + 2].copy_from_slice(&self.header_size.to_le_bytes());
        out[OFF_NAME..OFF_NAME + BIN_NAME_MAX].copy_from_slice(&self.name);
        out[OFF_VERSION..OFF_VERSION + BIN_VER_MAX].copy_from_slice(&self.version);
        out[OFF_BIN_SIZE..OFF_BIN_SIZE + 4].copy_from_slice(&self.bin_size.to_le_bytes());
        out[OFF_BIN_TYPE] = self.bin_type;
        out[OFF_COMPRESSION] = self.compression_type;
        out[OFF_PRIORITY..OFF_PRIORITY + 2].copy_from_slice(&self.priority.to_le_bytes());
        out[OFF_RAM_SIZE..OFF_RAM_SIZE + 4].copy_from_slice(&self.ram_size.to_le_bytes());
        out[OFF_KERNEL_VER..OFF_KERNEL_VER + KERNEL_VER_MAX].copy_from_slice(&self.kernel_version);
        out[OFF_JUMP_ADDR..OFF_JUMP_ADDR + 4].copy_from_slice(&self.jump_addr.to_le_bytes());
        out
    }

    /// Header bytes covered by the checksum: `header_size` bytes after the checksum field.
    pub fn checksum_scope(&self) -> Vec<u8> {
        let bytes = self.to_bytes();
        bytes[CHECKSUM_SIZE..CHECKSUM_SIZE + self.header_size as usize].to_vec()
    }

    pub fn name(&self) -> Result<&str, HeaderError> {
        field_str(&self.name, "bin_name")
    }

    pub fn version(&self) -> Result<&str, HeaderError> {
        field_str(&self.version, "bin_ver")
    }

    pub fn kernel_version(&self) -> Result<&str, HeaderError> {
        field_str(&self.kernel_version, "kernel_ver")
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), HeaderError> {
        write_field(&mut self.name, name, "bin_name")
    }

    pub fn set_version(&mut self, version: &str) -> Result<(), HeaderError> {
        write_field(&mut self.version, version, "bin_ver")
    }

    pub fn set_kernel_version(&mut self, version: &str) -> Result<(), HeaderError> {
        write_field(&mut self.kernel_version, version, "kernel_ver")
    }

    /// Parses `bin_ver` as a non-negative integer.
    pub fn version_as_integer(&self) -> Result<u32, HeaderError> {
        let text = self.version()?;
        parse_version(text)
    }
}

/// Parses a version string the way headers and update info carry it.
pub fn parse_version(text: &str) -> Result<u32, HeaderError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HeaderError::Version(text.to_string()));
    }
    text.parse::<u32>().map_err(|_| HeaderError::Version(text.to_string()))
}

fn field_str<'a>(field: &'a [u8], label: &'static str) -> Result<&'a str, HeaderError> {
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..len]).map_err(|_| HeaderError::Field(label))
}

// strncpy semantics: zero the whole field, a full-length value carries no terminator.
fn write_field(field: &mut [u8], value: &str, label: &'static str) -> Result<(), HeaderError> {
    let bytes = value.as_bytes();
    if bytes.len() > field.len() || bytes.contains(&0) {
        return Err(HeaderError::Field(label));
    }
    field.fill(0);
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}
