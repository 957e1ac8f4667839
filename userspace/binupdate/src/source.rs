// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Chunked reader over a stored image (update source)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests

use std::io::{self, Read};

use log::trace;

use crate::authority::SlotAuthority;
use crate::error::{Result, UpdateError};
use crate::header::{BinaryHeader, HEADER_SIZE};

/// Copy buffer size used when streaming payloads.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Opens slot `name`/`version` and splits it into its header and a payload reader.
pub fn open_source<A: SlotAuthority>(
    authority: &A,
    name: &str,
    version: u32,
    chunk_size: usize,
) -> Result<(BinaryHeader, PayloadReader<A::Reader>)> {
    let mut reader = authority.open_entry(name, version)?;
    let header = read_header(&mut reader)?;
    let payload = PayloadReader::new(reader, header.bin_size as u64, chunk_size);
    Ok((header, payload))
}

/// Reads and parses the fixed-size header at the reader's position.
pub fn read_header<R: Read>(reader: &mut R) -> Result<BinaryHeader> {
    let mut bytes = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut bytes)?;
    if got != HEADER_SIZE {
        return Err(UpdateError::PartialRead { expected: HEADER_SIZE, actual: got });
    }
    Ok(BinaryHeader::parse(&bytes)?)
}

/// Forward-only payload stream of exactly `total` bytes, handed out in
/// chunks of at most `chunk_size`. Once exhausted (or failed) it stays
/// exhausted; reopen the slot to read again.
pub struct PayloadReader<R> {
    inner: R,
    total: u64,
    consumed: u64,
    buf: Vec<u8>,
}

impl<R: Read> PayloadReader<R> {
    pub fn new(inner: R, total: u64, chunk_size: usize) -> Self {
        Self { inner, total, consumed: 0, buf: vec![0u8; chunk_size.max(1)] }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.consumed
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the next chunk, `None` once `total` bytes were produced.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(self.buf.len() as u64) as usize;
        let got = match read_full(&mut self.inner, &mut self.buf[..want]) {
            Ok(got) => got,
            Err(err) => {
                self.total = self.consumed;
                return Err(err.into());
            }
        };
        if got != want {
            self.total = self.consumed;
            return Err(UpdateError::PartialRead { expected: want, actual: got });
        }
        self.consumed += want as u64;
        trace!("payload chunk {} bytes ({}/{})", want, self.consumed, self.total);
        Ok(Some(&self.buf[..want]))
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
