// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by the update pipeline.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::authority::AuthorityError;
use crate::header::HeaderError;

/// Result alias for pipeline operations.
pub type Result<T> = core::result::Result<T, UpdateError>;

/// Step of a slot write that came up short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Header,
    Payload,
    Checksum,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteStage::Header => "header",
            WriteStage::Payload => "payload",
            WriteStage::Checksum => "checksum",
        })
    }
}

/// Terminal failures of one update operation. Callers may retry the whole
/// operation; nothing resumes mid-stream.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The authority refused to allocate a slot.
    #[error("slot allocation failed: {0}")]
    SlotAllocation(#[source] AuthorityError),
    /// A write stored fewer bytes than requested.
    #[error("partial {stage} write: {actual} of {expected} bytes")]
    PartialWrite { stage: WriteStage, expected: usize, actual: usize },
    /// The source ended before the requested byte count.
    #[error("partial read: {actual} of {expected} bytes")]
    PartialRead { expected: usize, actual: usize },
    #[error("header format: {0}")]
    Format(#[from] HeaderError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("authority: {0}")]
    Authority(#[source] AuthorityError),
}

impl From<AuthorityError> for UpdateError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::NotFound(what) => UpdateError::NotFound(what),
            other => UpdateError::Authority(other),
        }
    }
}
