// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Binary update selftest (scenario runner for the update pipeline)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + integration tests (via tests/binupdate_host)
//!
//! PUBLIC API:
//!   - Orchestrator: runs the scenario sequence N times or until cancelled
//!   - SelftestConfig: TOML settings (names, versions, reload grace)
//!   - BatchSummary / UpdateOutcome: per-batch and per-scenario results
//!   - demo_image: deterministic image used to seed host runs
//!
//! DEPENDENCIES:
//!   - binupdate: header, checksum, slot writer, authority boundary
//!   - serde/toml: configuration
//!   - log: scenario progress and result tables

#![forbid(unsafe_code)]

pub mod batch;
pub mod config;
pub mod orchestrator;
pub mod report;

pub use batch::{BatchRunContext, BatchSummary, CancelToken, ScenarioKind, UpdateOutcome};
pub use config::{ConfigError, SelftestConfig};
pub use orchestrator::Orchestrator;

use binupdate::{assemble_image, BinaryHeader, HeaderError};

/// Builds a valid image for `name`/`version` with a `payload_len`-byte
/// patterned payload.
pub fn demo_image(name: &str, version: &str, payload_len: usize) -> Result<Vec<u8>, HeaderError> {
    let header = BinaryHeader::new(name, version, 0)?;
    let payload: Vec<u8> = (0..payload_len).map(|i| (i as u8).wrapping_mul(31) ^ 0x5A).collect();
    Ok(assemble_image(&header, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use binupdate::{verify_image, HEADER_SIZE};

    #[test]
    fn demo_image_verifies() {
        let image = demo_image("micom", "3", 1024).unwrap();
        assert_eq!(image.len(), HEADER_SIZE + 1024);
        let header = verify_image(&image).unwrap();
        assert_eq!(header.name().unwrap(), "micom");
        assert_eq!(header.bin_size, 1024);
        assert_eq!(image, demo_image("micom", "3", 1024).unwrap());
    }

    #[test]
    fn demo_image_rejects_long_name() {
        assert!(demo_image("a-name-way-past-sixteen", "1", 4).is_err());
    }
}
