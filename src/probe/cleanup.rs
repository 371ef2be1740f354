//! Cleanup verifier: remove the exhausted file once and compare the outcome
//! with the store's metadata policy.
//!
//! Removing a file needs its own metadata write. On a store with no reserved
//! metadata headroom whose data space is used up, the unlink is expected to
//! fail with "no space left on device". With headroom it is expected to
//! succeed. A mismatch is reported on the result, not raised; any other error
//! is fatal.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::errors::{FailureClass, FsOp, ProbeError, Result};
use crate::logger::events::ProbeEvent;
use crate::platform::fs::ProbeFs;
use crate::probe::context::ProbeContext;

/// Whether the store was provisioned with space held back for metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPolicy {
    #[default]
    Unreserved,
    Reserved,
}

impl MetadataPolicy {
    /// Outcome a correct store produces for this policy.
    #[must_use]
    pub const fn expected_outcome(self) -> CleanupOutcome {
        match self {
            Self::Unreserved => CleanupOutcome::FailedAsExpected,
            Self::Reserved => CleanupOutcome::Succeeded,
        }
    }
}

impl fmt::Display for MetadataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unreserved => "unreserved",
            Self::Reserved => "reserved",
        })
    }
}

impl FromStr for MetadataPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unreserved" | "none" => Ok(Self::Unreserved),
            "reserved" => Ok(Self::Reserved),
            other => Err(format!("expected 'unreserved' or 'reserved', got {other:?}")),
        }
    }
}

/// What the single unlink attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Unlink was refused with "no space left on device".
    FailedAsExpected,
    Succeeded,
    UnexpectedError,
}

/// Non-fatal disagreement between the cleanup outcome and the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum CleanupDiscrepancy {
    #[error("unlink succeeded although the store has no metadata headroom")]
    UnexpectedSuccess,
    #[error("unlink hit ENOSPC although metadata headroom is reserved")]
    UnexpectedNoSpace,
}

impl CleanupDiscrepancy {
    #[must_use]
    pub const fn class(self) -> FailureClass {
        FailureClass::CleanupError
    }
}

/// Record produced once by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub outcome: CleanupOutcome,
    pub policy: MetadataPolicy,
    pub discrepancy: Option<CleanupDiscrepancy>,
}

impl CleanupResult {
    fn new(outcome: CleanupOutcome, policy: MetadataPolicy) -> Self {
        let discrepancy = match (policy, outcome) {
            (MetadataPolicy::Unreserved, CleanupOutcome::Succeeded) => {
                Some(CleanupDiscrepancy::UnexpectedSuccess)
            }
            (MetadataPolicy::Reserved, CleanupOutcome::FailedAsExpected) => {
                Some(CleanupDiscrepancy::UnexpectedNoSpace)
            }
            _ => None,
        };
        Self {
            outcome,
            policy,
            discrepancy,
        }
    }

    /// Record for a cleanup that a fatal error cut short.
    #[must_use]
    pub const fn aborted(policy: MetadataPolicy) -> Self {
        Self {
            outcome: CleanupOutcome::UnexpectedError,
            policy,
            discrepancy: None,
        }
    }

    /// True when the outcome is the one the policy predicts.
    #[must_use]
    pub fn expectation_met(&self) -> bool {
        self.outcome == self.policy.expected_outcome()
    }
}

/// Try to delete `path` once. No retry.
pub fn verify_cleanup<F: ProbeFs>(
    fs: &F,
    ctx: &mut ProbeContext<'_>,
    path: &Path,
    policy: MetadataPolicy,
) -> Result<CleanupResult> {
    let outcome = match fs.unlink(path) {
        Ok(()) => CleanupOutcome::Succeeded,
        Err(e) if e.is_no_space() => CleanupOutcome::FailedAsExpected,
        Err(e) => {
            let error = ProbeError::UnexpectedIo {
                path: path.to_path_buf(),
                op: FsOp::Unlink,
                last_known_size: 0,
                errno: e.errno(),
                source: e.source,
            };
            ctx.report(&ProbeEvent::failed(path.to_path_buf(), &error));
            return Err(error);
        }
    };

    let result = CleanupResult::new(outcome, policy);
    ctx.report(&ProbeEvent::CleanupFinished {
        path: path.to_path_buf(),
        result: result.clone(),
    });
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolConfig;
    use crate::fixture::sim::SimFs;
    use crate::logger::sink::MemorySink;
    use crate::platform::fs::ProbeFile;

    const KIB_128: u64 = 128 * 1024;

    /// A sim store whose data space is exactly filled by one file.
    fn exhausted_store(reserved: u64) -> (SimFs, std::path::PathBuf) {
        let fs = SimFs::new(PoolConfig {
            capacity_bytes: 4 * KIB_128 + reserved,
            overhead_bytes: 0,
            reserved_metadata_bytes: reserved,
            unlink_cost_bytes: 4096,
        });
        let path = fs.mount_path().join("file.txt");
        {
            let mut file = fs.open_truncate(&path).unwrap();
            for _ in 0..4 {
                file.write_chunk(&vec![0u8; KIB_128 as usize]).unwrap();
            }
            assert!(file.write_chunk(&[0u8; 1]).unwrap_err().is_no_space());
        }
        (fs, path)
    }

    fn verify(fs: &SimFs, path: &Path, policy: MetadataPolicy) -> Result<CleanupResult> {
        let mut sink = MemorySink::new();
        let mut ctx = ProbeContext::new(&mut sink);
        verify_cleanup(fs, &mut ctx, path, policy)
    }

    #[test]
    fn zero_headroom_unlink_fails_as_expected() {
        let (fs, path) = exhausted_store(0);
        let result = verify(&fs, &path, MetadataPolicy::Unreserved).unwrap();
        assert_eq!(result.outcome, CleanupOutcome::FailedAsExpected);
        assert!(result.discrepancy.is_none());
        assert!(result.expectation_met());
        assert!(fs.file_size(&path).is_some(), "file must survive failed unlink");
    }

    #[test]
    fn reserved_headroom_unlink_succeeds() {
        let (fs, path) = exhausted_store(64 * 1024);
        let result = verify(&fs, &path, MetadataPolicy::Reserved).unwrap();
        assert_eq!(result.outcome, CleanupOutcome::Succeeded);
        assert!(result.expectation_met());
        assert!(fs.file_size(&path).is_none());
        assert_eq!(fs.used_bytes(), 0);
    }

    #[test]
    fn success_without_headroom_is_a_discrepancy() {
        let (fs, path) = exhausted_store(64 * 1024);
        let result = verify(&fs, &path, MetadataPolicy::Unreserved).unwrap();
        assert_eq!(result.outcome, CleanupOutcome::Succeeded);
        assert_eq!(
            result.discrepancy,
            Some(CleanupDiscrepancy::UnexpectedSuccess)
        );
        assert!(!result.expectation_met());
        assert_eq!(
            CleanupDiscrepancy::UnexpectedSuccess.class(),
            FailureClass::CleanupError
        );
    }

    #[test]
    fn enospc_with_headroom_is_a_discrepancy() {
        let (fs, path) = exhausted_store(0);
        let result = verify(&fs, &path, MetadataPolicy::Reserved).unwrap();
        assert_eq!(
            result.discrepancy,
            Some(CleanupDiscrepancy::UnexpectedNoSpace)
        );
    }

    #[test]
    fn other_unlink_error_is_fatal() {
        let (fs, path) = exhausted_store(0);
        let fs = fs.with_unlink_errno(13);
        let err = verify(&fs, &path, MetadataPolicy::Unreserved).unwrap_err();
        assert_eq!(err.class(), FailureClass::UnexpectedError);
        assert_eq!(err.errno(), Some(13));
    }

    #[test]
    fn missing_file_is_fatal() {
        let fs = SimFs::new(PoolConfig::default());
        let err = verify(
            &fs,
            &fs.mount_path().join("never-created"),
            MetadataPolicy::Unreserved,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::UnexpectedIo {
                op: FsOp::Unlink,
                ..
            }
        ));
    }

    #[test]
    fn policy_parses_and_displays() {
        assert_eq!(
            "Reserved".parse::<MetadataPolicy>().unwrap(),
            MetadataPolicy::Reserved
        );
        assert_eq!(
            "none".parse::<MetadataPolicy>().unwrap(),
            MetadataPolicy::Unreserved
        );
        assert!("maybe".parse::<MetadataPolicy>().is_err());
        assert_eq!(MetadataPolicy::Unreserved.to_string(), "unreserved");
    }
}
