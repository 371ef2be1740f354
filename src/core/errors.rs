//! ENSP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Coarse classification of every failure the probe can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// A write was refused with "no space left on device". Recovered.
    ExpectedExhaustion,
    /// Reported file size diverged from the tracked expectation.
    InvariantViolation,
    /// Any other I/O failure during probing or cleanup.
    UnexpectedError,
    /// Cleanup outcome disagreed with the metadata policy. Non-fatal.
    CleanupError,
    /// Configuration, setup, or logging failure outside the probe loop.
    Setup,
}

/// Where in the probe loop a size check was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCheckPhase {
    BeforeWrite,
    AfterFailedWrite,
}

impl fmt::Display for SizeCheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeWrite => "before write",
            Self::AfterFailedWrite => "after failed write",
        })
    }
}

/// Filesystem operation that produced an unexpected error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsOp {
    Open,
    Write,
    Stat,
    Unlink,
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Write => "write",
            Self::Stat => "stat",
            Self::Unlink => "unlink",
        })
    }
}

/// Top-level error type for the ENOSPC probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("[ENSP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ENSP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ENSP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error(
        "[ENSP-2001] file size invariant violated {phase} at {path}: expected {expected} bytes, stat reported {actual} (iteration {iteration})"
    )]
    InvariantViolation {
        path: PathBuf,
        phase: SizeCheckPhase,
        expected: u64,
        actual: u64,
        iteration: u64,
    },

    #[error(
        "[ENSP-2002] unexpected {op} error at {path} (last known size {last_known_size} bytes, errno {errno:?}): {source}"
    )]
    UnexpectedIo {
        path: PathBuf,
        op: FsOp,
        last_known_size: u64,
        errno: Option<i32>,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENSP-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ENSP-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENSP-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ProbeError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ENSP-1001",
            Self::MissingConfig { .. } => "ENSP-1002",
            Self::ConfigParse { .. } => "ENSP-1003",
            Self::InvariantViolation { .. } => "ENSP-2001",
            Self::UnexpectedIo { .. } => "ENSP-2002",
            Self::Serialization { .. } => "ENSP-2101",
            Self::Io { .. } => "ENSP-3002",
            Self::Runtime { .. } => "ENSP-3900",
        }
    }

    /// Failure class used for reporting.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::InvariantViolation { .. } => FailureClass::InvariantViolation,
            Self::UnexpectedIo { .. } => FailureClass::UnexpectedError,
            _ => FailureClass::Setup,
        }
    }

    /// Last file size the probe knew to be correct, when the error carries one.
    #[must_use]
    pub const fn last_known_size(&self) -> Option<u64> {
        match self {
            Self::InvariantViolation { expected, .. } => Some(*expected),
            Self::UnexpectedIo {
                last_known_size, ..
            } => Some(*last_known_size),
            _ => None,
        }
    }

    /// Raw OS error number, when the failure came from the filesystem.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::UnexpectedIo { errno, .. } => *errno,
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ProbeError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ProbeError> {
        vec![
            ProbeError::InvalidConfig {
                details: String::new(),
            },
            ProbeError::MissingConfig {
                path: PathBuf::new(),
            },
            ProbeError::ConfigParse {
                context: "",
                details: String::new(),
            },
            ProbeError::InvariantViolation {
                path: PathBuf::new(),
                phase: SizeCheckPhase::BeforeWrite,
                expected: 0,
                actual: 0,
                iteration: 0,
            },
            ProbeError::UnexpectedIo {
                path: PathBuf::new(),
                op: FsOp::Write,
                last_known_size: 0,
                errno: None,
                source: std::io::Error::other("test"),
            },
            ProbeError::Serialization {
                context: "",
                details: String::new(),
            },
            ProbeError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ProbeError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(ProbeError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_ensp_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("ENSP-"),
                "code {} must start with ENSP-",
                err.code()
            );
        }
    }

    #[test]
    fn invariant_violation_display_carries_context() {
        let err = ProbeError::InvariantViolation {
            path: PathBuf::from("/mnt/dfuse/file.txt"),
            phase: SizeCheckPhase::AfterFailedWrite,
            expected: 262_144,
            actual: 266_240,
            iteration: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("ENSP-2001"), "{msg}");
        assert!(msg.contains("after failed write"), "{msg}");
        assert!(msg.contains("262144"), "{msg}");
        assert!(msg.contains("266240"), "{msg}");
        assert_eq!(err.class(), FailureClass::InvariantViolation);
        assert_eq!(err.last_known_size(), Some(262_144));
    }

    #[test]
    fn unexpected_io_exposes_errno_and_size() {
        let err = ProbeError::UnexpectedIo {
            path: PathBuf::from("/mnt/dfuse/file.txt"),
            op: FsOp::Write,
            last_known_size: 131_072,
            errno: Some(5),
            source: std::io::Error::from_raw_os_error(5),
        };
        assert_eq!(err.class(), FailureClass::UnexpectedError);
        assert_eq!(err.errno(), Some(5));
        assert_eq!(err.last_known_size(), Some(131_072));
        assert!(err.to_string().contains("unexpected write error"));
    }

    #[test]
    fn setup_errors_have_no_size_context() {
        let err = ProbeError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "ENSP-3002");
        assert_eq!(err.class(), FailureClass::Setup);
        assert_eq!(err.last_known_size(), None);
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ProbeError = json_err.into();
        assert_eq!(err.code(), "ENSP-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: ProbeError = toml_err.into();
        assert_eq!(err.code(), "ENSP-1003");
    }
}
