//! Typed run events and their mapping onto JSONL log entries.

#![allow(missing_docs)]

use std::path::PathBuf;

use crate::core::errors::{FailureClass, ProbeError};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::probe::cleanup::CleanupResult;
use crate::probe::exhaust::ProbeResult;

/// Events emitted by the probe, the verifier, and the scenario runner.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    RunStarted {
        mount_path: PathBuf,
        chunk_size: u64,
        config_hash: Option<String>,
        available_bytes: Option<u64>,
    },
    ProbeStarted {
        path: PathBuf,
        chunk_size: u64,
    },
    WriteExhausted {
        path: PathBuf,
        result: ProbeResult,
    },
    ProbeFailed {
        path: PathBuf,
        code: &'static str,
        class: String,
        message: String,
        last_known_size: Option<u64>,
        errno: Option<i32>,
    },
    CleanupFinished {
        path: PathBuf,
        result: CleanupResult,
    },
    RunCompleted {
        passed: bool,
        final_size: Option<u64>,
        duration_ms: u64,
    },
}

impl ProbeEvent {
    /// Build a failure event from a fatal probe error.
    #[must_use]
    pub fn failed(path: PathBuf, error: &ProbeError) -> Self {
        Self::ProbeFailed {
            path,
            code: error.code(),
            class: enum_label(&error.class()),
            message: error.to_string(),
            last_known_size: error.last_known_size(),
            errno: error.errno(),
        }
    }

    /// Convert to the flat JSONL representation.
    #[must_use]
    pub fn to_log_entry(&self) -> LogEntry {
        match self {
            Self::RunStarted {
                mount_path,
                chunk_size,
                config_hash,
                available_bytes,
            } => {
                let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
                e.path = Some(mount_path.display().to_string());
                e.chunk_size = Some(*chunk_size);
                e.available_bytes = *available_bytes;
                e.details = config_hash.as_ref().map(|h| format!("config_hash={h}"));
                e
            }
            Self::ProbeStarted { path, chunk_size } => {
                let mut e = LogEntry::new(EventType::ProbeStart, Severity::Info);
                e.path = Some(path.display().to_string());
                e.chunk_size = Some(*chunk_size);
                e
            }
            Self::WriteExhausted { path, result } => {
                let mut e = LogEntry::new(EventType::WriteExhausted, Severity::Info);
                e.path = Some(path.display().to_string());
                e.size = Some(result.final_size);
                e.chunk_size = Some(result.chunk_size);
                e.writes = Some(result.writes_completed);
                e.outcome = Some(enum_label(&result.outcome));
                e.ok = Some(true);
                e.error_class = Some(enum_label(&FailureClass::ExpectedExhaustion));
                e.details = Some("file write returned ENOSPC".to_string());
                e
            }
            Self::ProbeFailed {
                path,
                code,
                class,
                message,
                last_known_size,
                errno,
            } => {
                let mut e = LogEntry::new(EventType::ProbeFailed, Severity::Critical);
                e.path = Some(path.display().to_string());
                e.size = *last_known_size;
                e.ok = Some(false);
                e.error_code = Some((*code).to_string());
                e.error_class = Some(class.clone());
                e.errno = *errno;
                e.error_message = Some(message.clone());
                e
            }
            Self::CleanupFinished { path, result } => {
                let severity = if result.discrepancy.is_some() {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                let mut e = LogEntry::new(EventType::Cleanup, severity);
                e.path = Some(path.display().to_string());
                e.outcome = Some(enum_label(&result.outcome));
                e.ok = Some(result.discrepancy.is_none());
                e.error_class = result.discrepancy.map(|d| enum_label(&d.class()));
                e.details = Some(match &result.discrepancy {
                    Some(d) => d.to_string(),
                    None => format!("metadata_policy={}", result.policy),
                });
                e
            }
            Self::RunCompleted {
                passed,
                final_size,
                duration_ms,
            } => {
                let severity = if *passed {
                    Severity::Info
                } else {
                    Severity::Critical
                };
                let mut e = LogEntry::new(EventType::RunComplete, severity);
                e.ok = Some(*passed);
                e.size = *final_size;
                e.duration_ms = Some(*duration_ms);
                e
            }
        }
    }
}

/// `snake_case` label of a unit enum via its serde representation.
pub fn enum_label<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
