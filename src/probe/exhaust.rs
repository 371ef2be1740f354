//! Space-exhaustion probe: write fixed-size chunks until the store refuses.
//!
//! Two size checks carry the whole value of the probe:
//! - before every write, fstat must equal the bytes written so far;
//! - after the first no-space failure, fstat must still equal that figure.
//!
//! Together they show the store accounts space atomically per write. Any
//! mismatch, and any failure other than "no space left on device", aborts the
//! run. The open handle lives in this function's scope and is closed on every
//! return path, fatal ones included.
//!
//! Chunk size is a precondition: it must not exceed the largest write the
//! transport passes through unsplit (128 KiB on older FUSE kernels), or a
//! partially accepted split write shows up as a spurious size violation.

#![allow(missing_docs)]

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FsOp, ProbeError, Result, SizeCheckPhase};
use crate::fixture::MountPath;
use crate::logger::events::ProbeEvent;
use crate::platform::fs::{FsError, ProbeFile, ProbeFs};
use crate::probe::context::ProbeContext;

/// Bytes issued per write call. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkSize(NonZeroUsize);

impl ChunkSize {
    /// Validate a byte count coming from configuration or the command line.
    pub fn new(bytes: u64) -> Result<Self> {
        usize::try_from(bytes)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or_else(|| ProbeError::InvalidConfig {
                details: format!("chunk size must be between 1 and {} bytes, got {bytes}", usize::MAX),
            })
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        self.0.get()
    }

    #[must_use]
    pub const fn bytes_u64(self) -> u64 {
        self.0.get() as u64
    }
}

/// How a probe run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    ExhaustedAsExpected,
    UnexpectedError,
}

/// Immutable record produced once when the probe terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    pub final_size: u64,
    pub writes_completed: u64,
    pub chunk_size: u64,
}

impl ProbeResult {
    /// Record for a run that a fatal error cut short.
    #[must_use]
    pub fn aborted(error: &ProbeError, chunk: ChunkSize) -> Self {
        let final_size = error.last_known_size().unwrap_or(0);
        Self {
            outcome: ProbeOutcome::UnexpectedError,
            final_size,
            writes_completed: final_size / chunk.bytes_u64(),
            chunk_size: chunk.bytes_u64(),
        }
    }
}

/// The file under test and the size it should currently have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    path: PathBuf,
    expected_size: u64,
}

impl FileState {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            expected_size: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn expected_size(&self) -> u64 {
        self.expected_size
    }

    fn check(&self, actual: u64, phase: SizeCheckPhase, iteration: u64) -> Result<()> {
        if actual == self.expected_size {
            return Ok(());
        }
        Err(ProbeError::InvariantViolation {
            path: self.path.clone(),
            phase,
            expected: self.expected_size,
            actual,
            iteration,
        })
    }

    fn unexpected(&self, op: FsOp, error: FsError) -> ProbeError {
        ProbeError::UnexpectedIo {
            path: self.path.clone(),
            op,
            last_known_size: self.expected_size,
            errno: error.errno(),
            source: error.source,
        }
    }
}

/// Fill `<mount>/<file_name>` until the store reports no space.
pub fn probe<F: ProbeFs>(
    fs: &F,
    ctx: &mut ProbeContext<'_>,
    mount: &MountPath,
    file_name: &str,
    chunk: ChunkSize,
) -> Result<ProbeResult> {
    let path = mount.join(file_name);
    ctx.report(&ProbeEvent::ProbeStarted {
        path: path.clone(),
        chunk_size: chunk.bytes_u64(),
    });

    let outcome = write_until_exhausted(fs, path.clone(), chunk);
    match &outcome {
        Ok(result) => ctx.report(&ProbeEvent::WriteExhausted {
            path,
            result: result.clone(),
        }),
        Err(error) => ctx.report(&ProbeEvent::failed(path, error)),
    }
    outcome
}

fn write_until_exhausted<F: ProbeFs>(fs: &F, path: PathBuf, chunk: ChunkSize) -> Result<ProbeResult> {
    let mut state = FileState::new(path);
    let mut file = fs
        .open_truncate(state.path())
        .map_err(|e| state.unexpected(FsOp::Open, e))?;
    let buf = vec![0u8; chunk.bytes()];
    let mut writes: u64 = 0;

    loop {
        let iteration = writes + 1;
        let before = file.size().map_err(|e| state.unexpected(FsOp::Stat, e))?;
        state.check(before, SizeCheckPhase::BeforeWrite, iteration)?;

        match file.write_chunk(&buf) {
            // A short count is not corrected here; the next size check reports it.
            Ok(_) => {
                state.expected_size += chunk.bytes_u64();
                writes += 1;
            }
            Err(e) if e.is_no_space() => {
                let after = file.size().map_err(|e| state.unexpected(FsOp::Stat, e))?;
                state.check(after, SizeCheckPhase::AfterFailedWrite, iteration)?;
                return Ok(ProbeResult {
                    outcome: ProbeOutcome::ExhaustedAsExpected,
                    final_size: state.expected_size,
                    writes_completed: writes,
                    chunk_size: chunk.bytes_u64(),
                });
            }
            Err(e) => return Err(state.unexpected(FsOp::Write, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolConfig;
    use crate::core::errors::FailureClass;
    use crate::fixture::sim::{SimFs, WriteFault};
    use crate::logger::sink::MemorySink;

    const MIB: u64 = 1024 * 1024;
    const KIB_128: u64 = 128 * 1024;

    fn pool(capacity_bytes: u64) -> PoolConfig {
        PoolConfig {
            capacity_bytes,
            overhead_bytes: 0,
            reserved_metadata_bytes: 0,
            unlink_cost_bytes: 4096,
        }
    }

    fn run(fs: &SimFs, chunk: u64) -> (Result<ProbeResult>, MemorySink) {
        let mut sink = MemorySink::new();
        let result = {
            let mut ctx = ProbeContext::new(&mut sink);
            probe(
                fs,
                &mut ctx,
                &fs.mount_path(),
                "file.txt",
                ChunkSize::new(chunk).unwrap(),
            )
        };
        (result, sink)
    }

    #[test]
    fn chunk_size_rejects_zero() {
        assert!(ChunkSize::new(0).is_err());
        assert_eq!(ChunkSize::new(KIB_128).unwrap().bytes(), 131_072);
    }

    #[test]
    fn fills_pool_and_stops_on_enospc() {
        let fs = SimFs::new(pool(MIB));
        let (result, sink) = run(&fs, KIB_128);
        let result = result.unwrap();

        assert_eq!(result.outcome, ProbeOutcome::ExhaustedAsExpected);
        assert_eq!(result.writes_completed, 8);
        assert_eq!(result.final_size, MIB);
        assert_eq!(fs.file_size(&fs.mount_path().join("file.txt")), Some(MIB));
        assert!(matches!(
            sink.events.last(),
            Some(ProbeEvent::WriteExhausted { .. })
        ));
    }

    #[test]
    fn four_mib_container_takes_three_one_mib_writes() {
        let fs = SimFs::new(PoolConfig {
            capacity_bytes: 4 * MIB,
            overhead_bytes: MIB,
            reserved_metadata_bytes: 0,
            unlink_cost_bytes: 4096,
        });
        let (result, _) = run(&fs, MIB);
        let result = result.unwrap();

        assert_eq!(result.writes_completed, 3);
        assert_eq!(result.final_size, 3 * MIB);
        assert_eq!(fs.write_attempts(), 4);
        assert_eq!(fs.file_size(&fs.mount_path().join("file.txt")), Some(3 * MIB));
    }

    #[test]
    fn first_write_failing_leaves_empty_file() {
        let fs = SimFs::new(pool(KIB_128 - 1));
        let (result, _) = run(&fs, KIB_128);
        let result = result.unwrap();
        assert_eq!(result.writes_completed, 0);
        assert_eq!(result.final_size, 0);
    }

    #[test]
    fn other_errno_is_fatal_and_closes_handle() {
        let fs = SimFs::new(pool(MIB)).with_write_fault(3, WriteFault::Errno(5));
        let (result, sink) = run(&fs, KIB_128);
        let err = result.unwrap_err();

        assert_eq!(err.class(), FailureClass::UnexpectedError);
        assert_eq!(err.errno(), Some(5));
        assert_eq!(err.last_known_size(), Some(2 * KIB_128));
        assert_eq!(fs.open_handles(), 0);
        assert!(matches!(
            sink.events.last(),
            Some(ProbeEvent::ProbeFailed { .. })
        ));
    }

    #[test]
    fn partial_commit_on_enospc_is_invariant_violation() {
        let fs = SimFs::new(pool(MIB)).with_write_fault(9, WriteFault::PartialCommitOnNoSpace(4096));
        let (result, _) = run(&fs, KIB_128);
        let err = result.unwrap_err();

        match err {
            ProbeError::InvariantViolation {
                phase,
                expected,
                actual,
                iteration,
                ..
            } => {
                assert_eq!(phase, SizeCheckPhase::AfterFailedWrite);
                assert_eq!(expected, MIB);
                assert_eq!(actual, MIB + 4096);
                assert_eq!(iteration, 9);
            }
            other => panic!("expected invariant violation, got {other}"),
        }
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn split_write_surfaces_before_next_write() {
        let fs = SimFs::new(pool(MIB)).with_write_fault(2, WriteFault::ShortWrite(4096));
        let (result, _) = run(&fs, KIB_128);

        match result.unwrap_err() {
            ProbeError::InvariantViolation {
                phase,
                expected,
                actual,
                iteration,
                ..
            } => {
                assert_eq!(phase, SizeCheckPhase::BeforeWrite);
                assert_eq!(expected, 2 * KIB_128);
                assert_eq!(actual, KIB_128 + 4096);
                assert_eq!(iteration, 3);
            }
            other => panic!("expected invariant violation, got {other}"),
        }
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn open_failure_is_unexpected_error() {
        let fs = SimFs::new(pool(MIB));
        let mut sink = MemorySink::new();
        let mut ctx = ProbeContext::new(&mut sink);
        let err = probe(
            &fs,
            &mut ctx,
            &MountPath::new("/not/the/mount"),
            "file.txt",
            ChunkSize::new(KIB_128).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::UnexpectedIo {
                op: FsOp::Open,
                last_known_size: 0,
                ..
            }
        ));
    }

    #[test]
    fn aborted_result_uses_last_known_size() {
        let err = ProbeError::UnexpectedIo {
            path: PathBuf::from("f"),
            op: FsOp::Write,
            last_known_size: 3 * KIB_128,
            errno: Some(5),
            source: std::io::Error::from_raw_os_error(5),
        };
        let result = ProbeResult::aborted(&err, ChunkSize::new(KIB_128).unwrap());
        assert_eq!(result.outcome, ProbeOutcome::UnexpectedError);
        assert_eq!(result.final_size, 3 * KIB_128);
        assert_eq!(result.writes_completed, 3);
    }

    #[test]
    fn file_state_tracks_real_file_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        let fs = crate::platform::fs::StdFs;
        let mut file = fs.open_truncate(&path).unwrap();
        let mut state = FileState::new(path);
        for i in 1..=4 {
            state
                .check(file.size().unwrap(), SizeCheckPhase::BeforeWrite, i)
                .unwrap();
            file.write_chunk(&[0u8; 4096]).unwrap();
            state.expected_size += 4096;
        }
        assert_eq!(file.size().unwrap(), state.expected_size());
    }
}
