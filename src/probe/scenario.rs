//! Scenario runner: provision, mount, exhaust, clean up.
//!
//! Everything above the probe and the verifier lives here: step narration,
//! run-level events and the summary record the CLI prints.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{ProbeError, Result};
use crate::fixture::{MountPath, StorageFixture};
use crate::logger::events::ProbeEvent;
use crate::platform::fs::ProbeFs;
use crate::probe::cleanup::{CleanupResult, MetadataPolicy, verify_cleanup};
use crate::probe::context::ProbeContext;
use crate::probe::exhaust::{ChunkSize, ProbeOutcome, ProbeResult, probe};

/// Exit status for a clean pass.
pub const EXIT_PASS: i32 = 0;
/// Exit status for a fatal probe or verifier error.
pub const EXIT_FATAL: i32 = 1;
/// Exit status for a cleanup discrepancy or a non-reproducible repeat.
pub const EXIT_DISCREPANCY: i32 = 2;

/// Per-run knobs, usually derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOptions {
    pub file_name: String,
    pub chunk: ChunkSize,
    pub policy: MetadataPolicy,
    pub verify_cleanup: bool,
    /// Passed to the provisioner. Zero means the fixture default.
    pub pool_size_hint: u64,
    pub config_hash: Option<String>,
}

impl ScenarioOptions {
    #[must_use]
    pub fn new(chunk: ChunkSize) -> Self {
        Self {
            file_name: "file.txt".to_string(),
            chunk,
            policy: MetadataPolicy::default(),
            verify_cleanup: true,
            pool_size_hint: 0,
            config_hash: None,
        }
    }

    /// Build options from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            file_name: config.probe.file_name.clone(),
            chunk: ChunkSize::new(config.probe.chunk_size_bytes)?,
            policy: config.cleanup.metadata_policy,
            verify_cleanup: config.cleanup.verify,
            pool_size_hint: config.pool.capacity_bytes,
            config_hash: config.stable_hash().ok(),
        })
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub mount_path: PathBuf,
    pub file_path: PathBuf,
    pub probe: ProbeResult,
    pub cleanup: Option<CleanupResult>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Exhausted cleanly and cleanup, if run, matched the policy.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.probe.outcome == ProbeOutcome::ExhaustedAsExpected
            && self
                .cleanup
                .as_ref()
                .is_none_or(|c| c.discrepancy.is_none())
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.probe.outcome != ProbeOutcome::ExhaustedAsExpected {
            EXIT_FATAL
        } else if self.passed() {
            EXIT_PASS
        } else {
            EXIT_DISCREPANCY
        }
    }
}

/// Outcome of several runs against freshly provisioned containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatReport {
    pub final_sizes: Vec<u64>,
    pub idempotent: bool,
    pub reports: Vec<RunReport>,
}

impl RepeatReport {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let worst = self
            .reports
            .iter()
            .map(RunReport::exit_code)
            .max()
            .unwrap_or(EXIT_PASS);
        if worst == EXIT_PASS && !self.idempotent {
            EXIT_DISCREPANCY
        } else {
            worst
        }
    }
}

/// Probe and verify a container that is already mounted at `mount`.
pub fn run_on_mount<F: ProbeFs>(
    fs: &F,
    ctx: &mut ProbeContext<'_>,
    mount: &MountPath,
    opts: &ScenarioOptions,
) -> Result<RunReport> {
    let started = Instant::now();
    let available_bytes = fs
        .fs_stats(mount.as_path())
        .ok()
        .map(|stats| stats.available_bytes);
    ctx.report(&ProbeEvent::RunStarted {
        mount_path: mount.as_path().to_path_buf(),
        chunk_size: opts.chunk.bytes_u64(),
        config_hash: opts.config_hash.clone(),
        available_bytes,
    });

    let report = exhaust_and_clean(fs, ctx, mount, opts, started);
    match &report {
        Ok(report) => ctx.report(&ProbeEvent::RunCompleted {
            passed: report.passed(),
            final_size: Some(report.probe.final_size),
            duration_ms: report.duration_ms,
        }),
        Err(error) => ctx.report(&ProbeEvent::RunCompleted {
            passed: false,
            final_size: error.last_known_size(),
            duration_ms: elapsed_ms(started),
        }),
    }
    report
}

fn exhaust_and_clean<F: ProbeFs>(
    fs: &F,
    ctx: &mut ProbeContext<'_>,
    mount: &MountPath,
    opts: &ScenarioOptions,
    started: Instant,
) -> Result<RunReport> {
    ctx.log_step("Write to file until an error occurs");
    let probe = probe(fs, ctx, mount, &opts.file_name, opts.chunk)?;
    let file_path = mount.join(&opts.file_name);

    let cleanup = if opts.verify_cleanup {
        ctx.log_step("Removing the exhausted file");
        Some(verify_cleanup(fs, ctx, &file_path, opts.policy)?)
    } else {
        None
    };

    Ok(RunReport {
        mount_path: mount.as_path().to_path_buf(),
        file_path,
        probe,
        cleanup,
        duration_ms: elapsed_ms(started),
    })
}

/// Provision a fresh pool and container, mount it, then run the probe.
pub fn run_scenario<S: StorageFixture>(
    fixture: &mut S,
    ctx: &mut ProbeContext<'_>,
    opts: &ScenarioOptions,
) -> Result<RunReport> {
    ctx.log_step("Creating a single pool with a POSIX container");
    let pool = fixture.provision_pool(opts.pool_size_hint)?;
    let container = fixture.provision_container(&pool)?;

    ctx.log_step("Mounting container");
    let mount = fixture.mount_posix(&container)?;
    run_on_mount(&mount.fs, ctx, &mount.path, opts)
}

/// Run the scenario `runs` times, each against a new container, and check
/// that every run filled the same number of bytes.
pub fn run_repeated<S: StorageFixture>(
    fixture: &mut S,
    ctx: &mut ProbeContext<'_>,
    opts: &ScenarioOptions,
    runs: u32,
) -> Result<RepeatReport> {
    if runs == 0 {
        return Err(ProbeError::InvalidConfig {
            details: "repeat count must be at least 1".to_string(),
        });
    }

    let mut reports = Vec::with_capacity(runs as usize);
    for _ in 0..runs {
        reports.push(run_scenario(fixture, ctx, opts)?);
    }
    let final_sizes: Vec<u64> = reports.iter().map(|r| r.probe.final_size).collect();
    let idempotent = final_sizes.windows(2).all(|pair| pair[0] == pair[1]);

    Ok(RepeatReport {
        final_sizes,
        idempotent,
        reports,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
