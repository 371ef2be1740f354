//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use enospace_probe::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FailureClass, ProbeError, Result};

// Platform
pub use crate::platform::fs::{FsError, FsErrorKind, FsStats, ProbeFile, ProbeFs, StdFs};

// Fixtures
pub use crate::fixture::existing::ExistingMount;
pub use crate::fixture::sim::{SimFs, SimProvisioner, WriteFault};
pub use crate::fixture::{ContainerHandle, Mount, MountPath, PoolHandle, StorageFixture};

// Logging
pub use crate::logger::events::ProbeEvent;
pub use crate::logger::jsonl::{JsonlConfig, JsonlWriter};
pub use crate::logger::sink::{MemorySink, NullSink, ReportSink, TeeSink};

// Probe
pub use crate::probe::cleanup::{CleanupOutcome, CleanupResult, MetadataPolicy, verify_cleanup};
pub use crate::probe::context::ProbeContext;
pub use crate::probe::exhaust::{ChunkSize, ProbeOutcome, ProbeResult, probe};
pub use crate::probe::scenario::{
    RepeatReport, RunReport, ScenarioOptions, run_on_mount, run_repeated, run_scenario,
};
