//! Storage fixtures: provision a pool, create a container in it, and expose
//! the container as a directory the probe can write into.

#![allow(missing_docs)]

pub mod existing;
pub mod sim;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::platform::fs::ProbeFs;

/// Directory under which a container appears POSIX-like.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountPath(PathBuf);

impl MountPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Path of an entry directly under the mount.
    #[must_use]
    pub fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl fmt::Display for MountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Opaque pool identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandle {
    pub id: String,
    pub capacity_hint: u64,
}

/// Opaque container identifier scoped to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub pool_id: String,
    pub id: String,
}

/// A mounted container and the filesystem that reaches it.
#[derive(Debug, Clone)]
pub struct Mount<F> {
    pub path: MountPath,
    pub fs: F,
}

/// Provisioner plus mount manager.
pub trait StorageFixture {
    type Fs: ProbeFs;

    /// Create a pool. A zero hint means the fixture's own default.
    fn provision_pool(&mut self, size_hint: u64) -> Result<PoolHandle>;

    /// Create a container with no metadata reservation beyond the fixture's policy.
    fn provision_container(&mut self, pool: &PoolHandle) -> Result<ContainerHandle>;

    /// Expose the container as a directory.
    fn mount_posix(&mut self, container: &ContainerHandle) -> Result<Mount<Self::Fs>>;
}
