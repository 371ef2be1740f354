//! Fixture for a container some other tool already mounted (dfuse, a loop
//! device, a tmpfs with a size limit). Provisioning only validates the path.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use crate::core::errors::{ProbeError, Result};
use crate::fixture::{ContainerHandle, Mount, MountPath, PoolHandle, StorageFixture};
use crate::platform::fs::{ProbeFs, StdFs};

/// An already-mounted directory on the real filesystem.
#[derive(Debug, Clone)]
pub struct ExistingMount {
    path: PathBuf,
}

impl ExistingMount {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageFixture for ExistingMount {
    type Fs = StdFs;

    fn provision_pool(&mut self, size_hint: u64) -> Result<PoolHandle> {
        let meta = fs::metadata(&self.path).map_err(|e| ProbeError::io(&self.path, e))?;
        if !meta.is_dir() {
            return Err(ProbeError::InvalidConfig {
                details: format!("mount path {} is not a directory", self.path.display()),
            });
        }
        let capacity_hint = StdFs
            .fs_stats(&self.path)
            .map_or(size_hint, |stats| stats.total_bytes);
        Ok(PoolHandle {
            id: "external".to_string(),
            capacity_hint,
        })
    }

    fn provision_container(&mut self, pool: &PoolHandle) -> Result<ContainerHandle> {
        Ok(ContainerHandle {
            pool_id: pool.id.clone(),
            id: "external".to_string(),
        })
    }

    fn mount_posix(&mut self, _container: &ContainerHandle) -> Result<Mount<StdFs>> {
        Ok(Mount {
            path: MountPath::new(self.path.clone()),
            fs: StdFs,
        })
    }
}
