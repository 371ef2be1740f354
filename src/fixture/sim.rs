//! In-memory capacity-accounted store.
//!
//! Models a small pool with one container: container creation consumes
//! `overhead_bytes`, `reserved_metadata_bytes` is off limits to file data, and
//! each unlink needs `unlink_cost_bytes` out of that reserve. Data slack left
//! below one write never pays for metadata. Writes are accepted whole or refused with ENOSPC, exactly the
//! behavior the probe expects from a correct store. Faults can be scheduled to
//! exercise the probe's failure paths.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::PoolConfig;
use crate::core::errors::{ProbeError, Result};
use crate::fixture::{ContainerHandle, Mount, MountPath, PoolHandle, StorageFixture};
use crate::platform::fs::{FsError, FsStats, ProbeFile, ProbeFs};

/// Misbehavior injected at a given write attempt (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Fail with this errno and change nothing.
    Errno(i32),
    /// If this attempt runs out of space, commit this many bytes anyway
    /// before reporting ENOSPC.
    PartialCommitOnNoSpace(u64),
    /// Commit only this many bytes and report them as written.
    ShortWrite(u64),
}

#[derive(Debug)]
struct Store {
    cfg: PoolConfig,
    used: u64,
    files: BTreeMap<PathBuf, u64>,
    open_handles: usize,
    write_attempts: u64,
    write_faults: BTreeMap<u64, WriteFault>,
    unlink_errno: Option<i32>,
}

impl Store {
    fn data_limit(&self) -> u64 {
        self.cfg
            .capacity_bytes
            .saturating_sub(self.cfg.overhead_bytes)
            .saturating_sub(self.cfg.reserved_metadata_bytes)
    }

    fn free_including_reserve(&self) -> u64 {
        self.cfg
            .capacity_bytes
            .saturating_sub(self.cfg.overhead_bytes)
            .saturating_sub(self.used)
    }

    /// An unlink draws only on the metadata reserve.
    fn unlink_fits(&self) -> bool {
        self.cfg.reserved_metadata_bytes >= self.cfg.unlink_cost_bytes
    }

    fn grow(&mut self, path: &Path, bytes: u64) {
        *self.files.entry(path.to_path_buf()).or_insert(0) += bytes;
        self.used += bytes;
    }
}

/// Simulated mount over one container.
#[derive(Debug, Clone)]
pub struct SimFs {
    root: PathBuf,
    store: Arc<Mutex<Store>>,
}

impl SimFs {
    /// Fresh, empty container mounted at `/sim`.
    #[must_use]
    pub fn new(cfg: PoolConfig) -> Self {
        Self::with_root(cfg, "/sim")
    }

    #[must_use]
    pub fn with_root(cfg: PoolConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: Arc::new(Mutex::new(Store {
                cfg,
                used: 0,
                files: BTreeMap::new(),
                open_handles: 0,
                write_attempts: 0,
                write_faults: BTreeMap::new(),
                unlink_errno: None,
            })),
        }
    }

    /// Schedule a fault for the given 1-based write attempt.
    #[must_use]
    pub fn with_write_fault(self, attempt: u64, fault: WriteFault) -> Self {
        self.store.lock().write_faults.insert(attempt, fault);
        self
    }

    /// Make every unlink fail with this errno.
    #[must_use]
    pub fn with_unlink_errno(self, errno: i32) -> Self {
        self.store.lock().unlink_errno = Some(errno);
        self
    }

    #[must_use]
    pub fn mount_path(&self) -> MountPath {
        MountPath::new(self.root.clone())
    }

    #[must_use]
    pub fn file_size(&self, path: &Path) -> Option<u64> {
        self.store.lock().files.get(path).copied()
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.store.lock().used
    }

    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.store.lock().open_handles
    }

    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.store.lock().write_attempts
    }
}

/// Open handle on a simulated file.
#[derive(Debug)]
pub struct SimFile {
    path: PathBuf,
    store: Arc<Mutex<Store>>,
}

impl Drop for SimFile {
    fn drop(&mut self) {
        let mut store = self.store.lock();
        store.open_handles = store.open_handles.saturating_sub(1);
    }
}

impl ProbeFile for SimFile {
    fn write_chunk(&mut self, buf: &[u8]) -> std::result::Result<usize, FsError> {
        let mut store = self.store.lock();
        store.write_attempts += 1;
        let attempt = store.write_attempts;
        let fault = store.write_faults.remove(&attempt);
        let len = buf.len() as u64;

        match fault {
            Some(WriteFault::Errno(errno)) => return Err(FsError::from_errno(errno)),
            Some(WriteFault::ShortWrite(bytes)) => {
                let bytes = bytes.min(len);
                store.grow(&self.path, bytes);
                return Ok(usize::try_from(bytes).unwrap_or(buf.len()));
            }
            _ => {}
        }

        if store.used + len > store.data_limit() {
            if let Some(WriteFault::PartialCommitOnNoSpace(bytes)) = fault {
                store.grow(&self.path, bytes);
            }
            return Err(FsError::no_space());
        }

        store.grow(&self.path, len);
        Ok(buf.len())
    }

    fn size(&self) -> std::result::Result<u64, FsError> {
        Ok(self.store.lock().files.get(&self.path).copied().unwrap_or(0))
    }
}

impl ProbeFs for SimFs {
    type File = SimFile;

    fn open_truncate(&self, path: &Path) -> std::result::Result<SimFile, FsError> {
        if path.parent() != Some(self.root.as_path()) {
            return Err(FsError::from(io::Error::from(io::ErrorKind::NotFound)));
        }
        let mut store = self.store.lock();
        if let Some(old) = store.files.insert(path.to_path_buf(), 0) {
            store.used -= old;
        }
        store.open_handles += 1;
        Ok(SimFile {
            path: path.to_path_buf(),
            store: Arc::clone(&self.store),
        })
    }

    fn unlink(&self, path: &Path) -> std::result::Result<(), FsError> {
        let mut store = self.store.lock();
        if let Some(errno) = store.unlink_errno {
            return Err(FsError::from_errno(errno));
        }
        let Some(&size) = store.files.get(path) else {
            return Err(FsError::from(io::Error::from(io::ErrorKind::NotFound)));
        };
        if !store.unlink_fits() {
            return Err(FsError::no_space());
        }
        store.files.remove(path);
        store.used -= size;
        Ok(())
    }

    fn fs_stats(&self, _path: &Path) -> std::result::Result<FsStats, FsError> {
        let store = self.store.lock();
        Ok(FsStats {
            total_bytes: store.cfg.capacity_bytes,
            free_bytes: store.free_including_reserve(),
            available_bytes: store.data_limit().saturating_sub(store.used),
        })
    }
}

/// Provisions simulated pools and hands out a fresh empty store per container.
#[derive(Debug)]
pub struct SimProvisioner {
    template: PoolConfig,
    pools: BTreeMap<String, PoolConfig>,
    containers: BTreeMap<String, (String, PoolConfig)>,
    next_id: u64,
}

impl SimProvisioner {
    #[must_use]
    pub fn new(template: PoolConfig) -> Self {
        Self {
            template,
            pools: BTreeMap::new(),
            containers: BTreeMap::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

impl StorageFixture for SimProvisioner {
    type Fs = SimFs;

    fn provision_pool(&mut self, size_hint: u64) -> Result<PoolHandle> {
        let mut cfg = self.template.clone();
        if size_hint > 0 {
            cfg.capacity_bytes = size_hint;
        }
        let id = self.next_id("pool");
        let capacity_hint = cfg.capacity_bytes;
        self.pools.insert(id.clone(), cfg);
        Ok(PoolHandle { id, capacity_hint })
    }

    fn provision_container(&mut self, pool: &PoolHandle) -> Result<ContainerHandle> {
        let cfg = self
            .pools
            .get(&pool.id)
            .cloned()
            .ok_or_else(|| ProbeError::Runtime {
                details: format!("unknown simulated pool {}", pool.id),
            })?;
        let id = self.next_id("cont");
        self.containers
            .insert(id.clone(), (pool.id.clone(), cfg));
        Ok(ContainerHandle {
            pool_id: pool.id.clone(),
            id,
        })
    }

    fn mount_posix(&mut self, container: &ContainerHandle) -> Result<Mount<SimFs>> {
        let (pool_id, cfg) =
            self.containers
                .get(&container.id)
                .cloned()
                .ok_or_else(|| ProbeError::Runtime {
                    details: format!("unknown simulated container {}", container.id),
                })?;
        let root = PathBuf::from("/sim").join(pool_id).join(&container.id);
        let fs = SimFs::with_root(cfg, root);
        Ok(Mount {
            path: fs.mount_path(),
            fs,
        })
    }
}
