//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{ProbeError, Result};
use crate::probe::cleanup::MetadataPolicy;

/// Write size known to pass through FUSE on older kernels without splitting.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 128 * 1024;

/// Full probe configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub cleanup: CleanupConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Space-exhaustion probe knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Directory the container is mounted at. Required by `run`.
    pub mount_path: Option<PathBuf>,
    /// File created under the mount.
    pub file_name: String,
    pub chunk_size_bytes: u64,
    /// Largest write the transport is known to pass through unsplit.
    /// Chunks above this are rejected at load time.
    pub max_safe_chunk_bytes: u64,
}

/// Cleanup verification knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    pub metadata_policy: MetadataPolicy,
    /// Skip the unlink step entirely when false.
    pub verify: bool,
}

/// Shape of the in-memory pool used by `simulate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity_bytes: u64,
    /// Space consumed by container creation before any file data.
    pub overhead_bytes: u64,
    /// Space held back for metadata operations only.
    pub reserved_metadata_bytes: u64,
    /// Metadata space one unlink needs.
    pub unlink_cost_bytes: u64,
}

/// JSONL activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_log: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by the probe itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mount_path: None,
            file_name: "file.txt".to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_safe_chunk_bytes: DEFAULT_CHUNK_SIZE_BYTES,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            metadata_policy: MetadataPolicy::Unreserved,
            verify: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024,
            overhead_bytes: 0,
            reserved_metadata_bytes: 0,
            unlink_cost_bytes: 4096,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_log: data_dir().join("activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/enospc-probe.jsonl")),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: home_dir()
                .join(".config")
                .join("enospc-probe")
                .join("config.toml"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[ENSP-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("enospc-probe")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    /// Same as [`Config::load`] with an explicit environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ProbeError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ProbeError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Path of the file under test, when a mount path is configured.
    #[must_use]
    pub fn target_file(&self) -> Option<PathBuf> {
        self.probe
            .mount_path
            .as_ref()
            .map(|mount| mount.join(&self.probe.file_name))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // probe
        if let Some(raw) = lookup("ENSP_PROBE_MOUNT_PATH") {
            self.probe.mount_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("ENSP_PROBE_FILE_NAME") {
            self.probe.file_name = raw;
        }
        if let Some(raw) = lookup("ENSP_PROBE_CHUNK_SIZE_BYTES") {
            self.probe.chunk_size_bytes = parse_env_u64("ENSP_PROBE_CHUNK_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("ENSP_PROBE_MAX_SAFE_CHUNK_BYTES") {
            self.probe.max_safe_chunk_bytes =
                parse_env_u64("ENSP_PROBE_MAX_SAFE_CHUNK_BYTES", &raw)?;
        }

        // cleanup
        if let Some(raw) = lookup("ENSP_CLEANUP_METADATA_POLICY") {
            self.cleanup.metadata_policy =
                raw.parse::<MetadataPolicy>()
                    .map_err(|details| ProbeError::ConfigParse {
                        context: "env",
                        details: format!("ENSP_CLEANUP_METADATA_POLICY={raw:?}: {details}"),
                    })?;
        }
        if let Some(raw) = lookup("ENSP_CLEANUP_VERIFY") {
            self.cleanup.verify = parse_env_bool("ENSP_CLEANUP_VERIFY", &raw)?;
        }

        // pool
        for (name, slot) in [
            ("ENSP_POOL_CAPACITY_BYTES", &mut self.pool.capacity_bytes),
            ("ENSP_POOL_OVERHEAD_BYTES", &mut self.pool.overhead_bytes),
            (
                "ENSP_POOL_RESERVED_METADATA_BYTES",
                &mut self.pool.reserved_metadata_bytes,
            ),
            ("ENSP_POOL_UNLINK_COST_BYTES", &mut self.pool.unlink_cost_bytes),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = parse_env_u64(name, &raw)?;
            }
        }

        // logging
        if let Some(raw) = lookup("ENSP_LOGGING_ENABLED") {
            self.logging.enabled = parse_env_bool("ENSP_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("ENSP_LOGGING_JSONL_LOG") {
            self.logging.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        if let Some(mount) = &mut self.probe.mount_path {
            let s = mount.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *mount = PathBuf::from(stripped);
            }
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.probe.chunk_size_bytes == 0 {
            return Err(ProbeError::InvalidConfig {
                details: "probe.chunk_size_bytes must be > 0".to_string(),
            });
        }
        if self.probe.chunk_size_bytes > self.probe.max_safe_chunk_bytes {
            return Err(ProbeError::InvalidConfig {
                details: format!(
                    "probe.chunk_size_bytes ({}) exceeds probe.max_safe_chunk_bytes ({}); larger writes may be split by the transport",
                    self.probe.chunk_size_bytes, self.probe.max_safe_chunk_bytes
                ),
            });
        }
        if usize::try_from(self.probe.chunk_size_bytes).is_err() {
            return Err(ProbeError::InvalidConfig {
                details: format!(
                    "probe.chunk_size_bytes ({}) does not fit in memory on this platform",
                    self.probe.chunk_size_bytes
                ),
            });
        }

        validate_file_name(&self.probe.file_name)?;

        if self.pool.capacity_bytes == 0 {
            return Err(ProbeError::InvalidConfig {
                details: "pool.capacity_bytes must be > 0".to_string(),
            });
        }
        if self
            .pool
            .overhead_bytes
            .saturating_add(self.pool.reserved_metadata_bytes)
            > self.pool.capacity_bytes
        {
            return Err(ProbeError::InvalidConfig {
                details: format!(
                    "pool.overhead_bytes + pool.reserved_metadata_bytes must not exceed pool.capacity_bytes ({})",
                    self.pool.capacity_bytes
                ),
            });
        }

        if self.logging.max_rotated_files == 0 {
            return Err(ProbeError::InvalidConfig {
                details: "logging.max_rotated_files must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ProbeError::InvalidConfig {
            details: format!("probe.file_name must be a single relative file name, got {name:?}"),
        }),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| ProbeError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| ProbeError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
