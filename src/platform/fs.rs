//! Filesystem interface consumed by the probe and verifier, plus the real
//! implementation backed by `std::fs` and `statvfs`.
//!
//! Every `io::Error` crossing this boundary is classified exactly once into an
//! [`FsErrorKind`]. Code above this module branches on the kind and never looks
//! at raw errno values.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Classification of a filesystem failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsErrorKind {
    /// "No space left on device".
    NoSpace,
    /// Anything else.
    Other,
}

/// A classified filesystem failure carrying the original error.
#[derive(Debug)]
pub struct FsError {
    pub kind: FsErrorKind,
    pub source: io::Error,
}

impl FsError {
    /// Build a no-space error the way the kernel would report it.
    #[must_use]
    pub fn no_space() -> Self {
        Self::from(io::Error::from_raw_os_error(ENOSPC))
    }

    /// Build an error from a raw errno value.
    #[must_use]
    pub fn from_errno(errno: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(errno))
    }

    #[must_use]
    pub fn is_no_space(&self) -> bool {
        self.kind == FsErrorKind::NoSpace
    }

    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

impl From<io::Error> for FsError {
    fn from(source: io::Error) -> Self {
        Self {
            kind: classify(&source),
            source,
        }
    }
}

#[cfg(unix)]
const ENOSPC: i32 = libc::ENOSPC;
#[cfg(not(unix))]
const ENOSPC: i32 = 28;

/// Decide whether an I/O error means the store ran out of space.
#[must_use]
pub fn classify(error: &io::Error) -> FsErrorKind {
    if error.raw_os_error() == Some(ENOSPC) || error.kind() == io::ErrorKind::StorageFull {
        FsErrorKind::NoSpace
    } else {
        FsErrorKind::Other
    }
}

/// Space figures for the filesystem holding a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
}

/// An open file under test. Dropping it closes the handle.
pub trait ProbeFile {
    /// Issue a single write at the current end of file. Returns bytes accepted.
    fn write_chunk(&mut self, buf: &[u8]) -> Result<usize, FsError>;

    /// Size reported by an fstat-like call on the open handle.
    fn size(&self) -> Result<u64, FsError>;
}

/// Filesystem operations the probe and verifier rely on.
pub trait ProbeFs {
    type File: ProbeFile;

    /// Open for unbuffered writing, creating or truncating.
    fn open_truncate(&self, path: &Path) -> Result<Self::File, FsError>;

    /// Remove a file.
    fn unlink(&self, path: &Path) -> Result<(), FsError>;

    /// Space accounting for the filesystem holding `path`.
    fn fs_stats(&self, path: &Path) -> Result<FsStats, FsError>;
}

/// Real filesystem access. Writes go straight to the file descriptor with no
/// userspace buffering.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

/// Open file backed by a real descriptor.
#[derive(Debug)]
pub struct StdFile {
    file: File,
}

impl ProbeFile for StdFile {
    fn write_chunk(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        // One write(2) call; a short count is reported, not retried.
        Ok(self.file.write(buf)?)
    }

    fn size(&self) -> Result<u64, FsError> {
        Ok(self.file.metadata()?.len())
    }
}

impl ProbeFs for StdFs {
    type File = StdFile;

    fn open_truncate(&self, path: &Path) -> Result<StdFile, FsError> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o644);
        }
        Ok(StdFile {
            file: opts.open(path)?,
        })
    }

    fn unlink(&self, path: &Path) -> Result<(), FsError> {
        Ok(fs::remove_file(path)?)
    }

    #[cfg(unix)]
    fn fs_stats(&self, path: &Path) -> Result<FsStats, FsError> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|errno| FsError::from(io::Error::from(errno)))?;
        let fragment = stat.fragment_size();
        Ok(FsStats {
            total_bytes: stat.blocks().saturating_mul(fragment),
            free_bytes: stat.blocks_free().saturating_mul(fragment),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
        })
    }

    #[cfg(not(unix))]
    fn fs_stats(&self, _path: &Path) -> Result<FsStats, FsError> {
        Err(FsError::from(io::Error::new(
            io::ErrorKind::Unsupported,
            "statvfs is only available on unix",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enospc_errno_classified_as_no_space() {
        let err = FsError::from(io::Error::from_raw_os_error(ENOSPC));
        assert!(err.is_no_space());
        assert_eq!(err.errno(), Some(ENOSPC));
    }

    #[test]
    fn storage_full_kind_classified_as_no_space() {
        let err = io::Error::new(io::ErrorKind::StorageFull, "disk full");
        assert_eq!(classify(&err), FsErrorKind::NoSpace);
    }

    #[cfg(unix)]
    #[test]
    fn other_errnos_are_not_no_space() {
        for errno in [libc::EIO, libc::EDQUOT, libc::EFBIG, libc::EROFS, libc::EINTR] {
            let err = FsError::from_errno(errno);
            assert_eq!(err.kind, FsErrorKind::Other, "errno {errno}");
        }
    }

    #[test]
    fn std_file_tracks_size_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        let mut file = StdFs.open_truncate(&path).unwrap();
        assert_eq!(file.size().unwrap(), 0);

        let written = file.write_chunk(&[0u8; 4096]).unwrap();
        assert_eq!(written, 4096);
        assert_eq!(file.size().unwrap(), 4096);
    }

    #[test]
    fn open_truncate_discards_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, vec![1u8; 8192]).unwrap();

        let file = StdFs.open_truncate(&path).unwrap();
        assert_eq!(file.size().unwrap(), 0);
    }

    #[test]
    fn unlink_missing_file_is_other_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StdFs.unlink(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::Other);
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn fs_stats_reports_consistent_figures() {
        let dir = tempfile::tempdir().unwrap();
        let stats = StdFs.fs_stats(dir.path()).unwrap();
        assert!(stats.total_bytes >= stats.free_bytes);
        assert!(stats.free_bytes >= stats.available_bytes);
    }
}
