//! Disk space preflight.
//!
//! A download needs room for two copies of the pack: the partial file in the
//! temp area and the installed data. All arithmetic saturates so a declared
//! size near `u64::MAX` demands the maximum instead of wrapping to a small
//! number that would pass the check.

use std::io;
use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::debug;

use crate::error::{PackError, PackResult};

/// Space needed to download and install a pack from scratch.
pub fn required_for_fresh_install(declared_size: u64) -> u64 {
    declared_size.saturating_add(declared_size)
}

/// Space needed to finish a partial download and install it.
///
/// `already_downloaded` is clamped to `[0, declared_size]`.
pub fn required_for_resume(declared_size: u64, already_downloaded: u64) -> u64 {
    let remaining = declared_size.saturating_sub(already_downloaded.min(declared_size));
    declared_size.saturating_add(remaining)
}

/// Fail with [`PackError::InsufficientStorage`] unless `available >= required`.
pub fn ensure_available(required: u64, available: u64) -> PackResult<()> {
    debug!(required, available, "Space preflight");
    if available >= required {
        Ok(())
    } else {
        Err(PackError::InsufficientStorage {
            required,
            available,
        })
    }
}

/// Source of free-space figures.
pub trait StorageProbe: Send + Sync {
    /// Bytes available to this process on the filesystem holding `path`.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Free-space probe backed by the mounted disk list.
///
/// Resolves `path` to its nearest existing ancestor, so it works before the
/// pack directories have been created, and reports the disk with the longest
/// mount point containing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorageProbe;

impl StorageProbe for FsStorageProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        let existing = nearest_existing(path);
        let target = std::fs::canonicalize(&existing).unwrap_or(existing);
        let disks = Disks::new_with_refreshed_list();

        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space()));
        disk_for_path(&target, mounts)
            .or_else(|| disks.list().first().map(|disk| disk.available_space()))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no disk found for {}", target.display()),
                )
            })
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Free space of the most specific mount point containing `target`.
fn disk_for_path<'a>(
    target: &Path,
    mounts: impl IntoIterator<Item = (&'a Path, u64)>,
) -> Option<u64> {
    mounts
        .into_iter()
        .filter(|(mount, _)| target.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, available)| available)
}

/// Probe reporting a fixed amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedStorageProbe(pub u64);

impl StorageProbe for FixedStorageProbe {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fresh_install_doubles_size() {
        assert_eq!(required_for_fresh_install(0), 0);
        assert_eq!(required_for_fresh_install(8 * 1024 * 1024), 16 * 1024 * 1024);
    }

    #[test]
    fn test_fresh_install_saturates() {
        assert_eq!(required_for_fresh_install(u64::MAX), u64::MAX);
        assert_eq!(required_for_fresh_install(u64::MAX / 2 + 1), u64::MAX);
    }

    #[test]
    fn test_resume_requirement() {
        assert_eq!(required_for_resume(100, 0), 200);
        assert_eq!(required_for_resume(100, 40), 160);
        assert_eq!(required_for_resume(100, 100), 100);
        // Oversized local data clamps to the declared size.
        assert_eq!(required_for_resume(100, 500), 100);
    }

    #[test]
    fn test_resume_requirement_saturates() {
        assert_eq!(required_for_resume(u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_near_max_declared_size_is_rejected() {
        let required = required_for_fresh_install(u64::MAX - 10);
        let result = ensure_available(required, 1 << 40);
        assert!(matches!(
            result,
            Err(PackError::InsufficientStorage { required: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_ensure_available_boundary() {
        assert!(ensure_available(10, 10).is_ok());
        assert!(ensure_available(11, 10).is_err());
    }

    #[test]
    fn test_most_specific_mount_wins() {
        let mounts = [
            (Path::new("/"), 10),
            (Path::new("/data"), 20),
            (Path::new("/data/packs"), 30),
            (Path::new("/dat"), 40),
        ];
        assert_eq!(disk_for_path(Path::new("/data/packs/p1"), mounts), Some(30));
        assert_eq!(disk_for_path(Path::new("/data/other"), mounts), Some(20));
        assert_eq!(disk_for_path(Path::new("/home"), mounts), Some(10));
        assert_eq!(disk_for_path(Path::new("/home"), [(Path::new("/data"), 20)]), None);
    }

    #[test]
    fn test_nearest_existing_ancestor() {
        let temp = tempfile::TempDir::new().unwrap();
        assert_eq!(
            nearest_existing(&temp.path().join("not/yet/created")),
            temp.path()
        );
    }

    proptest! {
        #[test]
        fn test_requirements_never_wrap(size in any::<u64>(), done in any::<u64>()) {
            let fresh = required_for_fresh_install(size);
            prop_assert!(fresh >= size);

            let resume = required_for_resume(size, done);
            prop_assert!(resume >= size);
            prop_assert!(resume <= fresh);
        }
    }
}
