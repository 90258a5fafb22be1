//! Atomic installation of verified packs.
//!
//! An install either fully replaces the previous copy or leaves it exactly as
//! it was. The new data and manifest are first staged next to their final
//! names, the current files are copied to `.backup` siblings, then both are
//! swapped in. If the second swap fails the first one is rolled back from the
//! backup.
//!
//! A crash between the two swaps is repaired by [`PackInstaller::recover`] on
//! the next start: a leftover staged manifest means the manifest swap never
//! happened, so the data backup is restored.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{PackError, PackResult};
use crate::layout::{remove_file_if_exists, sibling, PackLayout, BACKUP_SUFFIX, STAGED_SUFFIX};
use crate::manifest::InstalledManifest;

/// Moves a file over another, replacing it.
pub trait FileSwap: Send + Sync {
    /// Replace `to` with `from`.
    fn replace(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Rename-based swap, falling back to copy and delete across filesystems.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameSwap;

impl FileSwap for RenameSwap {
    fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        move_file(from, to)
    }
}

/// Rename `from` to `to`, copying when a rename is not possible.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            warn!(
                from = %from.display(),
                to = %to.display(),
                error = %e,
                "Rename failed, falling back to copy"
            );
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Install step of the download pipeline.
pub trait PackInstaller: Send + Sync {
    /// Install the verified file at `source` as pack `id` with `manifest`.
    ///
    /// `source` is consumed on success.
    ///
    /// # Arguments
    ///
    /// * `id` - Pack being installed
    /// * `source` - Verified download to move into place
    /// * `manifest` - Manifest recording the installed version
    ///
    /// # Errors
    ///
    /// Returns [`PackError::InstallationFailed`] when the new files could not
    /// be swapped in. The previous install, if any, is left in place.
    fn install(&self, id: &str, source: &Path, manifest: &InstalledManifest) -> PackResult<()>;

    /// Repair a pack directory left behind by an interrupted install.
    fn recover(&self, id: &str);
}

/// Stage, back up and swap installer.
pub struct AtomicInstaller {
    layout: PackLayout,
    swap: Arc<dyn FileSwap>,
}

impl AtomicInstaller {
    /// Create an installer writing into `layout`.
    pub fn new(layout: PackLayout) -> Self {
        Self {
            layout,
            swap: Arc::new(RenameSwap),
        }
    }

    /// Use a different swap implementation.
    pub fn with_swap(mut self, swap: Arc<dyn FileSwap>) -> Self {
        self.swap = swap;
        self
    }

    fn stage(&self, id: &str, source: &Path, manifest: &InstalledManifest) -> PackResult<()> {
        let dir = self.layout.pack_dir(id);
        fs::create_dir_all(&dir)
            .map_err(|e| PackError::installation(format!("failed to create {}: {}", dir.display(), e)))?;

        let staged_data = sibling(&self.layout.data_file(id), STAGED_SUFFIX);
        move_file(source, &staged_data).map_err(|e| {
            PackError::installation(format!("failed to stage {}: {}", source.display(), e))
        })?;

        let staged_manifest = sibling(&self.layout.manifest_file(id), STAGED_SUFFIX);
        fs::write(&staged_manifest, manifest.to_json()).map_err(|e| {
            PackError::installation(format!("failed to write {}: {}", staged_manifest.display(), e))
        })?;
        Ok(())
    }

    /// Copy each existing installed file to its backup sibling.
    ///
    /// Returns which of data and manifest had a previous copy.
    fn back_up(&self, id: &str) -> PackResult<(bool, bool)> {
        let mut existed = [false; 2];
        for (slot, path) in [self.layout.data_file(id), self.layout.manifest_file(id)]
            .iter()
            .enumerate()
        {
            if !path.is_file() {
                continue;
            }
            let backup = sibling(path, BACKUP_SUFFIX);
            fs::copy(path, &backup).map_err(|e| {
                PackError::installation(format!("failed to back up {}: {}", path.display(), e))
            })?;
            existed[slot] = true;
        }
        Ok((existed[0], existed[1]))
    }

    /// Put `path` back the way it was before the install started.
    fn restore(&self, path: &Path, had_previous: bool) {
        let result = if had_previous {
            move_file(&sibling(path, BACKUP_SUFFIX), path)
        } else {
            remove_file_if_exists(path)
        };
        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "Failed to roll back install");
        }
    }

    fn cleanup(&self, id: &str) {
        for file in [self.layout.data_file(id), self.layout.manifest_file(id)] {
            for suffix in [STAGED_SUFFIX, BACKUP_SUFFIX] {
                let path = sibling(&file, suffix);
                if let Err(e) = remove_file_if_exists(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove install leftover");
                }
            }
        }
    }

    fn swap_in(&self, id: &str) -> PackResult<()> {
        let data = self.layout.data_file(id);
        let manifest = self.layout.manifest_file(id);
        let (had_data, had_manifest) = self.back_up(id)?;

        self.swap
            .replace(&sibling(&data, STAGED_SUFFIX), &data)
            .map_err(|e| PackError::installation(format!("failed to swap in data: {}", e)))?;

        if let Err(e) = self.swap.replace(&sibling(&manifest, STAGED_SUFFIX), &manifest) {
            warn!(pack_id = id, error = %e, "Manifest swap failed, rolling back data");
            self.restore(&data, had_data);
            self.restore(&manifest, had_manifest);
            return Err(PackError::installation(format!(
                "failed to swap in manifest: {}",
                e
            )));
        }
        Ok(())
    }
}

impl PackInstaller for AtomicInstaller {
    fn install(&self, id: &str, source: &Path, manifest: &InstalledManifest) -> PackResult<()> {
        let result = self
            .stage(id, source, manifest)
            .and_then(|()| self.swap_in(id));
        self.cleanup(id);

        match &result {
            Ok(()) => info!(pack_id = id, version = ?manifest.version, "Pack installed"),
            Err(e) => warn!(pack_id = id, error = %e, "Pack install failed"),
        }
        result
    }

    fn recover(&self, id: &str) {
        let data = self.layout.data_file(id);
        let staged_manifest = sibling(&self.layout.manifest_file(id), STAGED_SUFFIX);
        let data_backup = sibling(&data, BACKUP_SUFFIX);

        if staged_manifest.is_file() {
            let result = if data_backup.is_file() {
                info!(pack_id = id, "Restoring data from interrupted install");
                move_file(&data_backup, &data)
            } else if !self.layout.manifest_file(id).is_file() {
                info!(pack_id = id, "Discarding data from interrupted first install");
                remove_file_if_exists(&data)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                error!(pack_id = id, error = %e, "Failed to recover interrupted install");
            }
        }
        self.cleanup(id);
        debug!(pack_id = id, "Install recovery checked");
    }
}
