//! On-disk layout of installed packs and partial downloads.
//!
//! ```text
//! <packs_dir>/<id>/data.pack            installed data
//! <packs_dir>/<id>/manifest.json        installed manifest
//! <packs_dir>/<id>/data.pack.staged     transient, during install
//! <packs_dir>/<id>/data.pack.backup     transient, during install
//! <temp_dir>/<id>.tmp                   partial download
//! <temp_dir>/<id>.resume                version the partial download targets
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PackError, PackResult};

/// File name of installed pack data.
pub const DATA_FILE: &str = "data.pack";

/// File name of the installed manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Suffix of staged install siblings.
pub const STAGED_SUFFIX: &str = "staged";

/// Suffix of backup install siblings.
pub const BACKUP_SUFFIX: &str = "backup";

/// Check that a pack id is safe to use as a path component.
pub fn validate_pack_id(id: &str) -> PackResult<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(PackError::InvalidPackId(id.to_string()))
    }
}

/// Append `.suffix` to the file name of `path`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Remove a file, treating "not found" as success.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Paths for every pack artifact.
#[derive(Debug, Clone)]
pub struct PackLayout {
    packs_dir: PathBuf,
    temp_dir: PathBuf,
}

impl PackLayout {
    /// Create a layout over the given roots.
    pub fn new(packs_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            packs_dir: packs_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Root of installed packs.
    pub fn packs_dir(&self) -> &Path {
        &self.packs_dir
    }

    /// Root of partial downloads.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Directory of an installed pack.
    pub fn pack_dir(&self, id: &str) -> PathBuf {
        self.packs_dir.join(id)
    }

    /// Installed data file.
    pub fn data_file(&self, id: &str) -> PathBuf {
        self.pack_dir(id).join(DATA_FILE)
    }

    /// Installed manifest file.
    pub fn manifest_file(&self, id: &str) -> PathBuf {
        self.pack_dir(id).join(MANIFEST_FILE)
    }

    /// Partial download file.
    pub fn temp_file(&self, id: &str) -> PathBuf {
        self.temp_dir.join(format!("{}.tmp", id))
    }

    /// Resume marker recording the version a partial download targets.
    pub fn resume_marker(&self, id: &str) -> PathBuf {
        self.temp_dir.join(format!("{}.resume", id))
    }

    /// Length of the partial download, 0 if there is none.
    pub fn temp_len(&self, id: &str) -> u64 {
        fs::metadata(self.temp_file(id))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Whether a partial download file exists.
    pub fn has_temp(&self, id: &str) -> bool {
        self.temp_file(id).is_file()
    }

    /// Read the version recorded in the resume marker.
    pub fn read_resume_marker(&self, id: &str) -> Option<String> {
        let content = fs::read_to_string(self.resume_marker(id)).ok()?;
        let version = content.lines().next()?.trim();
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }

    /// Record the version a partial download is heading toward.
    pub fn write_resume_marker(&self, id: &str, version: &str) -> PackResult<()> {
        let path = self.resume_marker(id);
        fs::create_dir_all(&self.temp_dir)
            .map_err(|e| PackError::io("create", &self.temp_dir, e))?;
        fs::write(&path, format!("{}\n", version)).map_err(|e| PackError::io("write", &path, e))
    }

    /// Delete the partial download and its resume marker. Best effort.
    pub fn remove_temp_artifacts(&self, id: &str) {
        for path in [self.temp_file(id), self.resume_marker(id)] {
            if let Err(e) = remove_file_if_exists(&path) {
                warn!(pack_id = %id, path = %path.display(), error = %e, "Failed to remove temp artifact");
            }
        }
        debug!(pack_id = %id, "Temp artifacts removed");
    }

    /// Delete the installed pack directory.
    pub fn remove_pack_dir(&self, id: &str) -> PackResult<()> {
        let dir = self.pack_dir(id);
        match fs::remove_dir_all(&dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(PackError::io("remove", &dir, e)),
            _ => Ok(()),
        }
    }
}
