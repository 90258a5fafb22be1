//! The per-session download pipeline: transfer, verify, install.
//!
//! Every step that touches shared state first checks that its session is
//! still live. A stale session stops at the next checkpoint and reports an
//! interruption instead of an error.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Inner;
use crate::descriptor::PackDescriptor;
use crate::error::{PackError, PackResult};
use crate::manifest::InstalledManifest;
use crate::session::{Session, SessionId};
use crate::state::PackStatus;
use crate::transfer::{TransferOutcome, TransferRequest};

/// How a download task ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The pack was verified and installed.
    Installed { version: String },
    /// The session was paused, cancelled, removed or superseded.
    Interrupted { downloaded_bytes: u64 },
}

/// Handle to a spawned download.
#[derive(Debug)]
pub struct DownloadTask {
    pack_id: String,
    session: SessionId,
    handle: JoinHandle<PackResult<DownloadOutcome>>,
}

impl DownloadTask {
    /// Pack being downloaded.
    pub fn pack_id(&self) -> &str {
        &self.pack_id
    }

    /// Session the task runs under.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Wait for the task to finish.
    pub async fn wait(self) -> PackResult<DownloadOutcome> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PackError::Unknown(format!("download task failed: {}", e))),
        }
    }
}

pub(super) fn spawn(
    inner: Arc<Inner>,
    session: Session,
    descriptor: Arc<PackDescriptor>,
    resume_from: u64,
) -> DownloadTask {
    let pack_id = session.pack_id().to_string();
    let id = session.id();
    let handle = tokio::spawn(run(inner, session, descriptor, resume_from));
    DownloadTask {
        pack_id,
        session: id,
        handle,
    }
}

async fn run(
    inner: Arc<Inner>,
    session: Session,
    descriptor: Arc<PackDescriptor>,
    resume_from: u64,
) -> PackResult<DownloadOutcome> {
    let id = session.pack_id();
    let sid = session.id();

    let result = attempt(&inner, &session, &descriptor, resume_from).await;

    let result = match result {
        Ok(DownloadOutcome::Interrupted { .. }) => Ok(record_interruption(&inner, id, sid)),
        Ok(installed) => Ok(installed),
        Err(e) if inner.sessions.is_live(id, sid) => {
            record_failure(&inner, id, sid, &descriptor, &e);
            Err(e)
        }
        Err(e) => {
            debug!(pack_id = id, session = %sid, error = %e, "Stale session failed, treating as interrupted");
            Ok(record_interruption(&inner, id, sid))
        }
    };

    inner.sessions.end(id, sid);
    result
}

async fn attempt(
    inner: &Inner,
    session: &Session,
    descriptor: &PackDescriptor,
    resume_from: u64,
) -> PackResult<DownloadOutcome> {
    let id = session.pack_id();
    let sid = session.id();
    let layout = &inner.layout;
    let interrupted = || DownloadOutcome::Interrupted {
        downloaded_bytes: layout.temp_len(id),
    };

    // A superseded task may still be writing the temp file.
    let lock = inner.file_lock(id);
    let _guard = tokio::select! {
        biased;
        _ = session.token().cancelled() => return Ok(interrupted()),
        guard = lock.lock() => guard,
    };

    if !inner.update_live(id, sid, |s| {
        s.set_status(PackStatus::Downloading);
        s.set_total(descriptor.size_bytes);
    }) {
        return Ok(interrupted());
    }
    layout.write_resume_marker(id, &descriptor.version)?;

    let temp_path = layout.temp_file(id);
    let request = TransferRequest {
        url: &descriptor.url,
        temp_path: &temp_path,
        resume_from,
        total_bytes: descriptor.size_bytes,
    };
    // Nothing left to fetch; a `Range` starting at the end would only get 416.
    let already_complete = resume_from > 0
        && resume_from == descriptor.size_bytes
        && layout.temp_len(id) >= resume_from;
    let outcome = if already_complete {
        debug!(pack_id = id, bytes = resume_from, "Partial download already complete");
        truncate_temp(&temp_path, resume_from)?;
        TransferOutcome::Completed { bytes: resume_from }
    } else {
        let is_live = || inner.sessions.is_live(id, sid);
        inner
            .engine
            .run(request, session, is_live, |bytes| {
                inner.update_live(id, sid, |s| s.set_downloaded(bytes));
            })
            .await?
    };

    let bytes = match outcome {
        TransferOutcome::Completed { bytes } => bytes,
        TransferOutcome::Interrupted { bytes } => {
            return Ok(DownloadOutcome::Interrupted {
                downloaded_bytes: bytes,
            })
        }
    };

    if !inner.update_live(id, sid, |s| s.set_status(PackStatus::Verifying)) {
        return Ok(interrupted());
    }
    debug!(pack_id = id, bytes, "Verifying download");

    let verifier = inner.verifier.clone();
    let path = temp_path.clone();
    let expected = descriptor.sha256.clone();
    tokio::task::spawn_blocking(move || verifier.verify(&path, &expected))
        .await
        .map_err(join_error)??;

    if inner.has_removal_intent(id)
        || !inner.update_live(id, sid, |s| s.set_status(PackStatus::Installing))
    {
        return Ok(interrupted());
    }

    let manifest = InstalledManifest::new(id, descriptor.version.as_str(), Utc::now());
    let installed_at = manifest.installed_at;
    let installer = inner.installer.clone();
    let pack_id = id.to_string();
    let path = temp_path.clone();
    tokio::task::spawn_blocking(move || installer.install(&pack_id, &path, &manifest))
        .await
        .map_err(join_error)??;

    layout.remove_temp_artifacts(id);

    if inner.has_removal_intent(id) {
        info!(pack_id = id, "Pack removed during install, discarding");
        layout.remove_pack_dir(id)?;
        return Ok(DownloadOutcome::Interrupted {
            downloaded_bytes: 0,
        });
    }

    let published = inner.update_live(id, sid, |s| {
        s.set_status(PackStatus::Installed);
        s.set_progress(descriptor.size_bytes, descriptor.size_bytes);
        s.set_installed(Some(descriptor.version.clone()), installed_at);
        s.set_error(None);
    });
    if !published && inner.sessions.latest(id) == Some(sid) {
        // Paused or cancelled while installing: the install stands.
        inner
            .store
            .set(id, inner.disk_state(id, Some(descriptor)));
    }

    info!(pack_id = id, session = %sid, version = %descriptor.version, "Download installed");
    Ok(DownloadOutcome::Installed {
        version: descriptor.version.clone(),
    })
}

/// Keep the paused progress in step with what actually reached the disk.
///
/// Only the newest session may do this, and only while the pack is paused.
fn record_interruption(inner: &Inner, id: &str, sid: SessionId) -> DownloadOutcome {
    let on_disk = inner.layout.temp_len(id);
    let recorded = inner.store.update_if(
        id,
        |state| {
            inner.sessions.latest(id) == Some(sid)
                && state.is_some_and(|s| s.status() == PackStatus::Paused)
        },
        |s| s.set_downloaded(on_disk),
    );
    debug!(pack_id = id, session = %sid, on_disk, recorded, "Download interrupted");
    DownloadOutcome::Interrupted {
        downloaded_bytes: on_disk,
    }
}

/// Discard partial data and fall back to the installed copy, if any.
fn record_failure(
    inner: &Inner,
    id: &str,
    sid: SessionId,
    descriptor: &PackDescriptor,
    error: &PackError,
) {
    warn!(pack_id = id, session = %sid, kind = %error.kind(), error = %error, "Download failed");
    inner.layout.remove_temp_artifacts(id);

    let mut fallback = inner.disk_state(id, Some(descriptor));
    if fallback.installed_version().is_none() {
        fallback.set_status(PackStatus::Failed);
    }
    fallback.set_error(Some(error.to_string()));
    inner.update_live(id, sid, |s| *s = fallback);
}

fn truncate_temp(path: &Path, len: u64) -> PackResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| PackError::io("open", path, e))?;
    if file.metadata().map_or(false, |m| m.len() > len) {
        debug!(path = %path.display(), len, "Dropping bytes past the declared size");
        file.set_len(len)
            .map_err(|e| PackError::io("truncate", path, e))?;
    }
    Ok(())
}

fn join_error(error: tokio::task::JoinError) -> PackError {
    PackError::Unknown(format!("background step failed: {}", error))
}
