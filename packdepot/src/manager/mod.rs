//! Pack manager: the public face of the crate.
//!
//! [`PackManager`] turns catalog descriptors into installed packs. It owns the
//! state store and the session bookkeeping, spawns one download task per
//! session and reconciles in-memory state with what is actually on disk.
//!
//! # Example
//!
//! ```ignore
//! let manager = PackManager::builder(ManagerConfig::new(data_dir))
//!     .catalog(PackCatalog::from_json(&catalog_json)?)
//!     .build()?;
//! manager.load_installed_packs();
//!
//! let task = manager.start_download("tiles-eu")?;
//! match task.wait().await? {
//!     DownloadOutcome::Installed { version } => println!("installed {}", version),
//!     DownloadOutcome::Interrupted { downloaded_bytes } => println!("paused at {}", downloaded_bytes),
//! }
//! ```

mod reconcile;
mod task;

pub use task::{DownloadOutcome, DownloadTask};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::descriptor::{PackCatalog, PackDescriptor};
use crate::error::{PackError, PackResult};
use crate::installer::{AtomicInstaller, PackInstaller};
use crate::layout::{validate_pack_id, PackLayout};
use crate::manifest::InstalledManifest;
use crate::network::{AlwaysOnline, Connectivity};
use crate::session::{SessionId, SessionManager};
use crate::space::{self, FsStorageProbe, StorageProbe};
use crate::state::{PackState, PackStateStore, PackStatus, StateSnapshot};
use crate::transfer::{HttpTransport, ReqwestTransport, TransferEngine};
use crate::verify::{PackVerifier, Sha256Verifier};

/// An installed pack as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPack {
    /// Pack id.
    pub id: String,
    /// Installed version.
    pub version: String,
    /// Install time, if recorded.
    pub installed_at: Option<DateTime<Utc>>,
    /// Path of the installed data file.
    pub data_path: PathBuf,
    /// Size of the installed data file.
    pub size_bytes: u64,
}

/// Shared state behind every [`PackManager`] handle and download task.
pub(crate) struct Inner {
    layout: PackLayout,
    catalog: RwLock<PackCatalog>,
    store: PackStateStore,
    sessions: SessionManager,
    engine: TransferEngine,
    verifier: Arc<dyn PackVerifier>,
    installer: Arc<dyn PackInstaller>,
    storage: Arc<dyn StorageProbe>,
    connectivity: Arc<dyn Connectivity>,
    removal_intents: Mutex<HashSet<String>>,
    file_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Inner {
    fn descriptor(&self, id: &str) -> PackResult<Arc<PackDescriptor>> {
        validate_pack_id(id)?;
        self.catalog
            .read()
            .get(id)
            .ok_or_else(|| PackError::UnknownPack {
                pack_id: id.to_string(),
            })
    }

    /// Apply `mutate` only while `session` is the live session of `id`.
    fn update_live<F>(&self, id: &str, session: SessionId, mutate: F) -> bool
    where
        F: FnOnce(&mut PackState),
    {
        self.store
            .update_if(id, |_| self.sessions.is_live(id, session), mutate)
    }

    /// Lock guarding the temp file of `id` against two writers.
    fn file_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.file_locks.entry(id.to_string()).or_default().clone()
    }

    fn has_removal_intent(&self, id: &str) -> bool {
        self.removal_intents.lock().contains(id)
    }

    fn ensure_space(&self, required: u64) -> PackResult<()> {
        let available = self
            .storage
            .available_bytes(self.layout.packs_dir())
            .map_err(|e| PackError::Unknown(format!("failed to query free space: {}", e)))?;
        space::ensure_available(required, available)
    }

    /// Manifest of a valid install of `id`, if any.
    fn read_installed(&self, id: &str) -> Option<InstalledManifest> {
        if !self.layout.data_file(id).is_file() {
            return None;
        }
        let text = std::fs::read_to_string(self.layout.manifest_file(id)).ok()?;
        let manifest = InstalledManifest::parse(&text);
        manifest.has_version().then_some(manifest)
    }
}

/// Builder for [`PackManager`].
pub struct PackManagerBuilder {
    config: ManagerConfig,
    catalog: PackCatalog,
    transport: Option<Arc<dyn HttpTransport>>,
    verifier: Arc<dyn PackVerifier>,
    installer: Option<Arc<dyn PackInstaller>>,
    storage: Arc<dyn StorageProbe>,
    connectivity: Arc<dyn Connectivity>,
}

impl PackManagerBuilder {
    /// Initial catalog.
    pub fn catalog(mut self, catalog: PackCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// HTTP transport; defaults to reqwest.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Download verifier; defaults to SHA-256.
    pub fn verifier(mut self, verifier: Arc<dyn PackVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Installer; defaults to [`AtomicInstaller`] over the configured layout.
    pub fn installer(mut self, installer: Arc<dyn PackInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Free space probe; defaults to the filesystem.
    pub fn storage(mut self, storage: Arc<dyn StorageProbe>) -> Self {
        self.storage = storage;
        self
    }

    /// Connectivity check; defaults to always online.
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Build the manager.
    ///
    /// Every catalog pack starts out as [`PackStatus::NotDownloaded`]; call
    /// [`PackManager::load_installed_packs`] to pick up what is on disk.
    pub fn build(self) -> PackResult<PackManager> {
        let layout = PackLayout::new(self.config.packs_dir.clone(), self.config.temp_dir.clone());

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(self.config.request_timeout, &self.config.user_agent)
                    .map_err(|e| PackError::Unknown(e.to_string()))?,
            ),
        };
        let installer = self
            .installer
            .unwrap_or_else(|| Arc::new(AtomicInstaller::new(layout.clone())));

        let store = PackStateStore::new();
        for descriptor in self.catalog.iter() {
            store.set(
                &descriptor.id,
                PackState::new(PackStatus::NotDownloaded, descriptor.size_bytes),
            );
        }

        info!(
            packs_dir = %layout.packs_dir().display(),
            temp_dir = %layout.temp_dir().display(),
            packs = self.catalog.len(),
            "Pack manager created"
        );

        Ok(PackManager {
            inner: Arc::new(Inner {
                engine: TransferEngine::new(
                    transport,
                    self.config.chunk_size,
                    self.config.progress_step_bytes,
                ),
                layout,
                catalog: RwLock::new(self.catalog),
                store,
                sessions: SessionManager::new(),
                verifier: self.verifier,
                installer,
                storage: self.storage,
                connectivity: self.connectivity,
                removal_intents: Mutex::new(HashSet::new()),
                file_locks: DashMap::new(),
            }),
        })
    }
}

/// Downloads, verifies and installs packs.
///
/// Cheap to clone; all clones share the same state. Download tasks are
/// spawned onto the current tokio runtime.
#[derive(Clone)]
pub struct PackManager {
    inner: Arc<Inner>,
}

impl PackManager {
    /// Start building a manager.
    pub fn builder(config: ManagerConfig) -> PackManagerBuilder {
        PackManagerBuilder {
            config,
            catalog: PackCatalog::default(),
            transport: None,
            verifier: Arc::new(Sha256Verifier),
            installer: None,
            storage: Arc::new(FsStorageProbe),
            connectivity: Arc::new(AlwaysOnline),
        }
    }

    /// On-disk layout in use.
    pub fn layout(&self) -> &PackLayout {
        &self.inner.layout
    }

    /// Descriptor of `id` in the current catalog.
    pub fn descriptor(&self, id: &str) -> Option<Arc<PackDescriptor>> {
        self.inner.catalog.read().get(id)
    }

    /// Replace the catalog.
    ///
    /// Packs that left the catalog are dropped from the state map unless a
    /// download for them is still live; new packs start as not downloaded.
    /// Call [`check_for_updates`](Self::check_for_updates) afterwards to
    /// compare installed versions against the new descriptors.
    pub fn set_catalog(&self, catalog: PackCatalog) {
        let inner = &self.inner;
        inner
            .store
            .retain(|id| catalog.get(id).is_some() || inner.sessions.is_active(id));
        for descriptor in catalog.iter() {
            if inner.store.get(&descriptor.id).is_none() {
                inner.store.set(
                    &descriptor.id,
                    PackState::new(PackStatus::NotDownloaded, descriptor.size_bytes),
                );
            }
        }
        info!(packs = catalog.len(), "Catalog replaced");
        *inner.catalog.write() = catalog;
    }

    /// Current state of one pack.
    pub fn state(&self, id: &str) -> Option<PackState> {
        self.inner.store.get(id)
    }

    /// Current state of every pack.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.store.snapshot()
    }

    /// Subscribe to state snapshots.
    pub fn states(&self) -> watch::Receiver<StateSnapshot> {
        self.inner.store.subscribe()
    }

    /// Whether a download session is live for `id`.
    pub fn is_downloading(&self, id: &str) -> bool {
        self.inner.sessions.is_active(id)
    }

    /// Start a fresh download of `id`.
    ///
    /// Requires a network connection and free space for twice the declared
    /// size (temp copy plus installed copy). Any partial data is discarded.
    ///
    /// # Returns
    ///
    /// A [`DownloadTask`] for the spawned download. Progress and the final
    /// state are published through [`states`](Self::states).
    ///
    /// # Errors
    ///
    /// * [`PackError::InvalidPackId`] or [`PackError::UnknownPack`] for an id
    ///   that is malformed or not in the catalog
    /// * [`PackError::NetworkUnavailable`] when offline
    /// * [`PackError::InsufficientStorage`] when the space check fails
    /// * [`PackError::AlreadyInProgress`] when a download is already live
    pub fn start_download(&self, id: &str) -> PackResult<DownloadTask> {
        let inner = &self.inner;
        let descriptor = inner.descriptor(id)?;

        if !inner.connectivity.is_online() {
            return Err(PackError::NetworkUnavailable);
        }
        inner.ensure_space(space::required_for_fresh_install(descriptor.size_bytes))?;

        let session = inner
            .sessions
            .try_begin(id, &descriptor.version)
            .ok_or_else(|| PackError::AlreadyInProgress {
                pack_id: id.to_string(),
            })?;
        inner.removal_intents.lock().remove(id);

        inner.update_live(id, session.id(), |s| {
            s.set_status(PackStatus::Queued);
            s.set_progress(0u64, descriptor.size_bytes);
            s.set_error(None);
        });
        info!(pack_id = id, session = %session.id(), version = %descriptor.version, "Download started");

        Ok(task::spawn(self.inner.clone(), session, descriptor, 0))
    }

    /// Continue a paused download of `id`.
    ///
    /// Falls back to [`start_download`](Self::start_download) when there is
    /// nothing to resume: the pack is not paused, the partial file is gone, or
    /// it was downloaded for a different version.
    ///
    /// # Returns
    ///
    /// A [`DownloadTask`] that continues from the recorded progress.
    ///
    /// # Errors
    ///
    /// The same as [`start_download`](Self::start_download). The space check
    /// only asks for the declared size plus the bytes still missing.
    pub fn resume_download(&self, id: &str) -> PackResult<DownloadTask> {
        let inner = &self.inner;
        let descriptor = inner.descriptor(id)?;
        let state = inner.store.get(id).unwrap_or_default();

        let marker = inner.layout.read_resume_marker(id);
        let resumable = state.can_resume()
            && inner.layout.has_temp(id)
            && marker.as_deref() == Some(descriptor.version.as_str());
        if !resumable {
            debug!(pack_id = id, status = %state.status(), "Nothing to resume, starting fresh");
            return self.start_download(id);
        }

        if !inner.connectivity.is_online() {
            return Err(PackError::NetworkUnavailable);
        }
        let on_disk = inner.layout.temp_len(id);
        inner.ensure_space(space::required_for_resume(descriptor.size_bytes, on_disk))?;

        let session = inner
            .sessions
            .try_begin(id, &descriptor.version)
            .ok_or_else(|| PackError::AlreadyInProgress {
                pack_id: id.to_string(),
            })?;
        inner.removal_intents.lock().remove(id);

        let resume_from = state.downloaded_bytes();
        inner.update_live(id, session.id(), |s| {
            s.set_status(PackStatus::Queued);
            s.set_total(descriptor.size_bytes);
            s.set_error(None);
        });
        info!(pack_id = id, session = %session.id(), resume_from, "Download resumed");

        Ok(task::spawn(self.inner.clone(), session, descriptor, resume_from))
    }

    /// Retry a failed or interrupted download, continuing from partial data
    /// when that is still possible.
    pub fn retry_download(&self, id: &str) -> PackResult<DownloadTask> {
        self.resume_download(id)
    }

    /// Pause the live download of `id`.
    ///
    /// Pausing a pack with no live download only logs; it is not an error.
    /// The resume marker records the version the paused session was
    /// downloading.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::InvalidPackId`] for a malformed id, or an I/O error
    /// if the resume marker cannot be written.
    pub fn pause_download(&self, id: &str) -> PackResult<()> {
        validate_pack_id(id)?;
        let inner = &self.inner;

        let Some(session) = inner.sessions.invalidate(id) else {
            info!(pack_id = id, "No live download to pause");
            return Ok(());
        };

        let on_disk = inner.layout.temp_len(id);
        inner.store.update(id, |s| {
            s.set_status(PackStatus::Paused);
            s.set_downloaded(on_disk);
        });

        // The partial data belongs to the version the session was fetching,
        // which may no longer be the catalog version.
        inner.layout.write_resume_marker(id, session.target())?;
        info!(
            pack_id = id,
            session = %session.id(),
            version = session.target(),
            downloaded = on_disk,
            "Download paused"
        );
        Ok(())
    }

    /// Cancel the download of `id` and discard its partial data.
    ///
    /// The state falls back to whatever is installed on disk.
    pub async fn cancel_download(&self, id: &str) -> PackResult<()> {
        validate_pack_id(id)?;
        let inner = &self.inner;

        let session = inner.sessions.invalidate(id);
        let lock = inner.file_lock(id);
        let _guard = lock.lock().await;

        inner.layout.remove_temp_artifacts(id);
        let descriptor = inner.catalog.read().get(id);
        inner.store.set(id, inner.disk_state(id, descriptor.as_deref()));

        info!(pack_id = id, session = ?session.map(|s| s.id().get()), "Download cancelled");
        Ok(())
    }

    /// Remove the installed copy and any partial data of `id`.
    ///
    /// Wins over an install that completes after this call. Waits for a
    /// running download to release the pack's files before deleting them.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::InvalidPackId`] for a malformed id, or an I/O error
    /// if the pack directory cannot be deleted. The state is reset either way.
    pub async fn remove_pack(&self, id: &str) -> PackResult<()> {
        validate_pack_id(id)?;
        let inner = &self.inner;

        inner.removal_intents.lock().insert(id.to_string());
        inner.sessions.invalidate(id);
        let lock = inner.file_lock(id);
        let _guard = lock.lock().await;

        let result = inner.layout.remove_pack_dir(id);
        inner.layout.remove_temp_artifacts(id);

        let total = inner
            .catalog
            .read()
            .get(id)
            .map(|d| d.size_bytes)
            .unwrap_or(0);
        inner
            .store
            .set(id, PackState::new(PackStatus::NotDownloaded, total));

        info!(pack_id = id, "Pack removed");
        result
    }

    /// The valid install of `id` on disk, if any.
    pub fn installed_pack(&self, id: &str) -> Option<InstalledPack> {
        validate_pack_id(id).ok()?;
        let manifest = self.inner.read_installed(id)?;
        let data_path = self.inner.layout.data_file(id);
        let size_bytes = std::fs::metadata(&data_path).map(|m| m.len()).unwrap_or(0);

        Some(InstalledPack {
            id: id.to_string(),
            installed_at: manifest.installed_at_utc(),
            version: manifest.version.unwrap_or_default(),
            data_path,
            size_bytes,
        })
    }

    /// Total size of all valid installs under the packs directory.
    pub fn installed_bytes(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(self.inner.layout.packs_dir()) else {
            return 0;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|id| self.installed_pack(&id))
            .fold(0u64, |total, pack| total.saturating_add(pack.size_bytes))
    }
}
