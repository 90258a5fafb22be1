//! Rebuilding pack state from what is on disk.

use std::fs;

use tracing::{debug, info};

use super::{Inner, PackManager};
use crate::descriptor::PackDescriptor;
use crate::state::{PackState, PackStatus, StateSnapshot};

impl Inner {
    /// State of `id` derived from its installed files alone.
    ///
    /// A valid install is [`PackStatus::Installed`] when it matches the
    /// descriptor version and [`PackStatus::UpdateAvailable`] otherwise;
    /// without one the pack is not downloaded.
    pub(super) fn disk_state(&self, id: &str, descriptor: Option<&PackDescriptor>) -> PackState {
        let declared = descriptor.map(|d| d.size_bytes);

        let Some(manifest) = self.read_installed(id) else {
            return PackState::new(PackStatus::NotDownloaded, declared.unwrap_or(0));
        };

        let version = manifest.version.clone().unwrap_or_default();
        let current = descriptor.map_or(true, |d| d.version == version);
        let total = declared.unwrap_or_else(|| {
            fs::metadata(self.layout.data_file(id))
                .map(|m| m.len())
                .unwrap_or(0)
        });

        let mut state = if current {
            let mut state = PackState::new(PackStatus::Installed, total);
            state.set_downloaded(total);
            state
        } else {
            PackState::new(PackStatus::UpdateAvailable, total)
        };
        state.set_installed(Some(version), manifest.installed_at);
        state
    }
}

impl PackManager {
    /// Rebuild the state of every catalog pack from disk.
    ///
    /// Interrupted installs are repaired first. A partial download survives
    /// as [`PackStatus::Paused`] only if its resume marker names the current
    /// descriptor version; any other partial data is deleted. Packs with a
    /// live download are left alone.
    pub fn load_installed_packs(&self) -> StateSnapshot {
        let inner = &self.inner;
        let layout = &inner.layout;
        let descriptors: Vec<_> = inner.catalog.read().iter().cloned().collect();

        for descriptor in &descriptors {
            let id = descriptor.id.as_str();
            if inner.sessions.is_active(id) {
                continue;
            }

            inner.installer.recover(id);
            let mut state = inner.disk_state(id, Some(descriptor));

            let on_disk = layout.temp_len(id);
            let marker = layout.read_resume_marker(id);
            if on_disk > 0 && marker.as_deref() == Some(descriptor.version.as_str()) {
                state.set_status(PackStatus::Paused);
                state.set_downloaded(on_disk);
                debug!(pack_id = id, on_disk, "Found resumable partial download");
            } else if layout.has_temp(id) || marker.is_some() {
                debug!(pack_id = id, ?marker, "Discarding stale partial download");
                layout.remove_temp_artifacts(id);
            }

            inner
                .store
                .update_if(id, |_| !inner.sessions.is_active(id), |s| *s = state);
        }

        info!(packs = descriptors.len(), "Installed packs loaded");
        inner.store.snapshot()
    }

    /// Compare installed and paused packs against the current catalog.
    ///
    /// Returns the ids whose installed version differs from the catalog.
    /// A paused download keeps its progress if it still targets the current
    /// version and size; otherwise its partial data is deleted.
    pub fn check_for_updates(&self) -> Vec<String> {
        let inner = &self.inner;
        let layout = &inner.layout;
        let descriptors: Vec<_> = inner.catalog.read().iter().cloned().collect();
        let mut updates = Vec::new();

        for descriptor in &descriptors {
            let id = descriptor.id.as_str();
            let version = descriptor.version.as_str();
            if inner.sessions.is_active(id) {
                continue;
            }
            let Some(state) = inner.store.get(id) else {
                continue;
            };
            let installed = state.installed_version().map(str::to_string);
            let marker = layout.read_resume_marker(id);
            let outdated = installed.as_deref().is_some_and(|v| v != version);

            if state.status() == PackStatus::Paused {
                if marker.as_deref() == Some(version)
                    && state.total_bytes() == descriptor.size_bytes
                {
                    if outdated {
                        updates.push(id.to_string());
                    }
                    continue;
                }
                info!(pack_id = id, ?marker, version, "Paused download targets a stale version");
                layout.remove_temp_artifacts(id);
            } else if marker.as_deref().is_some_and(|m| m != version) {
                layout.remove_temp_artifacts(id);
            }

            let next = if let Some(installed_version) = installed {
                let status = if outdated {
                    info!(pack_id = id, installed = %installed_version, available = version, "Update available");
                    updates.push(id.to_string());
                    PackStatus::UpdateAvailable
                } else {
                    PackStatus::Installed
                };
                let mut next = PackState::new(status, descriptor.size_bytes);
                if !outdated {
                    next.set_downloaded(descriptor.size_bytes);
                }
                next.set_installed(Some(installed_version), state.installed_at_millis());
                next
            } else if state.status() == PackStatus::Failed {
                let mut next = state.clone();
                next.set_total(descriptor.size_bytes);
                next
            } else {
                PackState::new(PackStatus::NotDownloaded, descriptor.size_bytes)
            };

            inner
                .store
                .update_if(id, |_| !inner.sessions.is_active(id), |s| *s = next);
        }

        updates
    }
}
