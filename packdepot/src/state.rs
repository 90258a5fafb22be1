//! Pack lifecycle state and its observable store.
//!
//! [`PackStateStore`] is the single source of truth for what the UI shows and
//! what the manager decides. Writers copy the current map, change it and
//! publish the copy as a new immutable snapshot, so readers always see a
//! consistent map and never a half-applied update.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;

/// Lifecycle status of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PackStatus {
    /// Nothing on disk.
    #[default]
    NotDownloaded,
    /// Accepted, transfer not yet started.
    Queued,
    /// Bytes are being transferred.
    Downloading,
    /// Stopped by the user with resumable partial data.
    Paused,
    /// Hashing the completed download.
    Verifying,
    /// Swapping the verified data into place.
    Installing,
    /// Installed and matching the catalog version.
    Installed,
    /// Installed, but the catalog offers a different version.
    UpdateAvailable,
    /// The last attempt failed and no previous install exists.
    Failed,
}

impl PackStatus {
    /// Whether a download is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Downloading | Self::Verifying | Self::Installing
        )
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NotDownloaded => "Not downloaded",
            Self::Queued => "Queued",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Verifying => "Verifying",
            Self::Installing => "Installing",
            Self::Installed => "Installed",
            Self::UpdateAvailable => "Update available",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Clamp a raw byte count into `[0, total]`.
pub fn clamp_bytes(raw: impl Into<i128>, total: u64) -> u64 {
    let raw: i128 = raw.into();
    raw.clamp(0, i128::from(total)) as u64
}

/// Current state of one pack.
///
/// `0 <= downloaded_bytes <= total_bytes` holds after every write: all
/// mutators clamp their input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackState {
    status: PackStatus,
    downloaded_bytes: u64,
    total_bytes: u64,
    installed_version: Option<String>,
    installed_at: Option<i64>,
    last_error: Option<String>,
}

impl PackState {
    /// A state with the given status and total, no progress.
    pub fn new(status: PackStatus, total_bytes: u64) -> Self {
        Self {
            status,
            total_bytes,
            ..Default::default()
        }
    }

    pub fn status(&self) -> PackStatus {
        self.status
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn installed_version(&self) -> Option<&str> {
        self.installed_version.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Install time, if installed.
    pub fn installed_at(&self) -> Option<DateTime<Utc>> {
        self.installed_at
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Install time in epoch milliseconds.
    pub fn installed_at_millis(&self) -> Option<i64> {
        self.installed_at
    }

    /// Progress in `[0.0, 1.0]`; 0 when the total is unknown.
    pub fn progress_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / self.total_bytes as f64
    }

    /// Whether a paused download has data to continue from.
    pub fn can_resume(&self) -> bool {
        self.status == PackStatus::Paused && self.downloaded_bytes > 0
    }

    /// Whether a download is in flight.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn set_status(&mut self, status: PackStatus) {
        self.status = status;
    }

    /// Set downloaded bytes, clamped to `[0, total]`.
    pub fn set_downloaded(&mut self, raw: impl Into<i128>) {
        self.downloaded_bytes = clamp_bytes(raw, self.total_bytes);
    }

    /// Set both progress figures, clamping downloaded to the new total.
    pub fn set_progress(&mut self, downloaded: impl Into<i128>, total: u64) {
        self.total_bytes = total;
        self.set_downloaded(downloaded);
    }

    /// Set the total, re-clamping downloaded bytes.
    pub fn set_total(&mut self, total: u64) {
        self.total_bytes = total;
        self.downloaded_bytes = self.downloaded_bytes.min(total);
    }

    /// Record the installed version and time.
    pub fn set_installed(&mut self, version: Option<String>, installed_at: Option<i64>) {
        self.installed_version = version;
        self.installed_at = installed_at;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.last_error = error;
    }
}

/// An immutable snapshot of every pack's state.
pub type StateSnapshot = Arc<HashMap<String, PackState>>;

/// Observable map from pack id to [`PackState`].
#[derive(Debug)]
pub struct PackStateStore {
    tx: watch::Sender<StateSnapshot>,
}

impl Default for PackStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PackStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(HashMap::new()));
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.tx.borrow().clone()
    }

    /// State of one pack.
    pub fn get(&self, id: &str) -> Option<PackState> {
        self.tx.borrow().get(id).cloned()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the state of one pack.
    pub fn set(&self, id: &str, state: PackState) {
        self.update(id, |current| *current = state);
    }

    /// Mutate one pack's state, creating a default entry if missing.
    pub fn update<F>(&self, id: &str, mutate: F)
    where
        F: FnOnce(&mut PackState),
    {
        self.update_if(id, |_| true, mutate);
    }

    /// Mutate one pack's state only if `condition` holds.
    ///
    /// The condition is evaluated inside the same critical section as the
    /// write, so no other writer can interleave between check and publish.
    /// Subscribers are only notified when the state actually changed.
    /// Returns whether the condition held.
    pub fn update_if<C, F>(&self, id: &str, condition: C, mutate: F) -> bool
    where
        C: FnOnce(Option<&PackState>) -> bool,
        F: FnOnce(&mut PackState),
    {
        let mut applied = false;
        self.tx.send_if_modified(|snapshot| {
            if !condition(snapshot.get(id)) {
                return false;
            }
            applied = true;

            let mut next = HashMap::clone(snapshot);
            let entry = next.entry(id.to_string()).or_default();
            let before = entry.clone();
            mutate(entry);
            if *entry == before {
                return false;
            }
            *snapshot = Arc::new(next);
            true
        });
        applied
    }

    /// Drop packs that are no longer known.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.keys().all(|id| keep(id)) {
                return false;
            }
            let next = snapshot
                .iter()
                .filter(|(id, _)| keep(id))
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect();
            *snapshot = Arc::new(next);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clamps_oversized_and_negative() {
        let mut state = PackState::new(PackStatus::Downloading, 100);
        state.set_downloaded(250u64);
        assert_eq!(state.downloaded_bytes(), 100);
        state.set_downloaded(-5i64);
        assert_eq!(state.downloaded_bytes(), 0);
    }

    #[test]
    fn test_shrinking_total_reclamps() {
        let mut state = PackState::new(PackStatus::Paused, 100);
        state.set_downloaded(80u64);
        state.set_total(50);
        assert_eq!(state.downloaded_bytes(), 50);
    }

    #[test]
    fn test_progress_fraction() {
        let mut state = PackState::new(PackStatus::Downloading, 0);
        assert_eq!(state.progress_fraction(), 0.0);
        state.set_progress(25u64, 100);
        assert_eq!(state.progress_fraction(), 0.25);
    }

    #[test]
    fn test_can_resume_and_is_active() {
        let mut state = PackState::new(PackStatus::Paused, 100);
        assert!(!state.can_resume());
        state.set_downloaded(1u64);
        assert!(state.can_resume());
        assert!(!state.is_active());

        for status in [
            PackStatus::Queued,
            PackStatus::Downloading,
            PackStatus::Verifying,
            PackStatus::Installing,
        ] {
            state.set_status(status);
            assert!(state.is_active(), "{} should be active", status);
            assert!(!state.can_resume());
        }
    }

    #[test]
    fn test_store_snapshots_are_immutable() {
        let store = PackStateStore::new();
        store.set("p1", PackState::new(PackStatus::NotDownloaded, 10));
        let before = store.snapshot();

        store.update("p1", |s| s.set_status(PackStatus::Downloading));

        assert_eq!(before["p1"].status(), PackStatus::NotDownloaded);
        assert_eq!(store.get("p1").unwrap().status(), PackStatus::Downloading);
    }

    #[test]
    fn test_update_if_skips_when_condition_fails() {
        let store = PackStateStore::new();
        store.set("p1", PackState::new(PackStatus::Paused, 10));

        let applied = store.update_if(
            "p1",
            |s| s.is_some_and(|s| s.status() == PackStatus::Downloading),
            |s| s.set_status(PackStatus::Installed),
        );

        assert!(!applied);
        assert_eq!(store.get("p1").unwrap().status(), PackStatus::Paused);
    }

    #[tokio::test]
    async fn test_subscribers_notified_on_change_only() {
        let store = PackStateStore::new();
        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();

        store.update("p1", |s| s.set_status(PackStatus::Queued));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()["p1"].status(), PackStatus::Queued);

        store.update("p1", |s| s.set_status(PackStatus::Queued));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_retain() {
        let store = PackStateStore::new();
        store.set("keep", PackState::default());
        store.set("drop", PackState::default());
        store.retain(|id| id == "keep");
        assert!(store.get("keep").is_some());
        assert!(store.get("drop").is_none());
    }

    proptest! {
        #[test]
        fn test_downloaded_never_exceeds_total(
            total in any::<u64>(),
            raw in any::<i64>(),
            new_total in any::<u64>(),
        ) {
            let mut state = PackState::new(PackStatus::Downloading, total);
            state.set_downloaded(raw);
            prop_assert!(state.downloaded_bytes() <= state.total_bytes());

            state.set_total(new_total);
            prop_assert!(state.downloaded_bytes() <= state.total_bytes());

            state.set_progress(i128::from(raw) * 3, new_total);
            prop_assert!(state.downloaded_bytes() <= state.total_bytes());
        }
    }
}
