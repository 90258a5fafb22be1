//! Configuration for the pack manager.

use std::path::PathBuf;
use std::time::Duration;

/// Default size of a single write between session liveness checks (8KB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Default number of new bytes between progress publications (64KB).
pub const DEFAULT_PROGRESS_STEP_BYTES: u64 = 64 * 1024;

/// Default timeout for establishing a connection and receiving headers.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for the pack manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory of installed packs (`<packs_dir>/<id>/data.pack`).
    pub packs_dir: PathBuf,

    /// Directory holding partial downloads and their resume markers.
    pub temp_dir: PathBuf,

    /// Connect and response-header timeout for HTTP requests.
    ///
    /// Body streaming has no overall timeout; large packs can take
    /// arbitrarily long on slow links.
    pub request_timeout: Duration,

    /// Bytes written between session liveness checks.
    pub chunk_size: usize,

    /// Minimum number of new bytes before progress is published again.
    pub progress_step_bytes: u64,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("packdepot");
        Self {
            packs_dir: root.join("packs"),
            temp_dir: root.join("downloads"),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_step_bytes: DEFAULT_PROGRESS_STEP_BYTES,
            user_agent: format!("packdepot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration rooted at `root`.
    ///
    /// Installed packs go to `root/packs`, partial downloads to `root/downloads`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            packs_dir: root.join("packs"),
            temp_dir: root.join("downloads"),
            ..Default::default()
        }
    }

    /// Set the installed packs directory.
    pub fn with_packs_dir(mut self, path: PathBuf) -> Self {
        self.packs_dir = path;
        self
    }

    /// Set the temp-download directory.
    pub fn with_temp_dir(mut self, path: PathBuf) -> Self {
        self.temp_dir = path;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the write chunk size (minimum 1 byte).
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the progress publication step.
    pub fn with_progress_step_bytes(mut self, bytes: u64) -> Self {
        self.progress_step_bytes = bytes;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
