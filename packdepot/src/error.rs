//! Error types for pack management.
//!
//! Every public operation on [`PackManager`](crate::manager::PackManager)
//! returns a [`PackResult`]. Pausing, cancelling or superseding a download is
//! not an error: those outcomes are reported as
//! [`DownloadOutcome::Interrupted`](crate::manager::DownloadOutcome).

use std::fmt;

use thiserror::Error;

/// Result type for pack operations.
pub type PackResult<T> = Result<T, PackError>;

/// Errors surfaced by pack operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackError {
    /// The device reported no usable network connection.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// Not enough free disk space for the download and the installed copy.
    #[error("insufficient storage: {required} bytes required, {available} bytes available")]
    InsufficientStorage { required: u64, available: u64 },

    /// The downloaded file does not match the declared hash.
    #[error("verification failed: expected {expected}, got {actual}")]
    VerificationFailed { expected: String, actual: String },

    /// Staging or swapping the verified pack into place failed.
    #[error("installation failed: {reason}")]
    InstallationFailed { reason: String },

    /// The server answered with a status other than 200 or 206.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// A download session is already live for this pack.
    #[error("download already in progress for pack {pack_id}")]
    AlreadyInProgress { pack_id: String },

    /// The pack id is not part of the current catalog.
    #[error("unknown pack: {pack_id}")]
    UnknownPack { pack_id: String },

    /// The pack id cannot be mapped onto the on-disk layout.
    #[error("invalid pack id: {0:?}")]
    InvalidPackId(String),

    /// Transport or I/O failure without a more specific kind.
    #[error("{0}")]
    Unknown(String),
}

/// Fieldless discriminant of [`PackError`], for UI mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkUnavailable,
    InsufficientStorage,
    VerificationFailed,
    InstallationFailed,
    HttpError,
    AlreadyInProgress,
    UnknownPack,
    InvalidPackId,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::InsufficientStorage => "insufficient_storage",
            Self::VerificationFailed => "verification_failed",
            Self::InstallationFailed => "installation_failed",
            Self::HttpError => "http_error",
            Self::AlreadyInProgress => "already_in_progress",
            Self::UnknownPack => "unknown_pack",
            Self::InvalidPackId => "invalid_pack_id",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl PackError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkUnavailable => ErrorKind::NetworkUnavailable,
            Self::InsufficientStorage { .. } => ErrorKind::InsufficientStorage,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::InstallationFailed { .. } => ErrorKind::InstallationFailed,
            Self::HttpError(_) => ErrorKind::HttpError,
            Self::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            Self::UnknownPack { .. } => ErrorKind::UnknownPack,
            Self::InvalidPackId(_) => ErrorKind::InvalidPackId,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same download unchanged can reasonably succeed.
    ///
    /// A hash mismatch points at a corrupt transfer or a wrong catalog entry,
    /// so it is not retried the same way as a transport failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::HttpError(_) | Self::Unknown(_)
        )
    }

    pub(crate) fn installation(reason: impl Into<String>) -> Self {
        Self::InstallationFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(action: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Unknown(format!("failed to {} {}: {}", action, path.display(), source))
    }
}
