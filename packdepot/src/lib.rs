//! PackDepot - resumable download, verification and atomic installation of
//! offline content packs.
//!
//! A host application describes the available packs with a
//! [`PackCatalog`], hands it to a [`PackManager`] and drives downloads
//! through its operations. Progress and lifecycle changes are published as
//! immutable [`StateSnapshot`]s.
//!
//! # Guarantees
//!
//! - An installed pack is always either the previous complete version or the
//!   new complete version, even across crashes.
//! - Partial downloads resume with a single `Range` request and never carry
//!   stale bytes into the installed file.
//! - A paused, cancelled or superseded download never overwrites the state
//!   of a newer one.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod installer;
pub mod layout;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod network;
pub mod session;
pub mod space;
pub mod state;
pub mod transfer;
pub mod verify;

pub use config::ManagerConfig;
pub use descriptor::{PackCatalog, PackDescriptor};
pub use error::{ErrorKind, PackError, PackResult};
pub use manager::{DownloadOutcome, DownloadTask, InstalledPack, PackManager, PackManagerBuilder};
pub use state::{PackState, PackStatus, StateSnapshot};
