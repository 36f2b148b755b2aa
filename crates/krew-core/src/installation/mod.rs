//! Installation Module
//!
//! Atomic install, upgrade and removal of plugin versions.
//!
//! - `install`: the `Installer` entry point
//! - `upgrade`: version swaps
//! - `target`: manifest → download target
//! - `move_files`: file operations and promotion into the store
//! - `link`: bin directory entry points
//! - `lock`: per-plugin advisory lock
//! - `store`: store inspection and crash recovery

pub mod install;
pub mod link;
pub mod lock;
pub mod move_files;
pub mod store;
pub mod target;
pub mod upgrade;

// Re-exports
pub use install::{InstallOutcome, Installer};
pub use lock::PluginLock;
pub use store::{find_installed_version, list_installed};
pub use target::{resolve_download_target, DownloadTarget};
pub use upgrade::UpgradeOutcome;
