//! Index Module
//!
//! Read-only access to the local plugin index maintained by `krew update`.
//!
//! - `types`: manifest data model
//! - `loader`: reading manifests from the index tree

pub mod loader;
pub mod types;

// Re-exports
pub use loader::{is_initialized, load_manifest_file, load_plugin, load_plugins, plugins_dir};
pub use types::{FileOperation, PlatformSpec, PluginManifest, HEAD_OLD_VERSION, HEAD_VERSION};

use crate::error::{KrewError, Result};

/// Reject names that could escape the store when joined to a path
pub fn validate_plugin_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', ':'])
        && !name.chars().any(char::is_control);

    if valid {
        Ok(())
    } else {
        Err(KrewError::InvalidPluginName {
            name: name.to_string(),
        })
    }
}
