//! Read access to the plugin store and recovery of interrupted operations

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::environment::bin_file_name;
use crate::error::{KrewError, Result};
use crate::index::{HEAD_OLD_VERSION, HEAD_VERSION};
use crate::installation::link::read_link_target;

/// Version directories of a plugin, sorted; hidden staging dirs excluded
fn version_dirs(plugin_dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(plugin_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(KrewError::fs("read directory", plugin_dir, e)),
    };

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KrewError::fs("read directory", plugin_dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        versions.push(name);
    }
    versions.sort();
    Ok(versions)
}

/// Version the bin entry point of `name` refers to
fn linked_version(plugin_dir: &Path, bin_dir: &Path, name: &str) -> Option<String> {
    let target = read_link_target(&bin_dir.join(bin_file_name(name)))?;
    let relative = target.strip_prefix(plugin_dir).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

/// Installed version of `name`, if any.
///
/// Outside an upgrade there is a single version directory. While an upgrade
/// is in flight the version the bin entry points at wins, then any version
/// other than `HEAD-OLD`.
pub fn find_installed_version(install_dir: &Path, bin_dir: &Path, name: &str) -> Result<Option<String>> {
    let plugin_dir = install_dir.join(name);
    let versions = version_dirs(&plugin_dir)?;

    match versions.len() {
        0 => Ok(None),
        1 => Ok(versions.into_iter().next()),
        _ => {
            if let Some(linked) = linked_version(&plugin_dir, bin_dir, name) {
                if versions.contains(&linked) {
                    return Ok(Some(linked));
                }
            }
            Ok(versions
                .iter()
                .find(|v| v.as_str() != HEAD_OLD_VERSION)
                .or_else(|| versions.first())
                .cloned())
        }
    }
}

/// Map of installed plugin name to version
pub fn list_installed(install_dir: &Path, bin_dir: &Path) -> Result<BTreeMap<String, String>> {
    let entries = match fs::read_dir(install_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(KrewError::fs("read directory", install_dir, e)),
    };

    let mut installed = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| KrewError::fs("read directory", install_dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        if let Some(version) = find_installed_version(install_dir, bin_dir, &name)? {
            installed.insert(name, version);
        }
    }
    Ok(installed)
}

/// Finish or roll back an operation on `name` that a previous process did
/// not complete. Must run while holding the plugin lock.
///
/// - `HEAD-OLD` next to `HEAD`: the new HEAD was promoted, drop the old one
/// - `HEAD-OLD` alone: staging failed or never ran, restore it as `HEAD`
/// - several versions: keep the linked one, drop the others
/// - hidden `.partial` directories are removed
pub fn reclaim_interrupted(install_dir: &Path, bin_dir: &Path, name: &str) -> Result<()> {
    let plugin_dir = install_dir.join(name);
    if !plugin_dir.is_dir() {
        return Ok(());
    }

    remove_partial_dirs(&plugin_dir)?;

    let mut versions = version_dirs(&plugin_dir)?;
    if versions.iter().any(|v| v == HEAD_OLD_VERSION) {
        let old = plugin_dir.join(HEAD_OLD_VERSION);
        if versions.iter().any(|v| v == HEAD_VERSION) {
            info!("Removing leftover {}", old.display());
            fs::remove_dir_all(&old).map_err(|e| KrewError::fs("remove", &old, e))?;
        } else {
            let head = plugin_dir.join(HEAD_VERSION);
            info!("Restoring interrupted upgrade of {}", name);
            fs::rename(&old, &head).map_err(|e| KrewError::fs("move", &old, e))?;
        }
        versions = version_dirs(&plugin_dir)?;
    }

    if versions.len() > 1 {
        let keep = find_installed_version(install_dir, bin_dir, name)?;
        for version in versions.iter().filter(|v| Some(*v) != keep.as_ref()) {
            let stale = plugin_dir.join(version);
            debug!("Removing stale version {}", stale.display());
            if let Err(e) = fs::remove_dir_all(&stale) {
                warn!("Could not remove {}: {}", stale.display(), e);
            }
        }
    }

    if versions.is_empty() {
        // An empty plugin directory is not an installation
        let _ = fs::remove_dir(&plugin_dir);
    }
    Ok(())
}

fn remove_partial_dirs(plugin_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(plugin_dir).map_err(|e| KrewError::fs("read directory", plugin_dir, e))?;
    let partials: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(false)
        })
        .collect();

    for partial in partials {
        debug!("Removing partial copy {}", partial.display());
        fs::remove_dir_all(&partial).map_err(|e| KrewError::fs("remove", &partial, e))?;
    }
    Ok(())
}
