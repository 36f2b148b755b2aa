//! Entry points in the bin directory
//!
//! On unix `bin/<name>` is a symlink to the executable inside the version
//! directory; on Windows the executable is copied to `bin/<name>.exe`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{KrewError, Result};

/// Point `link` at `target`, replacing whatever `link` was before.
///
/// The new entry is placed under a hidden name next to `link` and renamed
/// over it, so `link` never goes missing and survives a failed swap.
pub fn create_or_update_link(link: &Path, target: &Path) -> Result<()> {
    make_executable(target)?;

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| KrewError::fs("create directory", parent, e))?;
    }

    let pending = pending_link_path(link);
    remove_link(&pending)?;

    debug!("Linking {} -> {}", link.display(), target.display());
    place_link(target, &pending).map_err(|e| KrewError::fs("create link", &pending, e))?;
    if let Err(e) = fs::rename(&pending, link) {
        let _ = fs::remove_file(&pending);
        return Err(KrewError::fs("replace link", link, e));
    }
    Ok(())
}

/// Hidden sibling the next entry point is built under
pub(crate) fn pending_link_path(link: &Path) -> PathBuf {
    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    link.with_file_name(format!(".{}.pending", name))
}

/// Remove the entry point; a missing link is not an error
pub fn remove_link(link: &Path) -> Result<()> {
    match fs::symlink_metadata(link) {
        Ok(_) => {
            debug!("Removing link {}", link.display());
            fs::remove_file(link).map_err(|e| KrewError::fs("remove link", link, e))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KrewError::fs("inspect link", link, e)),
    }
}

/// Target of a symlink entry point, if it is one
pub fn read_link_target(link: &Path) -> Option<PathBuf> {
    fs::read_link(link).ok()
}

#[cfg(unix)]
fn place_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn place_link(target: &Path, link: &Path) -> io::Result<()> {
    fs::copy(target, link).map(|_| ())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| KrewError::fs("inspect", path, e))?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o755);
        fs::set_permissions(path, permissions)
            .map_err(|e| KrewError::fs("set permissions", path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(path: &Path) -> Result<()> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|e| KrewError::fs("inspect", path, e))
}
