//! Moving downloaded files into the store
//!
//! File operations rearrange the extracted artifact into a staging directory;
//! promotion then renames the staging directory to its final version path.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{KrewError, Result};
use crate::index::FileOperation;

/// Apply `ops` in order, moving matches from `from_dir` into `to_dir`
pub fn apply_file_operations(
    plugin: &str,
    from_dir: &Path,
    to_dir: &Path,
    ops: &[FileOperation],
) -> Result<()> {
    fs::create_dir_all(to_dir).map_err(|e| KrewError::fs("create directory", to_dir, e))?;

    for op in ops {
        for (from, to) in find_move_targets(plugin, from_dir, to_dir, op)? {
            debug!("Move: {} -> {}", from.display(), to.display());
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| KrewError::fs("create directory", parent, e))?;
            }
            if fs::symlink_metadata(&to).is_ok() {
                return Err(KrewError::InvalidManifest {
                    name: plugin.to_string(),
                    message: format!(
                        "'{}' would overwrite {}, which an earlier file operation placed",
                        op.from,
                        to.strip_prefix(to_dir).unwrap_or(&to).display()
                    ),
                });
            }
            fs::rename(&from, &to).map_err(|e| KrewError::fs("move", &from, e))?;
        }
    }
    Ok(())
}

fn find_move_targets(
    plugin: &str,
    from_dir: &Path,
    to_dir: &Path,
    op: &FileOperation,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let invalid = |message: String| KrewError::InvalidManifest {
        name: plugin.to_string(),
        message,
    };

    let to = clean_relative(&op.to)
        .ok_or_else(|| invalid(format!("destination '{}' is not a clean relative path", op.to)))?;
    let from = clean_relative(&op.from)
        .ok_or_else(|| invalid(format!("source '{}' is not a clean relative path", op.from)))?;
    let dest_dir = to_dir.join(to);

    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&from_dir.to_string_lossy()),
        from.to_string_lossy().replace('\\', "/")
    );
    let mut matches = Vec::new();
    for entry in glob::glob(&pattern).map_err(|e| invalid(format!("bad glob '{}': {}", op.from, e)))? {
        matches.push(entry.map_err(|e| KrewError::fs("read", e.path().to_path_buf(), e.into_error()))?);
    }

    if matches.is_empty() {
        return Err(invalid(format!(
            "no files in the plugin archive matched the glob pattern={}",
            op.from
        )));
    }
    if op.rename.is_some() && matches.len() != 1 {
        return Err(invalid(format!(
            "'{}' must match exactly one file to be renamed, matched {}",
            op.from,
            matches.len()
        )));
    }

    let mut moves = Vec::with_capacity(matches.len());
    for matched in matches {
        let relative = matched
            .strip_prefix(from_dir)
            .map_err(|_| invalid(format!("{} escapes the download directory", matched.display())))?;

        let target = if let Some(rename) = &op.rename {
            single_segment(rename)
                .ok_or_else(|| invalid(format!("rename target '{}' is not a file name", rename)))?
        } else if let Some(strip) = op.strip {
            let kept: PathBuf = relative.components().skip(strip).collect();
            if kept.as_os_str().is_empty() {
                return Err(invalid(format!(
                    "strip={} removes every component of {}",
                    strip,
                    relative.display()
                )));
            }
            kept
        } else {
            PathBuf::from(relative.file_name().unwrap_or(relative.as_os_str()))
        };

        moves.push((matched.clone(), dest_dir.join(target)));
    }
    Ok(moves)
}

/// Relative path made only of normal components; `.` becomes empty
fn clean_relative(raw: &str) -> Option<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(cleaned)
}

fn single_segment(raw: &str) -> Option<PathBuf> {
    let cleaned = clean_relative(raw)?;
    (cleaned.components().count() == 1).then_some(cleaned)
}

/// Make `staged` appear at `dest` in one step.
///
/// Uses a single rename; when that fails (e.g. across filesystems) the tree is
/// copied to a hidden sibling of `dest` first and then renamed, so `dest`
/// never exists half-populated.
pub fn promote(staged: &Path, dest: &Path) -> Result<()> {
    promote_with(staged, dest, |from, to| fs::rename(from, to))
}

/// `promote` with the first rename attempt supplied by the caller
fn promote_with<F>(staged: &Path, dest: &Path, rename: F) -> Result<()>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    let parent = dest.parent().unwrap_or(dest);
    fs::create_dir_all(parent).map_err(|e| KrewError::fs("create directory", parent, e))?;

    if dest.exists() {
        return Err(KrewError::fs(
            "promote",
            dest,
            io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"),
        ));
    }

    debug!("Move directory {} to {}", staged.display(), dest.display());
    let rename_err = match rename(staged, dest) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(
        "Rename of {} failed ({}), copying instead",
        staged.display(),
        rename_err
    );

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let partial = parent.join(format!(".{}.partial", file_name));
    if partial.exists() {
        fs::remove_dir_all(&partial).map_err(|e| KrewError::fs("remove", &partial, e))?;
    }

    let result = copy_dir_all(staged, &partial)
        .and_then(|()| fs::rename(&partial, dest).map_err(|e| KrewError::fs("move", &partial, e)));
    if result.is_err() {
        let _ = fs::remove_dir_all(&partial);
        return result;
    }

    let _ = fs::remove_dir_all(staged);
    Ok(())
}

/// Copy a directory tree, preserving symlinks on unix
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            KrewError::fs("read", path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| KrewError::fs("create directory", &target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| KrewError::fs("copy", &target, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| KrewError::fs("read link", src, e))?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| KrewError::fs("create link", dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| KrewError::fs("copy", dst, e))
}
