//! Artifact extraction
//!
//! The artifact type is detected from its leading bytes: zip and gzipped tar
//! archives are unpacked, anything else is kept as a single file.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{KrewError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    /// Not an archive
    Raw,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

pub fn detect_kind(header: &[u8]) -> ArchiveKind {
    if header.starts_with(ZIP_MAGIC) {
        ArchiveKind::Zip
    } else if header.starts_with(GZIP_MAGIC) {
        ArchiveKind::TarGz
    } else {
        ArchiveKind::Raw
    }
}

/// Unpack `artifact` into `dest_dir`. Raw artifacts are copied as `raw_name`.
pub fn extract(artifact: &Path, dest_dir: &Path, raw_name: &str) -> Result<()> {
    let mut file = File::open(artifact).map_err(|e| KrewError::fs("open", artifact, e))?;
    let mut header = [0u8; 4];
    let read = read_header(&mut file, &mut header).map_err(|e| KrewError::fs("read", artifact, e))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| KrewError::fs("read", artifact, e))?;

    fs::create_dir_all(dest_dir).map_err(|e| KrewError::fs("create directory", dest_dir, e))?;

    let kind = detect_kind(&header[..read]);
    debug!("Extracting {} as {:?}", artifact.display(), kind);
    match kind {
        ArchiveKind::Zip => extract_zip(file, artifact, dest_dir),
        ArchiveKind::TarGz => extract_tar_gz(file, artifact, dest_dir),
        ArchiveKind::Raw => {
            let out = dest_dir.join(sanitize_entry_path(Path::new(raw_name), artifact)?);
            fs::copy(artifact, &out).map_err(|e| KrewError::fs("copy", &out, e))?;
            Ok(())
        }
    }
}

fn read_header(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Reject entries that would land outside the destination
fn sanitize_entry_path(path: &Path, artifact: &Path) -> Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(corrupt(
                    artifact,
                    format!("archive entry escapes destination: {}", path.display()),
                ));
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        return Err(corrupt(artifact, "archive entry has empty path".to_string()));
    }
    Ok(cleaned)
}

fn corrupt(artifact: &Path, message: String) -> KrewError {
    KrewError::fs(
        "extract",
        artifact,
        io::Error::new(io::ErrorKind::InvalidData, message),
    )
}

fn extract_tar_gz(file: File, artifact: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| KrewError::fs("extract", artifact, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| KrewError::fs("extract", artifact, e))?;
        let raw_path = entry
            .path()
            .map_err(|e| KrewError::fs("extract", artifact, e))?
            .to_path_buf();
        let relative = sanitize_entry_path(&raw_path, artifact)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|e| KrewError::fs("extract", artifact, e))?
                .ok_or_else(|| {
                    corrupt(
                        artifact,
                        format!("link entry without target: {}", relative.display()),
                    )
                })?
                .to_path_buf();
            // Hard link targets are archive paths, symlink targets are relative to the link
            let base = if entry_type.is_hard_link() {
                Path::new("")
            } else {
                relative.parent().unwrap_or(Path::new(""))
            };
            check_link_target(base, &target, artifact)?;
        }

        // unpack_in refuses to write through links that leave dest_dir
        let unpacked = entry
            .unpack_in(dest_dir)
            .map_err(|e| KrewError::fs("extract", &dest_dir.join(&relative), e))?;
        if !unpacked {
            return Err(corrupt(
                artifact,
                format!("archive entry escapes destination: {}", raw_path.display()),
            ));
        }
    }
    Ok(())
}

/// Reject link targets that resolve outside the destination
fn check_link_target(base: &Path, target: &Path, artifact: &Path) -> Result<()> {
    let mut depth = base.components().count();
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                return Err(corrupt(
                    artifact,
                    format!("archive link points outside destination: {}", target.display()),
                ));
            }
        }
    }
    Ok(())
}

fn extract_zip(file: File, artifact: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(artifact, e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| corrupt(artifact, e.to_string()))?;
        let raw = entry.name().replace('\\', "/");
        let out = dest_dir.join(sanitize_entry_path(Path::new(&raw), artifact)?);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| KrewError::fs("create directory", &out, e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| KrewError::fs("create directory", parent, e))?;
        }
        let mut out_file = File::create(&out).map_err(|e| KrewError::fs("create", &out, e))?;
        io::copy(&mut entry, &mut out_file).map_err(|e| KrewError::fs("extract", &out, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode().filter(|m| m & 0o777 != 0) {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| KrewError::fs("set permissions", &out, e))?;
        }
    }
    Ok(())
}
