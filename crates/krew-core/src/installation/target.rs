//! Download target resolution
//!
//! Turns a manifest into the one concrete artifact to fetch on this host.

use tracing::{debug, warn};

use crate::download::is_valid_sha256;
use crate::error::{KrewError, Result};
use crate::index::{FileOperation, PluginManifest, HEAD_VERSION};
use crate::platform::{select, Host};

/// What to download and how to lay it out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Pinned sha256 or `HEAD`
    pub version: String,
    pub uri: String,
    /// `None` only for HEAD
    pub sha256: Option<String>,
    pub files: Vec<FileOperation>,
    /// Primary executable relative to the version directory
    pub bin: String,
}

impl DownloadTarget {
    pub fn is_head(&self) -> bool {
        self.version == HEAD_VERSION
    }
}

/// Resolve the artifact of `manifest` for `host`.
///
/// HEAD is used when forced (and the variant has a `head` URI), when the
/// plugin's canonical version is HEAD, or when the variant has no pinned URI.
pub fn resolve_download_target(
    manifest: &PluginManifest,
    host: &Host,
    force_head: bool,
) -> Result<DownloadTarget> {
    let spec = select(manifest, host).ok_or_else(|| KrewError::NoMatchingPlatform {
        name: manifest.name.clone(),
        os: host.os.clone(),
        arch: host.arch.clone(),
    })?;
    debug!("Selected platform {:?} for {}", spec.selector, host);

    let invalid = |message: &str| KrewError::InvalidManifest {
        name: manifest.name.clone(),
        message: message.to_string(),
    };
    let files = spec.file_operations();
    let bin = spec.bin_path(&manifest.name);

    let wants_head = (force_head && spec.head.is_some()) || manifest.is_head() || spec.uri.is_none();
    if wants_head {
        let uri = spec
            .head
            .clone()
            .or_else(|| spec.uri.clone())
            .ok_or_else(|| invalid("platform declares neither uri nor head"))?;
        return Ok(DownloadTarget {
            version: HEAD_VERSION.to_string(),
            uri,
            sha256: None,
            files,
            bin,
        });
    }

    if force_head {
        warn!(
            "Plugin {} has no HEAD artifact, using the pinned version",
            manifest.name
        );
    }

    let uri = spec.uri.clone().ok_or_else(|| invalid("platform declares no uri"))?;
    let sha256 = spec
        .sha256
        .clone()
        .filter(|s| is_valid_sha256(s))
        .ok_or_else(|| invalid("pinned platform requires a lowercase hex sha256"))?;

    Ok(DownloadTarget {
        version: sha256.clone(),
        uri,
        sha256: Some(sha256),
        files,
        bin,
    })
}
