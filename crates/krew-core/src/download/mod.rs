//! Download Module
//!
//! Fetches an artifact into a directory, verifying its sha256 before anything
//! is extracted.
//!
//! - `fetcher`: pluggable transports
//! - `archive`: extraction of verified artifacts

pub mod archive;
pub mod fetcher;

// Re-exports
pub use fetcher::{DefaultFetcher, Fetcher, FileFetcher, HttpFetcher};

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{KrewError, Result};

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_ARTIFACT_NAME: &str = "artifact";

/// Shared flag that aborts an in-flight download
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether `value` is a 64-character lowercase hex sha256
pub fn is_valid_sha256(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Download `uri` into `dest_dir` after checking its sha256
pub fn get_with_sha256(
    uri: &str,
    dest_dir: &Path,
    sha256: &str,
    fetcher: &dyn Fetcher,
    cancel: &CancelToken,
) -> Result<()> {
    if !is_valid_sha256(sha256) {
        return Err(KrewError::InvalidManifest {
            name: uri.to_string(),
            message: format!("'{}' is not a lowercase hex sha256", sha256),
        });
    }
    info!("Getting sha256 ({}) signed version", sha256);
    download(uri, dest_dir, Some(sha256), fetcher, cancel)
}

/// Download `uri` into `dest_dir` without verification. Only used for HEAD.
pub fn get_insecure(
    uri: &str,
    dest_dir: &Path,
    fetcher: &dyn Fetcher,
    cancel: &CancelToken,
) -> Result<()> {
    info!("Getting latest version from HEAD");
    download(uri, dest_dir, None, fetcher, cancel)
}

fn download(
    uri: &str,
    dest_dir: &Path,
    expected: Option<&str>,
    fetcher: &dyn Fetcher,
    cancel: &CancelToken,
) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| KrewError::fs("create directory", dest_dir, e))?;

    // Removed on drop, whatever the outcome
    let mut artifact = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(dest_dir)
        .map_err(|e| KrewError::fs("create file", dest_dir, e))?;

    let mut reader = fetcher.get(uri)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(KrewError::Cancelled {
                uri: uri.to_string(),
            });
        }
        let n = reader.read(&mut buf).map_err(|e| KrewError::DownloadFailed {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        artifact
            .write_all(&buf[..n])
            .map_err(|e| KrewError::fs("write", artifact.path(), e))?;
        total += n as u64;
    }
    artifact
        .flush()
        .map_err(|e| KrewError::fs("write", artifact.path(), e))?;
    debug!("Fetched {} bytes from {}", total, uri);

    if let Some(expected) = expected {
        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            return Err(KrewError::ChecksumMismatch {
                uri: uri.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        debug!("Checksum of {} verified", uri);
    }

    archive::extract(artifact.path(), dest_dir, &artifact_name(uri))
}

/// Final path segment of a URI, used to name non-archive artifacts
fn artifact_name(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(DEFAULT_ARTIFACT_NAME)
        .to_string()
}
