//! Artifact transports

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{KrewError, Result};

/// Opens a byte stream for a URI
pub trait Fetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>>;
}

/// Fetches over HTTP(S)
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Create a fetcher; `None` disables the request timeout
    pub fn new(timeout: Option<Duration>, user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| KrewError::DownloadFailed {
                uri: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>> {
        debug!("Fetching {}", uri);
        let response = self
            .client
            .get(uri)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| KrewError::DownloadFailed {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        Ok(Box::new(response))
    }
}

/// Reads `file://` URIs and plain local paths
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>> {
        let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        debug!("Reading {}", path.display());
        let file = File::open(&path).map_err(|e| KrewError::DownloadFailed {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        Ok(Box::new(file))
    }
}

/// Dispatches on the URI scheme: HTTP(S) goes to `HttpFetcher`, the rest is local
pub struct DefaultFetcher {
    http: HttpFetcher,
}

impl DefaultFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

impl Fetcher for DefaultFetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            self.http.get(uri)
        } else {
            FileFetcher.get(uri)
        }
    }
}
