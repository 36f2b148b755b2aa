use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KrewError {
    #[error("can't install, the newest version of '{name}' is already installed")]
    AlreadyInstalled { name: String },

    #[error("plugin '{name}' is not installed")]
    NotInstalled { name: String },

    #[error("can't upgrade, the newest version of '{name}' is already installed")]
    AlreadyUpToDate { name: String },

    #[error("plugin '{name}' has no available platform for this host ({os}/{arch})")]
    NoMatchingPlatform {
        name: String,
        os: String,
        arch: String,
    },

    #[error("checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("failed to download {uri}: {message}")]
    DownloadFailed { uri: String, message: String },

    #[error("download of {uri} was cancelled")]
    Cancelled { uri: String },

    #[error("{action} failed for {path}: {source}")]
    FilesystemFailure {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest for '{name}': {message}")]
    InvalidManifest { name: String, message: String },

    #[error("Invalid plugin name: '{name}' - must be a single path segment")]
    InvalidPluginName { name: String },

    #[error("Plugin not found in index: {name}")]
    PluginNotFound { name: String },

    #[error("removing '{name}' is not allowed through krew, see docs for help")]
    ProtectedPlugin { name: String },

    #[error("krew local plugin index is not initialized at {path}")]
    IndexNotInitialized { path: PathBuf },

    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Config key not found: {key}")]
    ConfigKeyNotFound { key: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Closed classification of [`KrewError`] for callers that branch on outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyInstalled,
    NotInstalled,
    AlreadyUpToDate,
    NoMatchingPlatform,
    ChecksumMismatch,
    DownloadFailed,
    Cancelled,
    FilesystemFailure,
    InvalidManifest,
    InvalidPluginName,
    PluginNotFound,
    ProtectedPlugin,
    IndexNotInitialized,
    Config,
    HomeNotFound,
}

pub type Result<T> = std::result::Result<T, KrewError>;

impl KrewError {
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemFailure {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyInstalled { .. } => ErrorKind::AlreadyInstalled,
            Self::NotInstalled { .. } => ErrorKind::NotInstalled,
            Self::AlreadyUpToDate { .. } => ErrorKind::AlreadyUpToDate,
            Self::NoMatchingPlatform { .. } => ErrorKind::NoMatchingPlatform,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::FilesystemFailure { .. } => ErrorKind::FilesystemFailure,
            Self::InvalidManifest { .. } => ErrorKind::InvalidManifest,
            Self::InvalidPluginName { .. } => ErrorKind::InvalidPluginName,
            Self::PluginNotFound { .. } => ErrorKind::PluginNotFound,
            Self::ProtectedPlugin { .. } => ErrorKind::ProtectedPlugin,
            Self::IndexNotInitialized { .. } => ErrorKind::IndexNotInitialized,
            Self::ConfigParse { .. } | Self::ConfigKeyNotFound { .. } => ErrorKind::Config,
            Self::HomeNotFound => ErrorKind::HomeNotFound,
        }
    }

    /// Expected outcomes that are reported verbatim and never retried.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AlreadyInstalled
                | ErrorKind::NotInstalled
                | ErrorKind::AlreadyUpToDate
                | ErrorKind::NoMatchingPlatform
                | ErrorKind::PluginNotFound
                | ErrorKind::ProtectedPlugin
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::PluginNotFound => 2,
            ErrorKind::AlreadyInstalled | ErrorKind::AlreadyUpToDate => 3,
            ErrorKind::NotInstalled => 4,
            ErrorKind::NoMatchingPlatform => 5,
            ErrorKind::ChecksumMismatch => 6,
            ErrorKind::DownloadFailed | ErrorKind::Cancelled => 7,
            _ => 1,
        }
    }
}
