pub mod config;
pub mod download;
pub mod environment;
pub mod error;
pub mod index;
pub mod installation;
pub mod platform;

pub use config::Config;
pub use download::{get_insecure, get_with_sha256, CancelToken, DefaultFetcher, Fetcher};
pub use environment::{executed_version, is_plugin, KrewPaths, KREW_PLUGIN_NAME};
pub use error::{ErrorKind, KrewError, Result};
pub use index::{
    load_manifest_file, load_plugin, load_plugins, FileOperation, PlatformSpec, PluginManifest,
    HEAD_OLD_VERSION, HEAD_VERSION,
};
pub use installation::{
    find_installed_version, list_installed, resolve_download_target, DownloadTarget,
    InstallOutcome, Installer, PluginLock, UpgradeOutcome,
};
pub use platform::{select, Host, Selector};
