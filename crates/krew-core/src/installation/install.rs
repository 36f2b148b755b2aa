//! Plugin Installer
//!
//! High-level API for installing, removing and upgrading plugins

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;
use crate::download::{self, CancelToken, DefaultFetcher, Fetcher, HttpFetcher};
use crate::environment::{KrewPaths, KREW_PLUGIN_NAME};
use crate::error::{KrewError, Result};
use crate::index::{validate_plugin_name, PluginManifest};
use crate::installation::link::{create_or_update_link, read_link_target, remove_link};
use crate::installation::lock::PluginLock;
use crate::installation::move_files::{apply_file_operations, promote};
use crate::installation::store::{find_installed_version, reclaim_interrupted};
use crate::installation::target::{resolve_download_target, DownloadTarget};
use crate::platform::Host;

const FETCHED_DIR: &str = "fetched";
const STAGED_DIR: &str = "staged";

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub version: String,
    /// Directory the version was promoted to
    pub install_path: PathBuf,
    /// Entry point in the bin directory
    pub bin_path: PathBuf,
}

/// Plugin Installer - drives download, promotion and linking
pub struct Installer {
    paths: KrewPaths,
    host: Host,
    fetcher: Box<dyn Fetcher>,
    cancel: CancelToken,
    executed_version: Option<String>,
}

impl Installer {
    /// Create an installer that downloads over HTTP(S) as configured
    pub fn new(paths: KrewPaths, host: Host, config: &Config) -> Result<Self> {
        let http = HttpFetcher::new(config.download.timeout(), &config.download.user_agent)?;
        Ok(Self::with_fetcher(
            paths,
            host,
            Box::new(DefaultFetcher::new(http)),
        ))
    }

    /// Create with a custom transport (for testing)
    pub fn with_fetcher(paths: KrewPaths, host: Host, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            paths,
            host,
            fetcher,
            cancel: CancelToken::new(),
            executed_version: None,
        }
    }

    /// Version of krew the current process runs from, if it runs from the store
    pub fn with_executed_version(mut self, version: Option<String>) -> Self {
        self.executed_version = version;
        self
    }

    pub fn paths(&self) -> &KrewPaths {
        &self.paths
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Token that aborts downloads started by this installer
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn executed_version(&self) -> Option<&str> {
        self.executed_version.as_deref()
    }

    /// Installed version of a plugin
    pub fn installed_version(&self, name: &str) -> Result<Option<String>> {
        validate_plugin_name(name)?;
        find_installed_version(self.paths.install(), self.paths.bin(), name)
    }

    /// Install a plugin. Fails with `AlreadyInstalled` instead of upgrading.
    pub fn install(&self, manifest: &PluginManifest, force_head: bool) -> Result<InstallOutcome> {
        let name = manifest.name.as_str();
        validate_plugin_name(name)?;

        info!("Finding download target for plugin {}", name);
        let target = resolve_download_target(manifest, &self.host, force_head)?;

        let _lock = self.lock(name)?;

        debug!("Looking for installed versions");
        if find_installed_version(self.paths.install(), self.paths.bin(), name)?.is_some() {
            return Err(KrewError::AlreadyInstalled {
                name: name.to_string(),
            });
        }

        self.download_and_promote(name, &target)
    }

    /// Remove a plugin and its bin entry point
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_plugin_name(name)?;
        if name == KREW_PLUGIN_NAME {
            return Err(KrewError::ProtectedPlugin {
                name: name.to_string(),
            });
        }

        let _lock = self.lock(name)?;

        debug!("Finding installed version to delete");
        let link = self.paths.plugin_bin_path(name);
        let plugin_dir = self.paths.plugin_install_dir(name);
        let version = match find_installed_version(self.paths.install(), self.paths.bin(), name)? {
            Some(version) => version,
            None if self.is_dangling_link(&link, &plugin_dir) => {
                info!("Finishing interrupted removal of {}", name);
                return remove_link(&link);
            }
            None => {
                return Err(KrewError::NotInstalled {
                    name: name.to_string(),
                })
            }
        };

        info!("Deleting plugin {} version {}", name, version);
        debug!("Deleting path {}", plugin_dir.display());
        fs::remove_dir_all(&plugin_dir).map_err(|e| KrewError::fs("remove", &plugin_dir, e))?;
        remove_link(&link)
    }

    /// Take the plugin lock and repair whatever a crashed run left behind
    pub(crate) fn lock(&self, name: &str) -> Result<PluginLock> {
        self.paths.ensure_dirs()?;
        let lock = PluginLock::acquire(&self.paths, name)?;
        reclaim_interrupted(self.paths.install(), self.paths.bin(), name)?;
        Ok(lock)
    }

    fn is_dangling_link(&self, link: &Path, plugin_dir: &Path) -> bool {
        if cfg!(windows) {
            // copied launchers carry no target; any leftover belongs to us
            return link.exists();
        }
        read_link_target(link).is_some_and(|target| target.starts_with(plugin_dir) && !target.exists())
    }

    /// Fetch `target` into scratch space, promote it to the store and link it.
    ///
    /// The store is only touched by the final rename; the scratch directory
    /// is removed on every path out of this function.
    pub(crate) fn download_and_promote(&self, name: &str, target: &DownloadTarget) -> Result<InstallOutcome> {
        let scratch = ScratchDir::create(self.paths.plugin_download_dir(name))?;
        let fetched = scratch.path().join(FETCHED_DIR);
        let staged = scratch.path().join(STAGED_DIR);

        match &target.sha256 {
            Some(sha256) => download::get_with_sha256(
                &target.uri,
                &fetched,
                sha256,
                self.fetcher.as_ref(),
                &self.cancel,
            )?,
            None => download::get_insecure(&target.uri, &fetched, self.fetcher.as_ref(), &self.cancel)?,
        }

        apply_file_operations(name, &fetched, &staged, &target.files)?;

        let staged_bin = staged.join(&target.bin);
        if !staged_bin.is_file() {
            return Err(KrewError::InvalidManifest {
                name: name.to_string(),
                message: format!("declared binary '{}' is missing from the artifact", target.bin),
            });
        }

        let install_path = self.paths.plugin_install_dir(name).join(&target.version);
        promote(&staged, &install_path)?;

        let bin_path = self.paths.plugin_bin_path(name);
        if let Err(e) = create_or_update_link(&bin_path, &install_path.join(&target.bin)) {
            // Without an entry point the promoted version is unusable
            let _ = fs::remove_dir_all(&install_path);
            return Err(e);
        }

        info!("Installed {} version {}", name, target.version);
        Ok(InstallOutcome {
            version: target.version.clone(),
            install_path,
            bin_path,
        })
    }
}

/// Per-plugin download directory, removed when dropped
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            debug!("Removing leftover download dir {}", path.display());
            fs::remove_dir_all(&path).map_err(|e| KrewError::fs("remove", &path, e))?;
        }
        debug!("Creating download dir {}", path.display());
        fs::create_dir_all(&path).map_err(|e| KrewError::fs("create directory", &path, e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::download::FileFetcher;
    use crate::error::ErrorKind;
    use crate::index::{FileOperation, PlatformSpec, HEAD_VERSION};
    use crate::installation::list_installed;
    use crate::platform::Selector;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use sha2::{Digest, Sha256};
    use std::fs::File;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub temp: TempDir,
        pub paths: KrewPaths,
    }

    impl Fixture {
        pub fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let paths = KrewPaths::from_base(temp.path().join("krew"));
            Self { temp, paths }
        }

        pub fn installer(&self, host: Host) -> Installer {
            Installer::with_fetcher(self.paths.clone(), host, Box::new(FileFetcher))
        }

        /// Write a tar.gz holding `foo-v1/<name>` and return (uri, sha256)
        pub fn artifact(&self, file: &str, name: &str, content: &str) -> (String, String) {
            let path = self.temp.path().join(file);
            let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("foo-v1/{}", name), content.as_bytes())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();

            let sha = hex::encode(Sha256::digest(fs::read(&path).unwrap()));
            (path.to_string_lossy().to_string(), sha)
        }
    }

    pub(crate) fn linux() -> Host {
        Host::new("linux", "amd64")
    }

    pub(crate) fn manifest(uri: &str, sha256: &str, head: Option<&str>) -> PluginManifest {
        PluginManifest {
            name: "foo".to_string(),
            short_description: "foo it".to_string(),
            platforms: vec![PlatformSpec {
                selector: Selector {
                    os: vec!["linux".to_string()],
                    arch: vec!["amd64".to_string()],
                },
                uri: Some(uri.to_string()),
                head: head.map(str::to_string),
                sha256: Some(sha256.to_string()),
                bin: Some("foo".to_string()),
                files: vec![FileOperation::new("foo-*/foo", ".")],
            }],
            ..PluginManifest::default()
        }
    }

    fn dir_is_empty_or_missing(path: &Path) -> bool {
        fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    /// Run `op` on another thread while `foo`'s lock is held here and check it
    /// only completes once the lock is released
    fn waits_for_plugin_lock<F>(fx: &Fixture, op: F)
    where
        F: FnOnce(&Installer) + Send + 'static,
    {
        let held = PluginLock::acquire(&fx.paths, "foo").unwrap();
        let paths = fx.paths.clone();
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let installer = Installer::with_fetcher(paths, linux(), Box::new(FileFetcher));
            op(&installer);
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn install_waits_for_plugin_lock() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let m = manifest(&uri, &sha, None);

        waits_for_plugin_lock(&fx, move |installer| {
            installer.install(&m, false).unwrap();
        });
        assert!(fx.paths.plugin_bin_path("foo").exists());
    }

    #[test]
    fn remove_waits_for_plugin_lock() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        fx.installer(linux()).install(&manifest(&uri, &sha, None), false).unwrap();

        waits_for_plugin_lock(&fx, |installer| installer.remove("foo").unwrap());
        assert!(!fx.paths.plugin_install_dir("foo").exists());
    }

    #[test]
    fn upgrade_waits_for_plugin_lock() {
        let fx = Fixture::new();
        let (uri1, sha1) = fx.artifact("foo1.tgz", "foo", "v1");
        let (uri2, sha2) = fx.artifact("foo2.tgz", "foo", "v2");
        fx.installer(linux()).install(&manifest(&uri1, &sha1, None), false).unwrap();
        let m = manifest(&uri2, &sha2, None);

        waits_for_plugin_lock(&fx, move |installer| {
            installer.upgrade(&m).unwrap();
        });
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "v2");
    }

    #[test]
    fn cancelled_install_leaves_nothing_behind() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());

        installer.cancel_token().cancel();
        let err = installer.install(&manifest(&uri, &sha, None), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(installer.installed_version("foo").unwrap(), None);
        assert!(!fx.paths.plugin_bin_path("foo").exists());
        assert!(dir_is_empty_or_missing(&fx.paths.plugin_download_dir("foo")));
    }

    #[test]
    fn install_links_binary() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());

        let outcome = installer.install(&manifest(&uri, &sha, None), false).unwrap();
        assert_eq!(outcome.version, sha);
        assert_eq!(outcome.install_path, fx.paths.install().join("foo").join(&sha));
        assert_eq!(fs::read_to_string(outcome.install_path.join("foo")).unwrap(), "v1");
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "v1");
        assert!(dir_is_empty_or_missing(&fx.paths.plugin_download_dir("foo")));
    }

    #[test]
    fn install_twice_is_rejected() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());
        let first = installer.install(&manifest(&uri, &sha, None), false).unwrap();

        let (uri2, sha2) = fx.artifact("foo2.tgz", "foo", "v2");
        let err = installer.install(&manifest(&uri2, &sha2, None), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInstalled);
        assert_eq!(fs::read_to_string(first.install_path.join("foo")).unwrap(), "v1");
        assert!(!fx.paths.install().join("foo").join(&sha2).exists());
    }

    #[test]
    fn checksum_mismatch_leaves_store_empty() {
        let fx = Fixture::new();
        let (uri, _) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());

        let err = installer
            .install(&manifest(&uri, &"0".repeat(64), None), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(dir_is_empty_or_missing(fx.paths.install()));
        assert!(!fx.paths.plugin_bin_path("foo").exists());
        assert!(!fx.paths.plugin_download_dir("foo").exists());
    }

    #[test]
    fn failed_fetch_cleans_scratch_and_can_be_retried() {
        let fx = Fixture::new();
        let installer = fx.installer(linux());
        let missing = fx.temp.path().join("missing.tgz");

        let err = installer
            .install(&manifest(missing.to_str().unwrap(), &"0".repeat(64), None), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DownloadFailed);
        assert!(!fx.paths.plugin_download_dir("foo").exists());

        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        installer.install(&manifest(&uri, &sha, None), false).unwrap();
    }

    #[test]
    fn missing_binary_is_rejected() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let mut m = manifest(&uri, &sha, None);
        m.platforms[0].bin = Some("not-there".to_string());

        let err = fx.installer(linux()).install(&m, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidManifest);
        assert!(dir_is_empty_or_missing(fx.paths.install()));
    }

    #[test]
    fn no_matching_platform_creates_nothing() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");

        let err = fx
            .installer(Host::new("darwin", "arm64"))
            .install(&manifest(&uri, &sha, None), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingPlatform);
        assert!(!fx.paths.base().exists());
    }

    #[test]
    fn install_then_remove_then_list() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, None), false).unwrap();
        assert!(list_installed(fx.paths.install(), fx.paths.bin()).unwrap().contains_key("foo"));

        installer.remove("foo").unwrap();
        let installed = list_installed(fx.paths.install(), fx.paths.bin()).unwrap();
        assert!(!installed.contains_key("foo"));
        assert!(!fx.paths.plugin_bin_path("foo").exists());
        assert!(!fx.paths.plugin_install_dir("foo").exists());
    }

    #[test]
    fn remove_not_installed_changes_nothing() {
        let fx = Fixture::new();
        fx.paths.ensure_dirs().unwrap();
        let installer = fx.installer(linux());

        let err = installer.remove("foo").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);
        assert!(dir_is_empty_or_missing(fx.paths.install()));
        assert!(dir_is_empty_or_missing(fx.paths.bin()));
    }

    #[test]
    fn remove_krew_is_refused() {
        let fx = Fixture::new();
        let err = fx.installer(linux()).remove("krew").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtectedPlugin);
    }

    #[cfg(unix)]
    #[test]
    fn remove_finishes_interrupted_removal() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, None), false).unwrap();

        // simulate a crash between deleting the store entry and the link
        fs::remove_dir_all(fx.paths.plugin_install_dir("foo")).unwrap();
        installer.remove("foo").unwrap();
        assert!(fs::symlink_metadata(fx.paths.plugin_bin_path("foo")).is_err());

        let err = installer.remove("foo").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);
    }

    #[test]
    fn forced_head_installs_unverified() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let (head_uri, _) = fx.artifact("foo-head.tgz", "foo", "head");
        let installer = fx.installer(linux());

        let outcome = installer
            .install(&manifest(&uri, &sha, Some(&head_uri)), true)
            .unwrap();
        assert_eq!(outcome.version, HEAD_VERSION);
        assert_eq!(
            fs::read_to_string(fx.paths.install().join("foo/HEAD/foo")).unwrap(),
            "head"
        );
        assert_eq!(installer.installed_version("foo").unwrap().as_deref(), Some(HEAD_VERSION));
    }

    #[test]
    fn leftover_scratch_does_not_block_install() {
        let fx = Fixture::new();
        let scratch = fx.paths.plugin_download_dir("foo");
        fs::create_dir_all(scratch.join("fetched/garbage")).unwrap();

        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        fx.installer(linux()).install(&manifest(&uri, &sha, None), false).unwrap();
        assert!(!scratch.exists());
    }
}
