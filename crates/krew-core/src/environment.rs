//! Path resolution
//!
//! Computes the on-disk layout from the process environment, detects whether
//! krew runs as a kubectl plugin, and finds the installed version of the
//! running executable.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{KrewError, Result};

/// Overrides the kubectl plugins directory (legacy kubectl behaviour)
pub const PLUGINS_PATH_ENV: &str = "KUBECTL_PLUGINS_PATH";
/// Set by kubectl when it invokes a plugin
pub const PLUGIN_DESCRIPTOR_ENV: &str = "KUBECTL_PLUGINS_DESCRIPTOR_NAME";
/// Replaces the krew base directory directly
pub const KREW_ROOT_ENV: &str = "KREW_ROOT";
const XDG_DATA_HOME_ENV: &str = "XDG_DATA_HOME";

/// Name under which krew itself is installed in the store
pub const KREW_PLUGIN_NAME: &str = "krew";

/// On-disk layout of a krew installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrewPaths {
    base: PathBuf,
    index: PathBuf,
    install: PathBuf,
    download: PathBuf,
    bin: PathBuf,
    locks: PathBuf,
}

impl KrewPaths {
    /// Derive every directory from a base directory
    pub fn from_base(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            index: base.join("index"),
            install: base.join("store"),
            download: base.join("download"),
            bin: base.join("bin"),
            locks: base.join("locks"),
            base,
        }
    }

    /// Resolve paths from `NAME=value` environment assignments
    pub fn from_environ<S: AsRef<str>>(environ: &[S]) -> Result<Self> {
        let envs = parse_envs(environ);

        if let Some(root) = envs.get(KREW_ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::from_base(root));
        }

        let plugins_path = kubectl_plugins_path(&envs)?;
        Ok(Self::from_base(plugins_path.join(KREW_PLUGIN_NAME)))
    }

    /// Resolve paths from the current process environment
    pub fn from_process_env() -> Result<Self> {
        Self::from_environ(&current_environ())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn index(&self) -> &Path {
        &self.index
    }

    pub fn install(&self) -> &Path {
        &self.install
    }

    pub fn download(&self) -> &Path {
        &self.download
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    pub fn locks(&self) -> &Path {
        &self.locks
    }

    /// Directory holding every installed version of a plugin
    pub fn plugin_install_dir(&self, name: &str) -> PathBuf {
        self.install.join(name)
    }

    /// Scratch directory used while downloading a plugin
    pub fn plugin_download_dir(&self, name: &str) -> PathBuf {
        self.download.join(name)
    }

    /// Entry point exposed on the search path for a plugin
    pub fn plugin_bin_path(&self, name: &str) -> PathBuf {
        self.bin.join(bin_file_name(name))
    }

    pub fn plugin_lock_path(&self, name: &str) -> PathBuf {
        self.locks.join(format!("{}.lock", name))
    }

    /// Create all directories (`mkdir -p` semantics)
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.base,
            &self.index,
            &self.install,
            &self.download,
            &self.bin,
            &self.locks,
        ] {
            debug!("Ensure creating dir: {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| KrewError::fs("create directory", dir, e))?;
        }
        Ok(())
    }
}

/// File name of a plugin's entry point in the bin directory
pub fn bin_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Parse `NAME=value` strings; the value may itself contain `=`
pub fn parse_envs<S: AsRef<str>>(environ: &[S]) -> HashMap<String, String> {
    environ
        .iter()
        .filter_map(|entry| {
            let (name, value) = entry.as_ref().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Snapshot of the process environment as `NAME=value` strings
pub fn current_environ() -> Vec<String> {
    std::env::vars_os()
        .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
        .collect()
}

/// True when kubectl invoked us as a plugin. An empty value still counts.
pub fn is_plugin<S: AsRef<str>>(environ: &[S]) -> bool {
    parse_envs(environ).contains_key(PLUGIN_DESCRIPTOR_ENV)
}

fn kubectl_plugins_path(envs: &HashMap<String, String>) -> Result<PathBuf> {
    if let Some(path) = envs.get(PLUGINS_PATH_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    if let Some(data_home) = envs
        .get(XDG_DATA_HOME_ENV)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
    {
        return Ok(data_home.join("kubectl").join("plugins"));
    }

    Ok(home_dir(envs)?.join(".kube").join("plugins"))
}

fn home_dir(envs: &HashMap<String, String>) -> Result<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    if let Some(home) = envs.get(var).map(PathBuf::from).filter(|p| p.is_absolute()) {
        return Ok(home);
    }
    dirs::home_dir().ok_or(KrewError::HomeNotFound)
}

/// Resolve symlinks the way the OS does
pub fn realpath(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path)
}

/// Find the installed krew version the given executable belongs to.
///
/// Returns `Some(version)` when `exe_path` resolves to
/// `<install_dir>/krew/<version>/<...>`; extra trailing segments after the
/// version are allowed.
pub fn executed_version<F>(install_dir: &Path, exe_path: &Path, resolve: F) -> Result<Option<String>>
where
    F: Fn(&Path) -> io::Result<PathBuf>,
{
    let exe = resolve(exe_path).map_err(|e| KrewError::fs("resolve path", exe_path, e))?;
    let install = resolve(install_dir).unwrap_or_else(|_| install_dir.to_path_buf());

    let exe = normalized_components(&exe);
    let prefix = normalized_components(&install.join(KREW_PLUGIN_NAME));

    if exe.len() < prefix.len() + 2 || exe[..prefix.len()] != prefix[..] {
        return Ok(None);
    }

    let version = &exe[prefix.len()];
    debug!("Running krew version {} from {:?}", version, exe_path);
    Ok(Some(version.clone()))
}

fn normalized_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().to_string()),
            _ => None,
        })
        .map(|part| if cfg!(windows) { part.to_lowercase() } else { part })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(p: &Path) -> io::Result<PathBuf> {
        Ok(p.to_path_buf())
    }

    fn store() -> PathBuf {
        PathBuf::from("/plugins/store")
    }

    #[test]
    fn parse_envs_splits_on_first_equals() {
        let envs = parse_envs(&["TERM=A", "CC=en", "EMPTY=", "FOO=A=B", "BROKEN"]);
        assert_eq!(envs.get("TERM").map(String::as_str), Some("A"));
        assert_eq!(envs.get("CC").map(String::as_str), Some("en"));
        assert_eq!(envs.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(envs.get("FOO").map(String::as_str), Some("A=B"));
        assert!(!envs.contains_key("BROKEN"));
    }

    #[test]
    fn default_path_uses_home() {
        let paths = KrewPaths::from_environ(&["HOME=/home/user"]).unwrap();
        assert_eq!(paths.base(), Path::new("/home/user/.kube/plugins/krew"));
        assert_eq!(paths.install(), Path::new("/home/user/.kube/plugins/krew/store"));
        assert_eq!(paths.download(), Path::new("/home/user/.kube/plugins/krew/download"));
        assert_eq!(paths.index(), Path::new("/home/user/.kube/plugins/krew/index"));
        assert_eq!(paths.bin(), Path::new("/home/user/.kube/plugins/krew/bin"));
    }

    #[test]
    fn manual_plugin_path_wins() {
        let paths =
            KrewPaths::from_environ(&["KUBECTL_PLUGINS_PATH=/foobar", "HOME=/home/user"]).unwrap();
        assert_eq!(paths.base(), Path::new("/foobar/krew"));
    }

    #[test]
    fn xdg_data_dirs_is_ignored() {
        let paths = KrewPaths::from_environ(&["XDG_DATA_DIRS=/", "HOME=/home/user"]).unwrap();
        assert_eq!(paths.base(), Path::new("/home/user/.kube/plugins/krew"));
    }

    #[test]
    fn xdg_data_home_is_used() {
        let paths =
            KrewPaths::from_environ(&["XDG_DATA_HOME=/data", "HOME=/home/user"]).unwrap();
        assert_eq!(paths.base(), Path::new("/data/kubectl/plugins/krew"));
    }

    #[test]
    fn krew_root_replaces_base() {
        let paths = KrewPaths::from_environ(&["KREW_ROOT=/opt/krew", "HOME=/home/user"]).unwrap();
        assert_eq!(paths.base(), Path::new("/opt/krew"));
        assert_eq!(paths.locks(), Path::new("/opt/krew/locks"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = KrewPaths::from_base(temp.path().join("krew"));
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.install().is_dir());
        assert!(paths.download().is_dir());
        assert!(paths.bin().is_dir());
        assert!(paths.locks().is_dir());
    }

    #[test]
    fn is_plugin_checks_presence_not_value() {
        assert!(is_plugin(&["KUBECTL_PLUGINS_DESCRIPTOR_NAME=abc"]));
        assert!(is_plugin(&["KUBECTL_PLUGINS_DESCRIPTOR_NAME="]));
        assert!(!is_plugin(&["XXXXXXXX=abc"]));
    }

    #[test]
    fn executed_version_in_krew_path() {
        let exe = PathBuf::from("/plugins/store/krew/deadbeef/krew.exe");
        let version = executed_version(&store(), &exe, identity).unwrap();
        assert_eq!(version.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn executed_version_other_plugin() {
        let exe = PathBuf::from("/plugins/store/NOTKREW/deadbeef/krew.exe");
        assert_eq!(executed_version(&store(), &exe, identity).unwrap(), None);
    }

    #[test]
    fn executed_version_longer_path() {
        let exe = PathBuf::from("/plugins/store/krew/deadbeef/foo/krew.exe");
        let version = executed_version(&store(), &exe, identity).unwrap();
        assert_eq!(version.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn executed_version_outside_store() {
        let exe = PathBuf::from("/krew.exe");
        assert_eq!(executed_version(&store(), &exe, identity).unwrap(), None);
    }

    #[test]
    fn executed_version_follows_symlinks() {
        let temp = tempfile::TempDir::new().unwrap();
        let install = temp.path().join("store");
        let version_dir = install.join("krew").join("cafe");
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(version_dir.join("krew"), "#!/bin/sh").unwrap();

        #[cfg(unix)]
        {
            let link = temp.path().join("krew-link");
            std::os::unix::fs::symlink(version_dir.join("krew"), &link).unwrap();
            let version = executed_version(&install, &link, realpath).unwrap();
            assert_eq!(version.as_deref(), Some("cafe"));
        }
    }
}
