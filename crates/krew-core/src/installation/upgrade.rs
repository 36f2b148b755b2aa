//! Plugin upgrades
//!
//! The new version is staged next to the old one and linked before the old
//! one is deleted. A HEAD install is first renamed to `HEAD-OLD` so the new
//! HEAD can take its place; it is renamed back if staging fails.

use std::fs;

use tracing::{debug, info, warn};

use crate::environment::KREW_PLUGIN_NAME;
use crate::error::{KrewError, Result};
use crate::index::{validate_plugin_name, PluginManifest, HEAD_OLD_VERSION, HEAD_VERSION};
use crate::installation::install::Installer;
use crate::installation::store::find_installed_version;
use crate::installation::target::resolve_download_target;

/// Result of a successful upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    pub old_version: String,
    pub new_version: String,
}

impl Installer {
    /// Replace the installed version of a plugin with the one in `manifest`.
    ///
    /// Returns `AlreadyUpToDate` when the pinned version is unchanged; HEAD
    /// installs are always re-fetched.
    pub fn upgrade(&self, manifest: &PluginManifest) -> Result<UpgradeOutcome> {
        let name = manifest.name.as_str();
        validate_plugin_name(name)?;

        let _lock = self.lock(name)?;

        let old_version = find_installed_version(self.paths().install(), self.paths().bin(), name)?
            .ok_or_else(|| KrewError::NotInstalled {
                name: name.to_string(),
            })?;

        let target = resolve_download_target(manifest, self.host(), old_version == HEAD_VERSION)?;
        if target.version == old_version && !target.is_head() {
            return Err(KrewError::AlreadyUpToDate {
                name: name.to_string(),
            });
        }

        let plugin_dir = self.paths().plugin_install_dir(name);
        let mut old_dir = plugin_dir.join(&old_version);
        let moved_aside = target.version == old_version;
        if moved_aside {
            let aside = plugin_dir.join(HEAD_OLD_VERSION);
            debug!("Moving {} to {}", old_dir.display(), aside.display());
            fs::rename(&old_dir, &aside).map_err(|e| KrewError::fs("move", &old_dir, e))?;
            old_dir = aside;
        }

        let outcome = match self.download_and_promote(name, &target) {
            Ok(outcome) => outcome,
            Err(e) => {
                if moved_aside {
                    let head = plugin_dir.join(HEAD_VERSION);
                    if let Err(restore) = fs::rename(&old_dir, &head) {
                        warn!("Could not restore {}: {}", head.display(), restore);
                    }
                }
                return Err(e);
            }
        };

        if self.is_running_from(name, &old_version) {
            // A running executable cannot be deleted on Windows; the next
            // operation on this plugin reclaims it.
            info!("Keeping running version {} of {} for now", old_version, name);
        } else {
            debug!("Deleting old version {}", old_dir.display());
            fs::remove_dir_all(&old_dir).map_err(|e| KrewError::fs("remove", &old_dir, e))?;
        }

        info!("Upgraded {} from {} to {}", name, old_version, outcome.version);
        Ok(UpgradeOutcome {
            old_version,
            new_version: outcome.version,
        })
    }

    fn is_running_from(&self, name: &str, version: &str) -> bool {
        cfg!(windows) && name == KREW_PLUGIN_NAME && self.executed_version() == Some(version)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::index::{HEAD_OLD_VERSION, HEAD_VERSION};
    use crate::installation::install::tests::{linux, manifest, Fixture};
    use crate::installation::link::pending_link_path;
    use std::fs;

    #[test]
    fn upgrade_replaces_pinned_version() {
        let fx = Fixture::new();
        let (uri1, sha1) = fx.artifact("foo1.tgz", "foo", "v1");
        let (uri2, sha2) = fx.artifact("foo2.tgz", "foo", "v2");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri1, &sha1, None), false).unwrap();

        let outcome = installer.upgrade(&manifest(&uri2, &sha2, None)).unwrap();
        assert_eq!(outcome.old_version, sha1);
        assert_eq!(outcome.new_version, sha2);
        assert!(!fx.paths.install().join("foo").join(&sha1).exists());
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "v2");
    }

    #[test]
    fn same_version_is_up_to_date() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, None), false).unwrap();

        let err = installer.upgrade(&manifest(&uri, &sha, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyUpToDate);
        assert!(fx.paths.install().join("foo").join(&sha).exists());
    }

    #[test]
    fn upgrade_requires_installation() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "v1");
        let err = fx.installer(linux()).upgrade(&manifest(&uri, &sha, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);
    }

    #[test]
    fn failed_upgrade_keeps_old_version() {
        let fx = Fixture::new();
        let (uri1, sha1) = fx.artifact("foo1.tgz", "foo", "v1");
        let (uri2, _) = fx.artifact("foo2.tgz", "foo", "v2");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri1, &sha1, None), false).unwrap();

        let err = installer
            .upgrade(&manifest(&uri2, &"f".repeat(64), None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(installer.installed_version("foo").unwrap(), Some(sha1.clone()));
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "v1");
        assert!(!fx.paths.plugin_download_dir("foo").exists());
    }

    #[test]
    fn failed_link_swap_keeps_old_entry_point() {
        let fx = Fixture::new();
        let (uri1, sha1) = fx.artifact("foo1.tgz", "foo", "v1");
        let (uri2, sha2) = fx.artifact("foo2.tgz", "foo", "v2");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri1, &sha1, None), false).unwrap();

        let pending = pending_link_path(&fx.paths.plugin_bin_path("foo"));
        fs::create_dir_all(pending.join("busy")).unwrap();

        assert!(installer.upgrade(&manifest(&uri2, &sha2, None)).is_err());
        assert_eq!(installer.installed_version("foo").unwrap(), Some(sha1.clone()));
        assert!(!fx.paths.install().join("foo").join(&sha2).exists());
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "v1");
    }

    #[test]
    fn head_upgrade_swaps_through_head_old() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "pinned");
        let (head1, _) = fx.artifact("head1.tgz", "foo", "head1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, Some(&head1)), true).unwrap();

        let (head2, _) = fx.artifact("head2.tgz", "foo", "head2");
        let outcome = installer.upgrade(&manifest(&uri, &sha, Some(&head2))).unwrap();
        assert_eq!(outcome.old_version, HEAD_VERSION);
        assert_eq!(outcome.new_version, HEAD_VERSION);

        let plugin_dir = fx.paths.plugin_install_dir("foo");
        assert_eq!(fs::read_to_string(plugin_dir.join("HEAD/foo")).unwrap(), "head2");
        assert!(!plugin_dir.join(HEAD_OLD_VERSION).exists());
    }

    #[test]
    fn failed_head_upgrade_restores_old_head() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "pinned");
        let (head1, _) = fx.artifact("head1.tgz", "foo", "head1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, Some(&head1)), true).unwrap();

        let missing = fx.temp.path().join("gone.tgz");
        let err = installer
            .upgrade(&manifest(&uri, &sha, Some(missing.to_str().unwrap())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DownloadFailed);

        let plugin_dir = fx.paths.plugin_install_dir("foo");
        assert_eq!(fs::read_to_string(plugin_dir.join("HEAD/foo")).unwrap(), "head1");
        assert!(!plugin_dir.join(HEAD_OLD_VERSION).exists());
        assert_eq!(fs::read_to_string(fx.paths.plugin_bin_path("foo")).unwrap(), "head1");
    }

    #[test]
    fn interrupted_head_upgrade_is_recovered() {
        let fx = Fixture::new();
        let (uri, sha) = fx.artifact("foo.tgz", "foo", "pinned");
        let (head1, _) = fx.artifact("head1.tgz", "foo", "head1");
        let installer = fx.installer(linux());
        installer.install(&manifest(&uri, &sha, Some(&head1)), true).unwrap();

        // crash right after moving HEAD aside
        let plugin_dir = fx.paths.plugin_install_dir("foo");
        fs::rename(plugin_dir.join(HEAD_VERSION), plugin_dir.join(HEAD_OLD_VERSION)).unwrap();

        let (head2, _) = fx.artifact("head2.tgz", "foo", "head2");
        installer.upgrade(&manifest(&uri, &sha, Some(&head2))).unwrap();
        assert_eq!(fs::read_to_string(plugin_dir.join("HEAD/foo")).unwrap(), "head2");
        assert!(!plugin_dir.join(HEAD_OLD_VERSION).exists());
    }
}
