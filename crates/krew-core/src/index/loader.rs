//! Manifest loader
//!
//! Parses plugin manifests from `index/plugins/*.yaml`

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{KrewError, Result};
use crate::index::types::PluginManifest;
use crate::index::validate_plugin_name;

const PLUGINS_DIR: &str = "plugins";
const MANIFEST_EXTENSION: &str = "yaml";

/// Directory holding the manifests of an index
pub fn plugins_dir(index_dir: &Path) -> PathBuf {
    index_dir.join(PLUGINS_DIR)
}

/// Whether the index has been fetched at least once
pub fn is_initialized(index_dir: &Path) -> bool {
    plugins_dir(index_dir).is_dir()
}

/// Parse a single manifest file
pub fn load_manifest_file(path: &Path) -> Result<PluginManifest> {
    let content = fs::read_to_string(path).map_err(|e| KrewError::fs("read manifest", path, e))?;
    let manifest: PluginManifest =
        serde_yaml::from_str(&content).map_err(|e| KrewError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    validate_plugin_name(&manifest.name)?;
    Ok(manifest)
}

/// Load the manifest of one plugin by name
pub fn load_plugin(index_dir: &Path, name: &str) -> Result<PluginManifest> {
    validate_plugin_name(name)?;

    if !is_initialized(index_dir) {
        return Err(KrewError::IndexNotInitialized {
            path: index_dir.to_path_buf(),
        });
    }

    let path = plugins_dir(index_dir).join(format!("{}.{}", name, MANIFEST_EXTENSION));
    if !path.is_file() {
        return Err(KrewError::PluginNotFound {
            name: name.to_string(),
        });
    }

    let manifest = load_manifest_file(&path)?;
    if manifest.name != name {
        return Err(KrewError::InvalidManifest {
            name: name.to_string(),
            message: format!("manifest declares name '{}'", manifest.name),
        });
    }

    Ok(manifest)
}

/// Load every manifest in the index, sorted by name.
///
/// Manifests that fail to parse are skipped.
pub fn load_plugins(index_dir: &Path) -> Result<Vec<PluginManifest>> {
    if !is_initialized(index_dir) {
        return Err(KrewError::IndexNotInitialized {
            path: index_dir.to_path_buf(),
        });
    }

    let dir = plugins_dir(index_dir);
    let entries = fs::read_dir(&dir).map_err(|e| KrewError::fs("read directory", &dir, e))?;

    let mut manifests = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| KrewError::fs("read directory", &dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION) {
            continue;
        }

        match load_manifest_file(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!("Skipping manifest {}: {}", path.display(), e),
        }
    }

    manifests.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Loaded {} manifests from {}", manifests.len(), dir.display());
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(index: &Path, file: &str, content: &str) {
        let dir = plugins_dir(index);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn uninitialized_index() {
        let temp = TempDir::new().unwrap();
        let err = load_plugin(temp.path(), "foo").unwrap_err();
        assert!(matches!(err, KrewError::IndexNotInitialized { .. }));
        assert!(!is_initialized(temp.path()));
    }

    #[test]
    fn load_plugin_by_name() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "foo.yaml", "name: foo\nshortDescription: foo it\n");

        let manifest = load_plugin(temp.path(), "foo").unwrap();
        assert_eq!(manifest.short_description, "foo it");
    }

    #[test]
    fn missing_plugin() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "foo.yaml", "name: foo\n");

        let err = load_plugin(temp.path(), "bar").unwrap_err();
        assert!(matches!(err, KrewError::PluginNotFound { .. }));
    }

    #[test]
    fn name_must_match_file() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "foo.yaml", "name: bar\n");

        let err = load_plugin(temp.path(), "foo").unwrap_err();
        assert!(matches!(err, KrewError::InvalidManifest { .. }));
    }

    #[test]
    fn load_all_skips_broken_manifests() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "zeta.yaml", "name: zeta\n");
        write_manifest(temp.path(), "alpha.yaml", "name: alpha\n");
        write_manifest(temp.path(), "broken.yaml", "name: [unterminated\n");
        write_manifest(temp.path(), "README.md", "# index\n");

        let manifests = load_plugins(temp.path()).unwrap();
        let names: Vec<_> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
