//! Plugin manifest type definitions
//!
//! Types for the plugin manifests stored in the local index
//! (`index/plugins/<name>.yaml`).

use serde::{Deserialize, Deserializer, Serialize};

use crate::platform::Selector;

/// Version sentinel meaning "latest, unverified"
pub const HEAD_VERSION: &str = "HEAD";
/// Version directory of a HEAD install pending cleanup during an upgrade
pub const HEAD_OLD_VERSION: &str = "HEAD-OLD";

/// Plugin manifest (one file per plugin in the index)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Plugin name (unique, a single path segment)
    pub name: String,
    /// One-line description
    #[serde(default)]
    pub short_description: String,
    /// Long description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Homepage URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Notes shown to the user after installation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,
    /// Canonical version; `HEAD` marks a plugin without pinned artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Artifact variants, in declaration order
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
}

impl PluginManifest {
    /// Whether the canonical version of this plugin is HEAD
    pub fn is_head(&self) -> bool {
        self.version.as_deref() == Some(HEAD_VERSION)
    }
}

/// One downloadable artifact variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// OS/architecture match rule
    #[serde(flatten)]
    pub selector: Selector,
    /// Pinned artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Unpinned "latest" artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    /// Lowercase hex sha256 of the pinned artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Primary executable, relative to the version directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<String>,
    /// Post-download file operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileOperation>,
}

impl PlatformSpec {
    /// File operations to apply; moves everything when none are declared
    pub fn file_operations(&self) -> Vec<FileOperation> {
        if self.files.is_empty() {
            vec![FileOperation::new("*", ".")]
        } else {
            self.files.clone()
        }
    }

    /// Primary executable path, defaulting to the plugin name
    pub fn bin_path(&self, plugin_name: &str) -> String {
        self.bin
            .clone()
            .unwrap_or_else(|| crate::environment::bin_file_name(plugin_name))
    }
}

/// Moves files matched in the extracted artifact into the version directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    /// Glob relative to the extracted artifact
    pub from: String,
    /// Destination directory relative to the version directory
    #[serde(default = "default_to")]
    pub to: String,
    /// Keep the matched path below its first N components instead of only the basename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<usize>,
    /// New file name; the glob must then match exactly one entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

fn default_to() -> String {
    ".".to_string()
}

impl FileOperation {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            strip: None,
            rename: None,
        }
    }
}

impl Serialize for Selector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        if !self.os.is_empty() {
            map.serialize_entry("os", &self.os)?;
        }
        if !self.arch.is_empty() {
            map.serialize_entry("arch", &self.arch)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            os: Option<OneOrMany>,
            #[serde(default)]
            arch: Option<OneOrMany>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Selector {
            os: raw.os.map(OneOrMany::into_vec).unwrap_or_default(),
            arch: raw.arch.map(OneOrMany::into_vec).unwrap_or_default(),
        })
    }
}

/// A selector value written either as `linux` or `[linux, darwin]`
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value.to_lowercase()],
            Self::Many(values) => values.into_iter().map(|v| v.to_lowercase()).collect(),
        }
    }
}
