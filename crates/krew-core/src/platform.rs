//! Host platform detection and artifact selection
//!
//! Manifests describe artifacts with Go-style OS/architecture names
//! (`linux`, `darwin`, `windows` / `amd64`, `arm64`, `386`). The running host
//! is mapped onto the same vocabulary so selectors can be matched directly.

use std::collections::HashMap;

use crate::environment::parse_envs;
use crate::index::{PlatformSpec, PluginManifest};

/// Overrides the detected host OS
pub const OS_OVERRIDE_ENV: &str = "KREW_OS";
/// Overrides the detected host architecture
pub const ARCH_OVERRIDE_ENV: &str = "KREW_ARCH";

/// Host descriptor used for platform selection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub os: String,
    pub arch: String,
}

impl Host {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for
    pub fn current() -> Self {
        Self::new(
            os_name(std::env::consts::OS),
            arch_name(std::env::consts::ARCH),
        )
    }

    /// The current platform, with `KREW_OS` / `KREW_ARCH` overrides applied
    pub fn from_environ<S: AsRef<str>>(environ: &[S]) -> Self {
        Self::current().with_overrides(&parse_envs(environ))
    }

    pub(crate) fn with_overrides(mut self, envs: &HashMap<String, String>) -> Self {
        if let Some(os) = envs.get(OS_OVERRIDE_ENV).filter(|v| !v.is_empty()) {
            self.os = os.clone();
        }
        if let Some(arch) = envs.get(ARCH_OVERRIDE_ENV).filter(|v| !v.is_empty()) {
            self.arch = arch.clone();
        }
        self
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl std::str::FromStr for Host {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            _ => Err(format!("Invalid platform '{}', expected <os>/<arch>", s)),
        }
    }
}

fn os_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// OS/architecture match rule of a platform variant.
///
/// An empty list matches any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub os: Vec<String>,
    pub arch: Vec<String>,
}

impl Selector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, host: &Host) -> bool {
        allows(&self.os, &host.os) && allows(&self.arch, &host.arch)
    }

    /// 2 = OS and arch constrained, 1 = one of them, 0 = match-any
    pub fn specificity(&self) -> u8 {
        u8::from(!self.os.is_empty()) + u8::from(!self.arch.is_empty())
    }
}

fn allows(values: &[String], value: &str) -> bool {
    values.is_empty() || values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Pick the variant of `manifest` that applies to `host`.
///
/// The most specific matching selector wins; among equally specific matches
/// the one declared first wins.
pub fn select<'a>(manifest: &'a PluginManifest, host: &Host) -> Option<&'a PlatformSpec> {
    let mut best: Option<&PlatformSpec> = None;
    for spec in manifest.platforms.iter().filter(|p| p.selector.matches(host)) {
        match best {
            Some(current) if current.selector.specificity() >= spec.selector.specificity() => {}
            _ => best = Some(spec),
        }
    }
    best
}
