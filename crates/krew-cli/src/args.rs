use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "krew")]
#[command(about = "Package manager for kubectl plugins")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Krew root directory (default: $KREW_ROOT or <kubectl plugins path>/krew)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install plugins from the index
    Install {
        /// Plugin names
        names: Vec<String>,

        /// Build from the plugin's HEAD artifact instead of the pinned release
        #[arg(long)]
        head: bool,

        /// Install from a local manifest file instead of the index
        #[arg(long, conflicts_with = "names")]
        manifest: Option<PathBuf>,
    },

    /// Remove installed plugins
    #[command(visible_alias = "uninstall")]
    Remove {
        /// Plugin names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Upgrade installed plugins (all of them when no name is given)
    Upgrade {
        /// Plugin names
        names: Vec<String>,
    },

    /// List installed plugins
    List,

    /// Show details of a plugin from the index
    Info {
        /// Plugin name
        name: String,
    },

    /// Show krew version and paths
    Version,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g., download.timeout_secs)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (e.g., platform.arch)
        key: String,

        /// Value to set (empty clears an override)
        value: String,
    },

    /// List all config values
    List,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init,
}
