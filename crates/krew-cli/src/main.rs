use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use krew_core::environment::{current_environ, realpath};
use krew_core::{
    executed_version, is_plugin, list_installed, load_manifest_file, load_plugin, select, Config,
    ErrorKind, Installer, KrewError, KrewPaths, PluginManifest, Result,
};

mod args;
use args::{Cli, Commands, ConfigAction, Shell};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Some(Commands::Completions { shell }) => {
            handle_completions(shell);
            Ok(())
        }
        Some(command) => run(command, cli.root.as_deref(), cli.quiet),
        None => {
            Cli::command().print_help().ok();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "krew", &mut io::stdout());
}

fn run(command: Commands, root: Option<&Path>, quiet: bool) -> Result<()> {
    let environ = current_environ();
    let paths = match root {
        Some(root) => KrewPaths::from_base(root),
        None => KrewPaths::from_environ(&environ)?,
    };
    debug!("Using krew root {}", paths.base().display());
    if !is_plugin(&environ) {
        debug!("Not running as a kubectl plugin");
    }

    let config = Config::load(paths.base())?;
    if let Commands::Config { action } = command {
        return handle_config(action, paths.base());
    }

    let host = config.host(&environ);
    let running = running_version(&paths);
    let installer = Installer::new(paths, host, &config)?.with_executed_version(running);

    match command {
        Commands::Install {
            names,
            head,
            manifest,
        } => handle_install(&installer, &names, manifest.as_deref(), head, quiet),
        Commands::Remove { names } => handle_remove(&installer, &names, quiet),
        Commands::Upgrade { names } => handle_upgrade(&installer, &names, quiet),
        Commands::List => handle_list(&installer),
        Commands::Info { name } => handle_info(&installer, &name),
        Commands::Version => handle_version(&installer),
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn running_version(paths: &KrewPaths) -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    match executed_version(paths.install(), &exe, realpath) {
        Ok(version) => version,
        Err(e) => {
            warn!("Could not tell which krew version is running: {}", e);
            None
        }
    }
}

fn handle_install(
    installer: &Installer,
    names: &[String],
    manifest: Option<&Path>,
    head: bool,
    quiet: bool,
) -> Result<()> {
    let manifests: Vec<PluginManifest> = match manifest {
        Some(file) => vec![load_manifest_file(file)?],
        None => names
            .iter()
            .map(|name| load_plugin(installer.paths().index(), name))
            .collect::<Result<_>>()?,
    };

    if manifests.is_empty() {
        Cli::command().print_help().ok();
        return Ok(());
    }

    for manifest in &manifests {
        match installer.install(manifest, head) {
            Ok(outcome) => {
                if !quiet {
                    println!(
                        "{} Installed {} ({})",
                        "[OK]".green(),
                        manifest.name,
                        short_version(&outcome.version)
                    );
                    if let Some(caveats) = &manifest.caveats {
                        print_caveats(caveats);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::AlreadyInstalled => {
                println!("{} {}", "[SKIP]".yellow(), e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn handle_remove(installer: &Installer, names: &[String], quiet: bool) -> Result<()> {
    for name in names {
        installer.remove(name)?;
        if !quiet {
            println!("{} Removed {}", "[OK]".green(), name);
        }
    }
    Ok(())
}

fn handle_upgrade(installer: &Installer, names: &[String], quiet: bool) -> Result<()> {
    let upgrade_all = names.is_empty();
    let names: Vec<String> = if upgrade_all {
        list_installed(installer.paths().install(), installer.paths().bin())?
            .into_keys()
            .collect()
    } else {
        names.to_vec()
    };

    let mut failure: Option<KrewError> = None;
    for name in &names {
        let manifest = match load_plugin(installer.paths().index(), name) {
            Ok(manifest) => manifest,
            Err(e) if upgrade_all && e.kind() == ErrorKind::PluginNotFound => {
                warn!("Skipping {}: no longer in the index", name);
                continue;
            }
            Err(e) => return Err(e),
        };

        match installer.upgrade(&manifest) {
            Ok(outcome) => {
                if !quiet {
                    println!(
                        "{} Upgraded {} ({} -> {})",
                        "[OK]".green(),
                        name,
                        short_version(&outcome.old_version),
                        short_version(&outcome.new_version)
                    );
                }
            }
            Err(e) if e.kind() == ErrorKind::AlreadyUpToDate => {
                if !quiet {
                    println!("{} {} is up to date", "[SKIP]".yellow(), name);
                }
            }
            Err(e) if upgrade_all => {
                eprintln!("{} {}", "[ERROR]".red().bold(), e);
                failure.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_list(installer: &Installer) -> Result<()> {
    let installed = list_installed(installer.paths().install(), installer.paths().bin())?;
    if installed.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    let width = installed.keys().map(String::len).max().unwrap_or(0);
    let header = format!("{:width$}", "PLUGIN", width = width);
    println!("{}  {}", header.bold(), "VERSION".bold());
    for (name, version) in &installed {
        let name = format!("{:width$}", name, width = width);
        println!("{}  {}", name.cyan(), version);
    }
    Ok(())
}

fn handle_info(installer: &Installer, name: &str) -> Result<()> {
    let manifest = load_plugin(installer.paths().index(), name)?;

    println!("{}: {}", "NAME".bold(), manifest.name);
    if let Some(version) = &manifest.version {
        println!("{}: {}", "VERSION".bold(), version);
    }
    if let Some(homepage) = &manifest.homepage {
        println!("{}: {}", "HOMEPAGE".bold(), homepage);
    }
    match select(&manifest, installer.host()) {
        Some(platform) => {
            if let Some(uri) = &platform.uri {
                println!("{}: {}", "URI".bold(), uri);
            }
            if let Some(sha) = &platform.sha256 {
                println!("{}: {}", "SHA256".bold(), sha);
            }
            if let Some(head) = &platform.head {
                println!("{}: {}", "HEAD".bold(), head);
            }
        }
        None => println!(
            "{}: none for {}",
            "PLATFORM".bold(),
            installer.host().to_string().as_str().yellow()
        ),
    }
    let description = manifest
        .description
        .as_deref()
        .unwrap_or(&manifest.short_description);
    println!("{}:\n{}", "DESCRIPTION".bold(), description.trim_end());
    if let Some(caveats) = &manifest.caveats {
        println!("{}:", "CAVEATS".bold());
        print_caveats(caveats);
    }
    Ok(())
}

fn handle_version(installer: &Installer) -> Result<()> {
    let paths = installer.paths();
    let rows = [
        ("Version", env!("CARGO_PKG_VERSION").to_string()),
        ("BasePath", paths.base().display().to_string()),
        ("IndexPath", paths.index().display().to_string()),
        ("InstallPath", paths.install().display().to_string()),
        ("DownloadPath", paths.download().display().to_string()),
        ("BinPath", paths.bin().display().to_string()),
        ("DetectedPlatform", installer.host().to_string()),
    ];
    for (key, value) in rows {
        println!("{}{}", format!("{:18}", key).cyan(), value);
    }
    Ok(())
}

fn handle_config(action: ConfigAction, base_dir: &Path) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load(base_dir)?;
            match config.get(&key) {
                Some(value) => {
                    println!("{}", value);
                }
                None => {
                    return Err(KrewError::ConfigKeyNotFound { key });
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(base_dir)?;
            config.set(&key, &value)?;
            config.save(base_dir)?;
            println!("{} {} = {}", "Set:".green(), key, value);
        }
        ConfigAction::List => {
            let config = Config::load(base_dir)?;
            for (key, value) in config.list() {
                println!("{} = {}", key.cyan(), value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::path(base_dir).display());
        }
        ConfigAction::Init => {
            let path = Config::init(base_dir)?;
            println!("{} {}", "Initialized:".green(), path.display());
        }
    }

    Ok(())
}

/// Checksums are long; show a prefix the way `git` shows commits
fn short_version(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}

fn print_caveats(caveats: &str) {
    println!("{}", "Caveats:".yellow());
    for line in caveats.trim_end().lines() {
        println!("  | {}", line);
    }
}
