//! Command-line interface for the ModHost mod loader.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modhost_core::config::{self, resolve_path};
use modhost_core::discovery;
use modhost_core::sdk::config::CONFIG_FILE_NAME;
use modhost_core::sdk::LoaderConfig;
use modhost_core::{ArtifactCache, ModHost};
use tracing::{info, warn};

/// ModHost - load, compile and hot-reload mods.
#[derive(Parser, Debug)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Working directory relative paths are resolved against.
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,

    /// Loader configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Load all mods and keep them running until Ctrl-C.
    Run,
    /// Load all mods, print the summary and stop them again.
    Check,
    /// List the mods found under the mods directory.
    List,
    /// Artifact cache maintenance.
    Cache {
        #[command(subcommand)]
        cache_cmd: CacheCommand,
    },
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Show entry count and size.
    Info,
    /// Delete every cache entry.
    Clear,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let config_path = resolve_path(
        &workdir,
        args.config
            .as_deref()
            .unwrap_or_else(|| Path::new(CONFIG_FILE_NAME)),
    );

    match args.command {
        Command::Init { force } => run_init(&config_path, force),
        Command::Run => run_mods(&workdir, &config_path).await,
        Command::Check => run_check(&workdir, &config_path),
        Command::List => run_list(&workdir, &config_path),
        Command::Cache { cache_cmd } => run_cache_cmd(&workdir, &config_path, cache_cmd),
    }
}

fn init_logging(verbose: bool) {
    // JSON logs for containers and log shippers
    let json_logging = std::env::var("MODHOST_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "modhost=debug" } else { "modhost=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(default_level)
                .add_directive(tracing::Level::WARN.into())
        });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn build_host(workdir: &Path, config_path: &Path) -> Result<ModHost> {
    let host = ModHost::builder()
        .working_dir(workdir)
        .config_path(config_path)
        .runtime(tokio::runtime::Handle::current())
        .build()?;
    Ok(host)
}

/// Configuration for read-only commands. Falls back to defaults when the file
/// does not exist, without creating it.
fn read_config(config_path: &Path) -> Result<LoaderConfig> {
    if !config_path.exists() {
        warn!(path = %config_path.display(), "Configuration not found, using defaults");
        return Ok(LoaderConfig::default());
    }
    config::load_or_create(config_path)
        .with_context(|| format!("cannot read {}", config_path.display()))
}

fn run_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }
    config::write_default(config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}

async fn run_mods(workdir: &Path, config_path: &Path) -> Result<()> {
    let mut host = build_host(workdir, config_path)?;
    let summary = host.load_all()?;
    println!("{}", summary);
    for extension in host.extensions() {
        println!("  {}", extension.descriptor());
    }

    info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;

    host.stop()?;
    println!("Stopped");
    Ok(())
}

fn run_check(workdir: &Path, config_path: &Path) -> Result<()> {
    let mut host = build_host(workdir, config_path)?;
    // Ticks would only race the immediate stop.
    host.set_timers_allowed(false);

    let result = host.load_all();
    let stopped = host.stop();
    let summary = result?;
    stopped?;

    println!("{}", summary);
    println!(
        "  compiled: {}, cache hits: {}, purged: {}",
        summary.compiled,
        summary.cache_hits,
        summary.purged.len()
    );
    for id in &summary.loaded {
        println!("  OK {}", id);
    }
    Ok(())
}

fn run_list(workdir: &Path, config_path: &Path) -> Result<()> {
    let config = read_config(config_path)?;
    let mods_root = resolve_path(workdir, &config.mods_directory);
    if !mods_root.exists() {
        println!("No mods directory at {}", mods_root.display());
        return Ok(());
    }

    let mods = discovery::discover(&mods_root)?;
    if mods.is_empty() {
        println!("No mods found in {}", mods_root.display());
        return Ok(());
    }
    println!("Found {} mod(s) in {}:", mods.len(), mods_root.display());
    for discovered in &mods {
        println!("  {}", discovered.descriptor);
    }
    Ok(())
}

fn run_cache_cmd(workdir: &Path, config_path: &Path, cmd: CacheCommand) -> Result<()> {
    let config = read_config(config_path)?;
    let cache = ArtifactCache::new(resolve_path(workdir, &config.cache_directory));

    match cmd {
        CacheCommand::Info => {
            let stats = cache.info()?;
            println!("Cache: {}", cache.root().display());
            println!("  entries: {}", stats.entries);
            println!("  size:    {} bytes", stats.total_bytes);
        }
        CacheCommand::Clear => {
            cache.reset()?;
            println!("Cleared {}", cache.root().display());
        }
    }
    Ok(())
}
