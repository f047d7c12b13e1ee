//! Polycubes CLI - enumerate free polycubes of a given size.
//!
//! Counts the distinct face-connected arrangements of N unit cubes up to
//! rotation, optionally reading and writing cache files so larger levels
//! can extend smaller ones.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use polycube_gen::GenConfig;

/// Free polycube enumerator.
#[derive(Parser)]
#[command(name = "polycubes")]
#[command(author, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// The size of polycube to generate up to
    #[arg(short = 'n', long = "cube_size")]
    cube_size: Option<usize>,

    /// The number of threads to use while generating
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,

    /// Whether to load cache files
    #[arg(short = 'c', long, default_value_t = false, action = ArgAction::Set)]
    use_cache: bool,

    /// Whether to save cache files
    #[arg(short = 'w', long, default_value_t = false, action = ArgAction::Set)]
    write_cache: bool,

    /// Whether to save a separate cache file per output shape
    #[arg(short = 's', long, default_value_t = false, action = ArgAction::Set)]
    split_cache: bool,

    /// Use separate cache files by input shape
    #[arg(short = 'u', long, default_value_t = false, action = ArgAction::Set)]
    use_split_cache: bool,

    /// Where to store cache files
    #[arg(short = 'f', long = "cache_file_folder", default_value = "./cache/")]
    cache_file_folder: PathBuf,

    /// Print build version info
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    if cli.version {
        println!("polycubes {}", env!("CARGO_PKG_VERSION"));
        if cli.cube_size.is_none() {
            return Ok(());
        }
    }

    let Some(n) = cli.cube_size else {
        Cli::command().print_help()?;
        std::process::exit(2);
    };

    let mut config = GenConfig {
        threads: cli.threads.max(1),
        use_cache: cli.use_cache,
        write_cache: cli.write_cache,
        split_cache: cli.split_cache,
        use_split_cache: cli.use_split_cache,
        cache_dir: cli.cache_file_folder,
    };

    // Environment variables override the flags when present, parsed as
    // integers.
    if let Some(value) = env_flag("USE_CACHE") {
        config.use_cache = value;
    }
    if let Some(value) = env_flag("WRITE_CACHE") {
        config.write_cache = value;
    }

    info!(n, threads = config.threads, "enumerating free polycubes");
    let total = polycube_gen::run(n, &config).context("enumeration failed")?;
    info!(n, total, "done");
    println!("num total cubes: {total}");
    Ok(())
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    value.trim().parse::<i64>().ok().map(|v| v != 0)
}
