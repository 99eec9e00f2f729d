//! # cowfs CLI
//!
//! Command-line interface for the cowfs copy-on-write versioned file store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cowfs_config::{log_cli_debug, log_cli_info, Config};
use cowfs_core::CowEngine;

mod report;
mod shell;
mod sysstats;

/// cowfs - copy-on-write versioned file storage
#[derive(Parser)]
#[command(name = "cowfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage root holding data/ and metadata/ (overrides config)
    #[arg(long, global = true, env = "COWFS_ROOT")]
    root: Option<PathBuf>,

    /// Read without a session: `cat` skips its open/close pair
    #[arg(long, global = true)]
    relaxed_reads: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directories (and optionally a default config)
    Init {
        /// Also write .cowfs/config.toml with default values
        #[arg(long)]
        config: bool,
    },

    /// Create an empty logical file
    Create {
        name: String,
        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },

    /// Import an external file as version 0 of a logical file
    Import {
        name: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Append bytes to a logical file as a new version
    Write {
        name: String,
        /// Text to append
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,
        /// File whose bytes are appended
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the content of a file (current version unless --version)
    Cat {
        name: String,
        #[arg(short, long)]
        version: Option<usize>,
    },

    /// Move the current version back by one
    Undo { name: String },

    /// List the versions of a file
    Log { name: String },

    /// List stored files
    Ls,

    /// List every stored block with its size
    Blocks,

    /// Write the current content of a file to an external path
    Export {
        name: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Show block and metadata byte totals
    Usage,

    /// Show storage totals plus host memory and load
    Stats,

    /// Remove all blocks and/or all metadata (dry run unless --yes)
    Wipe {
        #[arg(long)]
        blocks: bool,
        #[arg(long)]
        metadata: bool,
        /// Actually delete
        #[arg(long)]
        yes: bool,
    },

    /// Interactive append session on one file
    Shell {
        name: String,
        /// Seed the file from an external path
        #[arg(long, value_name = "PATH")]
        import: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = cowfs_config::config().clone();
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    if cli.relaxed_reads {
        config.engine.read_requires_session = false;
    }
    cowfs_config::init_logging(config.log.level());
    log_cli_debug!("storage root", root = tracing::field::display(config.storage.root.display()));

    let engine = CowEngine::from_config(&config)
        .with_context(|| format!("Failed to open storage at {}", config.storage.root.display()))?;

    run(cli.command, &engine, &config)
}

fn run(command: Commands, engine: &CowEngine, config: &Config) -> Result<()> {
    match command {
        Commands::Init { config: write_config } => cmd_init(config, write_config),
        Commands::Create { name, overwrite } => {
            engine.create(&name, overwrite)?;
            engine.close(&name)?;
            println!("Created '{}'", name);
            Ok(())
        }
        Commands::Import { name, path } => {
            // The engine falls back to the stored file on an unreadable source
            fs::File::open(&path)
                .with_context(|| format!("Cannot import {}", path.display()))?;
            engine.open(&name, Some(&path))?;
            let meta = engine.metadata(&name)?;
            engine.close(&name)?;
            println!(
                "Imported {} as '{}' ({}, {} blocks)",
                path.display(),
                name,
                report::format_bytes(meta.size()),
                meta.blocks().len()
            );
            Ok(())
        }
        Commands::Write { name, text, file } => {
            let data = match (text, file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(path)) => fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Nothing to write: pass --text or --file"),
            };
            let written = with_session(engine, &name, || engine.write(&name, &data))?;
            let meta = engine.metadata(&name)?;
            println!(
                "Wrote {} to '{}' (version {}, size {})",
                report::format_bytes(written as u64),
                name,
                meta.current_version(),
                report::format_bytes(meta.size())
            );
            Ok(())
        }
        Commands::Cat { name, version } => {
            cmd_cat(engine, &name, version, &mut io::stdout().lock())
        }
        Commands::Undo { name } => {
            let version = with_session(engine, &name, || engine.undo(&name))?;
            println!("'{}' now at version {}", name, version);
            Ok(())
        }
        Commands::Log { name } => {
            let meta = engine.metadata(&name)?;
            report::print_versions(&meta, &mut io::stdout().lock())?;
            Ok(())
        }
        Commands::Ls => {
            for name in engine.list_files()? {
                let meta = engine.metadata(&name)?;
                println!(
                    "{:<32} v{:<4} {:>12}",
                    name,
                    meta.current_version(),
                    report::format_bytes(meta.size())
                );
            }
            Ok(())
        }
        Commands::Blocks => report::print_blocks(engine),
        Commands::Export { name, path } => {
            let bytes = engine.export(&name, &path)?;
            println!(
                "Exported '{}' to {} ({})",
                name,
                path.display(),
                report::format_bytes(bytes)
            );
            Ok(())
        }
        Commands::Usage => {
            report::print_usage(&engine.usage()?);
            Ok(())
        }
        Commands::Stats => {
            report::print_usage(&engine.usage()?);
            match sysstats::host_stats() {
                Some(host) => report::print_host(&host),
                None => println!("\n  Host statistics unavailable on this platform"),
            }
            Ok(())
        }
        Commands::Wipe {
            blocks,
            metadata,
            yes,
        } => cmd_wipe(engine, blocks, metadata, yes),
        Commands::Shell { name, import } => shell::run(engine, &name, import.as_deref()),
    }
}

/// Run `f` with `name` open. A session is opened (and closed again) only
/// when none exists yet.
fn with_session<T>(
    engine: &CowEngine,
    name: &str,
    f: impl FnOnce() -> cowfs_core::Result<T>,
) -> Result<T> {
    let opened_here = !engine.is_open(name);
    if opened_here {
        engine.open(name, None)?;
    }
    let out = f();
    if opened_here {
        engine.close(name)?;
    }
    Ok(out?)
}

fn cmd_cat<W: Write>(
    engine: &CowEngine,
    name: &str,
    version: Option<usize>,
    out: &mut W,
) -> Result<()> {
    let content = if engine.options().read_requires_session {
        with_session(engine, name, || engine.read(name, version))?
    } else {
        engine.read(name, version)?
    };
    out.write_all(&content)?;
    out.flush()?;
    Ok(())
}

fn cmd_init(config: &Config, write_config: bool) -> Result<()> {
    // Engine construction already created data/ and metadata/
    println!("Initialized cowfs storage in {}", config.storage.root.display());
    if write_config {
        let path = Path::new(".cowfs/config.toml");
        if path.exists() {
            println!("Config already present at {}", path.display());
        } else {
            fs::create_dir_all(".cowfs")?;
            let mut cfg = Config::default();
            cfg.storage.root = std::env::current_dir()?.join(&config.storage.root);
            fs::write(path, cfg.to_toml())?;
            cowfs_config::reload().context("Written config does not parse")?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn cmd_wipe(engine: &CowEngine, blocks: bool, metadata: bool, yes: bool) -> Result<()> {
    let (blocks, metadata) = if !blocks && !metadata {
        (true, true)
    } else {
        (blocks, metadata)
    };

    let usage = engine.usage()?;
    println!();
    println!("  cowfs wipe");
    println!("  ==========");
    if blocks {
        println!(
            "    📦 Blocks:   {} ({})",
            report::format_number(usage.block_count),
            report::format_bytes(usage.total_blocks_size)
        );
    }
    if metadata {
        println!(
            "    📄 Metadata: {} files ({})",
            report::format_number(usage.file_count),
            report::format_bytes(usage.total_metadata_size)
        );
    }

    if !yes {
        println!();
        println!("  📋 Dry run complete. Use --yes to delete.");
        return Ok(());
    }

    // Not transactional: a failure part-way leaves some items removed
    if blocks {
        let removed = engine.delete_blocks().context("Block wipe interrupted")?;
        println!("  🗑️  Deleted {} blocks", report::format_number(removed as u64));
    }
    if metadata {
        let removed = engine.delete_metadata().context("Metadata wipe interrupted")?;
        println!("  🗑️  Deleted {} metadata records", report::format_number(removed as u64));
    }
    log_cli_info!("wipe", blocks = blocks, metadata = metadata);
    Ok(())
}
