//! Bale Command-Line Interface
//!
//! Inspects and verifies directories of envelope files written by a
//! `FileSource`.
//!
//! # Usage
//!
//! ```bash
//! # List every envelope and its records
//! bale inspect ./data
//!
//! # Show one instance only
//! bale inspect ./data --instance 3
//!
//! # Check checksums and envelope structure; non-zero exit on failure
//! bale verify ./data
//!
//! # Load the directory into a controller and report totals
//! bale load ./data --group 0 --config bale.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Bale command-line interface
#[derive(Parser, Debug)]
#[command(
    name = "bale",
    version,
    about = "Inspect and verify Bale envelope files",
    long_about = "Reads directories of envelope files written by a Bale file source.\n\n\
                  Each instance of a storage group is one <instance>.bale file holding\n\
                  an envelope of managed records followed by a CRC32 footer."
)]
struct Args {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print envelope headers and the records they hold
    Inspect {
        /// Directory of instance files
        dir: PathBuf,

        /// Only this instance
        #[arg(short, long)]
        instance: Option<u16>,
    },

    /// Verify checksums and envelope structure of every instance file
    Verify {
        /// Directory of instance files
        dir: PathBuf,
    },

    /// Load every instance into a record controller and report totals
    Load {
        /// Directory of instance files
        dir: PathBuf,

        /// Storage group the directory belongs to
        #[arg(short, long, default_value_t = 0)]
        group: u16,

        /// Controller configuration file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let mut out = std::io::stdout().lock();
    match args.command {
        Command::Inspect { dir, instance } => {
            commands::inspect(&dir, instance, &mut out)?;
            Ok(true)
        }
        Command::Verify { dir } => commands::verify(&dir, &mut out),
        Command::Load { dir, group, config } => {
            commands::load(&dir, group, config.as_deref(), &mut out)?;
            Ok(true)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
