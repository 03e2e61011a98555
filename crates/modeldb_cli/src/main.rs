//! ModelDB CLI
//!
//! Command-line tools for the JSON record files written by ModelDB stores.
//!
//! # Commands
//!
//! - `inspect` - Count the records of exported store files
//! - `verify` - Check ids and relation pairs for consistency

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ModelDB command-line tools.
#[derive(Parser)]
#[command(name = "modeldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count the records of exported store files
    Inspect {
        /// Store files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check exported store files for consistency
    Verify {
        /// Model store files to check for duplicate ids
        models: Vec<PathBuf>,

        /// Relation store file whose pairs should resolve
        #[arg(long, requires_all = ["a_side", "b_side"])]
        pairs: Option<PathBuf>,

        /// Model store file holding the A side of the pairs
        #[arg(long)]
        a_side: Option<PathBuf>,

        /// Model store file holding the B side of the pairs
        #[arg(long)]
        b_side: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { files, format } => {
            commands::inspect::run(&files, &format)?;
        }
        Commands::Verify {
            models,
            pairs,
            a_side,
            b_side,
        } => {
            let relation = match (pairs, a_side, b_side) {
                (Some(pairs), Some(a), Some(b)) => {
                    Some(commands::verify::RelationFiles { pairs, a, b })
                }
                (None, _, _) => None,
                _ => return Err("--pairs needs both --a-side and --b-side".into()),
            };
            if models.is_empty() && relation.is_none() {
                return Err("Nothing to verify".into());
            }
            commands::verify::run(&models, relation.as_ref())?;
        }
        Commands::Version => {
            println!("ModelDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ModelDB Core v{}", modeldb_core::VERSION);
        }
    }

    Ok(())
}
