mod app;
mod commands;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ragtree", about = "Hierarchical summarizing indexer", version)]
struct Cli {
    /// Configuration file (default: ./ragtree.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Drop and recreate the node store tables
    Reset {
        /// Confirm that all indexed data should be deleted
        #[arg(long)]
        yes: bool,
    },

    /// Copy files into the library and index them
    Add {
        /// Files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Number of parallel workers (default from config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Semantic search over all indexed chunks
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show whether a file is fully indexed
    Status {
        /// File name inside the library
        file: String,
    },

    /// Remove a file's chunks and derived files
    Remove {
        /// File name inside the library
        file: String,
    },

    /// Node store statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && std::io::stdout().is_terminal();
    let app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Command::Reset { yes } => {
            commands::reset::run(&app, yes)?;
        }
        Command::Add { files, workers } => {
            commands::add::run(&app, &files, workers, &cli.format, use_color)?;
        }
        Command::Search { query, limit } => {
            commands::search::run(&app, &query, limit, &cli.format, use_color)?;
        }
        Command::Status { file } => {
            commands::status::run(&app, &file, &cli.format, use_color)?;
        }
        Command::Remove { file } => {
            commands::remove::run(&app, &file, &cli.format)?;
        }
        Command::Stats => {
            commands::stats::run(&app, &cli.format)?;
        }
    }

    Ok(())
}
