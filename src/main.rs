//! Binary entry point for bulkport.
//!
//! Drives the batch controller from the command line the same way an admin
//! screen would: one step per batch until done, printing progress.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use bulkport::config::BulkportConfig;
use bulkport::observability::{self, LoggingConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Bulkport - resumable batch CSV import/export.
#[derive(Parser)]
#[command(name = "bulkport")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "BULKPORT_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Import a CSV file.
    Import {
        /// CSV file to import.
        file: PathBuf,

        /// Entity type.
        #[arg(short = 't', long = "type", default_value = "listing")]
        entity_type: String,

        /// Update entities whose id already exists.
        #[arg(short, long)]
        update: bool,

        /// Column override as HEADER=field (empty field ignores the column).
        #[arg(short, long = "map")]
        map: Vec<String>,

        /// Field delimiter (`\t` or `tab` for tabs).
        #[arg(short, long)]
        delimiter: Option<String>,

        /// Rows per batch.
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// User whose mapping preferences are applied and saved.
        #[arg(long, env = "USER", default_value = "admin")]
        user: String,
    },

    /// Export entities to a CSV file.
    Export {
        /// Output file.
        output: PathBuf,

        /// Entity type.
        #[arg(short = 't', long = "type", default_value = "listing")]
        entity_type: String,

        /// Columns to export (comma-separated logical names).
        #[arg(long)]
        columns: Option<String>,

        /// Only export entities with this status (repeatable).
        #[arg(short, long)]
        status: Vec<String>,

        /// Only export entities in this category (repeatable).
        #[arg(long)]
        category_id: Vec<u64>,

        /// Add a column per metadata key.
        #[arg(long)]
        include_meta: bool,

        /// Entities per page.
        #[arg(short, long)]
        page_size: Option<usize>,
    },

    /// Show the detected column mapping for a CSV file.
    Columns {
        /// CSV file to inspect.
        file: PathBuf,

        /// Entity type.
        #[arg(short = 't', long = "type", default_value = "listing")]
        entity_type: String,

        /// Field delimiter.
        #[arg(short, long)]
        delimiter: Option<String>,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match BulkportConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(LoggingConfig::from_settings(&config.logging, cli.verbose))
    {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: BulkportConfig) -> anyhow::Result<()> {
    match command {
        Commands::Import {
            file,
            entity_type,
            update,
            map,
            delimiter,
            batch_size,
            user,
        } => commands::cmd_import(
            &config,
            &commands::ImportArgs {
                file,
                entity_type,
                update,
                map,
                delimiter,
                batch_size,
                user,
            },
        ),

        Commands::Export {
            output,
            entity_type,
            columns,
            status,
            category_id,
            include_meta,
            page_size,
        } => commands::cmd_export(
            &config,
            &commands::ExportArgs {
                output,
                entity_type,
                columns,
                status,
                category_ids: category_id,
                include_meta,
                page_size,
            },
        ),

        Commands::Columns {
            file,
            entity_type,
            delimiter,
        } => commands::cmd_columns(&config, &file, &entity_type, delimiter.as_deref()),
    }
}
