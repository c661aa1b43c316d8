//! Pandora: population reference graph indexing, read mapping, and variant
//! calling.

pub mod cli;
pub mod common;
pub mod err;
pub mod io;
pub mod kmergraph;
pub mod minimizer;
pub mod prg;
pub mod vcf;

use clap::{Parser, Subcommand};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pandora: PRG indexing, read mapping, and variant calling",
    long_about = None
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a minimizer index over a PRG file.
    Index(cli::index_cli::Args),
    /// Map reads onto a PRG, infer paths, and call variants.
    Map(cli::map_cli::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Index(args) => cli::index_cli::run(&cli.common, args)?,
            Commands::Map(args) => cli::map_cli::run(&cli.common, args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
