//! Implementation of the `index` command.

use std::path::PathBuf;

use clap::Parser;

use crate::common::{self, trace_rss_now};
use crate::err::PandoraError;
use crate::minimizer::index::build_index;
use crate::prg::local_prg::load_prgs_from_file;

#[derive(Parser, Debug)]
#[command(author, version, about = "Build a minimizer index over a PRG file", long_about = None)]
pub struct Args {
    /// Path to the PRG file to index.
    #[arg(long)]
    pub prg: PathBuf,
    /// Minimizer window size.
    #[arg(short = 'w', long, default_value_t = 14)]
    pub w: usize,
    /// Kmer size.
    #[arg(short = 'k', long, default_value_t = 15)]
    pub k: usize,
    /// Number of worker threads (0 = rayon default).
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,
    /// Output index path.
    #[arg(short = 'o', long, default_value = "pandora.idx")]
    pub output: PathBuf,
    /// Starting id assigned to the first PRG record in the file.
    #[arg(long = "id-offset", default_value_t = 0)]
    pub id_offset: u32,
}

pub fn run(_common: &common::Args, args: &Args) -> Result<(), PandoraError> {
    tracing::info!("loading PRGs from {:?}", args.prg);
    let mut prgs = load_prgs_from_file(&args.prg, args.id_offset)?;
    tracing::info!("loaded {} PRGs", prgs.len());
    trace_rss_now();

    tracing::info!("building index (w={}, k={}, threads={})", args.w, args.k, args.threads);
    let index = build_index(&mut prgs, args.w, args.k, args.threads);
    tracing::info!("index has {} entries", index.len());

    index.save(&args.output)?;
    tracing::info!("wrote index to {:?}", args.output);
    trace_rss_now();
    Ok(())
}
