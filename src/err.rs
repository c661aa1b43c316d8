//! Crate-wide error taxonomy.
//!
//! Every fallible entry point in the core (decomposition, index, kmer graph,
//! VCF) returns `Result<_, PandoraError>`. The CLI boundary wraps these in
//! `anyhow::Error` for contextual messages and maps them back to a process
//! exit code (see `main`'s exit handling).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PandoraError {
    /// A PRG string violates a decomposition invariant.
    #[error("malformed PRG at site {site} (offset {offset}): {detail}")]
    MalformedPrg {
        site: u32,
        offset: usize,
        detail: String,
    },

    /// An on-disk index file could not be parsed.
    #[error("malformed index file {path:?}, line {line}: {detail}")]
    MalformedIndex {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// Any I/O failure, tagged with the path that was being operated on.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A FASTA/FASTQ read file could not be sniffed or parsed.
    #[error("malformed read file {path:?}: {detail}")]
    MalformedReads { path: PathBuf, detail: String },

    /// A kmer graph's sink is unreachable, or an edge refers to an unknown id.
    #[error("kmer graph for PRG {prg_id} is incoherent: {detail}")]
    GraphIncoherent { prg_id: u32, detail: String },

    /// An assertion-like internal invariant was violated.
    #[error("internal invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

impl PandoraError {
    /// Process exit code per the CLI contract: 0 success, 1 I/O/parse error,
    /// 2 malformed PRG, 3 internal invariant failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            PandoraError::MalformedPrg { .. } => 2,
            PandoraError::MalformedIndex { .. } => 1,
            PandoraError::Io { .. } => 1,
            PandoraError::MalformedReads { .. } => 1,
            PandoraError::GraphIncoherent { .. } => 3,
            PandoraError::InvariantViolation { .. } => 3,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PandoraError::Io {
            path: path.into(),
            source,
        }
    }
}
