//! Format-sniffing FASTA/FASTQ reader used by `map_cli` to stream reads.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::common::io::open_read_maybe_gz;
use crate::err::PandoraError;

/// One read, with quality scores when the source was FASTQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastxRecord {
    pub id: String,
    pub sequence: Vec<u8>,
    pub quality: Option<Vec<u8>>,
}

enum Inner {
    Fasta(bio::io::fasta::Records<Box<dyn BufRead>>),
    Fastq(bio::io::fastq::Records<Box<dyn BufRead>>),
}

/// Streams `FastxRecord`s out of a plain-or-gzipped FASTA or FASTQ file,
/// sniffed from the first non-whitespace byte (`>` or `;` ⇒ FASTA, `@` ⇒
/// FASTQ).
pub struct FastxReader {
    path: PathBuf,
    inner: Inner,
}

impl FastxReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PandoraError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = open_read_maybe_gz(&path)?;
        let sniffed = {
            let buf = reader.fill_buf().map_err(|e| PandoraError::io(&path, e))?;
            buf.iter().find(|b| !b.is_ascii_whitespace()).copied()
        };

        let inner = match sniffed {
            Some(b'>') | Some(b';') => Inner::Fasta(bio::io::fasta::Reader::new(reader).records()),
            Some(b'@') => Inner::Fastq(bio::io::fastq::Reader::new(reader).records()),
            Some(other) => {
                return Err(PandoraError::MalformedReads {
                    path,
                    detail: format!("unrecognised leading byte {:?}; expected '>' or '@'", other as char),
                })
            }
            None => {
                return Err(PandoraError::MalformedReads {
                    path,
                    detail: "file is empty".to_string(),
                })
            }
        };

        Ok(FastxReader { path, inner })
    }

    /// Pull the next record, or `None` at end of file.
    pub fn read_next(&mut self) -> Result<Option<FastxRecord>, PandoraError> {
        match &mut self.inner {
            Inner::Fasta(records) => match records.next() {
                None => Ok(None),
                Some(Ok(record)) => Ok(Some(FastxRecord {
                    id: record.id().to_string(),
                    sequence: record.seq().to_vec(),
                    quality: None,
                })),
                Some(Err(e)) => Err(PandoraError::MalformedReads {
                    path: self.path.clone(),
                    detail: e.to_string(),
                }),
            },
            Inner::Fastq(records) => match records.next() {
                None => Ok(None),
                Some(Ok(record)) => Ok(Some(FastxRecord {
                    id: record.id().to_string(),
                    sequence: record.seq().to_vec(),
                    quality: Some(record.qual().to_vec()),
                })),
                Some(Err(e)) => Err(PandoraError::MalformedReads {
                    path: self.path.clone(),
                    detail: e.to_string(),
                }),
            },
        }
    }

    /// No resources beyond the exhausted iterator need releasing; kept for
    /// symmetry with `open` and to give call sites an explicit end-of-stream
    /// point.
    pub fn close(self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_fasta_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fa");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b">r1\nACGT\n>r2\nTTTT\n")
            .unwrap();

        let mut reader = FastxReader::open(&path).unwrap();
        let r1 = reader.read_next().unwrap().unwrap();
        assert_eq!(r1.id, "r1");
        assert_eq!(r1.sequence, b"ACGT");
        assert!(r1.quality.is_none());
        let r2 = reader.read_next().unwrap().unwrap();
        assert_eq!(r2.id, "r2");
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn reads_fastq_records_with_quality() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fq");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"@r1\nACGT\n+\nIIII\n")
            .unwrap();

        let mut reader = FastxReader::open(&path).unwrap();
        let r1 = reader.read_next().unwrap().unwrap();
        assert_eq!(r1.id, "r1");
        assert_eq!(r1.quality, Some(b"IIII".to_vec()));
    }

    #[test]
    fn rejects_unrecognised_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.bad");
        std::fs::File::create(&path).unwrap().write_all(b"not fastx\n").unwrap();

        let err = FastxReader::open(&path).unwrap_err();
        assert!(matches!(err, PandoraError::MalformedReads { .. }));
    }
}
