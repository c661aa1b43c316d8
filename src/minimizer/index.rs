//! The minimizer index: canonical kmer hash -> `MiniRecord`s, plus its
//! parallel build driver and text persistence format.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path as FsPath;

use rayon::prelude::*;

use crate::err::PandoraError;
use crate::prg::local_prg::LocalPRG;
use crate::prg::path::Path;

/// `min(fx_hash(seq), fx_hash(revcomp(seq)))`, strand-agnostic. Returns the
/// hash and whether the forward orientation was the one selected.
pub fn canonical_kmer_hash(seq: &[u8]) -> (u64, bool) {
    let fwd_hash = fxhash::hash64(seq);
    let rc = revcomp(seq);
    let rev_hash = fxhash::hash64(&rc);
    if fwd_hash <= rev_hash {
        (fwd_hash, true)
    } else {
        (rev_hash, false)
    }
}

fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

/// A mapping from canonical kmer hash to the list of `MiniRecord`s observed
/// for it, content-addressed for O(1) probing.
#[derive(Debug, Clone, Default)]
pub struct Index {
    records: HashMap<u64, Vec<super::MiniRecord>>,
}

impl Index {
    pub fn new() -> Self {
        Index::default()
    }

    pub fn add(&mut self, hash: u64, record: super::MiniRecord) {
        self.records.entry(hash).or_default().push(record);
    }

    pub fn probe(&self, hash: u64) -> &[super::MiniRecord] {
        self.records.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn merge(&mut self, other: Index) {
        for (hash, recs) in other.records {
            self.records.entry(hash).or_default().extend(recs);
        }
    }

    /// Deterministic text persistence: one line per record,
    /// `hash TAB prg_id TAB path TAB kmer_node_id TAB strand`.
    pub fn save<P: AsRef<FsPath>>(&self, path: P) -> Result<(), PandoraError> {
        let path = path.as_ref();
        let mut writer = std::fs::File::create(path)
            .map(std::io::BufWriter::new)
            .map_err(|e| PandoraError::io(path, e))?;
        let mut hashes: Vec<&u64> = self.records.keys().collect();
        hashes.sort_unstable();
        for hash in hashes {
            for record in &self.records[hash] {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}",
                    hash,
                    record.prg_id,
                    record.path,
                    record.kmer_node_id,
                    if record.is_forward_strand { '+' } else { '-' }
                )
                .map_err(|e| PandoraError::io(path, e))?;
            }
        }
        Ok(())
    }

    pub fn load<P: AsRef<FsPath>>(path: P) -> Result<Self, PandoraError> {
        let path_ref = path.as_ref();
        let file = std::fs::File::open(path_ref).map_err(|e| PandoraError::io(path_ref, e))?;
        let reader = std::io::BufReader::new(file);
        let mut idx = Index::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| PandoraError::io(path_ref, e))?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let malformed = |detail: &str| PandoraError::MalformedIndex {
                path: path_ref.to_path_buf(),
                line: lineno,
                detail: detail.to_string(),
            };
            let [hash, prg_id, path_s, kmer_node_id, strand] = fields[..] else {
                return Err(malformed("expected 5 tab-separated fields"));
            };
            let hash: u64 = hash.parse().map_err(|_| malformed("bad hash"))?;
            let prg_id: u32 = prg_id.parse().map_err(|_| malformed("bad prg_id"))?;
            let record_path: Path = path_s.parse().map_err(|_| malformed("bad path"))?;
            let kmer_node_id: u32 = kmer_node_id
                .parse()
                .map_err(|_| malformed("bad kmer_node_id"))?;
            let is_forward_strand = match strand {
                "+" => true,
                "-" => false,
                _ => return Err(malformed("bad strand")),
            };
            idx.add(
                hash,
                super::MiniRecord::new(prg_id, record_path, kmer_node_id, is_forward_strand),
            );
        }
        Ok(idx)
    }

    /// As a multiset of records, ignoring hash bucket order -- the
    /// equality used by the `load(save(idx)) == idx` round-trip property.
    #[cfg(test)]
    fn as_multiset(&self) -> std::collections::BTreeMap<u64, Vec<String>> {
        self.records
            .iter()
            .map(|(h, recs)| {
                let mut s: Vec<String> = recs
                    .iter()
                    .map(|r| {
                        format!(
                            "{}:{}:{}:{}",
                            r.prg_id, r.path, r.kmer_node_id, r.is_forward_strand
                        )
                    })
                    .collect();
                s.sort();
                (*h, s)
            })
            .collect()
    }
}

/// Build the index for a set of PRGs, sharded by PRG id: each PRG sketches
/// into its own `Vec<MiniRecord>` in isolation (via rayon), then the partial
/// results are folded sequentially into a single `Index` in PRG-id order --
/// the one shared-mutation point allowed by SPEC_FULL.md §5.
pub fn build_index(prgs: &mut [LocalPRG], w: usize, k: usize, threads: usize) -> Index {
    if threads > 0 {
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global();
    }

    prgs.par_iter_mut().for_each(|prg| {
        prg.minimizer_sketch(w, k);
    });

    let mut index = Index::new();
    for prg in prgs.iter() {
        let mut per_prg = Index::new();
        for record in &prg.sketch {
            let hash = crate::minimizer::index::canonical_kmer_hash(
                prg.string_along_path(&record.path).as_bytes(),
            )
            .0;
            per_prg.add(hash, record.clone());
        }
        index.merge(per_prg);
    }
    index
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::minimizer::MiniRecord;
    use crate::prg::interval::Interval;

    #[test]
    fn canonical_hash_picks_the_smaller_of_fwd_and_revcomp() {
        let (h1, fwd1) = canonical_kmer_hash(b"ACG");
        let (h2, fwd2) = canonical_kmer_hash(b"CGT"); // revcomp of ACG
        assert_eq!(h1, h2);
        assert_ne!(fwd1, fwd2);
    }

    #[test]
    fn save_load_round_trips_as_a_multiset() {
        let mut idx = Index::new();
        idx.add(
            42,
            MiniRecord::new(0, Path::new(vec![Interval::new(0, 3)]), 1, true),
        );
        idx.add(
            42,
            MiniRecord::new(1, Path::new(vec![Interval::new(5, 8)]), 2, false),
        );
        idx.add(7, MiniRecord::new(2, Path::empty(), 0, true));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("idx.txt");
        idx.save(&file).unwrap();
        let loaded = Index::load(&file).unwrap();

        assert_eq!(idx.as_multiset(), loaded.as_multiset());
    }

    #[test]
    fn probe_returns_empty_slice_for_unknown_hash() {
        let idx = Index::new();
        assert!(idx.probe(999).is_empty());
    }
}
