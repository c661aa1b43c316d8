//! Decomposition of a linearized PRG string into a `LocalGraph`, and
//! minimizer-sketch emission over the resulting graph.

use crate::err::PandoraError;
use crate::kmergraph::{KmerGraph, KmerGraphBuilder};
use crate::minimizer::index::canonical_kmer_hash;
use crate::minimizer::MiniRecord;

use super::graph::{LocalGraph, NodeId};
use super::interval::Interval;
use super::path::Path;

/// The delimiter character separating PRG tokens (bases and site markers).
pub const BUFF: char = ' ';

fn is_alpha_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphabetic())
}

/// Split `seq[interval]` at the next variation site: locate the paired site
/// marker `BUFF site BUFF`, then split its body by the separator
/// `BUFF (site+1) BUFF`. Returns `[prefix, alt_1, .., alt_n, suffix]`.
fn split_by_site(seq: &str, interval: Interval, site: u32) -> Result<Vec<Interval>, String> {
    let marker = format!("{BUFF}{site}{BUFF}");
    let sep = format!("{BUFF}{}{BUFF}", site + 1);

    let open = seq[interval.start..interval.end]
        .find(marker.as_str())
        .map(|p| p + interval.start)
        .ok_or_else(|| format!("could not locate opening marker for site {site}"))?;
    let after_open = open + marker.len();
    let close = seq[after_open..interval.end]
        .find(marker.as_str())
        .map(|p| p + after_open)
        .ok_or_else(|| format!("could not locate closing marker for site {site}"))?;

    let prefix = Interval::new(interval.start, open);
    let body_start = after_open;
    let body_end = close;
    let suffix = Interval::new(close + marker.len(), interval.end);

    let mut alts = Vec::new();
    let mut k = body_start;
    while let Some(p) = seq[k..body_end].find(sep.as_str()) {
        let p = p + k;
        alts.push(Interval::new(k, p));
        k = p + sep.len();
    }
    alts.push(Interval::new(k, body_end));

    let mut out = Vec::with_capacity(alts.len() + 2);
    out.push(prefix);
    out.extend(alts);
    out.push(suffix);
    Ok(out)
}

/// One PRG: its raw linear string, decomposed `LocalGraph`, and (once
/// sketched) the structural `KmerGraph` and the `MiniRecord`s it
/// contributes to the index.
pub struct LocalPRG {
    pub id: u32,
    pub name: String,
    pub seq: String,
    pub prg: LocalGraph,
    pub sketch: Vec<MiniRecord>,
    pub kmer_graph: Option<KmerGraph>,
    next_id: NodeId,
    next_site: u32,
}

impl LocalPRG {
    pub fn new(id: u32, name: String, seq: String) -> Result<Self, PandoraError> {
        let mut lp = LocalPRG {
            id,
            name,
            seq,
            prg: LocalGraph::new(),
            sketch: Vec::new(),
            kmer_graph: None,
            next_id: 0,
            next_site: 5,
        };
        let whole = Interval::new(0, lp.seq.len());
        lp.build_graph(whole, &[])?;
        lp.prg.check_coherent()?;
        Ok(lp)
    }

    fn build_graph(&mut self, interval: Interval, from_ids: &[NodeId]) -> Result<Vec<NodeId>, PandoraError> {
        let s = self.seq[interval.start..interval.end].to_string();
        if is_alpha_string(&s) {
            let id = self.next_id;
            self.next_id += 1;
            self.prg.add_node(id, s, interval);
            for &f in from_ids {
                self.prg.add_edge(f, id);
            }
            return Ok(vec![id]);
        }

        let site = self.next_site;
        let parts = split_by_site(&self.seq, interval, site).map_err(|detail| {
            PandoraError::MalformedPrg {
                site,
                offset: interval.start,
                detail,
            }
        })?;
        if parts.len() < 4 {
            return Err(PandoraError::MalformedPrg {
                site,
                offset: interval.start,
                detail: format!(
                    "split_by_site produced {} sub-intervals, expected at least 4",
                    parts.len()
                ),
            });
        }
        self.next_site += 2;

        let prefix = parts[0];
        let prefix_s = self.seq[prefix.start..prefix.end].to_string();
        if !is_alpha_string(&prefix_s) {
            return Err(PandoraError::MalformedPrg {
                site,
                offset: prefix.start,
                detail: "sequence before variation site is not alphabetic".to_string(),
            });
        }
        let prefix_id = self.next_id;
        self.next_id += 1;
        self.prg.add_node(prefix_id, prefix_s, prefix);
        for &f in from_ids {
            self.prg.add_edge(f, prefix_id);
        }

        let mid_ids = vec![prefix_id];
        let mut tail_ids = Vec::new();
        for alt in &parts[1..parts.len() - 1] {
            let ends = self.build_graph(*alt, &mid_ids)?;
            tail_ids.extend(ends);
        }

        let suffix = parts[parts.len() - 1];
        self.build_graph(suffix, &tail_ids)
    }

    pub fn string_along_path(&self, path: &Path) -> String {
        path.intervals()
            .iter()
            .map(|i| &self.seq[i.start..i.end])
            .collect()
    }

    /// Enumerate minimizer sketch entries over every node and position of
    /// the graph, per SPEC_FULL.md §4.1: for each walk of length `w+k-1`,
    /// select the lexicographically smallest of its `w` candidate kmers
    /// (ties all kept), and record each selected occurrence both as a
    /// `MiniRecord` and as a node/edge in the PRG's structural `KmerGraph`.
    pub fn minimizer_sketch(&mut self, w: usize, k: usize) {
        let mut builder = KmerGraphBuilder::new();
        let mut sketch = Vec::new();

        for node in self.prg.nodes() {
            for i in node.interval.start..node.interval.end {
                let walks = self.prg.walk(node.id, i, w + k - 1);
                for walk in &walks {
                    if walk.length() < w + k - 1 {
                        continue;
                    }
                    let windows: Vec<(Path, String)> = (0..w)
                        .map(|j| {
                            let sub = walk.subpath(j, k);
                            let s = self.string_along_path(&sub);
                            (sub, s)
                        })
                        .collect();
                    let smallest = windows.iter().map(|(_, s)| s).min().cloned().unwrap();

                    let mut chain = Vec::new();
                    for (path, kmer) in &windows {
                        if *kmer == smallest {
                            chain.push(path.clone());
                            let (hash, is_forward) = canonical_kmer_hash(kmer.as_bytes());
                            let kmer_node_id = builder.get_or_create(path);
                            sketch.push(MiniRecord::new(
                                self.id,
                                path.clone(),
                                kmer_node_id,
                                is_forward,
                            ));
                        }
                    }
                    builder.add_chain(&chain);
                }
            }
        }

        self.kmer_graph = Some(builder.finish(k, 0.0));
        self.sketch = sketch;
    }
}

/// Load all PRG records from a PRG file: one `>name` line followed by one
/// sequence line per record, blank lines skipped. Ids are assigned in file
/// order, offset by `id_offset`.
pub fn load_prgs_from_file(
    path: &std::path::Path,
    id_offset: u32,
) -> Result<Vec<LocalPRG>, PandoraError> {
    use std::io::BufRead;

    let file = std::fs::File::open(path).map_err(|e| PandoraError::io(path, e))?;
    let reader = std::io::BufReader::new(file);
    let mut lines = reader.lines();

    let mut prgs = Vec::new();
    let mut id = id_offset;
    while let Some(line) = lines.next() {
        let line = line.map_err(|e| PandoraError::io(path, e))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let name = line
            .strip_prefix('>')
            .ok_or_else(|| PandoraError::MalformedIndex {
                path: path.to_path_buf(),
                line: 0,
                detail: format!("expected '>' record header, got: {line}"),
            })?
            .to_string();
        let seq_line = lines
            .next()
            .ok_or_else(|| PandoraError::MalformedIndex {
                path: path.to_path_buf(),
                line: 0,
                detail: format!("PRG record {name} is missing its sequence line"),
            })?
            .map_err(|e| PandoraError::io(path, e))?;
        prgs.push(LocalPRG::new(id, name, seq_line.trim_end().to_string())?);
        id += 1;
    }
    Ok(prgs)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decomposes_scenario_one() {
        // SPEC_FULL.md §8 scenario 1.
        let lp = LocalPRG::new(0, "test".to_string(), "ACGT 5 A 6 T 5 CCGG".to_string()).unwrap();
        let mut seqs: Vec<String> = lp.prg.nodes().map(|n| n.sequence.clone()).collect();
        seqs.sort();
        assert_eq!(seqs, vec!["A", "ACGT", "CCGG", "T"]);
        assert_eq!(lp.prg.len(), 4);
    }

    #[test]
    fn minimizer_sketch_emits_expected_kmers() {
        let mut lp =
            LocalPRG::new(0, "test".to_string(), "ACGT 5 A 6 T 5 CCGG".to_string()).unwrap();
        lp.minimizer_sketch(2, 3);
        let expected: std::collections::BTreeSet<&str> = [
            "ACG", "CGT", "GTA", "GTT", "TAC", "TTC", "ACC", "CCG", "CGG",
        ]
        .into_iter()
        .collect();
        let got: std::collections::BTreeSet<String> = lp
            .sketch
            .iter()
            .map(|r| lp.string_along_path(&r.path))
            .collect();
        assert_eq!(got, expected.into_iter().map(String::from).collect());
    }

    #[test]
    fn rejects_split_with_too_few_parts() {
        // An empty site body (back-to-back markers) collapses to a single
        // alt, giving < 4 parts overall -> MalformedPRG.
        let err = LocalPRG::new(0, "bad".to_string(), "AC 5  5 GT".to_string());
        assert!(err.is_err());
    }
}
