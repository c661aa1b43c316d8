//! `KmerGraph`: the per-locus DAG of kmer occurrences on which read coverage
//! is accumulated and a maximum-likelihood path is inferred.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path as FsPath;

use crate::err::PandoraError;
use crate::prg::path::Path;

pub type KmerNodeId = u32;

/// One kmer occurrence, positioned by a `Path` through a `LocalGraph`.
#[derive(Debug, Clone)]
pub struct KmerNode {
    pub id: KmerNodeId,
    pub path: Path,
    pub covg_fwd: u32,
    pub covg_rev: u32,
    pub outgoing: Vec<KmerNodeId>,
    pub incoming: Vec<KmerNodeId>,
}

impl KmerNode {
    fn new(id: KmerNodeId, path: Path) -> Self {
        KmerNode {
            id,
            path,
            covg_fwd: 0,
            covg_rev: 0,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    pub fn covg(&self) -> u32 {
        self.covg_fwd + self.covg_rev
    }
}

/// DAG of `KmerNode`s for a single PRG.
#[derive(Debug, Clone)]
pub struct KmerGraph {
    pub k: usize,
    pub p: f64,
    pub num_reads: u32,
    nodes: Vec<KmerNode>,
    pub source: KmerNodeId,
    pub sink: KmerNodeId,
}

impl KmerGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: KmerNodeId) -> Option<&KmerNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> &[KmerNode] {
        &self.nodes
    }

    /// Find the id of the node carrying exactly `path`, if any.
    pub fn path_id(&self, path: &Path) -> Option<KmerNodeId> {
        self.nodes.iter().find(|n| &n.path == path).map(|n| n.id)
    }

    /// Register one read hit at `kmer_node_id`. Coverage is bumped on the
    /// matching strand; the caller is responsible for bumping `num_reads`
    /// once per read, not once per hit.
    pub fn add_hit(&mut self, kmer_node_id: KmerNodeId, is_forward_strand: bool) {
        if let Some(node) = self.nodes.get_mut(kmer_node_id as usize) {
            if is_forward_strand {
                node.covg_fwd += 1;
            } else {
                node.covg_rev += 1;
            }
        }
    }

    pub fn add_read(&mut self) {
        self.num_reads += 1;
    }

    /// Node probability per SPEC_FULL.md §4.3: a Poisson log-likelihood
    /// ratio of the "present" coverage regime against the "absent" one.
    /// Deterministic, monotone in total coverage, symmetric in the two
    /// strand counts (only their sum is used).
    pub fn prob(&self, id: KmerNodeId) -> f64 {
        if id == self.source || id == self.sink {
            return 0.0;
        }
        let Some(node) = self.node(id) else {
            return 0.0;
        };
        let c = node.covg() as f64;
        let lambda_present = (self.num_reads as f64 * (1.0 - self.p)).max(1e-9);
        let lambda_absent = (self.num_reads as f64 * self.p).max(1e-9);
        log_poisson_pmf(c, lambda_present) - log_poisson_pmf(c, lambda_absent)
    }

    /// Topological order of node ids (source first), computed via Kahn's
    /// algorithm. Ties among ready nodes are broken on lower node id so the
    /// order -- and hence `find_max_path`'s tie-breaking -- is deterministic.
    pub fn topo_order(&self) -> Result<Vec<KmerNodeId>, PandoraError> {
        let n = self.nodes.len();
        let mut indeg = vec![0u32; n];
        for node in &self.nodes {
            for &succ in &node.outgoing {
                let succ = succ as usize;
                if succ >= n {
                    return Err(PandoraError::GraphIncoherent {
                        prg_id: 0,
                        detail: format!("edge references unknown node {succ}"),
                    });
                }
                indeg[succ] += 1;
            }
        }
        let mut ready: std::collections::BTreeSet<u32> = (0..n as u32)
            .filter(|&id| indeg[id as usize] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            order.push(id);
            for &succ in &self.nodes[id as usize].outgoing {
                indeg[succ as usize] -= 1;
                if indeg[succ as usize] == 0 {
                    ready.insert(succ);
                }
            }
        }
        if order.len() != n {
            return Err(PandoraError::GraphIncoherent {
                prg_id: 0,
                detail: "kmer graph contains a cycle".to_string(),
            });
        }
        Ok(order)
    }

    /// Dynamic program over the DAG in topological order: for each node,
    /// `best[node] = prob(node) + max(best[pred] for pred in in_edges)`.
    /// Ties are broken on lower predecessor id. Traceback from the sink
    /// recovers the path.
    pub fn find_max_path(&self) -> Result<(Vec<KmerNodeId>, f64), PandoraError> {
        if self.is_empty() {
            return Ok((Vec::new(), 0.0));
        }
        let order = self.topo_order()?;
        let n = self.nodes.len();
        let mut best = vec![f64::NEG_INFINITY; n];
        let mut back: Vec<Option<KmerNodeId>> = vec![None; n];
        best[self.source as usize] = 0.0;

        for &id in &order {
            if id == self.source {
                continue;
            }
            let node = &self.nodes[id as usize];
            let mut best_pred: Option<(KmerNodeId, f64)> = None;
            for &pred in &node.incoming {
                let pred_score = best[pred as usize];
                if pred_score == f64::NEG_INFINITY {
                    continue;
                }
                match best_pred {
                    None => best_pred = Some((pred, pred_score)),
                    Some((cur_id, cur_score)) => {
                        if pred_score > cur_score
                            || (pred_score == cur_score && pred < cur_id)
                        {
                            best_pred = Some((pred, pred_score));
                        }
                    }
                }
            }
            if let Some((pred, pred_score)) = best_pred {
                best[id as usize] = pred_score + self.prob(id);
                back[id as usize] = Some(pred);
            }
        }

        if best[self.sink as usize] == f64::NEG_INFINITY {
            return Err(PandoraError::GraphIncoherent {
                prg_id: 0,
                detail: "sink is unreachable from source".to_string(),
            });
        }

        let mut path = Vec::new();
        let mut cur = self.sink;
        while cur != self.source {
            if cur != self.sink {
                path.push(cur);
            }
            cur = back[cur as usize].expect("traceback chain is broken");
        }
        path.reverse();
        Ok((path, best[self.sink as usize]))
    }

    pub fn save<P: AsRef<FsPath>>(&self, path: P) -> Result<(), PandoraError> {
        let path = path.as_ref();
        let mut writer = std::fs::File::create(path)
            .map(std::io::BufWriter::new)
            .map_err(|e| PandoraError::io(path, e))?;
        for node in &self.nodes {
            writeln!(writer, "K\t{}\t{}", node.id, node.path)
                .map_err(|e| PandoraError::io(path, e))?;
        }
        for node in &self.nodes {
            for &succ in &node.outgoing {
                writeln!(writer, "E\t{}\t{}", node.id, succ)
                    .map_err(|e| PandoraError::io(path, e))?;
            }
        }
        writeln!(writer, "P\t{}\t{}\t{}", self.k, self.p, self.num_reads)
            .map_err(|e| PandoraError::io(path, e))?;
        Ok(())
    }

    pub fn load<P: AsRef<FsPath>>(path: P) -> Result<Self, PandoraError> {
        let path_ref = path.as_ref();
        let file = std::fs::File::open(path_ref).map_err(|e| PandoraError::io(path_ref, e))?;
        let reader = BufReader::new(file);

        let mut by_id: HashMap<KmerNodeId, Path> = HashMap::new();
        let mut edges: Vec<(KmerNodeId, KmerNodeId)> = Vec::new();
        let mut trailer: Option<(usize, f64, u32)> = None;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| PandoraError::io(path_ref, e))?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.as_slice() {
                ["K", id, pos] => {
                    let id: KmerNodeId = id.parse().map_err(|_| PandoraError::MalformedIndex {
                        path: path_ref.to_path_buf(),
                        line: lineno,
                        detail: "bad node id".to_string(),
                    })?;
                    let p: Path = pos.parse().map_err(|_| PandoraError::MalformedIndex {
                        path: path_ref.to_path_buf(),
                        line: lineno,
                        detail: "bad path serialization".to_string(),
                    })?;
                    by_id.insert(id, p);
                }
                ["E", src, dst] => {
                    let src: KmerNodeId =
                        src.parse().map_err(|_| PandoraError::MalformedIndex {
                            path: path_ref.to_path_buf(),
                            line: lineno,
                            detail: "bad edge source".to_string(),
                        })?;
                    let dst: KmerNodeId =
                        dst.parse().map_err(|_| PandoraError::MalformedIndex {
                            path: path_ref.to_path_buf(),
                            line: lineno,
                            detail: "bad edge dest".to_string(),
                        })?;
                    edges.push((src, dst));
                }
                ["P", k, p, num_reads] => {
                    let k: usize = k.parse().map_err(|_| PandoraError::MalformedIndex {
                        path: path_ref.to_path_buf(),
                        line: lineno,
                        detail: "bad k".to_string(),
                    })?;
                    let p: f64 = p.parse().map_err(|_| PandoraError::MalformedIndex {
                        path: path_ref.to_path_buf(),
                        line: lineno,
                        detail: "bad p".to_string(),
                    })?;
                    let num_reads: u32 =
                        num_reads.parse().map_err(|_| PandoraError::MalformedIndex {
                            path: path_ref.to_path_buf(),
                            line: lineno,
                            detail: "bad num_reads".to_string(),
                        })?;
                    trailer = Some((k, p, num_reads));
                }
                _ => {
                    return Err(PandoraError::MalformedIndex {
                        path: path_ref.to_path_buf(),
                        line: lineno,
                        detail: format!("unrecognised line: {line}"),
                    })
                }
            }
        }

        let (k, p, num_reads) = trailer.ok_or_else(|| PandoraError::MalformedIndex {
            path: path_ref.to_path_buf(),
            line: 0,
            detail: "missing trailing P line".to_string(),
        })?;

        let n = by_id.len();
        let mut nodes: Vec<KmerNode> = (0..n as u32)
            .map(|id| {
                let path = by_id
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(Path::empty);
                KmerNode::new(id, path)
            })
            .collect();
        for (src, dst) in edges {
            nodes[src as usize].outgoing.push(dst);
            nodes[dst as usize].incoming.push(src);
        }
        for node in &mut nodes {
            node.outgoing.sort_unstable();
            node.incoming.sort_unstable();
        }

        let source = nodes
            .iter()
            .find(|n| n.incoming.is_empty())
            .map(|n| n.id)
            .unwrap_or(0);
        let sink = nodes
            .iter()
            .find(|n| n.outgoing.is_empty())
            .map(|n| n.id)
            .unwrap_or(n.saturating_sub(1) as u32);

        Ok(KmerGraph {
            k,
            p,
            num_reads,
            nodes,
            source,
            sink,
        })
    }
}

/// `ln(k!)` via the Stirling-corrected log-gamma, exact for small `k` and
/// accurate to within float precision for large `k`.
fn ln_factorial(k: f64) -> f64 {
    if k < 2.0 {
        return 0.0;
    }
    // Stirling's series: ln(n!) ~ n ln n - n + 0.5 ln(2 pi n) + 1/(12n)
    let n = k;
    n * n.ln() - n + 0.5 * (2.0 * std::f64::consts::PI * n).ln() + 1.0 / (12.0 * n)
}

fn log_poisson_pmf(k: f64, lambda: f64) -> f64 {
    k * lambda.ln() - lambda - ln_factorial(k)
}

/// Builds a `KmerGraph` from the chains of minimizer-selected paths produced
/// during sketching: each chain is an ordered sequence of `Path`s that
/// appeared as consecutive selected minimizers along one walk. Identical
/// paths anywhere in the PRG dedup to the same node id.
#[derive(Debug, Default)]
pub struct KmerGraphBuilder {
    path_to_id: HashMap<Path, KmerNodeId>,
    nodes: Vec<KmerNode>,
}

impl KmerGraphBuilder {
    pub fn new() -> Self {
        KmerGraphBuilder::default()
    }

    pub fn get_or_create(&mut self, path: &Path) -> KmerNodeId {
        if let Some(&id) = self.path_to_id.get(path) {
            return id;
        }
        let id = self.nodes.len() as KmerNodeId;
        self.nodes.push(KmerNode::new(id, path.clone()));
        self.path_to_id.insert(path.clone(), id);
        id
    }

    pub fn add_chain(&mut self, chain: &[Path]) {
        let mut prev: Option<KmerNodeId> = None;
        for path in chain {
            let id = self.get_or_create(path);
            if let Some(p) = prev {
                if p != id && !self.nodes[p as usize].outgoing.contains(&id) {
                    self.nodes[p as usize].outgoing.push(id);
                    self.nodes[id as usize].incoming.push(p);
                }
            }
            prev = Some(id);
        }
    }

    /// Finalize the graph, adding synthetic zero-probability source/sink
    /// sentinels so the invariant "unique source, unique sink" always holds
    /// even when sketching produced multiple disconnected entry/exit kmers.
    pub fn finish(mut self, k: usize, p: f64) -> KmerGraph {
        let source_id = self.nodes.len() as KmerNodeId;
        let sink_id = source_id + 1;
        let mut source = KmerNode::new(source_id, Path::empty());
        let mut sink = KmerNode::new(sink_id, Path::empty());

        let roots: Vec<KmerNodeId> = self
            .nodes
            .iter()
            .filter(|n| n.incoming.is_empty())
            .map(|n| n.id)
            .collect();
        let leaves: Vec<KmerNodeId> = self
            .nodes
            .iter()
            .filter(|n| n.outgoing.is_empty())
            .map(|n| n.id)
            .collect();

        if self.nodes.is_empty() {
            // No interior kmer nodes at all: wire source straight to sink so
            // `find_max_path` still finds a (trivial, empty) path.
            source.outgoing.push(sink_id);
            sink.incoming.push(source_id);
        } else {
            for r in &roots {
                source.outgoing.push(*r);
                self.nodes[*r as usize].incoming.push(source_id);
            }
            for l in &leaves {
                self.nodes[*l as usize].outgoing.push(sink_id);
                sink.incoming.push(*l);
            }
        }

        self.nodes.push(source);
        self.nodes.push(sink);
        for node in &mut self.nodes {
            node.outgoing.sort_unstable();
            node.incoming.sort_unstable();
        }

        KmerGraph {
            k,
            p,
            num_reads: 0,
            nodes: self.nodes,
            source: source_id,
            sink: sink_id,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prg::interval::Interval;

    fn linear_path(start: usize, end: usize) -> Path {
        Path::new(vec![Interval::new(start, end)])
    }

    #[test]
    fn find_max_path_prefers_higher_coverage() {
        // Linear 3-node chain with coverages [0, 50, 0]: the middle node's
        // path should win (SPEC_FULL.md §8 scenario 6).
        let mut b = KmerGraphBuilder::new();
        let p0 = linear_path(0, 3);
        let p1 = linear_path(3, 6);
        let p2 = linear_path(6, 9);
        b.add_chain(&[p0.clone(), p1.clone(), p2.clone()]);
        let mut g = b.finish(3, 0.01);
        g.add_read();
        for _ in 0..50 {
            g.add_hit(g.path_id(&p1).unwrap(), true);
        }
        let (path, score) = g.find_max_path().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(g.node(path[1]).unwrap().path, p1);
        assert!(score.is_finite());
    }

    #[test]
    fn empty_graph_has_empty_max_path() {
        let g = KmerGraphBuilder::new().finish(5, 0.01);
        let (path, score) = g.find_max_path().unwrap();
        assert!(path.is_empty());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn save_load_round_trip() {
        let mut b = KmerGraphBuilder::new();
        b.add_chain(&[linear_path(0, 3), linear_path(3, 6)]);
        let g = b.finish(3, 0.05);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kg.txt");
        g.save(&file).unwrap();
        let loaded = KmerGraph::load(&file).unwrap();

        assert_eq!(loaded.len(), g.len());
        assert_eq!(loaded.k, g.k);
        assert_eq!(loaded.p, g.p);
    }
}
