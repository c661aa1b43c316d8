//! `LocalGraph`: the per-locus DAG of alphabetic sequence nodes produced by
//! decomposing one PRG string.

use indexmap::IndexMap;

use super::interval::Interval;
use super::path::Path;
use crate::err::PandoraError;

pub type NodeId = u32;

/// One contiguous, alphabetic-only substring of the PRG.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub id: NodeId,
    pub sequence: String,
    pub interval: Interval,
    pub outgoing: Vec<NodeId>,
    /// Per-node read coverage, accumulated during mapping.
    pub covg: u32,
    /// Set by the (external, out-of-scope) noise filtering pass.
    pub skip: bool,
}

impl LocalNode {
    fn new(id: NodeId, sequence: String, interval: Interval) -> Self {
        LocalNode {
            id,
            sequence,
            interval,
            outgoing: Vec::new(),
            covg: 0,
            skip: false,
        }
    }
}

/// Arena-owned DAG of `LocalNode`s for a single PRG. Node 0 is always the
/// unique source. Edges are appended during construction and are frozen
/// (read-only) afterwards.
#[derive(Debug, Clone, Default)]
pub struct LocalGraph {
    nodes: IndexMap<NodeId, LocalNode>,
    next_id: NodeId,
}

impl LocalGraph {
    pub fn new() -> Self {
        LocalGraph::default()
    }

    pub fn add_node(&mut self, id: NodeId, sequence: String, interval: Interval) -> NodeId {
        self.nodes.insert(id, LocalNode::new(id, sequence, interval));
        self.next_id = self.next_id.max(id + 1);
        id
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let node = self
            .nodes
            .get_mut(&from)
            .expect("add_edge: unknown source node");
        node.outgoing.push(to);
    }

    pub fn node(&self, id: NodeId) -> Option<&LocalNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut LocalNode> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LocalNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn sinks(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.outgoing.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Check the reachability invariant: every non-source node is reachable
    /// from node 0, and every non-sink node reaches some sink.
    pub fn check_coherent(&self) -> Result<(), PandoraError> {
        if self.nodes.is_empty() {
            return Ok(());
        }
        if !self.nodes.contains_key(&0) {
            return Err(PandoraError::InvariantViolation {
                detail: "LocalGraph has no node 0 (source)".to_string(),
            });
        }

        // Forward reachability from the source.
        let mut reachable = vec![false; self.next_id as usize];
        let mut stack = vec![0u32];
        reachable[0] = true;
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for &succ in &node.outgoing {
                if !reachable[succ as usize] {
                    reachable[succ as usize] = true;
                    stack.push(succ);
                }
            }
        }
        for node in self.nodes.values() {
            if !reachable[node.id as usize] {
                return Err(PandoraError::InvariantViolation {
                    detail: format!("node {} is not reachable from source", node.id),
                });
            }
        }

        // Backward reachability to a sink: a node reaches a sink iff some
        // walk following outgoing edges terminates at a node with no
        // outgoing edges. Since the graph is a finite DAG, compute this with
        // a memoized DFS.
        let sinks = self.sinks();
        if sinks.is_empty() {
            return Err(PandoraError::InvariantViolation {
                detail: "LocalGraph has no sink".to_string(),
            });
        }
        let mut reaches_sink = vec![None; self.next_id as usize];
        for node in self.nodes.values() {
            self.reaches_sink_memo(node.id, &mut reaches_sink)?;
        }
        for node in self.nodes.values() {
            if reaches_sink[node.id as usize] != Some(true) {
                return Err(PandoraError::InvariantViolation {
                    detail: format!("node {} does not reach a sink", node.id),
                });
            }
        }
        Ok(())
    }

    fn reaches_sink_memo(
        &self,
        id: NodeId,
        memo: &mut [Option<bool>],
    ) -> Result<bool, PandoraError> {
        if let Some(v) = memo[id as usize] {
            return Ok(v);
        }
        let node = self.nodes.get(&id).ok_or_else(|| PandoraError::InvariantViolation {
            detail: format!("edge refers to unknown node {id}"),
        })?;
        if node.outgoing.is_empty() {
            memo[id as usize] = Some(true);
            return Ok(true);
        }
        // Guard against cycles (should not occur in a DAG, but avoid infinite
        // recursion on malformed input).
        memo[id as usize] = Some(false);
        let mut any = false;
        for &succ in &node.outgoing.clone() {
            if self.reaches_sink_memo(succ, memo)? {
                any = true;
            }
        }
        memo[id as usize] = Some(any);
        Ok(any)
    }

    /// Enumerate every distinct walk of exactly `length` bases starting at
    /// offset `pos` within `start_node`, returning each as a `Path`.
    pub fn walk(&self, start_node: NodeId, pos: usize, length: usize) -> Vec<Path> {
        let mut out = Vec::new();
        self.walk_rec(start_node, pos, length, Path::empty(), &mut out);
        out
    }

    fn walk_rec(
        &self,
        node_id: NodeId,
        pos: usize,
        remaining: usize,
        mut acc: Path,
        out: &mut Vec<Path>,
    ) {
        if remaining == 0 {
            out.push(acc);
            return;
        }
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let available = node.interval.end - pos;
        let take = available.min(remaining);
        if take == 0 {
            return;
        }
        acc.push(Interval::new(pos, pos + take));
        let left = remaining - take;
        if left == 0 {
            out.push(acc);
            return;
        }
        if node.outgoing.is_empty() {
            // Walk runs off the end of the graph before reaching `length`;
            // this walk cannot be completed and is simply dropped.
            return;
        }
        for &succ in &node.outgoing {
            if let Some(succ_node) = self.nodes.get(&succ) {
                self.walk_rec(succ, succ_node.interval.start, left, acc.clone(), out);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn linear_graph() -> LocalGraph {
        // 0:"ACGT" -> 1:"A" -> 3:"CCGG"
        //          -> 2:"T" ->
        let mut g = LocalGraph::new();
        g.add_node(0, "ACGT".to_string(), Interval::new(0, 4));
        g.add_node(1, "A".to_string(), Interval::new(4, 5));
        g.add_node(2, "T".to_string(), Interval::new(5, 6));
        g.add_node(3, "CCGG".to_string(), Interval::new(6, 10));
        g.add_edge(0, 1);
        g.add_edge(0, 2);
        g.add_edge(1, 3);
        g.add_edge(2, 3);
        g
    }

    #[test]
    fn coherent_graph_passes_check() {
        let g = linear_graph();
        assert!(g.check_coherent().is_ok());
    }

    #[test]
    fn disconnected_node_fails_check() {
        let mut g = linear_graph();
        g.add_node(4, "GGG".to_string(), Interval::new(10, 13));
        assert!(g.check_coherent().is_err());
    }

    #[test]
    fn walk_enumerates_all_branches() {
        let g = linear_graph();
        // From node 0, position 3 (last base of "ACGT"), walk of length 3
        // should produce two paths: one through node 1, one through node 2.
        let walks = g.walk(0, 3, 3);
        assert_eq!(walks.len(), 2);
        for w in &walks {
            assert_eq!(w.length(), 3);
        }
    }
}
