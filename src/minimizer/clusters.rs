//! Grouping per-read `MinimizerHit`s by `(read_id, prg_id, strand)` into
//! co-linear clusters.

use std::collections::{BTreeMap, BTreeSet};

use super::hits::{Hits, MinimizerHit};
use crate::prg::path::Path;

fn path_pos(path: &Path) -> usize {
    path.intervals().first().map(|i| i.start).unwrap_or(0)
}

/// A maximal, co-linear run of hits sharing `(read_id, prg_id, strand)`.
pub type Cluster = BTreeSet<MinimizerHit>;

/// Partition `hits` by `(read_id, prg_id, strand)`, then within each
/// partition scan in read-offset order, starting a new cluster whenever the
/// read-offset gap or the PRG-path-position gap to the previous hit exceeds
/// `max_diff`, or the PRG path moves backwards relative to the strand
/// direction. Clusters smaller than `min_cluster_size` are discarded.
pub fn cluster_hits(hits: &Hits, max_diff: usize, min_cluster_size: usize) -> Vec<Cluster> {
    let mut partitions: BTreeMap<(u32, u32, bool), Vec<&MinimizerHit>> = BTreeMap::new();
    for hit in hits.iter() {
        partitions
            .entry((hit.read_id, hit.prg_id, hit.is_forward_strand))
            .or_default()
            .push(hit);
    }

    let mut clusters = Vec::new();
    for ((_, _, is_forward), group) in partitions {
        let mut current: Vec<&MinimizerHit> = Vec::new();
        let mut prev: Option<&MinimizerHit> = None;

        for hit in group {
            let breaks = match prev {
                None => false,
                Some(p) => {
                    let read_gap = hit.read_start_pos.abs_diff(p.read_start_pos);
                    let prg_gap = path_pos(&hit.prg_path).abs_diff(path_pos(&p.prg_path));
                    let moves_backward = if is_forward {
                        path_pos(&hit.prg_path) < path_pos(&p.prg_path)
                    } else {
                        path_pos(&hit.prg_path) > path_pos(&p.prg_path)
                    };
                    read_gap > max_diff || prg_gap > max_diff || moves_backward
                }
            };
            if breaks && !current.is_empty() {
                flush_cluster(&mut clusters, &current, min_cluster_size);
                current.clear();
            }
            current.push(hit);
            prev = Some(hit);
        }
        flush_cluster(&mut clusters, &current, min_cluster_size);
    }

    clusters.sort_by(cluster_order);
    clusters
}

fn flush_cluster(clusters: &mut Vec<Cluster>, current: &[&MinimizerHit], min_cluster_size: usize) {
    if current.len() >= min_cluster_size {
        clusters.push(current.iter().map(|h| (*h).clone()).collect());
    }
}

/// Read id ascending, then cluster size descending (larger clusters first),
/// then the natural order of the smallest hit -- this is the ordering
/// downstream consumers rely on (SPEC_FULL.md §4.4 point 3).
fn cluster_order(a: &Cluster, b: &Cluster) -> std::cmp::Ordering {
    let a_first = a.iter().next();
    let b_first = b.iter().next();
    match (a_first, b_first) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(af), Some(bf)) => af
            .read_id
            .cmp(&bf.read_id)
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| af.cmp(bf)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prg::interval::Interval;

    fn hit(read_id: u32, pos: usize, p: usize) -> MinimizerHit {
        MinimizerHit {
            read_id,
            prg_id: 0,
            is_forward_strand: true,
            read_start_pos: pos,
            prg_path: Path::new(vec![Interval::new(p, p + 3)]),
            kmer_node_id: 0,
        }
    }

    #[test]
    fn colinear_hits_form_one_cluster() {
        let mut hits = Hits::new();
        hits.insert(hit(0, 0, 0));
        hits.insert(hit(0, 10, 10));
        hits.insert(hit(0, 20, 20));
        let clusters = cluster_hits(&hits, 5, 1);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }

    #[test]
    fn large_gap_splits_into_two_clusters() {
        let mut hits = Hits::new();
        hits.insert(hit(0, 0, 0));
        hits.insert(hit(0, 1000, 1000));
        let clusters = cluster_hits(&hits, 5, 1);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn backwards_prg_movement_splits_cluster() {
        let mut hits = Hits::new();
        hits.insert(hit(0, 0, 10));
        hits.insert(hit(0, 5, 0)); // prg path moves backwards on forward strand
        let clusters = cluster_hits(&hits, 100, 1);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn clusters_below_min_size_are_discarded() {
        let mut hits = Hits::new();
        hits.insert(hit(0, 0, 0));
        let clusters = cluster_hits(&hits, 5, 2);
        assert!(clusters.is_empty());
    }

    #[test]
    fn ordering_prefers_lower_read_id_then_larger_cluster() {
        let mut hits = Hits::new();
        hits.insert(hit(1, 0, 0));
        hits.insert(hit(1, 5, 5));
        hits.insert(hit(0, 0, 0));
        let clusters = cluster_hits(&hits, 100, 1);
        assert_eq!(clusters[0].iter().next().unwrap().read_id, 0);
        assert_eq!(clusters[1].len(), 2);
    }
}
