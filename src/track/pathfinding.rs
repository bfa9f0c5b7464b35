//! Hand-rolled Dijkstra over [`Track`](super::graph::Track) rather than
//! `petgraph::algo::dijkstra`/`astar`: spec §4.1 requires a deterministic
//! tie-break (shortest paths of equal length resolve to whichever one the
//! fixed straight-then-curve, forward-then-reverse neighbour order reaches
//! first) and a typed `Unreachable` error instead of a partial distance map.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::NodeIndex;

use crate::error::TrackError;

use super::graph::Track;

pub(crate) fn dijkstra(
    track: &Track,
    start: NodeIndex,
    finish: NodeIndex,
    allow_backward_movement: bool,
) -> Result<Vec<NodeIndex>, TrackError> {
    if start == finish {
        return Ok(vec![start]);
    }

    let mut dist: HashMap<NodeIndex, u32> = HashMap::new();
    let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(start, 0);
    heap.push(Reverse((0u32, start)));

    while let Some(Reverse((cost, node))) = heap.pop() {
        if node == finish {
            break;
        }
        if cost > *dist.get(&node).unwrap_or(&u32::MAX) {
            continue; // stale entry superseded by a shorter one already relaxed
        }
        for edge in track.ordered_outgoing(node, allow_backward_movement) {
            let candidate = cost + edge.length;
            if candidate < *dist.get(&edge.destination).unwrap_or(&u32::MAX) {
                dist.insert(edge.destination, candidate);
                prev.insert(edge.destination, node);
                heap.push(Reverse((candidate, edge.destination)));
            }
        }
    }

    if !dist.contains_key(&finish) {
        return Err(TrackError::Unreachable);
    }

    let mut path = vec![finish];
    let mut cursor = finish;
    while cursor != start {
        cursor = *prev
            .get(&cursor)
            .expect("every node with a recorded distance has a predecessor");
        path.push(cursor);
    }
    path.reverse();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::super::graph::Builder;
    use super::*;

    /// The four-node square from spec §4.1: A-B=100 (straight), A-C=50
    /// (curve), B-C=50, C-D=50, D-A=50. With backward movement allowed the
    /// reverse of D->A (A->D, 50) beats the forward-only route through
    /// B or C.
    fn square() -> (Track, NodeIndex, NodeIndex, NodeIndex, NodeIndex) {
        let mut b = Builder::new();
        let a = b.add_node("A").unwrap();
        let bb = b.add_node("B").unwrap();
        let c = b.add_node("C").unwrap();
        let d = b.add_node("D").unwrap();
        b.connect(a, bb, 100).unwrap();
        b.connect(a, c, 50).unwrap();
        b.connect(bb, c, 50).unwrap();
        b.connect(c, d, 50).unwrap();
        b.connect(d, a, 50).unwrap();
        (b.build(), a, bb, c, d)
    }

    #[test]
    fn reflexive_path_is_trivial() {
        let (track, a, ..) = square();
        assert_eq!(track.find_path(a, a, true).unwrap(), vec![a]);
    }

    #[test]
    fn backward_movement_shortcuts_through_the_reverse_edge() {
        let (track, a, _b, _c, d) = square();
        assert_eq!(track.find_path(a, d, true).unwrap(), vec![a, d]);
    }

    #[test]
    fn forward_only_goes_the_long_way_around() {
        let (track, a, _b, c, d) = square();
        assert_eq!(track.find_path(a, d, false).unwrap(), vec![a, c, d]);
    }

    #[test]
    fn unreachable_destination_is_a_typed_error() {
        let mut b = Builder::new();
        let a = b.add_node("A").unwrap();
        let isolated = b.add_node("Island").unwrap();
        let track = b.build();
        assert_eq!(
            track.find_path(a, isolated, true),
            Err(TrackError::Unreachable)
        );
    }
}

/// Property-based checks of spec §8's pathfinding laws — adjacency (every
/// consecutive pair in a returned path is a real edge) and minimality (the
/// path's summed length equals the track's total length, i.e. it never
/// backtracks) — over randomly generated chain tracks.
#[cfg(test)]
mod path_laws {
    use super::super::graph::Builder;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chain_path_is_adjacent_and_minimal(lengths in proptest::collection::vec(1u32..50, 1..8)) {
            let mut builder = Builder::new();
            let mut nodes = Vec::new();
            for i in 0..=lengths.len() {
                nodes.push(builder.add_node(format!("n{i}")).unwrap());
            }
            for (i, &length) in lengths.iter().enumerate() {
                builder.connect(nodes[i], nodes[i + 1], length).unwrap();
            }
            let track = builder.build();

            let path = track
                .find_path(nodes[0], *nodes.last().unwrap(), false)
                .unwrap();
            prop_assert_eq!(&path, &nodes);

            let mut total = 0u32;
            for pair in path.windows(2) {
                let edge = track
                    .edge_between(pair[0], pair[1])
                    .expect("adjacent nodes in a returned path are always directly connected");
                total += edge.length;
            }
            prop_assert_eq!(total, lengths.iter().sum::<u32>());
        }
    }
}
