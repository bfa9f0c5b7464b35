//! Node/edge storage: a `petgraph` arena indexed by `NodeIndex`/`EdgeIndex`,
//! with each node holding up to two forward and two reverse edge slots and a
//! switch state that selects between them (spec §3, §4.1, §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

use crate::error::TrackError;
use crate::general::Direction;

use super::pathfinding;

/// Which of a node's (at most two) outgoing edges in a given direction a
/// train takes. A node with only one edge in a direction is always
/// `Straight`; `Curve` only exists once a second edge has been connected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Branch {
    Straight,
    Curve,
}

#[derive(Debug)]
struct NodeData {
    name: String,
    /// `false` = straight, `true` = curve. An atomic rather than a lock
    /// around the whole graph: topology is immutable after `build`, and
    /// switch state is the one field an agent holding the covering
    /// reservation may flip concurrently with other agents reading it.
    switch_curve: AtomicBool,
    forward: [Option<EdgeIndex>; 2],
    reverse: [Option<EdgeIndex>; 2],
}

#[derive(Debug, Clone, Copy)]
struct EdgeData {
    length: u32,
    reverse: EdgeIndex,
}

/// A read-only view of one directed edge, assembled on demand from the
/// arena — never stored as a node's field directly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TrackEdge {
    pub id: EdgeIndex,
    pub source: NodeIndex,
    pub destination: NodeIndex,
    pub length: u32,
    /// The automatically-created edge running the opposite way.
    pub reverse: EdgeIndex,
}

/// The immutable track topology plus each node's live switch state.
///
/// Shared as `Arc<Track>` across every train agent and Central Dispatch —
/// construction finishes once (via [`Builder`]) and nothing about the graph
/// shape changes afterward.
#[derive(Debug)]
pub struct Track {
    graph: DiGraph<NodeData, EdgeData>,
    names: HashMap<String, NodeIndex>,
}

impl Track {
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.names.get(name).copied()
    }

    pub fn node_name(&self, node: NodeIndex) -> &str {
        &self.graph[node].name
    }

    pub fn switch_state(&self, node: NodeIndex) -> Branch {
        if self.graph[node].switch_curve.load(Ordering::Acquire) {
            Branch::Curve
        } else {
            Branch::Straight
        }
    }

    /// Sets a node's switch state. A no-op request to stay `Straight` on a
    /// node with no curve edge always succeeds; requesting `Curve` there is
    /// the caller's error to avoid (see `SequencingError::SwitchCurveOnStraightNode`).
    pub fn set_switch_state(&self, node: NodeIndex, branch: Branch) {
        self.graph[node]
            .switch_curve
            .store(branch == Branch::Curve, Ordering::Release);
    }

    /// Number of edges (forward + reverse) incident on `node`.
    pub fn edge_count(&self, node: NodeIndex) -> usize {
        let n = &self.graph[node];
        n.forward.iter().flatten().count() + n.reverse.iter().flatten().count()
    }

    pub fn edge(&self, id: EdgeIndex) -> TrackEdge {
        let (source, destination) = self
            .graph
            .edge_endpoints(id)
            .expect("TrackEdge ids never outlive their Track");
        let data = self.graph[id];
        TrackEdge {
            id,
            source,
            destination,
            length: data.length,
            reverse: data.reverse,
        }
    }

    /// The edge rule for leaving `node` while travelling `direction` (spec
    /// §4.3): the sole edge if there is only one, otherwise the edge picked
    /// out by the node's current switch state. `None` at a dead end.
    pub fn next_edge(&self, node: NodeIndex, direction: Direction) -> Option<TrackEdge> {
        let n = &self.graph[node];
        let slots = match direction {
            Direction::Forward => &n.forward,
            Direction::Backward => &n.reverse,
        };
        match (slots[0], slots[1]) {
            (None, None) => None,
            (Some(straight), None) => Some(self.edge(straight)),
            (Some(straight), Some(curve)) => Some(self.edge(match self.switch_state(node) {
                Branch::Straight => straight,
                Branch::Curve => curve,
            })),
            (None, Some(_)) => unreachable!("a curve slot is only ever filled after straight"),
        }
    }

    /// The edge directly connecting `from` to `to`, if one of `from`'s
    /// forward or reverse slots leads there. Used by the navigation
    /// compiler to resolve each hop of a computed node path.
    pub fn edge_between(&self, from: NodeIndex, to: NodeIndex) -> Option<TrackEdge> {
        let n = &self.graph[from];
        n.forward
            .iter()
            .chain(n.reverse.iter())
            .flatten()
            .map(|slot| self.edge(*slot))
            .find(|edge| edge.destination == to)
    }

    /// Which (direction, branch) slot of `node` the edge `id` occupies, if
    /// `node` is that edge's source.
    pub fn edge_branch(&self, node: NodeIndex, id: EdgeIndex) -> Option<(Direction, Branch)> {
        let n = &self.graph[node];
        if n.forward[0] == Some(id) {
            Some((Direction::Forward, Branch::Straight))
        } else if n.forward[1] == Some(id) {
            Some((Direction::Forward, Branch::Curve))
        } else if n.reverse[0] == Some(id) {
            Some((Direction::Backward, Branch::Straight))
        } else if n.reverse[1] == Some(id) {
            Some((Direction::Backward, Branch::Curve))
        } else {
            None
        }
    }

    /// Outgoing edges from `node` in fixed iteration order — forward
    /// straight, forward curve, and (only if `allow_backward`) reverse
    /// straight, reverse curve. Pathfinding relies on this exact order to
    /// make its tie-breaking deterministic.
    pub(crate) fn ordered_outgoing(&self, node: NodeIndex, allow_backward: bool) -> Vec<TrackEdge> {
        let n = &self.graph[node];
        let mut out = Vec::with_capacity(4);
        out.extend(n.forward.iter().flatten().map(|slot| self.edge(*slot)));
        if allow_backward {
            out.extend(n.reverse.iter().flatten().map(|slot| self.edge(*slot)));
        }
        out
    }

    /// Every edge index in the graph, in no particular order. Used once, at
    /// startup, to seed Central Dispatch's reservation table with one
    /// record per edge.
    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    /// Shortest path (by summed edge length) from `start` to `finish`, with
    /// ordered-neighbour tie-breaking (spec §4.1). `find_path(x, x)` always
    /// returns `[x]` without touching the graph.
    pub fn find_path(
        &self,
        start: NodeIndex,
        finish: NodeIndex,
        allow_backward_movement: bool,
    ) -> Result<Vec<NodeIndex>, TrackError> {
        pathfinding::dijkstra(self, start, finish, allow_backward_movement)
    }
}

/// Builds a [`Track`] one node/edge at a time, then freezes it.
///
/// Connecting `from` to `to` also creates the equal-length reverse edge
/// `to -> from` in the same call — this core never asks for a one-way track
/// segment (spec §4.1's "a connection is always bidirectional" rule).
#[derive(Debug, Default)]
pub struct Builder {
    graph: DiGraph<NodeData, EdgeData>,
    names: HashMap<String, NodeIndex>,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeIndex, TrackError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(TrackError::DuplicateNode(name));
        }
        let idx = self.graph.add_node(NodeData {
            name: name.clone(),
            switch_curve: AtomicBool::new(false),
            forward: [None, None],
            reverse: [None, None],
        });
        self.names.insert(name, idx);
        Ok(idx)
    }

    fn next_forward_slot(&self, node: NodeIndex) -> Result<usize, TrackError> {
        let slots = &self.graph[node].forward;
        if slots[0].is_none() {
            Ok(0)
        } else if slots[1].is_none() {
            Ok(1)
        } else {
            Err(TrackError::ForwardEdgesFull(self.graph[node].name.clone()))
        }
    }

    fn next_reverse_slot(&self, node: NodeIndex) -> Result<usize, TrackError> {
        let slots = &self.graph[node].reverse;
        if slots[0].is_none() {
            Ok(0)
        } else if slots[1].is_none() {
            Ok(1)
        } else {
            Err(TrackError::ReverseEdgesFull(self.graph[node].name.clone()))
        }
    }

    /// Connects `from` to `to` with the given length. Fails if `from` has no
    /// free forward slot or `to` has no free reverse slot — each node may
    /// have at most two edges of either kind.
    pub fn connect(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        length: u32,
    ) -> Result<(EdgeIndex, EdgeIndex), TrackError> {
        let from_slot = self.next_forward_slot(from)?;
        let to_slot = self.next_reverse_slot(to)?;

        let forward = self
            .graph
            .add_edge(from, to, EdgeData { length, reverse: EdgeIndex::end() });
        let reverse = self.graph.add_edge(to, from, EdgeData { length, reverse: forward });
        self.graph[forward].reverse = reverse;

        self.graph[from].forward[from_slot] = Some(forward);
        self.graph[to].reverse[to_slot] = Some(reverse);
        Ok((forward, reverse))
    }

    pub fn build(self) -> Track {
        Track {
            graph: self.graph,
            names: self.names,
        }
    }
}
