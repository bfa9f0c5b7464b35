//! Compiles a node path into an ordered list of events a train agent can
//! execute one at a time (spec §4.4). No teacher counterpart exists — the
//! teacher issues block/signal requests reactively rather than compiling a
//! program up front — but the closed, serializable event enum follows the
//! shape of the teacher's own `control::messages::Message`.

use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::error::TrackError;
use crate::general::Direction;
use crate::track::{Branch, Track, TrackEdge};

/// A unit Central Dispatch hands out reservations for: either a node or an
/// edge. Node reservations exist in the protocol but Dispatch grants them
/// unconditionally (see [`crate::dispatch`]) — this core has no notion of
/// two trains needing to occupy the same node body.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Reservable {
    Node(NodeIndex),
    Edge(EdgeIndex),
}

/// One step of a compiled navigation program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationEvent {
    SetDirection(Direction),
    Reserve(Reservable),
    SetSwitch(NodeIndex, Branch),
    Start,
    Stop {
        origin: NodeIndex,
        destination: NodeIndex,
        distance: u32,
    },
}

/// The output of [`compile`]: the event list to execute plus the edges it
/// reserves, in traversal order (releases follow the same order, FIFO).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub events: Vec<NavigationEvent>,
    pub reserved_edges: Vec<EdgeIndex>,
}

fn hop(track: &Track, from: NodeIndex, to: NodeIndex) -> Result<(TrackEdge, Branch, Direction), TrackError> {
    let edge = track.edge_between(from, to).ok_or(TrackError::Unreachable)?;
    let (direction, branch) = track
        .edge_branch(from, edge.id)
        .expect("edge_between only ever returns edges incident on `from`");
    Ok((edge, branch, direction))
}

/// Compiles `path` (as returned by [`Track::find_path`]) into events,
/// starting from `start_direction`. A path of fewer than two nodes compiles
/// to an empty program — there is nowhere to go.
pub fn compile(
    track: &Track,
    start_direction: Direction,
    path: &[NodeIndex],
) -> Result<CompiledProgram, TrackError> {
    if path.len() < 2 {
        return Ok(CompiledProgram {
            events: Vec::new(),
            reserved_edges: Vec::new(),
        });
    }

    let mut events = Vec::new();
    let mut reserved_edges = Vec::new();

    let (edge0, branch0, dir0) = hop(track, path[0], path[1])?;
    if dir0 != start_direction {
        events.push(NavigationEvent::SetDirection(dir0));
    }
    events.push(NavigationEvent::Reserve(Reservable::Node(path[0])));
    events.push(NavigationEvent::Reserve(Reservable::Edge(edge0.id)));
    events.push(NavigationEvent::Reserve(Reservable::Node(path[1])));
    events.push(NavigationEvent::Start);
    reserved_edges.push(edge0.id);

    let mut origin = path[0];
    let mut current_direction = dir0;
    let mut segment_len: u32 = 0;

    for i in 0..path.len() - 1 {
        let (edge, branch, direction) = if i == 0 {
            (edge0, branch0, dir0)
        } else {
            hop(track, path[i], path[i + 1])?
        };

        if direction != current_direction {
            events.push(NavigationEvent::Stop {
                origin,
                destination: path[i],
                distance: segment_len,
            });
            events.push(NavigationEvent::SetDirection(direction));
            events.push(NavigationEvent::Reserve(Reservable::Edge(edge.id)));
            events.push(NavigationEvent::Reserve(Reservable::Node(path[i + 1])));
            events.push(NavigationEvent::SetSwitch(path[i], branch));
            events.push(NavigationEvent::Start);
            reserved_edges.push(edge.id);
            origin = path[i];
            current_direction = direction;
            segment_len = 0;
        } else if i == 0 {
            events.push(NavigationEvent::SetSwitch(path[i], branch));
        } else {
            events.push(NavigationEvent::Reserve(Reservable::Edge(edge.id)));
            events.push(NavigationEvent::Reserve(Reservable::Node(path[i + 1])));
            events.push(NavigationEvent::SetSwitch(path[i], branch));
            reserved_edges.push(edge.id);
        }

        segment_len += edge.length;
    }

    events.push(NavigationEvent::Stop {
        origin,
        destination: *path.last().expect("checked len >= 2 above"),
        distance: segment_len,
    });

    Ok(CompiledProgram { events, reserved_edges })
}
