//! The track graph: nodes, directed edges with automatic reverses, switch
//! state, and shortest-path routing (spec §3, §4.1).
//!
//! Grounded on the teacher's `control::rail_system::rail_graph` (`LocoGraph`,
//! `shortest_path`) and `control::rail_system::railroad::Builder`
//! (one-shot edge construction, `can_add_neighbour`).

mod graph;
mod pathfinding;

pub use graph::{Branch, Builder, Track, TrackEdge};
