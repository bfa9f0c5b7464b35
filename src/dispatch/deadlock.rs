//! Cycle check over the `holds → waits-for` relation (spec §4.8). No
//! teacher counterpart — this resolves the distilled spec's open question
//! on head-on deadlocks — built directly from Central Dispatch's own
//! bookkeeping rather than any extra agent cooperation.

use std::collections::HashSet;

use petgraph::graph::EdgeIndex;

use crate::general::TrainId;

use super::DispatchState;

/// Would granting `waiting_train` a wait-slot on `wanted_edge` close a
/// cycle? Walks from `wanted_edge`'s current holder through the chain of
/// "this train is itself waiting on edge X, whose holder is Y" — if that
/// walk ever reaches `waiting_train`, a set of trains are each waiting,
/// transitively, on one another's held edges.
pub(super) fn would_deadlock(state: &DispatchState, waiting_train: &TrainId, wanted_edge: EdgeIndex) -> bool {
    let Some(record) = state.reservations.get(&wanted_edge) else {
        return false;
    };
    let Some(mut current) = record.held_by.clone() else {
        return false; // edge is free; this reservation will be granted immediately
    };

    let mut seen = HashSet::new();
    loop {
        if current == *waiting_train {
            return true;
        }
        if !seen.insert(current.clone()) {
            return false; // cycle found, but it loops back on itself without involving waiting_train
        }
        current = match state.waiting_on.get(&current) {
            None => return false, // chain ends: `current` isn't blocked on anything
            Some(edge) => match state.reservations.get(edge).and_then(|r| r.held_by.clone()) {
                None => return false,
                Some(holder) => holder,
            },
        };
    }
}
