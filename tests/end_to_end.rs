//! End-to-end scenarios over the public API (spec §8): spawn a train,
//! drive it across a track, and observe the externally-visible
//! telemetry/reservation/pause state rather than internal module state.

use std::sync::Arc;
use std::time::Duration;

use trainlogic::error::{CoreError, ProtocolError};
use trainlogic::{Direction, Dispatch, SimulationConfig, TrackBuilder, TrainAgent, TrainId};

fn fast_config() -> SimulationConfig {
    // Same acceleration profile as the spec defaults; only the tick period
    // changes, so a multi-second simulated drive advances in a handful of
    // real milliseconds under a paused clock.
    SimulationConfig {
        tick: Duration::from_millis(10),
        telemetry_every: 10,
        ..SimulationConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn a_train_drives_a_straight_line_and_arrives_stopped() {
    let mut builder = TrackBuilder::new();
    let a = builder.add_node("A").unwrap();
    let b = builder.add_node("B").unwrap();
    let c = builder.add_node("C").unwrap();
    builder.connect(a, b, 50).unwrap();
    builder.connect(b, c, 50).unwrap();
    let track = Arc::new(builder.build());

    let (dispatch, outbound_rx) = Dispatch::new(track);
    tokio::spawn(dispatch.clone().run(outbound_rx));

    let handle = TrainAgent::spawn(dispatch, TrainId::new("T1"), a, Direction::Forward, fast_config())
        .await
        .unwrap();
    handle.navigate_to(c);

    let mut telemetry = handle.telemetry();
    let mut destination = handle.current_destination();

    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            destination.changed().await.unwrap();
            if destination.borrow().is_none() {
                break; // navigate_to cleared it: the program ran to completion
            }
        }
    })
    .await
    .expect("navigation did not complete in time");

    let final_telemetry = *telemetry.borrow();
    assert_eq!(final_telemetry.node, c);
    assert_eq!(final_telemetry.velocity, 0.0);
    assert!(handle.reservations().borrow().is_empty(), "train should have released every edge it passed");
}

#[tokio::test(start_paused = true)]
async fn a_second_train_waits_for_the_first_to_clear_a_shared_edge() {
    let mut builder = TrackBuilder::new();
    let a = builder.add_node("A").unwrap();
    let b = builder.add_node("B").unwrap();
    let (shared_edge, _reverse) = builder.connect(a, b, 20).unwrap();
    let track = Arc::new(builder.build());

    let (dispatch, outbound_rx) = Dispatch::new(track);
    tokio::spawn(dispatch.clone().run(outbound_rx));

    let leader = TrainAgent::spawn(dispatch.clone(), TrainId::new("leader"), a, Direction::Forward, fast_config())
        .await
        .unwrap();
    let follower_start = {
        // The follower starts already parked at A too, behind the leader;
        // it will block on the same edge reservation until the leader
        // releases it.
        a
    };
    let follower = TrainAgent::spawn(
        dispatch.clone(),
        TrainId::new("follower"),
        follower_start,
        Direction::Forward,
        fast_config(),
    )
    .await
    .unwrap();

    leader.navigate_to(b);

    let mut holder = dispatch.reservation_holder(shared_edge).unwrap();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if holder.borrow().as_ref() == Some(&TrainId::new("leader")) {
                break;
            }
            holder.changed().await.unwrap();
        }
    })
    .await
    .expect("leader never acquired the shared edge");

    // The follower now asks for the same edge; it must not be granted
    // while the leader still holds it.
    follower.navigate_to(b);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*holder.borrow(), Some(TrainId::new("leader")));

    // Once the leader arrives and releases, the follower is granted next.
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if holder.borrow().as_ref() == Some(&TrainId::new("follower")) {
                break;
            }
            holder.changed().await.unwrap();
        }
    })
    .await
    .expect("follower was never granted the edge after the leader released it");
}

#[tokio::test(start_paused = true)]
async fn spawning_a_second_train_under_the_same_name_fails() {
    let mut builder = TrackBuilder::new();
    let a = builder.add_node("A").unwrap();
    let track = Arc::new(builder.build());

    let (dispatch, outbound_rx) = Dispatch::new(track);
    tokio::spawn(dispatch.clone().run(outbound_rx));

    let _first = TrainAgent::spawn(dispatch.clone(), TrainId::new("T1"), a, Direction::Forward, fast_config())
        .await
        .unwrap();
    let second = TrainAgent::spawn(dispatch, TrainId::new("T1"), a, Direction::Forward, fast_config()).await;

    assert!(matches!(
        second,
        Err(CoreError::Protocol(ProtocolError::TrainNameCollision(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn an_unreachable_destination_raises_an_exception_and_pauses_the_world() {
    let mut builder = TrackBuilder::new();
    let a = builder.add_node("A").unwrap();
    let _isolated = builder.add_node("Island").unwrap();
    let track = Arc::new(builder.build());
    let island = track.node_by_name("Island").unwrap();

    let (dispatch, outbound_rx) = Dispatch::new(track);
    tokio::spawn(dispatch.clone().run(outbound_rx));

    let handle = TrainAgent::spawn(dispatch.clone(), TrainId::new("T1"), a, Direction::Forward, fast_config())
        .await
        .unwrap();
    handle.navigate_to(island);

    let mut paused = dispatch.pause_signal();
    tokio::time::timeout(Duration::from_secs(30), async {
        while !*paused.borrow() {
            paused.changed().await.unwrap();
        }
    })
    .await
    .expect("dispatch never paused after the agent's exception");
}
