//! End-to-end tests for the trivia cluster SDK against the in-process mock
//! cluster.
//!
//! ## Test Categories
//!
//! - **Leader discovery**: probe ordering, TTL cache, stale fallback
//! - **Realtime sessions**: frame delivery, malformed-frame tolerance
//! - **Failover**: transparent reconnection to a new leader
//! - **Diagnostics**: heartbeat sweep

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use tokio::sync::broadcast;
use trivia_cluster_sdk::{
    ClientConfig, ClusterClient, ConnectionState, LocatorConfig, RetryPolicy, SdkError,
    SessionEvent, mock::MockCluster,
};

// ============================================================================
// Helpers
// ============================================================================

/// Config with production-like timing against the given cluster.
fn default_config(cluster: &MockCluster) -> ClientConfig {
    ClientConfig::builder()
        .with_candidates(cluster.endpoints())
        .build()
        .expect("valid config")
}

/// Config with short TTL and fast reconnects for failover scenarios.
fn fast_config(cluster: &MockCluster) -> ClientConfig {
    ClientConfig::builder()
        .with_candidates(cluster.endpoints())
        .with_locator(
            LocatorConfig::builder()
                .ttl(Duration::from_millis(100))
                .probe_timeout(Duration::from_millis(500))
                .build(),
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .with_max_attempts(5)
                .with_base_delay(Duration::from_millis(20))
                .with_growth_factor(1.0)
                .with_delay_cap(Duration::from_millis(50))
                .with_jitter_window(Duration::ZERO)
                .build(),
        )
        .with_connect_timeout(Duration::from_millis(500))
        .build()
        .expect("valid config")
}

/// Waits until `predicate` holds, polling every 10ms for up to 5s.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// Receives events until one matches, with a 5s overall deadline.
async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_open(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Open { .. })
}

fn is_frame(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Frame(_))
}

// ============================================================================
// Leader discovery
// ============================================================================

#[tokio::test]
async fn resolve_returns_first_reachable_candidate() {
    let cluster = MockCluster::start(3).await.unwrap();
    cluster.set_leader(Some(2));
    cluster.set_down(0, true);
    cluster.set_down(1, true);

    let client = ClusterClient::new(default_config(&cluster));

    let leader = client.leader_url(false).await.expect("leader resolves");
    assert_eq!(leader.as_str().trim_end_matches('/'), cluster.endpoint(2));

    let cached = client.locator().cached().expect("discovery cached");
    assert_eq!(cached.candidate_index, 2);

    cluster.shutdown();
}

#[tokio::test]
async fn second_resolve_within_ttl_issues_no_probes() {
    let cluster = MockCluster::start(3).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(default_config(&cluster));

    let first = client.leader_url(false).await.unwrap();
    let probes_after_first = cluster.total_leader_probes();

    let second = client.leader_url(false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cluster.total_leader_probes(), probes_after_first, "cache hit must not probe");

    cluster.shutdown();
}

#[tokio::test]
async fn resolve_after_ttl_reprobes() {
    let cluster = MockCluster::start(2).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));

    client.leader_url(false).await.unwrap();
    let probes_after_first = cluster.total_leader_probes();

    tokio::time::sleep(Duration::from_millis(250)).await;
    client.leader_url(false).await.unwrap();

    assert!(cluster.total_leader_probes() > probes_after_first, "expired cache must re-probe");

    cluster.shutdown();
}

#[tokio::test]
async fn stale_cache_served_once_then_fresh_round_forced() {
    let cluster = MockCluster::start(2).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));

    let leader = client.leader_url(false).await.unwrap();

    // Cluster goes dark; the cache entry outlives its TTL.
    cluster.set_down(0, true);
    cluster.set_down(1, true);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Degraded fallback: the stale address comes back after a failed round.
    let probes_before = cluster.total_leader_probes();
    let stale = client.leader_url(false).await.expect("stale fallback");
    assert_eq!(stale, leader);
    assert!(cluster.total_leader_probes() > probes_before, "fallback still probes first");

    // The fallback is marked expired: the next call probes again too.
    let probes_before = cluster.total_leader_probes();
    let _ = client.leader_url(false).await;
    assert!(cluster.total_leader_probes() > probes_before, "next call must run a fresh round");

    // A forced refresh refuses the stale entry outright.
    let forced = client.leader_url(true).await;
    assert!(matches!(forced, Err(SdkError::NoLeaderReachable { .. })));

    cluster.shutdown();
}

#[tokio::test]
async fn resolve_without_cache_fails_when_cluster_dark() {
    let cluster = MockCluster::start(3).await.unwrap();
    for index in 0..3 {
        cluster.set_down(index, true);
    }

    let client = ClusterClient::new(fast_config(&cluster));

    let result = client.leader_url(false).await;
    assert!(matches!(result, Err(SdkError::NoLeaderReachable { candidates: 3 })));

    cluster.shutdown();
}

#[tokio::test]
async fn follower_reporting_leader_wins_the_round() {
    let cluster = MockCluster::start(3).await.unwrap();
    // No cluster-wide leader, but node 0 (a stale follower in this script)
    // still reports node 2's address.
    cluster.set_leader(None);
    cluster.set_stale_answer(0, Some(cluster.endpoint(2)));

    let client = ClusterClient::new(default_config(&cluster));

    let leader = client.leader_url(false).await.unwrap();
    assert_eq!(leader.as_str().trim_end_matches('/'), cluster.endpoint(2));

    // The winning index is the candidate that answered, not the leader.
    let cached = client.locator().cached().unwrap();
    assert_eq!(cached.candidate_index, 0);

    cluster.shutdown();
}

#[tokio::test]
async fn slow_candidate_does_not_block_discovery() {
    let cluster = MockCluster::start(2).await.unwrap();
    cluster.set_leader(Some(1));
    // Node 0 hangs past the probe timeout; node 1 answers.
    cluster.set_delay(0, Duration::from_secs(5));

    let client = ClusterClient::new(fast_config(&cluster));

    let leader =
        tokio::time::timeout(Duration::from_secs(3), client.leader_url(false)).await.unwrap();
    assert_eq!(leader.unwrap().as_str().trim_end_matches('/'), cluster.endpoint(1));

    cluster.shutdown();
}

// ============================================================================
// Realtime sessions
// ============================================================================

#[tokio::test]
async fn session_receives_frames_in_order() {
    let cluster = MockCluster::start(2).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));
    let session = client.open_session("ROOM1");
    let mut events = session.subscribe();
    session.connect().unwrap();

    let open = next_matching(&mut events, is_open).await;
    if let SessionEvent::Open { leader } = open {
        assert_eq!(leader.as_str().trim_end_matches('/'), cluster.endpoint(0));
    }
    wait_until(|| cluster.open_sessions() == 1).await;

    cluster.broadcast_frame(r#"{"event":"question","index":1}"#);
    cluster.broadcast_frame(r#"{"event":"question","index":2}"#);

    let first = next_matching(&mut events, is_frame).await;
    let second = next_matching(&mut events, is_frame).await;

    match (first, second) {
        (SessionEvent::Frame(a), SessionEvent::Frame(b)) => {
            assert_eq!(a.event, "question");
            assert_eq!(a.field("index").and_then(serde_json::Value::as_u64), Some(1));
            assert_eq!(b.field("index").and_then(serde_json::Value::as_u64), Some(2));
        },
        other => panic!("expected two frames, got {other:?}"),
    }

    session.shutdown();
    cluster.shutdown();
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_connection_stays_open() {
    let cluster = MockCluster::start(1).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));
    let session = client.open_session("ROOM1");
    let mut events = session.subscribe();
    session.connect().unwrap();

    next_matching(&mut events, is_open).await;
    wait_until(|| cluster.open_sessions() == 1).await;

    cluster.broadcast_frame("definitely not json");
    cluster.broadcast_frame(r#"{"payload_without":"discriminator"}"#);
    cluster.broadcast_frame(r#"{"event":"score_update","alice":3}"#);

    // The only frame that surfaces is the well-formed one, and the session
    // never left Open on account of the garbage.
    let event = next_matching(&mut events, is_frame).await;
    if let SessionEvent::Frame(frame) = event {
        assert_eq!(frame.event, "score_update");
    }
    assert_eq!(session.state(), ConnectionState::Open);

    session.shutdown();
    cluster.shutdown();
}

#[tokio::test]
async fn multiple_listeners_receive_the_same_frame() {
    let cluster = MockCluster::start(1).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));
    let session = client.open_session("ROOM1");
    let mut first = session.subscribe();
    let mut second = session.subscribe();
    session.connect().unwrap();

    next_matching(&mut first, is_open).await;
    wait_until(|| cluster.open_sessions() == 1).await;

    cluster.broadcast_frame(r#"{"event":"game_over"}"#);

    for events in [&mut first, &mut second] {
        let event = next_matching(events, is_frame).await;
        if let SessionEvent::Frame(frame) = event {
            assert_eq!(frame.event, "game_over");
        }
    }

    session.shutdown();
    cluster.shutdown();
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn failover_reconnects_to_the_new_leader() {
    let cluster = MockCluster::start(3).await.unwrap();
    cluster.set_leader(Some(0));

    let client = ClusterClient::new(fast_config(&cluster));
    let session = client.open_session("ROOM1");
    let mut events = session.subscribe();
    session.connect().unwrap();

    next_matching(&mut events, is_open).await;
    wait_until(|| cluster.open_sessions() == 1).await;

    // Leadership moves and the old leader drops its sessions.
    cluster.set_leader(Some(1));
    cluster.disconnect_sessions();

    // The session heals on its own, attached to the new leader.
    let reopened = next_matching(&mut events, is_open).await;
    if let SessionEvent::Open { leader } = reopened {
        assert_eq!(leader.as_str().trim_end_matches('/'), cluster.endpoint(1));
    }
    wait_until(|| cluster.open_sessions() == 1).await;

    // Frames flow again on the new connection.
    cluster.broadcast_frame(r#"{"event":"question","index":7}"#);
    let frame = next_matching(&mut events, is_frame).await;
    if let SessionEvent::Frame(frame) = frame {
        assert_eq!(frame.field("index").and_then(serde_json::Value::as_u64), Some(7));
    }

    session.shutdown();
    cluster.shutdown();
}

#[tokio::test]
async fn exhausted_session_resumes_on_manual_reconnect() {
    let cluster = MockCluster::start(1).await.unwrap();
    cluster.set_leader(None); // nobody knows a leader: every attempt fails

    let config = ClientConfig::builder()
        .with_candidates(cluster.endpoints())
        .with_locator(
            LocatorConfig::builder()
                .ttl(Duration::from_millis(100))
                .probe_timeout(Duration::from_millis(200))
                .build(),
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .with_max_attempts(1)
                .with_base_delay(Duration::from_millis(10))
                .with_growth_factor(1.0)
                .with_delay_cap(Duration::from_millis(10))
                .with_jitter_window(Duration::ZERO)
                .build(),
        )
        .with_connect_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let client = ClusterClient::new(config);
    let session = client.open_session("ROOM1");
    let mut events = session.subscribe();
    session.connect().unwrap();

    let exhausted =
        next_matching(&mut events, |e| matches!(e, SessionEvent::Exhausted { .. })).await;
    if let SessionEvent::Exhausted { attempts } = exhausted {
        assert_eq!(attempts, 1);
    }
    assert_eq!(session.state(), ConnectionState::Exhausted);

    // An operator fixes the cluster; the owner explicitly resumes.
    cluster.set_leader(Some(0));
    session.reconnect().unwrap();

    next_matching(&mut events, is_open).await;
    assert_eq!(session.state(), ConnectionState::Open);

    session.shutdown();
    cluster.shutdown();
}

// ============================================================================
// Diagnostics
// ============================================================================

#[tokio::test]
async fn heartbeat_sweep_flags_down_nodes() {
    let cluster = MockCluster::start(3).await.unwrap();
    cluster.set_down(1, true);

    let client = ClusterClient::new(fast_config(&cluster));

    let health = client.health().await;

    assert_eq!(health.len(), 3);
    assert!(health[0].alive);
    assert!(!health[1].alive);
    assert!(health[2].alive);

    for index in 0..3 {
        assert_eq!(cluster.heartbeat_probes(index), 1);
    }

    cluster.shutdown();
}
