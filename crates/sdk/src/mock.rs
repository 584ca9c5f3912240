//! Mock replica cluster for SDK integration testing.
//!
//! Provides a controllable in-process cluster implementing the replica wire
//! contract (`/raft/leader`, `/raft/heartbeat`, `/ws/{session_code}`) for
//! testing SDK behavior without a real deployment.
//!
//! # Features
//!
//! - **Leader scripting**: designate (or clear) the node all replicas report
//!   as leader
//! - **Failure injection**: mark nodes down, delay their answers, or make
//!   them report a stale leader address
//! - **Probe counting**: per-node counters for leader and heartbeat probes
//! - **Session control**: push frames to connected sessions and force
//!   disconnects to exercise the reconnect path
//!
//! # Example
//!
//! ```no_run
//! use trivia_cluster_sdk::mock::MockCluster;
//! use trivia_cluster_sdk::{ClientConfig, ClusterClient};
//!
//! #[tokio::test]
//! async fn resolves_scripted_leader() {
//!     let cluster = MockCluster::start(3).await.unwrap();
//!     cluster.set_leader(Some(2));
//!
//!     let config = ClientConfig::builder()
//!         .with_candidates(cluster.endpoints())
//!         .build()
//!         .unwrap();
//!     let client = ClusterClient::new(config);
//!
//!     let leader = client.leader_url(false).await.unwrap();
//!     assert_eq!(leader.as_str().trim_end_matches('/'), cluster.endpoint(2));
//! }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::RwLock;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

/// Capacity of each node's session command channel.
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Commands delivered to connected mock sessions.
#[derive(Debug, Clone)]
enum SessionCommand {
    /// Send a text frame to the session.
    Frame(String),
    /// Close the session from the server side.
    Disconnect,
}

/// Per-node scripting state.
#[derive(Debug)]
struct NodeState {
    /// Node answers every route with 503 when set.
    down: AtomicBool,

    /// Delay injected before answering any route (milliseconds).
    delay_ms: AtomicU64,

    /// Overrides the leader answer with a fixed (possibly stale) address.
    stale_answer: RwLock<Option<String>>,

    /// Leader probes received.
    leader_probes: AtomicUsize,

    /// Heartbeat probes received.
    heartbeat_probes: AtomicUsize,

    /// Fan-out to this node's connected sessions.
    commands: broadcast::Sender<SessionCommand>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            down: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            stale_answer: RwLock::new(None),
            leader_probes: AtomicUsize::new(0),
            heartbeat_probes: AtomicUsize::new(0),
            commands: broadcast::channel(SESSION_CHANNEL_CAPACITY).0,
        }
    }
}

/// Shared state for the whole mock cluster.
#[derive(Debug)]
struct ClusterState {
    /// Which node currently acts as leader, if any.
    leader: RwLock<Option<usize>>,

    /// Node base addresses, fixed once the listeners are bound.
    endpoints: RwLock<Vec<String>>,

    /// Per-node scripting state.
    nodes: Vec<NodeState>,

    /// Currently connected realtime sessions across all nodes.
    open_sessions: AtomicUsize,
}

/// Handler context: one node of the cluster.
#[derive(Debug, Clone)]
struct NodeCtx {
    index: usize,
    cluster: Arc<ClusterState>,
}

/// A controllable in-process replica cluster.
///
/// Nodes listen on ephemeral localhost ports. All scripting methods take
/// effect immediately for subsequent requests. Node indices are positions
/// in [`endpoints()`](Self::endpoints).
#[derive(Debug)]
pub struct MockCluster {
    state: Arc<ClusterState>,
    shutdown: Vec<oneshot::Sender<()>>,
}

impl MockCluster {
    /// Starts a cluster of `node_count` replicas on ephemeral ports.
    ///
    /// No node is leader initially; script one with
    /// [`set_leader`](Self::set_leader).
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound.
    pub async fn start(node_count: usize) -> std::io::Result<Self> {
        let nodes = (0..node_count).map(|_| NodeState::new()).collect();
        let state = Arc::new(ClusterState {
            leader: RwLock::new(None),
            endpoints: RwLock::new(Vec::new()),
            nodes,
            open_sessions: AtomicUsize::new(0),
        });

        let mut listeners = Vec::with_capacity(node_count);
        let mut endpoints = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            endpoints.push(format!("http://{}", listener.local_addr()?));
            listeners.push(listener);
        }
        *state.endpoints.write() = endpoints;

        let mut shutdown = Vec::with_capacity(node_count);
        for (index, listener) in listeners.into_iter().enumerate() {
            let ctx = NodeCtx { index, cluster: Arc::clone(&state) };
            let router = Router::new()
                .route("/raft/leader", get(leader_handler))
                .route("/raft/heartbeat", get(heartbeat_handler))
                .route("/ws/{session_code}", get(session_handler))
                .with_state(ctx);

            let (tx, rx) = oneshot::channel::<()>();
            shutdown.push(tx);
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .ok();
            });
        }

        Ok(Self { state, shutdown })
    }

    /// Returns every node's base address, in node-index order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.state.endpoints.read().clone()
    }

    /// Returns one node's base address.
    #[must_use]
    pub fn endpoint(&self, index: usize) -> String {
        self.state.endpoints.read()[index].clone()
    }

    /// Designates which node every up replica reports as leader.
    ///
    /// `None` makes all replicas answer as if no leader is known.
    pub fn set_leader(&self, leader: Option<usize>) {
        *self.state.leader.write() = leader;
    }

    /// Marks a node down (every route answers 503) or back up.
    pub fn set_down(&self, index: usize, down: bool) {
        self.state.nodes[index].down.store(down, Ordering::SeqCst);
    }

    /// Injects a fixed delay before the node answers any route.
    pub fn set_delay(&self, index: usize, delay: Duration) {
        self.state.nodes[index].delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes a node report a fixed leader address regardless of the
    /// scripted leader, simulating a stale follower. `None` restores
    /// normal behavior.
    pub fn set_stale_answer(&self, index: usize, answer: Option<String>) {
        *self.state.nodes[index].stale_answer.write() = answer;
    }

    /// Returns the number of leader probes one node has received.
    #[must_use]
    pub fn leader_probes(&self, index: usize) -> usize {
        self.state.nodes[index].leader_probes.load(Ordering::SeqCst)
    }

    /// Returns the number of leader probes received across all nodes.
    #[must_use]
    pub fn total_leader_probes(&self) -> usize {
        self.state.nodes.iter().map(|n| n.leader_probes.load(Ordering::SeqCst)).sum()
    }

    /// Returns the number of heartbeat probes one node has received.
    #[must_use]
    pub fn heartbeat_probes(&self, index: usize) -> usize {
        self.state.nodes[index].heartbeat_probes.load(Ordering::SeqCst)
    }

    /// Sends a text frame to every connected session.
    pub fn broadcast_frame(&self, frame: &str) {
        for node in &self.state.nodes {
            let _ = node.commands.send(SessionCommand::Frame(frame.to_owned()));
        }
    }

    /// Closes every connected session from the server side.
    pub fn disconnect_sessions(&self) {
        for node in &self.state.nodes {
            let _ = node.commands.send(SessionCommand::Disconnect);
        }
    }

    /// Returns the number of currently connected sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Shuts every node down.
    pub fn shutdown(self) {
        for tx in self.shutdown {
            let _ = tx.send(());
        }
    }
}

/// Applies the node's scripted answer delay.
async fn inject_delay(node: &NodeState) {
    let delay_ms = node.delay_ms.load(Ordering::SeqCst);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

async fn leader_handler(State(ctx): State<NodeCtx>) -> Response {
    let node = &ctx.cluster.nodes[ctx.index];
    node.leader_probes.fetch_add(1, Ordering::SeqCst);
    inject_delay(node).await;

    if node.down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    if let Some(answer) = node.stale_answer.read().clone() {
        return Json(serde_json::json!({ "leader_url": answer })).into_response();
    }

    let leader = *ctx.cluster.leader.read();
    match leader {
        Some(index) => {
            let url = ctx.cluster.endpoints.read()[index].clone();
            Json(serde_json::json!({ "leader_url": url })).into_response()
        },
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn heartbeat_handler(State(ctx): State<NodeCtx>) -> Response {
    let node = &ctx.cluster.nodes[ctx.index];
    node.heartbeat_probes.fetch_add(1, Ordering::SeqCst);
    inject_delay(node).await;

    if node.down.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

async fn session_handler(
    State(ctx): State<NodeCtx>,
    Path(session_code): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let node = &ctx.cluster.nodes[ctx.index];

    if node.down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // Only the current leader accepts realtime sessions.
    if *ctx.cluster.leader.read() != Some(ctx.index) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let commands = node.commands.subscribe();
    let cluster = Arc::clone(&ctx.cluster);
    ws.on_upgrade(move |socket| serve_session(cluster, session_code, commands, socket))
}

async fn serve_session(
    cluster: Arc<ClusterState>,
    session_code: String,
    mut commands: broadcast::Receiver<SessionCommand>,
    mut socket: WebSocket,
) {
    cluster.open_sessions.fetch_add(1, Ordering::SeqCst);
    debug!(session = %session_code, "mock session opened");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(SessionCommand::Frame(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Ok(SessionCommand::Disconnect) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                },
                Err(_) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(_)) => {},
                _ => break,
            },
        }
    }

    cluster.open_sessions.fetch_sub(1, Ordering::SeqCst);
    debug!(session = %session_code, "mock session closed");
}
