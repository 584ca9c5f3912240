//! Client SDK for a Raft-replicated trivia cluster.
//!
//! Applications talk to one of several replica endpoints without knowing in
//! advance which replica currently acts as the cluster's write leader. This
//! crate solves the client side of that problem: it discovers the leader
//! among a fixed candidate set (tolerating nodes that are down, slow, or
//! stale), caches the discovery so every action does not re-probe the
//! cluster, and maintains a realtime WebSocket session to the leader that
//! transparently recovers (including re-discovering a new leader) when
//! the connection drops.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trivia_cluster_sdk::{ClientConfig, ClusterClient, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> trivia_cluster_sdk::Result<()> {
//!     let config = ClientConfig::builder()
//!         .with_candidates([
//!             "http://10.0.0.1:8000",
//!             "http://10.0.0.2:8000",
//!             "http://10.0.0.3:8000",
//!         ])
//!         .build()?;
//!
//!     let client = ClusterClient::new(config);
//!
//!     // Contract 1: the current leader's base address.
//!     let leader = client.leader_url(false).await?;
//!
//!     // Contract 2: a live frame stream with reconnection handled.
//!     let session = client.open_session("ROOM1");
//!     let mut events = session.subscribe();
//!     session.connect()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::Frame(frame) = event {
//!             println!("{}: {:?}", frame.event, frame.payload);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ClusterClient (Public API)                 │
//! │    .leader_url() │ .open_session() │ .health()              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  ResilientConnection                        │
//! │    Reconnect state machine │ Backoff + jitter │ Events      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  LeaderLocator                              │
//! │    TTL cache │ Last-good-first probing │ Stale fallback     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Candidate replicas                         │
//! │    GET /raft/leader │ GET /raft/heartbeat │ /ws/{session}   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Across a reconnect no delivery guarantee exists between the last frame
//! before closure and the first after re-establishment: treat each `Open`
//! following a `Closed` as a potential gap and resynchronize explicitly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod client;
mod config;
mod connection;
mod error;
mod frame;
mod locator;
pub mod mock;

// Public API exports
pub use client::{CandidateHealth, ClusterClient};
pub use config::{
    ClientConfig, ClientConfigBuilder, LocatorConfig, ProbeOrder, RetryPolicy, RetryPolicyBuilder,
};
pub use connection::{ConnectionState, ResilientConnection, SessionEvent};
pub use error::{Result, SdkError};
pub use frame::ServerFrame;
pub use locator::{CachedLeader, LeaderLocator};
