//! Main `ClusterClient` implementation.
//!
//! Thin facade over the two SDK contracts: "give me the current leader's
//! base address" ([`leader_url`](ClusterClient::leader_url)) and "give me a
//! live frame stream from the leader with reconnection handled"
//! ([`open_session`](ClusterClient::open_session)). All sessions opened
//! through one client share its leader cache, so a discovery made for one
//! session is reused by the others.

use futures::future::join_all;
use url::Url;

use crate::{
    config::ClientConfig,
    connection::ResilientConnection,
    error::Result,
    locator::LeaderLocator,
};

/// Heartbeat outcome for one candidate replica.
#[derive(Debug, Clone)]
pub struct CandidateHealth {
    /// The candidate's base address.
    pub candidate: Url,

    /// Whether the candidate answered `GET /raft/heartbeat` with a 2xx
    /// within the probe timeout.
    pub alive: bool,
}

/// High-level client for a trivia cluster.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    config: ClientConfig,
    locator: LeaderLocator,
}

impl ClusterClient {
    /// Creates a client from a validated configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let locator = LeaderLocator::new(&config);
        Self { config, locator }
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the shared leader locator.
    #[must_use]
    pub fn locator(&self) -> &LeaderLocator {
        &self.locator
    }

    /// Resolves the current leader's base address.
    ///
    /// Convenience passthrough to [`LeaderLocator::resolve`]; owners issue
    /// their request/response calls directly against the returned address.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::NoLeaderReachable`](crate::SdkError::NoLeaderReachable)
    /// when no candidate answers and no usable cache entry exists.
    pub async fn leader_url(&self, force_refresh: bool) -> Result<Url> {
        self.locator.resolve(force_refresh).await
    }

    /// Opens a logical realtime session for a session code.
    ///
    /// The returned handle is `Idle`; call
    /// [`connect()`](ResilientConnection::connect) to start it. Sessions
    /// share this client's leader cache but are otherwise independent.
    #[must_use]
    pub fn open_session(&self, session_code: impl Into<String>) -> ResilientConnection {
        ResilientConnection::new(self.locator.clone(), session_code, &self.config)
    }

    /// Liveness-sweeps every candidate via `GET /raft/heartbeat`.
    ///
    /// Diagnostic tooling only; the resolve path never consults
    /// heartbeats. Probes run concurrently, each bounded by the configured
    /// probe timeout.
    pub async fn health(&self) -> Vec<CandidateHealth> {
        let probes = self.locator.candidates().iter().map(|candidate| async {
            CandidateHealth {
                candidate: candidate.clone(),
                alive: self.locator.probe_heartbeat(candidate).await,
            }
        });

        join_all(probes).await
    }
}
