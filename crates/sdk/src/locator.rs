//! Leader discovery with a shared, TTL-bounded cache.
//!
//! The locator resolves the cluster's current write leader by probing a
//! fixed, ordered set of candidate replicas over `GET /raft/leader`. A
//! successful round is cached so that rapid successive calls (several
//! consumers mounting at once) collapse into a single cache hit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LeaderLocator                          │
//! │   TTL cache fast path │ last-good-first probing │ fallback  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Candidate replicas (HTTP)                  │
//! │   GET /raft/leader  │  GET /raft/heartbeat (diagnostics)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! The locator is a cheap handle: clones share the same cache. Independent
//! instances have fully isolated state, so tests can construct as many as
//! they need. Concurrent `resolve` calls are safe; the worst case is a
//! redundant probe round, because a cache update is a total overwrite of
//! the record, never a merge.

use std::{sync::Arc, time::Instant};

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::{ClientConfig, LocatorConfig, ProbeOrder},
    error::{NoLeaderReachableSnafu, Result},
};

/// A cached leader discovery.
#[derive(Debug, Clone)]
pub struct CachedLeader {
    /// The leader's base address as reported by the winning candidate.
    pub address: Url,

    /// When the discovery was made. Monotonically non-decreasing across
    /// successful probe rounds.
    pub resolved_at: Instant,

    /// Index into the candidate set of the candidate that answered.
    pub candidate_index: usize,
}

/// Per-candidate probe failure. Recovered locally by trying the next
/// candidate; never surfaced to callers individually.
#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("candidate unreachable: {source}")]
    Unreachable { source: reqwest::Error },

    #[error("candidate answered with status {status}")]
    BadStatus { status: reqwest::StatusCode },

    #[error("candidate answer malformed: {message}")]
    MalformedAnswer { message: String },
}

/// Wire shape of a `GET /raft/leader` answer.
#[derive(Debug, Deserialize)]
struct LeaderAnswer {
    #[serde(default)]
    leader_url: Option<String>,
}

/// Resolves and caches the cluster's current write leader.
#[derive(Debug, Clone)]
pub struct LeaderLocator {
    /// Fixed, ordered candidate set; immutable for the process lifetime.
    candidates: Arc<Vec<Url>>,

    /// Discovery settings.
    config: LocatorConfig,

    /// HTTP client for probes.
    http: reqwest::Client,

    /// Shared cache; clones of this locator see the same record.
    cache: Arc<RwLock<Option<CachedLeader>>>,
}

impl LeaderLocator {
    /// Creates a locator from a validated client configuration.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_candidates(config.candidates.clone(), config.locator.clone())
    }

    /// Creates a locator from an explicit candidate set.
    #[must_use]
    pub fn with_candidates(candidates: Vec<Url>, config: LocatorConfig) -> Self {
        Self {
            candidates: Arc::new(candidates),
            config,
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the candidate set in probe order.
    #[must_use]
    pub fn candidates(&self) -> &[Url] {
        &self.candidates
    }

    /// Returns a snapshot of the cached discovery, if any.
    #[must_use]
    pub fn cached(&self) -> Option<CachedLeader> {
        self.cache.read().clone()
    }

    /// Clears the cached leader address unconditionally.
    ///
    /// Use before a reconnect attempt that is suspected to be against a
    /// stale leader; the next `resolve` will run a full probe round.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    /// Resolves the current leader's base address.
    ///
    /// With `force_refresh` false, a cached address younger than the
    /// configured TTL is returned immediately with zero network calls.
    /// Otherwise candidates are probed: the last candidate that answered
    /// goes first, then the rest per the configured [`ProbeOrder`]. Each
    /// probe is bounded by the configured timeout, and the first candidate reporting
    /// a non-empty leader address wins.
    ///
    /// If every probe fails but a prior cache entry exists and
    /// `force_refresh` is false, the stale entry is returned as a degraded
    /// fallback and back-dated so that the next call re-probes.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::NoLeaderReachable`](crate::SdkError::NoLeaderReachable)
    /// when every candidate fails and no usable cache entry exists.
    pub async fn resolve(&self, force_refresh: bool) -> Result<Url> {
        if !force_refresh {
            if let Some(entry) = self.cached() {
                if entry.resolved_at.elapsed() < self.config.ttl() {
                    return Ok(entry.address);
                }
            }
        }

        for index in self.probe_order() {
            match self.probe_leader(index).await {
                Ok(address) => {
                    debug!(candidate = %self.candidates[index], leader = %address, "leader resolved");
                    *self.cache.write() = Some(CachedLeader {
                        address: address.clone(),
                        resolved_at: Instant::now(),
                        candidate_index: index,
                    });
                    return Ok(address);
                },
                Err(err) => {
                    debug!(candidate = %self.candidates[index], error = %err, "leader probe failed");
                },
            }
        }

        if !force_refresh {
            if let Some(stale) = self.take_stale() {
                warn!(leader = %stale, "all candidate probes failed, serving stale leader address");
                return Ok(stale);
            }
        }

        NoLeaderReachableSnafu { candidates: self.candidates.len() }.fail()
    }

    /// Liveness-probes one candidate via `GET /raft/heartbeat`.
    ///
    /// Any 2xx answer within the probe timeout counts as alive. Diagnostic
    /// only; the resolve path never consults heartbeats.
    pub(crate) async fn probe_heartbeat(&self, candidate: &Url) -> bool {
        let mut endpoint = candidate.clone();
        endpoint.set_path("/raft/heartbeat");

        let request = self.http.get(endpoint.clone()).send();
        match tokio::time::timeout(self.config.probe_timeout(), request).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(err)) => {
                debug!(candidate = %candidate, error = %err, "heartbeat probe failed");
                false
            },
            Err(_) => {
                debug!(candidate = %candidate, "heartbeat probe timed out");
                false
            },
        }
    }

    /// Returns candidate indices in this round's probe order: the last
    /// candidate that answered first, then the rest per policy.
    fn probe_order(&self) -> Vec<usize> {
        let last_good = self.cached().map(|entry| entry.candidate_index);

        let mut rest: Vec<usize> =
            (0..self.candidates.len()).filter(|i| Some(*i) != last_good).collect();

        if self.config.probe_order() == ProbeOrder::Shuffled {
            rest.shuffle(&mut rand::rng());
        }

        match last_good {
            Some(index) => std::iter::once(index).chain(rest).collect(),
            None => rest,
        }
    }

    /// Issues one leader probe against the candidate at `index`.
    async fn probe_leader(&self, index: usize) -> std::result::Result<Url, ProbeError> {
        let mut endpoint = self.candidates[index].clone();
        endpoint.set_path("/raft/leader");

        let request = self.http.get(endpoint).send();
        let response = match tokio::time::timeout(self.config.probe_timeout(), request).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(ProbeError::Unreachable { source }),
            Err(_) => return Err(ProbeError::Timeout),
        };

        if !response.status().is_success() {
            return Err(ProbeError::BadStatus { status: response.status() });
        }

        let answer: LeaderAnswer = response
            .json()
            .await
            .map_err(|e| ProbeError::MalformedAnswer { message: e.to_string() })?;

        let raw = answer
            .leader_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProbeError::MalformedAnswer {
                message: "leader_url missing or empty".to_owned(),
            })?;

        Url::parse(&raw).map_err(|e| ProbeError::MalformedAnswer { message: e.to_string() })
    }

    /// Back-dates the cached entry past its TTL and returns its address.
    ///
    /// The back-dating makes the next `resolve(false)` take the probe path
    /// again instead of trusting the fallback we just served.
    fn take_stale(&self) -> Option<Url> {
        let mut guard = self.cache.write();
        let entry = guard.as_mut()?;
        if let Some(expired) = Instant::now().checked_sub(self.config.ttl()) {
            entry.resolved_at = expired;
        }
        Some(entry.address.clone())
    }
}
