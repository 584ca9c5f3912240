//! Self-healing realtime session against the current leader.
//!
//! [`ResilientConnection`] owns one logical WebSocket session to "whatever
//! replica currently leads the cluster". The leader address is resolved
//! through a shared [`LeaderLocator`] on every (re)connect, so a failover is
//! absorbed as just another reconnect: the surrounding application never
//! needs to know which replica it is talking to.
//!
//! # State Machine
//!
//! ```text
//! Idle ──connect()──▶ Connecting
//! Connecting ──resolve+dial ok──▶ Open
//! Connecting ──resolve or dial fail──▶ Closed
//! Open ──peer closes / network error──▶ Closed
//! Closed ──budget remaining & auto-reconnect──▶ Reconnecting ──(delay)──▶ Connecting
//! Closed ──budget exhausted──▶ Exhausted
//! Exhausted ──reconnect()──▶ Connecting        (budget reset to 0)
//! any state ──shutdown()──▶ Idle               (terminal for the session)
//! ```
//!
//! Events are fanned out on a broadcast channel so any number of listeners
//! can attach and detach; state transitions are additionally published on a
//! watch channel, decoupled from event delivery order. Across a reconnect
//! there is no delivery guarantee: owners must treat each `Open` after a
//! `Closed` as a potential gap and resynchronize explicitly.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use snafu::ensure;
use tokio::{
    net::TcpStream,
    sync::{Notify, broadcast, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backoff::retry_delay,
    config::{ClientConfig, RetryPolicy},
    error::{HandshakeSnafu, InvalidUrlSnafu, Result, SessionClosedSnafu},
    frame::ServerFrame,
    locator::LeaderLocator,
};

/// Capacity of the session event channel. Slow listeners lag and drop the
/// oldest events rather than applying backpressure to the read loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consecutive opaque closures tolerated before they are reported as errors.
/// Opaque closures below the threshold still drive state transitions.
const NOISE_SUPPRESSION_THRESHOLD: u32 = 3;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle state of a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session established; also the terminal state after teardown.
    Idle,
    /// Resolving the leader and dialing the realtime channel.
    Connecting,
    /// Channel open; frames are flowing.
    Open,
    /// Channel lost; the next transition is scheduled.
    Closed,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Automatic retries stopped; only `reconnect()` resumes.
    Exhausted,
}

/// Events delivered to session listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The channel opened. Fires exactly once per successful open.
    Open {
        /// Base address of the leader the session is attached to.
        leader: Url,
    },
    /// An inbound frame arrived. Delivered in arrival order while open.
    Frame(ServerFrame),
    /// A reportable failure occurred. Opaque transport noise is suppressed
    /// until it repeats past a threshold.
    Error {
        /// Human-readable failure description.
        reason: String,
    },
    /// An open channel closed.
    Closed,
    /// The retry budget ran out. Fires exactly once per exhaustion.
    Exhausted {
        /// Failed attempts made before giving up.
        attempts: u32,
    },
}

/// Attempt bookkeeping for automatic reconnection.
#[derive(Debug)]
struct RetryBudget {
    attempt: u32,
    max: u32,
}

impl RetryBudget {
    fn new(max: u32) -> Self {
        Self { attempt: 0, max }
    }

    /// Consumes one attempt, returning its 1-indexed number, or `None` when
    /// the budget is spent.
    fn try_consume(&mut self) -> Option<u32> {
        if self.attempt < self.max {
            self.attempt += 1;
            Some(self.attempt)
        } else {
            None
        }
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Why the serve loop handed control back to the driver.
enum ServeOutcome {
    /// `shutdown()` was called.
    Teardown,
    /// `reconnect()` was called on an open session.
    Manual,
    /// The peer closed or the transport failed. `reason` is `None` for
    /// closures that carried no diagnostic payload.
    Lost { reason: Option<String> },
}

/// A single logical realtime session with transparent leader failover.
///
/// Dropping the handle tears the session down, equivalent to
/// [`shutdown()`](Self::shutdown).
#[derive(Debug)]
pub struct ResilientConnection {
    shared: Arc<Shared>,
    _cancel_guard: DropGuard,
}

#[derive(Debug)]
struct Shared {
    locator: LeaderLocator,
    session_code: String,
    policy: RetryPolicy,
    auto_reconnect: bool,
    connect_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    reconnect: Notify,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl ResilientConnection {
    /// Creates a session handle in the `Idle` state.
    ///
    /// The session shares `locator` (and therefore its leader cache) with
    /// every other consumer holding a clone of it. Nothing is dialed until
    /// [`connect()`](Self::connect).
    #[must_use]
    pub fn new(
        locator: LeaderLocator,
        session_code: impl Into<String>,
        config: &ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let cancel = CancellationToken::new();
        let cancel_guard = cancel.clone().drop_guard();

        Self {
            shared: Arc::new(Shared {
                locator,
                session_code: session_code.into(),
                policy: config.retry_policy.clone(),
                auto_reconnect: config.auto_reconnect,
                connect_timeout: config.connect_timeout,
                events,
                state,
                reconnect: Notify::new(),
                cancel,
                running: AtomicBool::new(false),
            }),
            _cancel_guard: cancel_guard,
        }
    }

    /// Returns the session code this session subscribes to.
    #[must_use]
    pub fn session_code(&self) -> &str {
        &self.shared.session_code
    }

    /// Establishes (or re-establishes) the logical session.
    ///
    /// Idempotent while the session driver is running. Subscribe with
    /// [`subscribe()`](Self::subscribe) before connecting to observe the
    /// first `Open` event.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::SessionClosed`](crate::SdkError::SessionClosed)
    /// after teardown; a torn-down session cannot be revived.
    pub fn connect(&self) -> Result<()> {
        ensure!(!self.shared.cancel.is_cancelled(), SessionClosedSnafu);

        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!(session = %self.shared.session_code, "session driver already running");
            return Ok(());
        }

        tokio::spawn(drive(Arc::clone(&self.shared)));
        Ok(())
    }

    /// Forces a fresh connection attempt and resets the retry budget.
    ///
    /// Cancels any pending backoff timer. From `Exhausted` this resumes
    /// automatic operation; from `Open` it drops the live channel and
    /// re-dials immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::SessionClosed`](crate::SdkError::SessionClosed)
    /// after teardown.
    pub fn reconnect(&self) -> Result<()> {
        ensure!(!self.shared.cancel.is_cancelled(), SessionClosedSnafu);

        if !self.shared.running.load(Ordering::SeqCst) {
            return self.connect();
        }

        self.shared.reconnect.notify_one();
        Ok(())
    }

    /// Tears the session down: cancels any pending retry timer, closes the
    /// live channel, and settles the state at `Idle`.
    ///
    /// Idempotent; repeated teardown is a no-op.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Attaches a new event listener.
    ///
    /// Listeners only observe events emitted after they subscribe.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns a watch receiver tracking state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // A send error only means no listener is attached right now.
        let _ = self.events.send(event);
    }

    /// Resolves the leader and dials its realtime channel.
    async fn establish(&self) -> Result<(Url, WsStream)> {
        let leader = self.locator.resolve(false).await?;
        let target = session_url(&leader, &self.session_code)?;

        match tokio::time::timeout(self.connect_timeout, connect_async(target.as_str())).await {
            Ok(Ok((ws, _response))) => Ok((leader, ws)),
            Ok(Err(err)) => {
                HandshakeSnafu { url: target.as_str(), message: err.to_string() }.fail()
            },
            Err(_) => HandshakeSnafu {
                url: target.as_str(),
                message: format!("no answer within {:?}", self.connect_timeout),
            }
            .fail(),
        }
    }

    /// Pumps the open channel until it is lost, torn down, or manually
    /// recycled.
    async fn serve(&self, ws: &mut WsStream) -> ServeOutcome {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return ServeOutcome::Teardown;
                }
                () = self.reconnect.notified() => {
                    let _ = ws.close(None).await;
                    return ServeOutcome::Manual;
                }
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                        Ok(frame) => self.emit(SessionEvent::Frame(frame)),
                        Err(err) => {
                            // Parse failures are dropped; they never close
                            // the channel or escape the component boundary.
                            debug!(session = %self.session_code, error = %err, "dropping malformed frame");
                        },
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Pong(_))) => {},
                    Some(Ok(Message::Binary(_))) => {
                        debug!(session = %self.session_code, "dropping unexpected binary frame");
                    },
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|frame| frame.reason.as_str().to_owned())
                            .filter(|reason| !reason.is_empty());
                        return ServeOutcome::Lost { reason };
                    },
                    Some(Ok(Message::Frame(_))) => {},
                    Some(Err(err)) => {
                        let text = err.to_string();
                        let reason = if text.is_empty() { None } else { Some(text) };
                        return ServeOutcome::Lost { reason };
                    },
                    None => return ServeOutcome::Lost { reason: None },
                }
            }
        }
    }
}

/// Whether a closure should be withheld from the error event stream.
fn suppress_as_noise(reason: Option<&str>, consecutive_opaque: u32) -> bool {
    reason.is_none() && consecutive_opaque < NOISE_SUPPRESSION_THRESHOLD
}

/// Maps a leader base address to its realtime channel URL for a session.
///
/// The scheme family is preserved: `http` → `ws`, `https` → `wss`.
pub(crate) fn session_url(leader: &Url, session_code: &str) -> Result<Url> {
    let raw = leader.as_str();
    let swapped = if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return InvalidUrlSnafu { url: raw, message: "leader scheme must be http or https" }.fail();
    };

    let mut target = Url::parse(&swapped)
        .map_err(|e| InvalidUrlSnafu { url: swapped.as_str(), message: e.to_string() }.build())?;
    target.set_path(&format!("/ws/{session_code}"));
    Ok(target)
}

/// The session driver: one task per logical session, owning the state
/// machine from first `Connecting` to teardown.
async fn drive(shared: Arc<Shared>) {
    let mut budget = RetryBudget::new(shared.policy.max_attempts);
    let mut opaque_closures: u32 = 0;
    let mut first_attempt = true;

    info!(session = %shared.session_code, "session driver starting");

    loop {
        if shared.cancel.is_cancelled() {
            shared.set_state(ConnectionState::Idle);
            break;
        }

        shared.set_state(ConnectionState::Connecting);

        // A failed open may mean the leader moved; drop the cached address
        // on every attempt after the session's first.
        if first_attempt {
            first_attempt = false;
        } else {
            shared.locator.invalidate();
        }

        let established = tokio::select! {
            () = shared.cancel.cancelled() => {
                shared.set_state(ConnectionState::Idle);
                break;
            }
            result = shared.establish() => result,
        };

        match established {
            Ok((leader, mut ws)) => {
                budget.reset();
                opaque_closures = 0;
                shared.set_state(ConnectionState::Open);
                shared.emit(SessionEvent::Open { leader: leader.clone() });
                info!(session = %shared.session_code, leader = %leader, "session open");

                match shared.serve(&mut ws).await {
                    ServeOutcome::Teardown => {
                        shared.emit(SessionEvent::Closed);
                        shared.set_state(ConnectionState::Idle);
                        break;
                    },
                    ServeOutcome::Manual => {
                        debug!(session = %shared.session_code, "manual reconnect requested");
                        shared.emit(SessionEvent::Closed);
                        shared.set_state(ConnectionState::Closed);
                        budget.reset();
                        continue;
                    },
                    ServeOutcome::Lost { reason } => {
                        shared.set_state(ConnectionState::Closed);
                        shared.emit(SessionEvent::Closed);

                        if reason.is_some() {
                            opaque_closures = 0;
                        } else {
                            opaque_closures += 1;
                        }

                        if suppress_as_noise(reason.as_deref(), opaque_closures) {
                            debug!(session = %shared.session_code, "channel closed without diagnostics");
                        } else {
                            let text = reason.unwrap_or_else(|| {
                                format!(
                                    "transport closed {opaque_closures} time(s) without diagnostics"
                                )
                            });
                            warn!(session = %shared.session_code, reason = %text, "channel lost");
                            shared.emit(SessionEvent::Error { reason: text });
                        }
                    },
                }
            },
            Err(err) => {
                // Resolve failures and dial failures take the same path.
                shared.set_state(ConnectionState::Closed);
                warn!(session = %shared.session_code, error = %err, "connection attempt failed");
                shared.emit(SessionEvent::Error { reason: err.to_string() });
            },
        }

        if shared.auto_reconnect {
            if let Some(attempt) = budget.try_consume() {
                let delay = retry_delay(attempt, &shared.policy);
                debug!(
                    session = %shared.session_code,
                    attempt,
                    max = shared.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                shared.set_state(ConnectionState::Reconnecting);

                tokio::select! {
                    () = shared.cancel.cancelled() => {
                        shared.set_state(ConnectionState::Idle);
                        break;
                    }
                    () = shared.reconnect.notified() => {
                        budget.reset();
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        }

        shared.set_state(ConnectionState::Exhausted);
        shared.emit(SessionEvent::Exhausted { attempts: budget.attempt() });
        warn!(
            session = %shared.session_code,
            attempts = budget.attempt(),
            "automatic reconnection exhausted"
        );

        tokio::select! {
            () = shared.cancel.cancelled() => {
                shared.set_state(ConnectionState::Idle);
                break;
            }
            () = shared.reconnect.notified() => {
                budget.reset();
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    info!(session = %shared.session_code, "session driver stopped");
}
