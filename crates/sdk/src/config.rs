//! Client configuration with builder pattern.
//!
//! Provides type-safe configuration for SDK clients including:
//! - Candidate replica addresses
//! - Leader discovery settings (TTL, probe timeout, probe order)
//! - Reconnect policy (backoff base/growth/cap, jitter window, attempt budget)

use std::time::Duration;

use snafu::ensure;
use url::Url;

use crate::error::{ConfigSnafu, InvalidUrlSnafu, Result};

/// Default trust window for a cached leader address (3 seconds).
const DEFAULT_LEADER_TTL: Duration = Duration::from_millis(3000);

/// Default per-candidate probe timeout (1.5 seconds).
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default realtime channel handshake timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the trivia cluster SDK client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Candidate replica base addresses, in fixed probe order.
    pub(crate) candidates: Vec<Url>,

    /// Leader discovery settings.
    pub(crate) locator: LocatorConfig,

    /// Reconnect policy for realtime sessions.
    pub(crate) retry_policy: RetryPolicy,

    /// Realtime channel handshake timeout.
    pub(crate) connect_timeout: Duration,

    /// Whether sessions reconnect automatically after a closure.
    pub(crate) auto_reconnect: bool,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the candidate replica addresses.
    #[must_use]
    pub fn candidates(&self) -> &[Url] {
        &self.candidates
    }

    /// Returns the leader discovery settings.
    #[must_use]
    pub fn locator(&self) -> &LocatorConfig {
        &self.locator
    }

    /// Returns the reconnect policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the realtime channel handshake timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns whether automatic reconnection is enabled.
    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    candidates: Vec<String>,
    locator: Option<LocatorConfig>,
    retry_policy: Option<RetryPolicy>,
    connect_timeout: Option<Duration>,
    auto_reconnect: Option<bool>,
}

impl ClientConfigBuilder {
    /// Sets the candidate replica base addresses.
    ///
    /// At least one candidate must be provided. The order is preserved for
    /// the process lifetime and defines the sequential probe order.
    #[must_use]
    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single candidate base address.
    #[must_use]
    pub fn with_candidate<S: Into<String>>(mut self, candidate: S) -> Self {
        self.candidates.push(candidate.into());
        self
    }

    /// Sets the leader discovery settings.
    ///
    /// Default: [`LocatorConfig`] defaults (3s TTL, 1.5s probe timeout,
    /// sequential probe order).
    #[must_use]
    pub fn with_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Sets the reconnect policy for realtime sessions.
    ///
    /// Default: [`RetryPolicy::default()`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the realtime channel handshake timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enables or disables automatic reconnection after a closure.
    ///
    /// Default: enabled.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No candidates are provided
    /// - Any candidate is not a valid `http`/`https` URL
    /// - Any timeout is zero
    /// - The retry growth factor is below 1.0 or not finite
    pub fn build(self) -> Result<ClientConfig> {
        ensure!(
            !self.candidates.is_empty(),
            ConfigSnafu { message: "at least one candidate is required" }
        );

        let mut candidates = Vec::with_capacity(self.candidates.len());
        for raw in &self.candidates {
            candidates.push(parse_candidate(raw)?);
        }

        let locator = self.locator.unwrap_or_else(|| LocatorConfig::builder().build());
        ensure!(
            !locator.probe_timeout().is_zero(),
            ConfigSnafu { message: "probe_timeout cannot be zero" }
        );
        ensure!(!locator.ttl().is_zero(), ConfigSnafu { message: "ttl cannot be zero" });

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        ensure!(
            !connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );

        let retry_policy = self.retry_policy.unwrap_or_default();
        ensure!(
            retry_policy.growth_factor.is_finite() && retry_policy.growth_factor >= 1.0,
            ConfigSnafu { message: "growth_factor must be finite and at least 1.0" }
        );
        ensure!(
            !retry_policy.base_delay.is_zero(),
            ConfigSnafu { message: "base_delay cannot be zero" }
        );

        Ok(ClientConfig {
            candidates,
            locator,
            retry_policy,
            connect_timeout,
            auto_reconnect: self.auto_reconnect.unwrap_or(true),
        })
    }
}

/// Parses and validates a candidate base address.
fn parse_candidate(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| InvalidUrlSnafu { url: raw, message: e.to_string() }.build())?;

    ensure!(
        matches!(url.scheme(), "http" | "https"),
        InvalidUrlSnafu { url: raw, message: "scheme must be http or https" }
    );

    ensure!(url.host_str().is_some(), InvalidUrlSnafu { url: raw, message: "URL must have a host" });

    Ok(url)
}

/// Probe ordering policy on a cache miss.
///
/// The candidate that answered the previous round is always probed first
/// under both policies; the policy only governs the order of the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeOrder {
    /// Probe remaining candidates in candidate-set order (deterministic).
    #[default]
    Sequential,
    /// Probe remaining candidates in randomized order to spread probe load.
    Shuffled,
}

/// Leader discovery settings.
#[derive(Debug, Clone, bon::Builder)]
#[builder(derive(Debug))]
pub struct LocatorConfig {
    /// How long a cached leader address is trusted without re-probing.
    #[builder(default = DEFAULT_LEADER_TTL)]
    ttl: Duration,

    /// Per-candidate probe timeout.
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    probe_timeout: Duration,

    /// Probe ordering policy on a cache miss.
    #[builder(default)]
    probe_order: ProbeOrder,
}

impl LocatorConfig {
    /// Returns the cache trust window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the per-candidate probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Returns the probe ordering policy.
    #[must_use]
    pub fn probe_order(&self) -> ProbeOrder {
        self.probe_order
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Reconnect policy for realtime sessions.
///
/// The delay before retry attempt `n` (1-indexed) is
/// `min(base_delay * growth_factor^n, delay_cap)` plus a uniformly random
/// jitter in `[0, jitter_window]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of automatic retries after a failure.
    pub max_attempts: u32,

    /// Base delay before the first retry.
    pub base_delay: Duration,

    /// Exponential growth factor applied per attempt.
    pub growth_factor: f64,

    /// Upper bound on the pre-jitter delay.
    pub delay_cap: Duration,

    /// Width of the additive uniform jitter window.
    pub jitter_window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            growth_factor: 1.5,
            delay_cap: Duration::from_millis(10_000),
            jitter_window: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Creates a policy that never retries automatically.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 0, ..Default::default() }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    growth_factor: Option<f64>,
    delay_cap: Option<Duration>,
    jitter_window: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Sets the maximum number of automatic retries.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the base delay before the first retry.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Sets the exponential growth factor.
    #[must_use]
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = Some(factor);
        self
    }

    /// Sets the upper bound on the pre-jitter delay.
    #[must_use]
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        self.delay_cap = Some(cap);
        self
    }

    /// Sets the width of the additive jitter window.
    #[must_use]
    pub fn with_jitter_window(mut self, window: Duration) -> Self {
        self.jitter_window = Some(window);
        self
    }

    /// Builds the retry policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            growth_factor: self.growth_factor.unwrap_or(defaults.growth_factor),
            delay_cap: self.delay_cap.unwrap_or(defaults.delay_cap),
            jitter_window: self.jitter_window.unwrap_or(defaults.jitter_window),
        }
    }
}
