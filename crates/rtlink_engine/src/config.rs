//! Configuration for the realtime client.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`ClientConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A polling interval was zero.
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    /// The maximum rejoin delay is below the base delay.
    #[error("reconnection_delay_max ({max:?}) is below reconnection_delay ({delay:?})")]
    DelayRange {
        /// Base delay.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },

    /// No push transport kinds were allowed.
    #[error("at least one transport must be allowed")]
    NoTransports,
}

/// Configuration for a realtime client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API host, e.g. `https://api.example.com`.
    pub api_host: Option<String>,
    /// API namespace appended to the host.
    pub api_namespace: String,
    /// Opaque credential token.
    pub api_token: Option<String>,
    /// Header carrying the token on HTTP requests.
    pub token_header: String,
    /// Push server endpoint.
    pub server: Option<String>,
    /// Whether the push transport reconnects by itself.
    pub reconnection: bool,
    /// Rejoin attempts before giving up (`None` = unlimited).
    pub reconnection_attempts: Option<u32>,
    /// Step added to the rejoin delay after each failure.
    pub reconnection_delay: Duration,
    /// Upper bound of the rejoin delay.
    pub reconnection_delay_max: Duration,
    /// Pull cadence while polling carries the full load.
    pub pull_interval: Duration,
    /// Pull cadence while push is primary.
    pub pull_interval_enhance: Duration,
    /// Delay without events before notifying `inactivity`.
    pub inactivity_timeout: Option<Duration>,
    /// Allowed push transport kinds, in preference order.
    pub transports: Vec<String>,
    /// Whether the push transport must open a fresh connection.
    pub force_new: bool,
}

impl ClientConfig {
    /// Creates a configuration with the documented defaults.
    pub fn new() -> Self {
        Self {
            api_host: None,
            api_namespace: "api/4/".into(),
            api_token: None,
            token_header: "Wisembly-Token".into(),
            server: None,
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: Duration::from_millis(1_000),
            reconnection_delay_max: Duration::from_millis(60_000),
            pull_interval: Duration::from_millis(10_000),
            pull_interval_enhance: Duration::from_millis(60_000),
            inactivity_timeout: None,
            transports: vec!["websocket".into(), "polling".into()],
            force_new: true,
        }
    }

    /// Sets the API host.
    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    /// Sets the API namespace.
    pub fn with_api_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.api_namespace = namespace.into();
        self
    }

    /// Sets the credential token.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Sets the push server endpoint.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Sets the rejoin backoff.
    pub fn with_reconnection_delays(mut self, delay: Duration, max: Duration) -> Self {
        self.reconnection_delay = delay;
        self.reconnection_delay_max = max;
        self
    }

    /// Limits the number of rejoin attempts.
    pub fn with_reconnection_attempts(mut self, attempts: u32) -> Self {
        self.reconnection_attempts = Some(attempts);
        self
    }

    /// Sets both pull intervals.
    pub fn with_pull_intervals(mut self, full: Duration, enhance: Duration) -> Self {
        self.pull_interval = full;
        self.pull_interval_enhance = enhance;
        self
    }

    /// Enables the inactivity watchdog.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// Checks the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pull_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("pull_interval"));
        }
        if self.pull_interval_enhance.is_zero() {
            return Err(ConfigError::ZeroInterval("pull_interval_enhance"));
        }
        if self.reconnection_delay_max < self.reconnection_delay {
            return Err(ConfigError::DelayRange {
                delay: self.reconnection_delay,
                max: self.reconnection_delay_max,
            });
        }
        if self.transports.is_empty() {
            return Err(ConfigError::NoTransports);
        }
        Ok(())
    }

    /// Applies overrides on top of this configuration.
    pub fn apply(&mut self, options: ClientOptions) {
        let ClientOptions {
            api_host,
            api_namespace,
            api_token,
            server,
            reconnection,
            reconnection_attempts,
            reconnection_delay,
            reconnection_delay_max,
            pull_interval,
            pull_interval_enhance,
            inactivity_timeout,
            transports,
            force_new,
        } = options;

        if let Some(host) = api_host {
            self.api_host = Some(host);
        }
        if let Some(namespace) = api_namespace {
            self.api_namespace = namespace;
        }
        if let Some(token) = api_token {
            self.api_token = Some(token);
        }
        if let Some(server) = server {
            self.server = Some(server);
        }
        if let Some(reconnection) = reconnection {
            self.reconnection = reconnection;
        }
        if let Some(attempts) = reconnection_attempts {
            self.reconnection_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some(ms) = reconnection_delay {
            self.reconnection_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = reconnection_delay_max {
            self.reconnection_delay_max = Duration::from_millis(ms);
        }
        if let Some(ms) = pull_interval {
            self.pull_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = pull_interval_enhance {
            self.pull_interval_enhance = Duration::from_millis(ms);
        }
        if let Some(ms) = inactivity_timeout {
            self.inactivity_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(transports) = transports {
            self.transports = transports;
        }
        if let Some(force_new) = force_new {
            self.force_new = force_new;
        }
    }

    /// Returns the rejoin backoff derived from this configuration.
    pub fn rejoin_backoff(&self) -> RejoinBackoff {
        RejoinBackoff {
            step: self.reconnection_delay,
            max: self.reconnection_delay_max,
            max_attempts: self.reconnection_attempts,
        }
    }

    /// Returns the options handed to the push connector.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            reconnection: self.reconnection,
            reconnection_attempts: self.reconnection_attempts,
            reconnection_delay: self.reconnection_delay,
            reconnection_delay_max: self.reconnection_delay_max,
            transports: self.transports.clone(),
            force_new: self.force_new,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain overrides, as an embedding application would pass them.
///
/// Durations are milliseconds. `reconnectionAttempts: 0` means unlimited and
/// `inactivityTimeout: 0` disables the watchdog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// See [`ClientConfig::api_host`].
    pub api_host: Option<String>,
    /// See [`ClientConfig::api_namespace`].
    pub api_namespace: Option<String>,
    /// See [`ClientConfig::api_token`].
    pub api_token: Option<String>,
    /// See [`ClientConfig::server`].
    pub server: Option<String>,
    /// See [`ClientConfig::reconnection`].
    pub reconnection: Option<bool>,
    /// See [`ClientConfig::reconnection_attempts`].
    pub reconnection_attempts: Option<u32>,
    /// See [`ClientConfig::reconnection_delay`].
    pub reconnection_delay: Option<u64>,
    /// See [`ClientConfig::reconnection_delay_max`].
    pub reconnection_delay_max: Option<u64>,
    /// See [`ClientConfig::pull_interval`].
    pub pull_interval: Option<u64>,
    /// See [`ClientConfig::pull_interval_enhance`].
    pub pull_interval_enhance: Option<u64>,
    /// See [`ClientConfig::inactivity_timeout`].
    pub inactivity_timeout: Option<u64>,
    /// See [`ClientConfig::transports`].
    pub transports: Option<Vec<String>>,
    /// See [`ClientConfig::force_new`].
    pub force_new: Option<bool>,
}

impl ClientOptions {
    /// Overrides that only set the token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            api_token: Some(token.into()),
            ..Default::default()
        }
    }
}

/// Options forwarded to the push transport when it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Whether the transport reconnects by itself.
    pub reconnection: bool,
    /// Transport-level reconnection attempts (`None` = unlimited).
    pub reconnection_attempts: Option<u32>,
    /// Base reconnection delay.
    pub reconnection_delay: Duration,
    /// Maximum reconnection delay.
    pub reconnection_delay_max: Duration,
    /// Allowed transport kinds.
    pub transports: Vec<String>,
    /// Whether a fresh connection is required.
    pub force_new: bool,
}

/// Linear backoff used between rejoin attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejoinBackoff {
    /// Added to the delay after each failure.
    pub step: Duration,
    /// Delay ceiling.
    pub max: Duration,
    /// Failures tolerated before giving up (`None` = unlimited).
    pub max_attempts: Option<u32>,
}

impl RejoinBackoff {
    /// Delay before the attempt following a failure at `previous`.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        previous.saturating_add(self.step).min(self.max)
    }

    /// Clamps a requested delay to the ceiling.
    pub fn clamp(&self, delay: Duration) -> Duration {
        delay.min(self.max)
    }

    /// Returns true if another attempt is allowed after `failures` failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}
