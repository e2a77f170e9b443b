//! Client configuration from environment variables.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::retry::{BackoffSchedule, RetryPolicy};

pub const DEFAULT_HUB_URL: &str = "http://localhost:5000/hubs/chat";

/// Tunables for the hub connection.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub hub_url: String,
    /// Upper bound on one connection attempt (negotiate, socket, handshake).
    pub handshake_timeout: Duration,
    /// How long a command waits for its completion.
    pub invocation_timeout: Duration,
    /// Interval between client pings.
    pub keep_alive_interval: Duration,
    /// Silence from the server after which the transport counts as lost.
    pub server_timeout: Duration,
    /// Minimum spacing of forwarded typing notifications per user.
    pub typing_window: Duration,
    /// Connect the socket directly without calling `/negotiate`.
    pub skip_negotiation: bool,
    pub retry: Arc<dyn RetryPolicy>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_URL)
    }
}

impl HubConfig {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            handshake_timeout: Duration::from_secs(15),
            invocation_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            typing_window: Duration::from_secs(3),
            skip_negotiation: false,
            retry: Arc::new(BackoffSchedule::default()),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HUBLINE_HUB_URL` (default: "http://localhost:5000/hubs/chat")
    /// - `HUBLINE_HANDSHAKE_TIMEOUT_MS` (default: 15000)
    /// - `HUBLINE_INVOCATION_TIMEOUT_MS` (default: 30000)
    /// - `HUBLINE_KEEP_ALIVE_MS` (default: 15000)
    /// - `HUBLINE_SERVER_TIMEOUT_MS` (default: 30000)
    /// - `HUBLINE_TYPING_WINDOW_MS` (default: 3000)
    /// - `HUBLINE_SKIP_NEGOTIATION`: "true" | "false" (default: false)
    /// - `HUBLINE_RETRY_DELAYS_MS`: comma-separated delays (default: "0,1000,3000,8000,15000,30000")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HubConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| match lookup(key) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    warn!(key, value = %raw, "invalid duration, using default");
                    default
                }
            },
            None => default,
        };

        let skip_negotiation = match lookup("HUBLINE_SKIP_NEGOTIATION") {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    warn!(value = %raw, "invalid HUBLINE_SKIP_NEGOTIATION, using default");
                    defaults.skip_negotiation
                }
            },
            None => defaults.skip_negotiation,
        };

        let retry: Arc<dyn RetryPolicy> = match lookup("HUBLINE_RETRY_DELAYS_MS") {
            Some(raw) => match parse_schedule(&raw) {
                Some(schedule) => Arc::new(schedule),
                None => {
                    warn!(value = %raw, "invalid HUBLINE_RETRY_DELAYS_MS, using default");
                    defaults.retry.clone()
                }
            },
            None => defaults.retry.clone(),
        };

        Self {
            hub_url: lookup("HUBLINE_HUB_URL").unwrap_or_else(|| defaults.hub_url.clone()),
            handshake_timeout: millis("HUBLINE_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout),
            invocation_timeout: millis("HUBLINE_INVOCATION_TIMEOUT_MS", defaults.invocation_timeout),
            keep_alive_interval: millis("HUBLINE_KEEP_ALIVE_MS", defaults.keep_alive_interval),
            server_timeout: millis("HUBLINE_SERVER_TIMEOUT_MS", defaults.server_timeout),
            typing_window: millis("HUBLINE_TYPING_WINDOW_MS", defaults.typing_window),
            skip_negotiation,
            retry,
        }
    }

    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_typing_window(mut self, window: Duration) -> Self {
        self.typing_window = window;
        self
    }

    pub fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy) -> Self {
        self.retry = Arc::new(policy);
        self
    }
}

fn parse_schedule(raw: &str) -> Option<BackoffSchedule> {
    let delays = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    Some(BackoffSchedule::from_millis(&delays))
}
