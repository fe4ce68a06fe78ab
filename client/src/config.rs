use std::env;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::constants::{
    DEFAULT_API_URL, DRIFT_TOLERANCE_SECS, ECHO_TIMEOUT, HANDSHAKE_TIMEOUT, HOSTED_WS_URL,
    KEEPALIVE_INTERVAL, LEAVE_TIMEOUT, LOCAL_WS_URL, PROGRESS_INTERVAL, RECONNECT_BUDGET,
    RESYNC_TIMEOUT,
};

/// A room-coordination endpoint to try, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub label: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Tuning for a [`WatchPartyClient`](crate::sync::WatchPartyClient) session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub endpoints: Vec<Endpoint>,
    pub api_url: String,
    /// Consecutive failed handshakes before the session gives up.
    pub retry_budget: u32,
    pub backoff: Backoff,
    pub handshake_timeout: Duration,
    /// How long to wait for the snapshot after a (re)connect before retrying.
    pub resync_timeout: Duration,
    pub keepalive_interval: Duration,
    pub progress_interval: Duration,
    pub drift_tolerance_secs: f64,
    pub echo_timeout: Duration,
    pub leave_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(false, false),
            api_url: DEFAULT_API_URL.to_string(),
            retry_budget: RECONNECT_BUDGET,
            backoff: Backoff::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            resync_timeout: RESYNC_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            progress_interval: PROGRESS_INTERVAL,
            drift_tolerance_secs: DRIFT_TOLERANCE_SECS,
            echo_timeout: ECHO_TIMEOUT,
            leave_timeout: LEAVE_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Defaults with overrides from `WATCHPARTY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let prefer_local = lookup("WATCHPARTY_PREFER_LOCAL").is_some();
        let disable_local = lookup("WATCHPARTY_DISABLE_LOCAL").is_some();
        config.endpoints = match lookup("WATCHPARTY_SERVER_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => vec![Endpoint::new("configured", url.trim())],
            None => default_endpoints(prefer_local, disable_local),
        };
        if let Some(url) = lookup("WATCHPARTY_API_URL").filter(|url| !url.trim().is_empty()) {
            config.api_url = url.trim().to_string();
        }
        if let Some(budget) = lookup("WATCHPARTY_RETRY_BUDGET").and_then(|v| v.trim().parse().ok()) {
            config.retry_budget = budget;
        }
        config
    }

    #[must_use]
    pub fn with_endpoint(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints = vec![Endpoint::new(label, url)];
        self
    }

    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_resync_timeout(mut self, timeout: Duration) -> Self {
        self.resync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub fn with_drift_tolerance(mut self, seconds: f64) -> Self {
        self.drift_tolerance_secs = seconds.max(0.0);
        self
    }
}

fn default_endpoints(prefer_local: bool, disable_local: bool) -> Vec<Endpoint> {
    let local = Endpoint::new("local development", LOCAL_WS_URL);
    let hosted = Endpoint::new("hosted", HOSTED_WS_URL);

    let mut endpoints = Vec::with_capacity(2);
    if prefer_local && !disable_local {
        endpoints.push(local.clone());
    }
    endpoints.push(hosted);
    if !prefer_local && !disable_local {
        endpoints.push(local);
    }
    endpoints
}
