//! Runtime configuration read from `KESTREL_*` environment variables.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Deadline applied to each request; `None` disables it.
    pub request_timeout: Option<Duration>,
    pub metrics_timeout: Duration,
    pub metrics_enabled: bool,
    /// Server-side cap on events listed for a detail view.
    pub event_limit: Option<u32>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            metrics_timeout: Duration::from_millis(2000),
            metrics_enabled: true,
            event_limit: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let request_timeout = match get("KESTREL_REQUEST_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => d.request_timeout,
        };
        let metrics_timeout = get("KESTREL_METRICS_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.metrics_timeout);
        let metrics_disabled = get("KESTREL_METRICS_DISABLED")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let event_limit = match get("KESTREL_EVENT_LIMIT").and_then(|s| s.parse::<u32>().ok()) {
            Some(0) => None,
            Some(n) => Some(n),
            None => d.event_limit,
        };
        Self { request_timeout, metrics_timeout, metrics_enabled: !metrics_disabled, event_limit }
    }
}
