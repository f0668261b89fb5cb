//! Backend configuration and validation.

use std::str::FromStr;
use std::time::Duration;

/// The only URL scheme this build can connect to: in-process channels.
pub const MEMORY_SCHEME: &str = "memory://";

/// What happens when a handler returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and move on.
    #[default]
    Report,
    /// Re-run the handler with exponential backoff, then report.
    Retry { max_attempts: u32 },
}

impl FailurePolicy {
    /// Total number of handler invocations allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Report => 1,
            Self::Retry { max_attempts } => (*max_attempts).max(1),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    /// Accepts `report`, `retry` (three attempts) or `retry:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.split_once(':') {
            None if lower == "report" => Ok(Self::Report),
            None if lower == "retry" => Ok(Self::Retry { max_attempts: 3 }),
            Some(("retry", n)) => n
                .parse()
                .map(|max_attempts| Self::Retry { max_attempts })
                .map_err(|_| format!("invalid retry count: {n}")),
            _ => Err(format!(
                "unknown failure policy: {s} (expected report, retry or retry:N)"
            )),
        }
    }
}

/// A URL a backend needs, tagged with the setting it came from so that
/// validation messages point at the right environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub setting: &'static str,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub enabled: bool,
    pub endpoints: Vec<Endpoint>,
    /// Queue name used in acks and logs.
    pub queue: String,
    /// Concurrent consumers.
    pub workers: usize,
    /// Bound of the in-process channel.
    pub capacity: usize,
    pub failure_policy: FailurePolicy,
    /// Delay before the first retry; doubles on every further attempt.
    pub retry_delay: Duration,
    /// Task results kept for lookup. The oldest is evicted first.
    pub result_capacity: usize,
}

impl BackendConfig {
    pub fn new(enabled: bool, queue: impl Into<String>) -> Self {
        Self {
            enabled,
            endpoints: Vec::new(),
            queue: queue.into(),
            workers: 1,
            capacity: 1024,
            failure_policy: FailurePolicy::Report,
            retry_delay: Duration::from_millis(200),
            result_capacity: 10_000,
        }
    }

    /// Enabled config with every endpoint pointing at `memory://`.
    pub fn in_memory(queue: impl Into<String>) -> Self {
        Self::new(true, queue)
    }

    pub fn endpoint(mut self, setting: &'static str, url: Option<String>) -> Self {
        self.endpoints.push(Endpoint { setting, url });
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity.max(1);
        self
    }

    /// Returns the reason this backend cannot run, if any.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Err("not enabled".into());
        }
        for endpoint in &self.endpoints {
            let url = match endpoint.url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => url,
                _ => return Err(format!("{} is not set", endpoint.setting)),
            };
            if !url.starts_with(MEMORY_SCHEME) {
                let scheme = url.split("://").next().unwrap_or(url);
                return Err(format!(
                    "{} uses unsupported scheme '{scheme}' (supported: {MEMORY_SCHEME})",
                    endpoint.setting
                ));
            }
        }
        Ok(())
    }
}

/// Settings for all three backends.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub task_queue: BackendConfig,
    pub async_queue: BackendConfig,
    pub broker: BackendConfig,
}

impl DispatchConfig {
    /// Everything switched off.
    pub fn disabled() -> Self {
        Self {
            task_queue: BackendConfig::new(false, "celery"),
            async_queue: BackendConfig::new(false, "default"),
            broker: BackendConfig::new(false, "kafka"),
        }
    }

    /// All three backends running on in-process channels.
    pub fn in_memory() -> Self {
        Self {
            task_queue: BackendConfig::in_memory("celery"),
            async_queue: BackendConfig::in_memory("default"),
            broker: BackendConfig::in_memory("kafka"),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
