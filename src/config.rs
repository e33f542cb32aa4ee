//! Router Configuration
//!
//! Loaded from a JSON file or built from defaults. Every field has a serde
//! default so partial files are valid. Durations are stored as millisecond
//! integers and exposed as `Duration` through accessors.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::router::ConsistencyLevel;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Per-endpoint channel pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    #[serde(default = "default_max_requests_per_channel")]
    pub max_requests_per_channel: usize,

    /// Concurrent channel opens allowed per endpoint
    #[serde(default = "default_max_concurrent_opens")]
    pub max_concurrent_opens: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Retire channels whose requests keep timing out
    #[serde(default = "default_true")]
    pub timeout_detection_enabled: bool,

    /// Consecutive timeouts that, with no response inside
    /// `timeout_detection_window_ms`, make a channel unhealthy
    #[serde(default = "default_timeout_detection_threshold")]
    pub timeout_detection_threshold: u32,

    #[serde(default = "default_timeout_detection_window_ms")]
    pub timeout_detection_window_ms: u64,

    /// Any timeout with no response for this long makes a channel unhealthy
    #[serde(default = "default_timeout_detection_time_limit_ms")]
    pub timeout_detection_time_limit_ms: u64,
}

fn default_max_channels() -> usize {
    30
}
fn default_max_requests_per_channel() -> usize {
    30
}
fn default_max_concurrent_opens() -> usize {
    8
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_open_timeout_ms() -> u64 {
    5_000
}
fn default_timeout_detection_threshold() -> u32 {
    10
}
fn default_timeout_detection_window_ms() -> u64 {
    1_000
}
fn default_timeout_detection_time_limit_ms() -> u64 {
    60_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            max_requests_per_channel: default_max_requests_per_channel(),
            max_concurrent_opens: default_max_concurrent_opens(),
            request_timeout_ms: default_request_timeout_ms(),
            open_timeout_ms: default_open_timeout_ms(),
            timeout_detection_enabled: true,
            timeout_detection_threshold: default_timeout_detection_threshold(),
            timeout_detection_window_ms: default_timeout_detection_window_ms(),
            timeout_detection_time_limit_ms: default_timeout_detection_time_limit_ms(),
        }
    }
}

impl PoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Hard ceiling on pending requests for one endpoint.
    pub fn admission_ceiling(&self) -> usize {
        self.max_channels.saturating_mul(self.max_requests_per_channel)
    }
}

/// Gone / RetryWith policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_wait_budget_ms")]
    pub wait_budget_ms: u64,

    /// Budget used when the account default consistency is Strong
    #[serde(default = "default_strong_wait_budget_ms")]
    pub strong_wait_budget_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Separate track for retry-with; falls back to the gone values
    #[serde(default)]
    pub retry_with: RetryWithConfig,

    /// Backoffs at least this long count as region reroute attempts and
    /// may start a fallback attempt in another region
    #[serde(default = "default_region_reroute_min_backoff_ms")]
    pub region_reroute_min_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub detect_connectivity_issues: bool,

    /// CPU load percentage considered overloaded
    #[serde(default = "default_cpu_overload_threshold")]
    pub cpu_overload_threshold: f64,

    /// Attempts allowed to a fallback region attempt (Gone-class only)
    #[serde(default = "default_fallback_max_attempts")]
    pub fallback_max_attempts: u32,

    #[serde(default = "default_fallback_wait_budget_ms")]
    pub fallback_wait_budget_ms: u64,
}

fn default_wait_budget_ms() -> u64 {
    30_000
}
fn default_strong_wait_budget_ms() -> u64 {
    60_000
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    15_000
}
fn default_region_reroute_min_backoff_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_cpu_overload_threshold() -> f64 {
    90.0
}
fn default_fallback_max_attempts() -> u32 {
    3
}
fn default_fallback_wait_budget_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            wait_budget_ms: default_wait_budget_ms(),
            strong_wait_budget_ms: default_strong_wait_budget_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_with: RetryWithConfig::default(),
            region_reroute_min_backoff_ms: default_region_reroute_min_backoff_ms(),
            detect_connectivity_issues: true,
            cpu_overload_threshold: default_cpu_overload_threshold(),
            fallback_max_attempts: default_fallback_max_attempts(),
            fallback_wait_budget_ms: default_fallback_wait_budget_ms(),
        }
    }
}

impl RetryConfig {
    /// Overall wait budget for the given account consistency.
    pub fn wait_budget(&self, consistency: ConsistencyLevel) -> Duration {
        match consistency {
            ConsistencyLevel::Strong => Duration::from_millis(self.strong_wait_budget_ms),
            _ => Duration::from_millis(self.wait_budget_ms),
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn region_reroute_min_backoff(&self) -> Duration {
        Duration::from_millis(self.region_reroute_min_backoff_ms)
    }

    pub fn fallback_wait_budget(&self) -> Duration {
        Duration::from_millis(self.fallback_wait_budget_ms)
    }
}

/// Optional retry-with overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryWithConfig {
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    /// Upper bound of random jitter added to each retry-with backoff
    #[serde(default)]
    pub random_salt_max_ms: Option<u64>,
    #[serde(default)]
    pub total_wait_ms: Option<u64>,
}

/// Session-token mismatch policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRetryConfig {
    #[serde(default = "default_session_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_session_backoff_multiplier")]
    pub backoff_multiplier: u32,

    #[serde(default = "default_session_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_session_wait_budget_ms")]
    pub wait_budget_ms: u64,

    /// Prefer failing over to a remote region over waiting locally
    #[serde(default)]
    pub remote_region_preferred: bool,

    #[serde(default = "default_max_in_region_retry_count")]
    pub max_in_region_retry_count: u32,

    /// Minimum time spent retrying in the local region before conceding
    #[serde(default = "default_min_in_region_retry_time_ms")]
    pub min_in_region_retry_time_ms: u64,
}

fn default_session_initial_backoff_ms() -> u64 {
    5
}
fn default_session_backoff_multiplier() -> u32 {
    5
}
fn default_session_max_backoff_ms() -> u64 {
    500
}
fn default_session_wait_budget_ms() -> u64 {
    5_000
}
fn default_max_in_region_retry_count() -> u32 {
    1
}
fn default_min_in_region_retry_time_ms() -> u64 {
    500
}

impl Default for SessionRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_session_initial_backoff_ms(),
            backoff_multiplier: default_session_backoff_multiplier(),
            max_backoff_ms: default_session_max_backoff_ms(),
            wait_budget_ms: default_session_wait_budget_ms(),
            remote_region_preferred: false,
            max_in_region_retry_count: default_max_in_region_retry_count(),
            min_in_region_retry_time_ms: default_min_in_region_retry_time_ms(),
        }
    }
}

/// Barrier probing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierConfig {
    #[serde(default = "default_barrier_max_probes")]
    pub max_probes: u32,

    #[serde(default = "default_barrier_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_barrier_max_probes() -> u32 {
    30
}
fn default_barrier_timeout_ms() -> u64 {
    30_000
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            max_probes: default_barrier_max_probes(),
            timeout_ms: default_barrier_timeout_ms(),
        }
    }
}

impl BarrierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Replica selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Four-bucket ordering (Connected, Unknown, UnhealthyPending, Unhealthy)
    #[serde(default)]
    pub validation_enabled: bool,

    /// Window after which a non-Connected endpoint with no new failure is
    /// treated as Connected again
    #[serde(default = "default_health_grace_period_ms")]
    pub health_grace_period_ms: u64,
}

fn default_health_grace_period_ms() -> u64 {
    60_000
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            validation_enabled: false,
            health_grace_period_ms: default_health_grace_period_ms(),
        }
    }
}

impl ReplicaConfig {
    pub fn health_grace_period(&self) -> Duration {
        Duration::from_millis(self.health_grace_period_ms)
    }
}

/// Top-level router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub session_retry: SessionRetryConfig,

    #[serde(default)]
    pub barrier: BarrierConfig,

    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Account default consistency
    #[serde(default)]
    pub default_consistency: ConsistencyLevel,

    /// Ordered region preference; the first entry is the local region
    #[serde(default)]
    pub preferred_regions: Vec<String>,

    /// Seed for replica shuffling; entropy when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            session_retry: SessionRetryConfig::default(),
            barrier: BarrierConfig::default(),
            replica: ReplicaConfig::default(),
            default_consistency: ConsistencyLevel::default(),
            preferred_regions: Vec::new(),
            rng_seed: None,
        }
    }
}

impl RouterConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: RouterConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the router cannot operate with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.max_channels == 0 {
            return Err(ConfigError::invalid("pool.max_channels", "must be at least 1"));
        }
        if self.pool.max_requests_per_channel == 0 {
            return Err(ConfigError::invalid(
                "pool.max_requests_per_channel",
                "must be at least 1",
            ));
        }
        if self.pool.max_concurrent_opens == 0 {
            return Err(ConfigError::invalid(
                "pool.max_concurrent_opens",
                "must be at least 1",
            ));
        }
        if self.pool.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("pool.request_timeout_ms", "must be positive"));
        }
        if self.pool.open_timeout_ms == 0 {
            return Err(ConfigError::invalid("pool.open_timeout_ms", "must be positive"));
        }
        if self.pool.timeout_detection_enabled && self.pool.timeout_detection_threshold == 0 {
            return Err(ConfigError::invalid(
                "pool.timeout_detection_threshold",
                "must be at least 1",
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.initial_backoff_ms",
                format!(
                    "{} exceeds retry.max_backoff_ms {}",
                    self.retry.initial_backoff_ms, self.retry.max_backoff_ms
                ),
            ));
        }
        if !(self.retry.cpu_overload_threshold > 0.0) {
            return Err(ConfigError::invalid(
                "retry.cpu_overload_threshold",
                "must be a positive percentage",
            ));
        }
        if self.session_retry.backoff_multiplier == 0 {
            return Err(ConfigError::invalid(
                "session_retry.backoff_multiplier",
                "must be at least 1",
            ));
        }
        if self.session_retry.initial_backoff_ms > self.session_retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "session_retry.initial_backoff_ms",
                "exceeds session_retry.max_backoff_ms",
            ));
        }
        if self.session_retry.remote_region_preferred
            && self.session_retry.max_in_region_retry_count == 0
        {
            return Err(ConfigError::invalid(
                "session_retry.max_in_region_retry_count",
                "must be at least 1 when remote region is preferred",
            ));
        }
        if self.barrier.max_probes == 0 {
            return Err(ConfigError::invalid("barrier.max_probes", "must be at least 1"));
        }
        if self.preferred_regions.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "preferred_regions",
                "region names must not be empty",
            ));
        }
        Ok(())
    }

    /// The local region, if any preference is configured.
    pub fn local_region(&self) -> Option<&str> {
        self.preferred_regions.first().map(String::as_str)
    }
}
