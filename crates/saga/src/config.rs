//! Orchestrator configuration loaded from environment variables.

use std::time::Duration;

use crate::saga::DEFAULT_MAX_RETRIES;

/// Orchestrator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_DEFAULT_TIMEOUT_SECS`: deadline given to new sagas (default: `300`)
/// - `SAGA_DEFAULT_MAX_RETRIES`: retries allowed per step (default: `3`)
/// - `SAGA_HTTP_TIMEOUT_SECS`: bound on every HTTP step call (default: `30`)
/// - `SAGA_BROKER_TIMEOUT_SECS`: bound on every broker step call (default: `10`)
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub default_timeout: Duration,
    pub default_max_retries: u32,
    pub http_timeout: Duration,
    pub broker_timeout: Duration,
}

impl OrchestratorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: secs_var("SAGA_DEFAULT_TIMEOUT_SECS")
                .unwrap_or(defaults.default_timeout),
            default_max_retries: std::env::var("SAGA_DEFAULT_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_retries),
            http_timeout: secs_var("SAGA_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout),
            broker_timeout: secs_var("SAGA_BROKER_TIMEOUT_SECS")
                .unwrap_or(defaults.broker_timeout),
        }
    }
}

fn secs_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            default_max_retries: DEFAULT_MAX_RETRIES,
            http_timeout: Duration::from_secs(30),
            broker_timeout: Duration::from_secs(10),
        }
    }
}
