use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Floor the maintenance task tops the idle set up toward.
    pub min_sessions: usize,

    /// Hard cap on non-multiplexed sessions (idle + checked out). The
    /// multiplexed session sits outside this bound.
    pub max_sessions: usize,

    /// How long `checkout` waits for a session when the pool is at
    /// capacity before failing with `PoolExhausted`.
    pub checkout_timeout: Duration,

    /// Cadence of the background maintenance task.
    pub maintenance_interval: Duration,

    /// Idle sessions unused for longer than this get a keep-alive ping.
    pub idle_staleness_threshold: Duration,

    /// Age at which the multiplexed session is replaced.
    pub multiplexed_refresh_interval: Duration,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            min_sessions: 1,
            max_sessions: 100,
            checkout_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(10),
            idle_staleness_threshold: Duration::from_secs(30 * 60),
            multiplexed_refresh_interval: Duration::from_secs(7 * 24 * 3600),
        }
    }

    pub fn min_sessions(mut self, min: usize) -> Self {
        self.min_sessions = min;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn idle_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.idle_staleness_threshold = threshold;
        self
    }

    pub fn multiplexed_refresh_interval(mut self, interval: Duration) -> Self {
        self.multiplexed_refresh_interval = interval;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be > 0".to_string());
        }

        if self.min_sessions > self.max_sessions {
            return Err("min_sessions cannot exceed max_sessions".to_string());
        }

        if self.checkout_timeout.is_zero() {
            return Err("checkout_timeout must be > 0".to_string());
        }

        if self.maintenance_interval.is_zero() {
            return Err("maintenance_interval must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}
