//! Engine configuration loaded from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const ENV_DISPATCH_MAX_ATTEMPTS: &str = "STOCKROOM_DISPATCH_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STOCKROOM_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "STOCKROOM_RETRY_MAX_DELAY_MS";
pub const ENV_TX_TIMEOUT_MS: &str = "STOCKROOM_TX_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Full plan-then-apply attempts made by `dispatch` on allocation conflicts.
    pub dispatch_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Transactions running longer than this are rolled back.
    pub tx_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_max_attempts: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 200,
            tx_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Read `STOCKROOM_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable or out-of-range values
    /// are logged and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let config = Self {
            dispatch_max_attempts: parse_or(
                &lookup,
                ENV_DISPATCH_MAX_ATTEMPTS,
                defaults.dispatch_max_attempts,
                |v| *v >= 1,
            ),
            retry_base_delay_ms: parse_or(&lookup, ENV_RETRY_BASE_DELAY_MS, defaults.retry_base_delay_ms, |_| true),
            retry_max_delay_ms: parse_or(&lookup, ENV_RETRY_MAX_DELAY_MS, defaults.retry_max_delay_ms, |_| true),
            tx_timeout_ms: parse_or(&lookup, ENV_TX_TIMEOUT_MS, defaults.tx_timeout_ms, |v| *v > 0),
        };

        if config.retry_max_delay_ms < config.retry_base_delay_ms {
            tracing::warn!(
                base_ms = config.retry_base_delay_ms,
                max_ms = config.retry_max_delay_ms,
                "retry max delay below base delay; using base delay as the cap"
            );
            return Self {
                retry_max_delay_ms: config.retry_base_delay_ms,
                ..config
            };
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.dispatch_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if valid(&v) => v,
        _ => {
            tracing::warn!(key, value = %raw, %default, "invalid configuration value; using default");
            default
        }
    }
}
