//! Configuration for the token tiers.
//!
//! # Example
//!
//! ```
//! use token_tiers::TierConfig;
//!
//! // Minimal config (uses defaults)
//! let config = TierConfig::default();
//! assert_eq!(config.l1_live_secs, 60);
//! assert_eq!(config.l2_ttl_secs, 300);
//!
//! // Expire persistent records an hour after their last use
//! let config = TierConfig {
//!     l3_horizon_secs: 3600,
//!     l3_sweep_secs: 120,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;
use serde::Deserialize;

use crate::error::TierError;

/// Upper bound for every seconds-valued setting (100 years).
///
/// Timestamps are `i64` seconds; larger spans would wrap in the cutoff
/// arithmetic. Use `l3_horizon_secs = 0` for records that never expire.
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

/// Tier timing and sizing.
///
/// All fields have defaults; `l1_sweep_secs` must stay below `l2_ttl_secs`
/// so that survivors flushed by the sweep are re-cached before their L2
/// entry can expire underneath an L1 copy.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    /// Seconds an unused token stays in process memory (default: 60)
    #[serde(default = "default_l1_live_secs")]
    pub l1_live_secs: u64,

    /// L1 sweep period in seconds (default: 31)
    #[serde(default = "default_l1_sweep_secs")]
    pub l1_sweep_secs: u64,

    /// Remote cache TTL in seconds (default: 300)
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,

    /// Seconds after last use before a persistent record expires (0 = never)
    #[serde(default)]
    pub l3_horizon_secs: u64,

    /// Expiration sweep period in seconds (default: 300)
    #[serde(default = "default_l3_sweep_secs")]
    pub l3_sweep_secs: u64,

    /// Number of independently locked L1 partitions (default: 1)
    #[serde(default = "default_l1_shards")]
    pub l1_shards: usize,

    /// Deadline for each remote cache / persistent store call
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Background error channel capacity; overflow is dropped
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
}

fn default_l1_live_secs() -> u64 { 60 }
fn default_l1_sweep_secs() -> u64 { 31 }
fn default_l2_ttl_secs() -> u64 { 300 }
fn default_l3_sweep_secs() -> u64 { 300 }
fn default_l1_shards() -> usize { 1 }
fn default_op_timeout_ms() -> u64 { 5_000 }
fn default_error_channel_capacity() -> usize { 64 }

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            l1_live_secs: default_l1_live_secs(),
            l1_sweep_secs: default_l1_sweep_secs(),
            l2_ttl_secs: default_l2_ttl_secs(),
            l3_horizon_secs: 0,
            l3_sweep_secs: default_l3_sweep_secs(),
            l1_shards: default_l1_shards(),
            op_timeout_ms: default_op_timeout_ms(),
            error_channel_capacity: default_error_channel_capacity(),
        }
    }
}

impl TierConfig {
    /// Reject parameter combinations the tiers cannot honour.
    pub fn validate(&self) -> Result<(), TierError> {
        if self.l1_live_secs == 0 {
            return Err(TierError::Config("l1_live_secs must be > 0".into()));
        }
        if self.l1_sweep_secs == 0 {
            return Err(TierError::Config("l1_sweep_secs must be > 0".into()));
        }
        if self.l2_ttl_secs == 0 {
            return Err(TierError::Config("l2_ttl_secs must be > 0".into()));
        }
        for (name, value) in [
            ("l1_live_secs", self.l1_live_secs),
            ("l1_sweep_secs", self.l1_sweep_secs),
            ("l2_ttl_secs", self.l2_ttl_secs),
            ("l3_horizon_secs", self.l3_horizon_secs),
            ("l3_sweep_secs", self.l3_sweep_secs),
        ] {
            if value > MAX_SPAN_SECS {
                return Err(TierError::Config(format!(
                    "{} ({}) exceeds {} seconds",
                    name, value, MAX_SPAN_SECS
                )));
            }
        }
        if self.l1_sweep_secs >= self.l2_ttl_secs {
            return Err(TierError::Config(format!(
                "l1_sweep_secs ({}) must be smaller than l2_ttl_secs ({})",
                self.l1_sweep_secs, self.l2_ttl_secs
            )));
        }
        if self.l3_horizon_secs > 0 && self.l3_sweep_secs == 0 {
            return Err(TierError::Config(
                "l3_sweep_secs must be > 0 when l3_horizon_secs is set".into(),
            ));
        }
        if self.l1_shards == 0 {
            return Err(TierError::Config("l1_shards must be >= 1".into()));
        }
        if self.op_timeout_ms == 0 {
            return Err(TierError::Config("op_timeout_ms must be > 0".into()));
        }
        if self.error_channel_capacity == 0 {
            return Err(TierError::Config("error_channel_capacity must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn l1_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.l1_sweep_secs)
    }

    #[must_use]
    pub fn l3_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.l3_sweep_secs)
    }

    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Whether persistent records expire at all.
    #[must_use]
    pub fn expires_l3(&self) -> bool {
        self.l3_horizon_secs > 0
    }

    /// Oldest `last_use` still inside the horizon at `now`, if records expire.
    #[must_use]
    pub fn l3_not_before(&self, now: i64) -> Option<i64> {
        if !self.expires_l3() {
            return None;
        }
        let horizon = i64::try_from(self.l3_horizon_secs).unwrap_or(i64::MAX);
        Some(now.saturating_sub(horizon))
    }
}
