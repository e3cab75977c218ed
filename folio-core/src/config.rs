//! Configuration types

use crate::error::{ConfigError, FolioError, FolioResult};
use crate::policy::CachePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Default memory tier cap (100 MiB).
pub const DEFAULT_MEMORY_MAX_BYTES: u64 = 100 * MIB;

/// Fraction of the memory cap the hard-cap eviction drains down to.
pub const DEFAULT_MEMORY_EVICTION_TARGET: f64 = 0.70;

/// Default persistent tier ceiling (300 MiB).
pub const DEFAULT_PERSISTENT_MAX_BYTES: u64 = 300 * MIB;

/// Fraction of the persistent ceiling priority eviction drains down to.
pub const DEFAULT_PERSISTENT_EVICTION_TARGET: f64 = 0.80;

/// Library default TTL (24 hours).
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// TTL sweep intervals keyed by memory fill ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepIntervals {
    /// Fill ratio at or below 50%.
    pub relaxed: Duration,
    /// Fill ratio above 50% and at or below 80%.
    pub moderate: Duration,
    /// Fill ratio above 80%.
    pub aggressive: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            relaxed: Duration::from_secs(30 * 60),
            moderate: Duration::from_secs(15 * 60),
            aggressive: Duration::from_secs(5 * 60),
        }
    }
}

impl SweepIntervals {
    /// Interval until the next sweep given the current fill ratio.
    pub fn for_fill_ratio(&self, ratio: f64) -> Duration {
        if ratio <= 0.5 {
            self.relaxed
        } else if ratio <= 0.8 {
            self.moderate
        } else {
            self.aggressive
        }
    }
}

/// Cache service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard cap on the memory tier's accounted bytes.
    pub memory_max_bytes: u64,
    /// Fraction of `memory_max_bytes` to drain to once the cap is exceeded.
    pub memory_eviction_target: f64,
    /// TTL for entries written without one.
    pub default_ttl: Duration,
    /// Persistent usage above which priority eviction runs.
    pub persistent_max_bytes: u64,
    /// Fraction of `persistent_max_bytes` priority eviction drains to.
    pub persistent_eviction_target: f64,
    /// Policy used by `fetch` when the caller passes none.
    pub default_policy: CachePolicy,
    /// Whether the periodic TTL sweep task runs.
    pub sweep_enabled: bool,
    pub sweep_intervals: SweepIntervals,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_bytes: DEFAULT_MEMORY_MAX_BYTES,
            memory_eviction_target: DEFAULT_MEMORY_EVICTION_TARGET,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            persistent_max_bytes: DEFAULT_PERSISTENT_MAX_BYTES,
            persistent_eviction_target: DEFAULT_PERSISTENT_EVICTION_TARGET,
            default_policy: CachePolicy::default(),
            sweep_enabled: true,
            sweep_intervals: SweepIntervals::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_CACHE_MEMORY_MAX_BYTES`: memory tier cap (default: 100 MiB)
    /// - `FOLIO_CACHE_MEMORY_EVICTION_TARGET`: memory drain ratio (default: 0.70)
    /// - `FOLIO_CACHE_DEFAULT_TTL_SECS`: default TTL (default: 86400)
    /// - `FOLIO_CACHE_PERSISTENT_MAX_BYTES`: persistent ceiling (default: 300 MiB)
    /// - `FOLIO_CACHE_PERSISTENT_EVICTION_TARGET`: persistent drain ratio (default: 0.80)
    /// - `FOLIO_CACHE_DEFAULT_POLICY`: read policy (default: cache_first)
    /// - `FOLIO_CACHE_SWEEP_ENABLED`: run the TTL sweep (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            memory_max_bytes: env_parse("FOLIO_CACHE_MEMORY_MAX_BYTES")
                .unwrap_or(defaults.memory_max_bytes),
            memory_eviction_target: env_parse("FOLIO_CACHE_MEMORY_EVICTION_TARGET")
                .unwrap_or(defaults.memory_eviction_target),
            default_ttl: env_parse("FOLIO_CACHE_DEFAULT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            persistent_max_bytes: env_parse("FOLIO_CACHE_PERSISTENT_MAX_BYTES")
                .unwrap_or(defaults.persistent_max_bytes),
            persistent_eviction_target: env_parse("FOLIO_CACHE_PERSISTENT_EVICTION_TARGET")
                .unwrap_or(defaults.persistent_eviction_target),
            default_policy: env_parse("FOLIO_CACHE_DEFAULT_POLICY")
                .unwrap_or(defaults.default_policy),
            sweep_enabled: std::env::var("FOLIO_CACHE_SWEEP_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.sweep_enabled),
            sweep_intervals: defaults.sweep_intervals,
        }
    }

    /// Set the memory tier cap.
    pub fn with_memory_max_bytes(mut self, bytes: u64) -> Self {
        self.memory_max_bytes = bytes;
        self
    }

    /// Set the memory eviction target ratio.
    pub fn with_memory_eviction_target(mut self, ratio: f64) -> Self {
        self.memory_eviction_target = ratio;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the persistent tier ceiling.
    pub fn with_persistent_max_bytes(mut self, bytes: u64) -> Self {
        self.persistent_max_bytes = bytes;
        self
    }

    /// Set the persistent eviction target ratio.
    pub fn with_persistent_eviction_target(mut self, ratio: f64) -> Self {
        self.persistent_eviction_target = ratio;
        self
    }

    /// Set the default read policy.
    pub fn with_default_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Enable or disable the TTL sweep task.
    pub fn with_sweep(mut self, enabled: bool) -> Self {
        self.sweep_enabled = enabled;
        self
    }

    /// Set the sweep intervals.
    pub fn with_sweep_intervals(mut self, intervals: SweepIntervals) -> Self {
        self.sweep_intervals = intervals;
        self
    }

    /// Bytes the memory tier drains down to once the cap is exceeded.
    pub fn memory_target_bytes(&self) -> u64 {
        (self.memory_max_bytes as f64 * self.memory_eviction_target) as u64
    }

    /// Bytes the persistent tier drains down to once the ceiling is exceeded.
    pub fn persistent_target_bytes(&self) -> u64 {
        (self.persistent_max_bytes as f64 * self.persistent_eviction_target) as u64
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(FolioError::Config) if invalid.
    ///
    /// Validates:
    /// - byte caps > 0
    /// - target ratios in (0.0, 1.0]
    /// - default_ttl and every sweep interval are positive
    pub fn validate(&self) -> FolioResult<()> {
        if self.memory_max_bytes == 0 {
            return Err(invalid(
                "memory_max_bytes",
                self.memory_max_bytes.to_string(),
                "memory_max_bytes must be greater than 0",
            ));
        }

        if !valid_ratio(self.memory_eviction_target) {
            return Err(invalid(
                "memory_eviction_target",
                self.memory_eviction_target.to_string(),
                "memory_eviction_target must be in (0.0, 1.0]",
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(invalid(
                "default_ttl",
                format!("{:?}", self.default_ttl),
                "default_ttl must be positive",
            ));
        }

        if self.persistent_max_bytes == 0 {
            return Err(invalid(
                "persistent_max_bytes",
                self.persistent_max_bytes.to_string(),
                "persistent_max_bytes must be greater than 0",
            ));
        }

        if !valid_ratio(self.persistent_eviction_target) {
            return Err(invalid(
                "persistent_eviction_target",
                self.persistent_eviction_target.to_string(),
                "persistent_eviction_target must be in (0.0, 1.0]",
            ));
        }

        let intervals = &self.sweep_intervals;
        for (field, value) in [
            ("sweep_intervals.relaxed", intervals.relaxed),
            ("sweep_intervals.moderate", intervals.moderate),
            ("sweep_intervals.aggressive", intervals.aggressive),
        ] {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    format!("{:?}", value),
                    "sweep intervals must be positive",
                ));
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn valid_ratio(ratio: f64) -> bool {
    ratio > 0.0 && ratio <= 1.0
}

fn invalid(field: &str, value: String, reason: &str) -> FolioError {
    FolioError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.default_policy, CachePolicy::CacheFirst);
        assert!(config.sweep_enabled);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_memory_max_bytes(100)
            .with_memory_eviction_target(0.5)
            .with_default_ttl(Duration::from_secs(60))
            .with_persistent_max_bytes(1000)
            .with_persistent_eviction_target(0.9)
            .with_default_policy(CachePolicy::NetworkFirst)
            .with_sweep(false);

        assert_eq!(config.memory_max_bytes, 100);
        assert_eq!(config.memory_target_bytes(), 50);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.persistent_target_bytes(), 900);
        assert_eq!(config.default_policy, CachePolicy::NetworkFirst);
        assert!(!config.sweep_enabled);
    }

    #[test]
    fn test_memory_target_for_small_cap() {
        let config = CacheConfig::new().with_memory_max_bytes(100);
        assert_eq!(config.memory_target_bytes(), 70);
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let config = CacheConfig::new().with_memory_max_bytes(0);
        let err = config.validate().expect_err("zero cap should be rejected");
        assert!(format!("{}", err).contains("memory_max_bytes"));
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        for ratio in [0.0, -0.1, 1.5] {
            let config = CacheConfig::new().with_memory_eviction_target(ratio);
            assert!(config.validate().is_err(), "ratio {} should be rejected", ratio);
        }
        let config = CacheConfig::new().with_persistent_eviction_target(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl_and_interval() {
        let config = CacheConfig::new().with_default_ttl(Duration::ZERO);
        assert!(config.validate().is_err());

        let intervals = SweepIntervals {
            aggressive: Duration::ZERO,
            ..SweepIntervals::default()
        };
        let config = CacheConfig::new().with_sweep_intervals(intervals);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sweep_interval_by_fill_ratio() {
        let intervals = SweepIntervals::default();
        assert_eq!(intervals.for_fill_ratio(0.0), Duration::from_secs(1800));
        assert_eq!(intervals.for_fill_ratio(0.5), Duration::from_secs(1800));
        assert_eq!(intervals.for_fill_ratio(0.51), Duration::from_secs(900));
        assert_eq!(intervals.for_fill_ratio(0.8), Duration::from_secs(900));
        assert_eq!(intervals.for_fill_ratio(0.81), Duration::from_secs(300));
        assert_eq!(intervals.for_fill_ratio(1.7), Duration::from_secs(300));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = CacheConfig::from_env();
        assert_eq!(config, CacheConfig::default());
    }
}
