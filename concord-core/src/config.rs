//! Configuration types

use crate::{ConcordResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest snapshot ring the engine accepts.
pub const MIN_SNAPSHOT_CAPACITY: usize = 10;

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EngineConfig {
    // Snapshots
    pub snapshot_capacity: usize,
    pub snapshot_eviction_batch: usize,

    // Sync
    pub sync_batch_size: usize,
    pub max_propagation_hops: usize,
    /// Window for the "recent conflicts" view of sync status
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub recent_conflict_window: Duration,

    // Notifications
    pub notification_capacity: usize,

    // Affordances
    pub default_action_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_capacity: 100,
            snapshot_eviction_batch: 10,
            sync_batch_size: 10,
            max_propagation_hops: 8,
            recent_conflict_window: Duration::from_secs(60 * 60),
            notification_capacity: 1024,
            default_action_confidence: 80.0,
        }
    }
}

impl EngineConfig {
    /// Validate every field, returning the first offending value.
    pub fn validate(&self) -> ConcordResult<()> {
        if self.snapshot_capacity < MIN_SNAPSHOT_CAPACITY {
            return Err(invalid(
                "snapshot_capacity",
                self.snapshot_capacity,
                format!("snapshot_capacity must be at least {}", MIN_SNAPSHOT_CAPACITY),
            ));
        }

        if self.snapshot_eviction_batch == 0
            || self.snapshot_eviction_batch > self.snapshot_capacity
        {
            return Err(invalid(
                "snapshot_eviction_batch",
                self.snapshot_eviction_batch,
                "snapshot_eviction_batch must be between 1 and snapshot_capacity",
            ));
        }

        if self.sync_batch_size == 0 {
            return Err(invalid(
                "sync_batch_size",
                self.sync_batch_size,
                "sync_batch_size must be greater than 0",
            ));
        }

        if self.max_propagation_hops == 0 {
            return Err(invalid(
                "max_propagation_hops",
                self.max_propagation_hops,
                "max_propagation_hops must be greater than 0",
            ));
        }

        if self.recent_conflict_window.is_zero() {
            return Err(invalid(
                "recent_conflict_window",
                format!("{:?}", self.recent_conflict_window),
                "recent_conflict_window must be positive",
            ));
        }

        if self.notification_capacity == 0 {
            return Err(invalid(
                "notification_capacity",
                self.notification_capacity,
                "notification_capacity must be greater than 0",
            ));
        }

        if !(0.0..=100.0).contains(&self.default_action_confidence) {
            return Err(invalid(
                "default_action_confidence",
                self.default_action_confidence,
                "default_action_confidence must be between 0.0 and 100.0",
            ));
        }

        Ok(())
    }

    /// Build a config from `CONCORD_*` environment variables, falling back to
    /// defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            snapshot_capacity: env_or("CONCORD_SNAPSHOT_CAPACITY", defaults.snapshot_capacity),
            snapshot_eviction_batch: env_or(
                "CONCORD_SNAPSHOT_EVICTION_BATCH",
                defaults.snapshot_eviction_batch,
            ),
            sync_batch_size: env_or("CONCORD_SYNC_BATCH_SIZE", defaults.sync_batch_size),
            max_propagation_hops: env_or(
                "CONCORD_MAX_PROPAGATION_HOPS",
                defaults.max_propagation_hops,
            ),
            recent_conflict_window: std::env::var("CONCORD_RECENT_CONFLICT_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recent_conflict_window),
            notification_capacity: env_or(
                "CONCORD_NOTIFICATION_CAPACITY",
                defaults.notification_capacity,
            ),
            default_action_confidence: env_or(
                "CONCORD_DEFAULT_ACTION_CONFIDENCE",
                defaults.default_action_confidence,
            ),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(
    field: &str,
    value: impl ToString,
    reason: impl Into<String>,
) -> crate::ConcordError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConcordError;

    fn field_of(err: ConcordError) -> String {
        match err {
            ConcordError::Config(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_snapshot_capacity_floor() {
        let config = EngineConfig {
            snapshot_capacity: 5,
            snapshot_eviction_batch: 1,
            ..EngineConfig::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "snapshot_capacity");
    }

    #[test]
    fn test_eviction_batch_bounds() {
        let config = EngineConfig {
            snapshot_eviction_batch: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "snapshot_eviction_batch"
        );
    }

    #[test]
    fn test_confidence_range() {
        let config = EngineConfig {
            default_action_confidence: 120.0,
            ..EngineConfig::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "default_action_confidence"
        );
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = EngineConfig {
            sync_batch_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "sync_batch_size");
    }
}
