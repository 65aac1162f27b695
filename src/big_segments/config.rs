use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

/// Tuning for [crate::BigSegmentStoreManager]. Durations decode from whole seconds.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct BigSegmentsConfig {
    /// Maximum number of context memberships kept in the cache.
    pub context_cache_size: u64,
    /// How long a cached membership stays valid. `None` keeps entries until evicted.
    #[serde_as(as = "Option<DurationSeconds<u64>>", no_default)]
    pub context_cache_time: Option<Duration>,
    /// Minimum time between two metadata polls.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub status_poll_interval: Duration,
    /// Age of the store's last synchronization at which its data counts as stale.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stale_after: Duration,
}

impl Default for BigSegmentsConfig {
    fn default() -> Self {
        Self {
            context_cache_size: 1000,
            context_cache_time: Some(Duration::from_secs(5)),
            status_poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(120),
        }
    }
}

impl BigSegmentsConfig {
    pub fn with_context_cache_size(mut self, size: u64) -> Self {
        self.context_cache_size = size;
        self
    }

    pub fn with_context_cache_time(mut self, ttl: Option<Duration>) -> Self {
        self.context_cache_time = ttl;
        self
    }

    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::BigSegmentsConfig;
    use spectral::prelude::*;
    use std::time::Duration;

    #[test]
    fn missing_fields_take_defaults() {
        let config: BigSegmentsConfig = serde_json::from_str(r#"{"staleAfter": 30}"#).unwrap();
        let expected = BigSegmentsConfig::default().with_stale_after(Duration::from_secs(30));
        assert_that!(config).is_equal_to(expected);
    }

    #[test]
    fn missing_cache_time_keeps_expiry() {
        let config: BigSegmentsConfig = serde_json::from_str(r#"{"contextCacheSize": 10}"#).unwrap();
        assert_that!(config.context_cache_time).contains_value(Duration::from_secs(5));
    }

    #[test]
    fn null_cache_time_disables_expiry() {
        let config: BigSegmentsConfig = serde_json::from_str(
            r#"{"contextCacheSize": 10, "contextCacheTime": null, "statusPollInterval": 1}"#,
        )
        .unwrap();
        assert_that!(config.context_cache_size).is_equal_to(10);
        assert_that!(config.context_cache_time).is_none();
        assert_that!(config.status_poll_interval).is_equal_to(Duration::from_secs(1));
    }
}
