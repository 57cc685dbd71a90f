//! Coordinator configuration.

use crate::backoff::BackoffPolicy;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for replication and verification scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Concurrent verification jobs across all replicator classes.
    pub verification_max_capacity: usize,
    /// Concurrent sync jobs across all blob replicator classes.
    pub blob_sync_max_capacity: usize,
    /// Concurrent sync jobs across all repository replicator classes.
    pub repository_sync_max_capacity: usize,
    /// Records claimed per sync batch.
    pub sync_batch_size: usize,
    /// Records claimed per verification batch.
    pub verification_batch_size: usize,
    /// Records flagged per reverification pass.
    pub reverification_batch_size: usize,
    /// Batches a single worker processes per scheduler cycle.
    pub max_batches_per_cycle: usize,
    /// Age after which a `started` sync claim may be re-claimed.
    #[serde(with = "duration_secs")]
    pub sync_stall_threshold: Duration,
    /// Age after which a `started` verification claim may be re-claimed.
    #[serde(with = "duration_secs")]
    pub verification_stall_threshold: Duration,
    /// Age after which a verified record is checked again.
    #[serde(with = "duration_secs")]
    pub minimum_reverification_interval: Duration,
    /// Whether a failed verification also fails the sync state.
    pub resync_on_verification_failure: bool,
    /// Retry delays for both lifecycles.
    pub backoff: BackoffPolicy,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            verification_max_capacity: 100,
            blob_sync_max_capacity: 10,
            repository_sync_max_capacity: 25,
            sync_batch_size: 10,
            verification_batch_size: 10,
            reverification_batch_size: 1000,
            max_batches_per_cycle: 10,
            sync_stall_threshold: Duration::from_secs(8 * 60 * 60),
            verification_stall_threshold: Duration::from_secs(8 * 60 * 60),
            minimum_reverification_interval: Duration::from_secs(90 * 24 * 60 * 60),
            resync_on_verification_failure: false,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl GeoConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration; missing keys keep their defaults.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that sizes are usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.sync_batch_size == 0 {
            return Err(CoreError::InvalidConfig("sync_batch_size must be positive".into()));
        }
        if self.verification_batch_size == 0 {
            return Err(CoreError::InvalidConfig(
                "verification_batch_size must be positive".into(),
            ));
        }
        if self.max_batches_per_cycle == 0 {
            return Err(CoreError::InvalidConfig(
                "max_batches_per_cycle must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Sets the global verification capacity.
    #[must_use]
    pub fn verification_max_capacity(mut self, capacity: usize) -> Self {
        self.verification_max_capacity = capacity;
        self
    }

    /// Sets the blob sync capacity.
    #[must_use]
    pub fn blob_sync_max_capacity(mut self, capacity: usize) -> Self {
        self.blob_sync_max_capacity = capacity;
        self
    }

    /// Sets the repository sync capacity.
    #[must_use]
    pub fn repository_sync_max_capacity(mut self, capacity: usize) -> Self {
        self.repository_sync_max_capacity = capacity;
        self
    }

    /// Sets the sync batch size.
    #[must_use]
    pub fn sync_batch_size(mut self, size: usize) -> Self {
        self.sync_batch_size = size;
        self
    }

    /// Sets the verification batch size.
    #[must_use]
    pub fn verification_batch_size(mut self, size: usize) -> Self {
        self.verification_batch_size = size;
        self
    }

    /// Sets the sync stall threshold.
    #[must_use]
    pub fn sync_stall_threshold(mut self, threshold: Duration) -> Self {
        self.sync_stall_threshold = threshold;
        self
    }

    /// Sets the verification stall threshold.
    #[must_use]
    pub fn verification_stall_threshold(mut self, threshold: Duration) -> Self {
        self.verification_stall_threshold = threshold;
        self
    }

    /// Sets the minimum reverification interval.
    #[must_use]
    pub fn minimum_reverification_interval(mut self, interval: Duration) -> Self {
        self.minimum_reverification_interval = interval;
        self
    }

    /// Sets whether verification failures also fail the sync state.
    #[must_use]
    pub fn resync_on_verification_failure(mut self, value: bool) -> Self {
        self.resync_on_verification_failure = value;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Serde helpers storing a [`Duration`] as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
