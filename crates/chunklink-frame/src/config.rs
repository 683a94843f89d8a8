use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reassembler::SequencePolicy;

/// Default maximum payload bytes per chunk.
pub const DEFAULT_CHUNK_MAX: usize = 1400;

/// Default receive buffer capacity of the link endpoint.
pub const DEFAULT_LINK_CAPACITY: usize = 2048;

/// Errors raised by [`LinkConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk_max must be greater than zero")]
    ZeroChunkMax,

    #[error("chunk_max {chunk_max} does not fit a u16 payload_len")]
    ChunkMaxTooLarge { chunk_max: usize },

    #[error("chunk_max {chunk_max} exceeds link capacity {capacity}")]
    ExceedsLinkCapacity { chunk_max: usize, capacity: usize },

    #[error("ready_timeout must be greater than zero")]
    ZeroReadyTimeout,

    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,
}

/// Tunables for both ends of a chunked link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum payload bytes per chunk. Default: 1400.
    pub chunk_max: usize,
    /// Largest single transfer the receiving endpoint can buffer. Default: 2048.
    pub link_capacity: usize,
    /// Bound on each readiness wait. Default: 2 s.
    #[serde(with = "millis")]
    pub ready_timeout: Duration,
    /// Interval between readiness samples. Default: 1 ms.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Pause between frames on the sending side. Default: 30 ms.
    #[serde(with = "millis")]
    pub frame_interval: Duration,
    /// Evict an open frame after this long without a chunk. Zero disables eviction.
    /// Default: 5 s.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,
    /// How the receiver treats chunk_id gaps. Default: strict.
    pub sequence: SequencePolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            chunk_max: DEFAULT_CHUNK_MAX,
            link_capacity: DEFAULT_LINK_CAPACITY,
            ready_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(1),
            frame_interval: Duration::from_millis(30),
            idle_timeout: Duration::from_secs(5),
            sequence: SequencePolicy::default(),
        }
    }
}

impl LinkConfig {
    /// Check the invariants the transmitter and receiver rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_max == 0 {
            return Err(ConfigError::ZeroChunkMax);
        }
        if self.chunk_max > u16::MAX as usize {
            return Err(ConfigError::ChunkMaxTooLarge {
                chunk_max: self.chunk_max,
            });
        }
        if self.chunk_max > self.link_capacity {
            return Err(ConfigError::ExceedsLinkCapacity {
                chunk_max: self.chunk_max,
                capacity: self.link_capacity,
            });
        }
        if self.ready_timeout.is_zero() {
            return Err(ConfigError::ZeroReadyTimeout);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    /// Largest frame the chunk_id space can carry at this chunk size.
    pub fn max_frame_len(&self) -> usize {
        self.chunk_max.saturating_mul(u16::MAX as usize + 1)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_max, 1400);
        assert_eq!(config.link_capacity, 2048);
        assert_eq!(config.ready_timeout, Duration::from_secs(2));
        assert_eq!(config.max_frame_len(), 1400 * 65_536);
    }

    #[test]
    fn rejects_zero_chunk() {
        let config = LinkConfig {
            chunk_max: 0,
            ..LinkConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroChunkMax));
    }

    #[test]
    fn rejects_chunk_above_capacity() {
        let config = LinkConfig {
            chunk_max: 4096,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExceedsLinkCapacity {
                chunk_max: 4096,
                capacity: 2048
            })
        ));
    }

    #[test]
    fn rejects_chunk_beyond_u16() {
        let config = LinkConfig {
            chunk_max: 70_000,
            link_capacity: 100_000,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChunkMaxTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_zero_waits() {
        let no_timeout = LinkConfig {
            ready_timeout: Duration::ZERO,
            ..LinkConfig::default()
        };
        assert_eq!(no_timeout.validate(), Err(ConfigError::ZeroReadyTimeout));

        let no_poll = LinkConfig {
            poll_interval: Duration::ZERO,
            ..LinkConfig::default()
        };
        assert_eq!(no_poll.validate(), Err(ConfigError::ZeroPollInterval));
    }

    #[test]
    fn json_uses_milliseconds_and_fills_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"chunk_max": 512, "ready_timeout": 250}"#).unwrap();
        assert_eq!(config.chunk_max, 512);
        assert_eq!(config.ready_timeout, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_millis(1));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["ready_timeout"], 250);
        assert_eq!(json["sequence"], "strict");
    }
}
