//! Stream rule configuration
//!
//! Loaded by the node's configuration layer and passed into the rule engines
//! by reference. All fields have defaults so partial TOML documents are accepted.

use crate::errors::{RiverError, RiverResult};
use crate::identifiers::StreamKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default upper bound on the number of chunks a media stream may declare.
pub const DEFAULT_MEDIA_MAX_CHUNK_COUNT: i32 = 50;

/// Default upper bound on the size of a single media chunk, in bytes.
pub const DEFAULT_MEDIA_MAX_CHUNK_SIZE: usize = 500_000;

/// Age applied when `recency_constraints.age_seconds` is zero.
pub const DEFAULT_RECENCY_AGE_SECONDS: u64 = 5;

/// Configuration consumed by `can_add_event` and `can_create_stream`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bounds on how stale an event's `prev_miniblock_hash` may be
    pub recency_constraints: RecencyConstraintsConfig,
    /// Media stream limits
    pub media: MediaStreamConfig,
    /// Per-kind membership caps
    pub membership_limits: MembershipLimitsConfig,
}

/// Staleness bounds for the miniblock an event references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConstraintsConfig {
    /// Maximum age of the block following the referenced one; 0 means the default
    pub age_seconds: u64,
    /// Maximum number of blocks the referenced one may trail the tip by; 0 means unlimited
    pub generations: u64,
}

impl Default for RecencyConstraintsConfig {
    fn default() -> Self {
        Self {
            age_seconds: DEFAULT_RECENCY_AGE_SECONDS,
            generations: 0,
        }
    }
}

impl RecencyConstraintsConfig {
    /// Effective maximum age.
    pub fn max_age(&self) -> chrono::Duration {
        let seconds = if self.age_seconds == 0 {
            DEFAULT_RECENCY_AGE_SECONDS
        } else {
            self.age_seconds
        };
        chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

/// Media stream limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaStreamConfig {
    /// Maximum chunk count a media inception may declare
    pub max_chunk_count: i32,
    /// Maximum size of a single chunk in bytes
    pub max_chunk_size: usize,
}

impl Default for MediaStreamConfig {
    fn default() -> Self {
        Self {
            max_chunk_count: DEFAULT_MEDIA_MAX_CHUNK_COUNT,
            max_chunk_size: DEFAULT_MEDIA_MAX_CHUNK_SIZE,
        }
    }
}

/// Maximum joined members per joinable stream kind; 0 disables the cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipLimitsConfig {
    /// Cap for space streams
    pub space: usize,
    /// Cap for channel streams
    pub channel: usize,
    /// Cap for DM streams; a DM never holds more than its two parties
    pub dm_channel: usize,
    /// Cap for group DM streams
    pub gdm_channel: usize,
}

impl MembershipLimitsConfig {
    /// Cap for the given kind, `None` when uncapped.
    pub fn for_kind(&self, kind: StreamKind) -> Option<usize> {
        let limit = match kind {
            StreamKind::Space => self.space,
            StreamKind::Channel => self.channel,
            StreamKind::DmChannel => self.dm_channel,
            StreamKind::GdmChannel => self.gdm_channel,
            _ => 0,
        };
        (limit > 0).then_some(limit)
    }
}

impl StreamConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> RiverResult<Self> {
        let config: StreamConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load_from_file(path: &Path) -> RiverResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RiverError::bad_config(format!("failed to read config file: {e}"))
                .tag("path", path.display())
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), ?config, "loaded stream config");
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> RiverResult<()> {
        if self.media.max_chunk_count <= 0 {
            return Err(RiverError::bad_config("media.max_chunk_count must be positive")
                .tag("max_chunk_count", self.media.max_chunk_count));
        }
        if self.media.max_chunk_size == 0 {
            return Err(RiverError::bad_config("media.max_chunk_size must be positive"));
        }
        if self.membership_limits.dm_channel == 1 {
            return Err(RiverError::bad_config(
                "membership_limits.dm_channel must admit both parties",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recency_constraints.max_age(), chrono::Duration::seconds(5));
        assert_eq!(config.membership_limits.for_kind(StreamKind::Space), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StreamConfig::from_toml_str(
            r#"
            [media]
            max_chunk_size = 1024

            [membership_limits]
            gdm_channel = 48
            "#,
        )
        .unwrap();
        assert_eq!(config.media.max_chunk_size, 1024);
        assert_eq!(config.media.max_chunk_count, DEFAULT_MEDIA_MAX_CHUNK_COUNT);
        assert_eq!(config.membership_limits.for_kind(StreamKind::GdmChannel), Some(48));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = StreamConfig::from_toml_str("[media]\nmax_chunk_count = 0\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::BadConfig);

        let err = StreamConfig::from_toml_str("media = 3").unwrap_err();
        assert_eq!(err.code, ErrorCode::BadConfig);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[recency_constraints]\nage_seconds = 11\ngenerations = 3").unwrap();
        let config = StreamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.recency_constraints.age_seconds, 11);
        assert_eq!(config.recency_constraints.generations, 3);
    }
}
