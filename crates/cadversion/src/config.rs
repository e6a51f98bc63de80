//! Engine configuration.

use cadversion_core::CompactionPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for a [`VersionGraph`](crate::VersionGraph).
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration:
///
/// ```
/// use cadversion::VersionGraphConfig;
///
/// let config = VersionGraphConfig::from_json_str(r#"{"compaction": {"max_deltas": 8}}"#).unwrap();
/// assert_eq!(config.compaction.max_deltas, 8);
/// assert!(config.validate_deltas_on_write);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionGraphConfig {
    /// When an edit becomes a checkpoint instead of a delta.
    pub compaction: CompactionPolicy,
    /// Dry-run every new delta against the state it will be replayed onto.
    pub validate_deltas_on_write: bool,
    /// Reconstruction yields to the runtime after this many deltas.
    pub replay_yield_interval: usize,
}

impl Default for VersionGraphConfig {
    fn default() -> Self {
        Self {
            compaction: CompactionPolicy::default(),
            validate_deltas_on_write: true,
            replay_yield_interval: 64,
        }
    }
}

impl VersionGraphConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
