//! Compaction policy: decides whether the next edit is a checkpoint or a delta.
//!
//! Reconstruction replays every delta since the nearest checkpoint, so the
//! policy bounds replay cost by forcing a checkpoint once the run of deltas
//! exceeds a count or size threshold.

use serde::{Deserialize, Serialize};

/// The kind of node the next edit should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextNode {
    Checkpoint,
    Delta,
}

/// Thresholds on the run of deltas since the chain's latest checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionPolicy {
    /// Deltas allowed on one checkpoint. Once the run since the latest
    /// checkpoint holds more than this, the next edit is a checkpoint.
    pub max_deltas: usize,
    /// Cumulative changeset bytes allowed on one checkpoint, with the same
    /// exceeds-then-checkpoint rule.
    pub max_delta_bytes: u64,
    /// Store every edit as a checkpoint regardless of the thresholds.
    pub checkpoint_every_edit: bool,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            max_deltas: 32,
            max_delta_bytes: 1024 * 1024,
            checkpoint_every_edit: false,
        }
    }
}

impl CompactionPolicy {
    /// A policy that checkpoints every edit.
    pub fn always_checkpoint() -> Self {
        Self {
            checkpoint_every_edit: true,
            ..Self::default()
        }
    }

    /// A policy that never forces a checkpoint.
    pub fn never_checkpoint() -> Self {
        Self {
            max_deltas: usize::MAX,
            max_delta_bytes: u64::MAX,
            checkpoint_every_edit: false,
        }
    }

    /// Decide the next node given the deltas already recorded since the
    /// latest checkpoint.
    pub fn decide(&self, deltas_since_checkpoint: usize, delta_bytes: u64) -> NextNode {
        if self.checkpoint_every_edit
            || deltas_since_checkpoint > self.max_deltas
            || delta_bytes > self.max_delta_bytes
        {
            NextNode::Checkpoint
        } else {
            NextNode::Delta
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_threshold() {
        let policy = CompactionPolicy {
            max_deltas: 3,
            ..CompactionPolicy::never_checkpoint()
        };
        assert_eq!(policy.decide(0, 0), NextNode::Delta);
        assert_eq!(policy.decide(2, 0), NextNode::Delta);
        // A run at the threshold has not exceeded it.
        assert_eq!(policy.decide(3, 0), NextNode::Delta);
        assert_eq!(policy.decide(4, 0), NextNode::Checkpoint);
    }

    #[test]
    fn test_size_threshold() {
        let policy = CompactionPolicy {
            max_delta_bytes: 100,
            ..CompactionPolicy::never_checkpoint()
        };
        assert_eq!(policy.decide(1, 99), NextNode::Delta);
        assert_eq!(policy.decide(1, 100), NextNode::Delta);
        assert_eq!(policy.decide(1, 101), NextNode::Checkpoint);
    }

    #[test]
    fn test_presets() {
        assert_eq!(CompactionPolicy::always_checkpoint().decide(0, 0), NextNode::Checkpoint);
        assert_eq!(CompactionPolicy::default().decide(32, 0), NextNode::Delta);
        assert_eq!(CompactionPolicy::default().decide(33, 0), NextNode::Checkpoint);
        assert_eq!(
            CompactionPolicy::never_checkpoint().decide(10_000, 1 << 40),
            NextNode::Delta
        );
    }

    #[test]
    fn test_flag_defaults_off_in_config() {
        let policy: CompactionPolicy = serde_json::from_str(r#"{"max_deltas": 4}"#).unwrap();
        assert!(!policy.checkpoint_every_edit);
        assert_eq!(policy.max_delta_bytes, 1024 * 1024);
    }
}
