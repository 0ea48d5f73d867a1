use crate::snapshot::SnapshotCandidate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decides which aggregates get snapshotted, and when.
///
/// The repository asks `is_eligible` once per aggregate type (and only for types that
/// expose the snapshot capability), then `should_snapshot` after every successful save.
pub trait SnapshotStrategy: Send + Sync {
    fn is_eligible(&self, aggregate_type: &str) -> bool;

    fn should_snapshot(&self, candidate: &SnapshotCandidate) -> bool;
}

/// Snapshot frequency applied to every aggregate type alike.
///
/// - `Never`: snapshots are neither written nor read.
/// - `Always`: a snapshot after every save.
/// - `EveryNEvents(n)`: a snapshot once `n` events accumulated since the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotPolicy {
    #[default]
    Never,
    Always,
    EveryNEvents(usize),
}

impl SnapshotStrategy for SnapshotPolicy {
    fn is_eligible(&self, _aggregate_type: &str) -> bool {
        !matches!(self, Self::Never)
    }

    fn should_snapshot(&self, candidate: &SnapshotCandidate) -> bool {
        match self {
            Self::Never => false,
            Self::Always => candidate.events_since_snapshot > 0,
            Self::EveryNEvents(threshold) => {
                candidate.events_since_snapshot >= (*threshold).max(1)
            }
        }
    }
}

/// Snapshot configuration: a default policy plus overrides keyed by aggregate type.
///
/// ```
/// use cqrs_repository::{SnapshotPolicy, SnapshotSettings, SnapshotStrategy};
///
/// let settings = SnapshotSettings::from_json(
///     r#"{ "defaultPolicy": { "everyNEvents": 50 }, "overrides": { "AUDIT": "never" } }"#,
/// )
/// .unwrap();
/// assert_eq!(settings.policy_for("ACCOUNT"), SnapshotPolicy::EveryNEvents(50));
/// assert!(!settings.is_eligible("AUDIT"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSettings {
    #[serde(default)]
    pub default_policy: SnapshotPolicy,
    #[serde(default)]
    pub overrides: HashMap<String, SnapshotPolicy>,
}

impl SnapshotSettings {
    #[must_use]
    pub fn new(default_policy: SnapshotPolicy) -> Self {
        Self {
            default_policy,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, aggregate_type: impl Into<String>, policy: SnapshotPolicy) -> Self {
        self.overrides.insert(aggregate_type.into(), policy);
        self
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn policy_for(&self, aggregate_type: &str) -> SnapshotPolicy {
        self.overrides
            .get(aggregate_type)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

impl SnapshotStrategy for SnapshotSettings {
    fn is_eligible(&self, aggregate_type: &str) -> bool {
        self.policy_for(aggregate_type).is_eligible(aggregate_type)
    }

    fn should_snapshot(&self, candidate: &SnapshotCandidate) -> bool {
        self.policy_for(candidate.aggregate_type)
            .should_snapshot(candidate)
    }
}
