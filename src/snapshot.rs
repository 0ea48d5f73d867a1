use crate::CqrsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub type DynSnapshotStore = Arc<dyn SnapshotStore + 'static>;

/// Aggregate state captured at `version`.
///
/// Events with a version above `version` must be replayed on top of `state` to reach
/// the current aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "_id")]
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub version: usize,
    pub state: serde_json::Value,
    pub taken_at: DateTime<Utc>,
}

/// Keeps the latest snapshot of each aggregate.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn read_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, CqrsError>;

    async fn write(&self, snapshot: Snapshot) -> Result<(), CqrsError>;
}

#[async_trait::async_trait]
impl<T> SnapshotStore for Arc<T>
where
    T: SnapshotStore + ?Sized,
{
    async fn read_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, CqrsError> {
        (**self).read_latest(aggregate_id).await
    }

    async fn write(&self, snapshot: Snapshot) -> Result<(), CqrsError> {
        (**self).write(snapshot).await
    }
}

/// What a [`crate::SnapshotStrategy`] sees of an aggregate right after it was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotCandidate {
    pub aggregate_type: &'static str,
    pub aggregate_id: Uuid,
    pub version: usize,
    /// Events applied since the last snapshot was taken or loaded.
    pub events_since_snapshot: usize,
}
