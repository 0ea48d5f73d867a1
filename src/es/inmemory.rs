use crate::event_store::{EventStore, EventStream};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::{Aggregate, CqrsError, EventEnvelope, StreamVersion};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Event journal and snapshot store kept in process memory.
///
/// Clones share the same data, so one instance can serve as both the event store and
/// the snapshot store of a repository.
#[derive(Clone, Debug)]
pub struct InMemoryPersist<A>
where
    A: Aggregate,
{
    snapshot: Arc<Mutex<HashMap<Uuid, Snapshot>>>,
    journal: Arc<Mutex<HashMap<Uuid, Vec<EventEnvelope<A>>>>>,
}

impl<A> InMemoryPersist<A>
where
    A: Aggregate,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(HashMap::new())),
            journal: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Copy of the stored stream of one aggregate.
    pub async fn events(&self, aggregate_id: Uuid) -> Vec<EventEnvelope<A>> {
        let journal = self.journal.lock().await;
        journal.get(&aggregate_id).cloned().unwrap_or_default()
    }

    pub async fn snapshot(&self, aggregate_id: Uuid) -> Option<Snapshot> {
        self.snapshot.lock().await.get(&aggregate_id).cloned()
    }
}

impl<A> Default for InMemoryPersist<A>
where
    A: Aggregate,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<A> EventStore<A> for InMemoryPersist<A>
where
    A: Aggregate,
{
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<A>, CqrsError> {
        let journal = self.journal.lock().await;
        let items = journal
            .get(&aggregate_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.version >= from_version)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
    }

    async fn read_last(&self, aggregate_id: Uuid) -> Result<Option<EventEnvelope<A>>, CqrsError> {
        let journal = self.journal.lock().await;
        Ok(journal
            .get(&aggregate_id)
            .and_then(|events| events.last().cloned()))
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<A>>,
    ) -> Result<(), CqrsError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        if events.iter().any(|e| e.aggregate_id != aggregate_id) {
            return Err(CqrsError::invalid_argument(format!(
                "batch for aggregate {aggregate_id} contains events of another aggregate"
            )));
        }
        let mut journal = self.journal.lock().await;
        let stream = journal.entry(aggregate_id).or_default();
        let last = stream.last().map(|e| e.version);

        let contiguous = events
            .iter()
            .enumerate()
            .all(|(i, e)| e.version == first.version + i);
        if first.version != last.unwrap_or(0) + 1 || !contiguous {
            return Err(match (first.version, last) {
                (1, Some(actual)) => CqrsError::creation_conflict(aggregate_id, actual),
                (version, actual) => {
                    let expected = match version.saturating_sub(1) {
                        0 => StreamVersion::NotYetCreated,
                        version => StreamVersion::CreatedAt(version),
                    };
                    CqrsError::concurrency_error(aggregate_id, expected, actual)
                }
            });
        }

        debug!(aggregate_id = %aggregate_id, event_count = events.len(), "Appending events");
        stream.extend(events);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<A> SnapshotStore for InMemoryPersist<A>
where
    A: Aggregate,
{
    async fn read_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, CqrsError> {
        Ok(self.snapshot.lock().await.get(&aggregate_id).cloned())
    }

    async fn write(&self, snapshot: Snapshot) -> Result<(), CqrsError> {
        let mut snapshots = self.snapshot.lock().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if existing.version > snapshot.version => {
                debug!(
                    aggregate_id = %snapshot.aggregate_id,
                    kept = %existing.version,
                    offered = %snapshot.version,
                    "Ignoring older snapshot"
                );
            }
            _ => {
                snapshots.insert(snapshot.aggregate_id, snapshot);
            }
        }
        Ok(())
    }
}
