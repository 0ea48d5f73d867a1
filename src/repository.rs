use crate::aggregate::{AggregateFactory, AggregateRoot, DefaultAggregateFactory};
use crate::event_store::{DynEventStore, EventStore, EventStream};
use crate::snapshot::{DynSnapshotStore, Snapshot, SnapshotStore};
use crate::strategy::{SnapshotPolicy, SnapshotStrategy};
use crate::{Aggregate, CqrsContext, CqrsError, Event, EventEnvelope, EventPublisher, StreamVersion};
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Loads and saves one aggregate type against an event store and a snapshot store.
///
/// # Loading
/// When the type is snapshot-eligible and a snapshot exists, the blank aggregate from
/// the factory is restored from it and only the events after the snapshot version are
/// replayed. Otherwise the whole stream is replayed from version 1. An id without any
/// history yields a blank, never-persisted root: the repository does not tell "not
/// found" apart from "new".
///
/// # Saving
/// The expected prior version of the root is compared with the last stored event
/// before anything is written; see [`AggregateRepository::save_with_context`].
///
/// # Eligibility
/// A type is snapshot-eligible when a blank instance exposes
/// [`crate::Snapshottable`] and the strategy accepts the type. This is computed once
/// and cached for the lifetime of the repository.
pub struct AggregateRepository<A>
where
    A: Aggregate,
{
    store: DynEventStore<A>,
    snapshots: DynSnapshotStore,
    strategy: Arc<dyn SnapshotStrategy>,
    factory: Arc<dyn AggregateFactory<A>>,
    publishers: Vec<Box<dyn EventPublisher<A>>>,
    eligible: OnceLock<bool>,
}

impl<A> AggregateRepository<A>
where
    A: Aggregate + Default,
{
    /// Repository using [`DefaultAggregateFactory`] and no snapshots.
    #[must_use]
    pub fn new<ES, SS>(store: ES, snapshots: SS) -> Self
    where
        ES: EventStore<A> + 'static,
        SS: SnapshotStore + 'static,
    {
        Self::with_factory(store, snapshots, DefaultAggregateFactory)
    }
}

impl<A> AggregateRepository<A>
where
    A: Aggregate,
{
    #[must_use]
    pub fn with_factory<ES, SS, F>(store: ES, snapshots: SS, factory: F) -> Self
    where
        ES: EventStore<A> + 'static,
        SS: SnapshotStore + 'static,
        F: AggregateFactory<A> + 'static,
    {
        Self {
            store: Arc::new(store),
            snapshots: Arc::new(snapshots),
            strategy: Arc::new(SnapshotPolicy::Never),
            factory: Arc::new(factory),
            publishers: Vec::new(),
            eligible: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_strategy<S>(mut self, strategy: S) -> Self
    where
        S: SnapshotStrategy + 'static,
    {
        self.strategy = Arc::new(strategy);
        self.eligible = OnceLock::new();
        self
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Box<dyn EventPublisher<A>>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn append_publisher(&mut self, publisher: Box<dyn EventPublisher<A>>) {
        self.publishers.push(publisher);
    }

    /// Whether snapshots are read and written for `A`.
    pub fn is_snapshot_eligible(&self) -> bool {
        *self.eligible.get_or_init(|| {
            let blank = self.factory.create();
            let capable = blank.as_snapshottable().is_some();
            let eligible = capable && self.strategy.is_eligible(A::TYPE);
            debug!(aggregate_type = A::TYPE, capable, eligible, "Computed snapshot eligibility");
            eligible
        })
    }

    /// A blank root for an aggregate that has never been saved.
    pub fn create(&self, aggregate_id: Uuid) -> Result<AggregateRoot<A>, CqrsError> {
        validate_id(aggregate_id)?;
        Ok(AggregateRoot::new(aggregate_id, self.factory.create()))
    }

    #[instrument(skip(self), fields(aggregate_type = A::TYPE))]
    pub async fn get(&self, aggregate_id: Uuid) -> Result<AggregateRoot<A>, CqrsError> {
        validate_id(aggregate_id)?;
        let mut root = AggregateRoot::new(aggregate_id, self.factory.create());

        if self.is_snapshot_eligible() {
            if let Some(snapshot) = self.snapshots.read_latest(aggregate_id).await? {
                debug!(version = %snapshot.version, "Snapshot found");
                if let Err(e) = root.restore_snapshot(snapshot.state, snapshot.version) {
                    warn!(error = %e, "Failed to restore snapshot, falling back to full replay");
                    root = AggregateRoot::new(aggregate_id, self.factory.create());
                }
            } else {
                debug!("No snapshot found for aggregate");
            }
        }

        let from_version = root.version() + 1;
        let stream = self.store.read_from(aggregate_id, from_version).await?;
        let replayed = replay(&mut root, stream).await?;

        info!(
            version = %root.version(),
            replayed,
            from_snapshot = root.snapshot_version().is_some(),
            "Aggregate loaded"
        );
        Ok(root)
    }

    /// Raw event stream of an aggregate, from version 1.
    pub async fn history(&self, aggregate_id: Uuid) -> Result<EventStream<A>, CqrsError> {
        validate_id(aggregate_id)?;
        self.store.read_all(aggregate_id).await
    }

    /// [`AggregateRepository::save_with_context`] with an anonymous context.
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<usize, CqrsError> {
        self.save_with_context(root, &CqrsContext::default()).await
    }

    /// Persists the uncommitted events of `root` and returns how many were committed.
    ///
    /// 1. A nil id is rejected. Nothing to commit: returns `0` without touching any store.
    /// 2. The last stored event is compared with the root's committed version. A stream
    ///    that exists for a never-saved root is a [`CqrsError::CreationConflict`]; any
    ///    other mismatch is a [`CqrsError::ConcurrencyConflict`].
    /// 3. Events are stamped with consecutive versions and the commit time, then
    ///    appended in a single call.
    /// 4. The root is marked committed, each event is published in order, and a
    ///    snapshot is written if the strategy asks for one.
    ///
    /// A publisher or snapshot failure is returned after the events were stored; the
    /// root is already committed at that point and must not be saved again as-is.
    #[instrument(skip(self, root, context), fields(aggregate_type = A::TYPE, aggregate_id = %root.id()))]
    pub async fn save_with_context(
        &self,
        root: &mut AggregateRoot<A>,
        context: &CqrsContext,
    ) -> Result<usize, CqrsError> {
        validate_id(root.id())?;
        if !root.has_uncommitted_events() {
            debug!("No uncommitted events, nothing to save");
            return Ok(0);
        }

        let aggregate_id = root.id();
        let expected = root.committed_version();
        let latest_event = match self.store.read_last(aggregate_id).await {
            Ok(event) => {
                debug!(has_event = event.is_some(), "Fetched latest event");
                event
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch latest event");
                return Err(e);
            }
        };
        check_expected_version(aggregate_id, expected, latest_event.map(|e| e.version))?;

        let envelopes = stamp(root, context);
        let committed = envelopes.len();
        debug!(event_count = committed, "Appending events");
        if let Err(e) = self.store.append(aggregate_id, envelopes.clone()).await {
            error!(error = %e, "Failed to append events");
            return Err(e);
        }
        root.mark_committed();

        for envelope in &envelopes {
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish(envelope, context).await {
                    error!(error = %e, version = %envelope.version, "Failed to publish event");
                    return Err(e);
                }
            }
        }

        if self.is_snapshot_eligible() && self.strategy.should_snapshot(&root.snapshot_candidate())
        {
            self.take_snapshot(root).await?;
        }

        info!(event_count = committed, version = %root.version(), "Commit completed successfully");
        Ok(committed)
    }

    /// Reload, mutate and save until the save succeeds or `max_attempts` loads were made.
    ///
    /// Only [`CqrsError::ConcurrencyConflict`] is retried; every other error, including a
    /// rejected mutation, is returned immediately.
    pub async fn update_with_retry<F>(
        &self,
        aggregate_id: Uuid,
        max_attempts: usize,
        mut mutate: F,
    ) -> Result<usize, CqrsError>
    where
        F: FnMut(&mut AggregateRoot<A>) -> Result<(), A::Error> + Send,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut root = self.get(aggregate_id).await?;
            mutate(&mut root).map_err(CqrsError::user_error)?;
            match self.save(&mut root).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "Retrying after concurrency conflict");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn take_snapshot(&self, root: &mut AggregateRoot<A>) -> Result<(), CqrsError> {
        let Some(capability) = root.state().as_snapshottable() else {
            return Ok(());
        };
        let snapshot = Snapshot {
            aggregate_id: root.id(),
            aggregate_type: A::TYPE.to_string(),
            version: root.version(),
            state: capability.snapshot_state()?,
            taken_at: Utc::now(),
        };
        debug!(version = %snapshot.version, "Saving snapshot");
        if let Err(e) = self.snapshots.write(snapshot).await {
            error!(error = %e, "Failed to save snapshot");
            return Err(e);
        }
        root.mark_snapshotted();
        Ok(())
    }
}

fn validate_id(aggregate_id: Uuid) -> Result<(), CqrsError> {
    if aggregate_id.is_nil() {
        return Err(CqrsError::invalid_argument("aggregate id must not be nil"));
    }
    Ok(())
}

/// Conflict rules applied before appending.
fn check_expected_version(
    aggregate_id: Uuid,
    expected: StreamVersion,
    latest_version: Option<usize>,
) -> Result<(), CqrsError> {
    debug!(latest_version = ?latest_version, expected_version = %expected, "Checking version");
    match (expected, latest_version) {
        (StreamVersion::NotYetCreated, None) => Ok(()),
        (StreamVersion::NotYetCreated, Some(actual)) => {
            error!(actual, "Creation conflict detected");
            Err(CqrsError::creation_conflict(aggregate_id, actual))
        }
        (StreamVersion::CreatedAt(version), Some(actual)) if version == actual => Ok(()),
        (StreamVersion::CreatedAt(_), actual) => {
            error!(latest_version = ?actual, expected_version = %expected, "Version conflict detected");
            Err(CqrsError::concurrency_error(aggregate_id, expected, actual))
        }
    }
}

fn stamp<A: Aggregate>(root: &AggregateRoot<A>, context: &CqrsContext) -> Vec<EventEnvelope<A>> {
    let base = root.base_version();
    let at = Utc::now();
    let metadata = context.envelope_metadata();
    root.uncommitted_events()
        .iter()
        .enumerate()
        .map(|(i, event)| EventEnvelope {
            event_id: context.next_uuid(),
            aggregate_id: root.id(),
            aggregate_type: A::TYPE.to_string(),
            version: base + i + 1,
            event_type: event.event_type(),
            payload: event.clone(),
            metadata: metadata.clone(),
            at,
        })
        .collect()
}

async fn replay<A: Aggregate>(
    root: &mut AggregateRoot<A>,
    mut stream: EventStream<A>,
) -> Result<usize, CqrsError> {
    let mut replayed = 0;
    while let Some(event) = stream.next().await {
        root.replay(event?)?;
        replayed += 1;
    }
    Ok(replayed)
}
