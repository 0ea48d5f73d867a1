use crate::event::{Event, EventEnvelope};
use crate::snapshot::SnapshotCandidate;
use crate::CqrsError;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use uuid::Uuid;

/// Domain state rebuilt from its own events.
///
/// Implementations only fold events into state; identity, versions and the queue of
/// uncommitted events are tracked by [`AggregateRoot`].
pub trait Aggregate: Debug + Clone + Send + Sync + 'static {
    const TYPE: &'static str;

    type Event: Event;

    type Error: std::error::Error + Send + Sync + 'static;

    fn apply(&mut self, event: Self::Event) -> Result<(), Self::Error>;

    /// Probe for the optional snapshot capability. `None` means the type cannot be
    /// snapshotted and is always loaded by full replay.
    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        None
    }

    fn as_snapshottable_mut(&mut self) -> Option<&mut dyn Snapshottable> {
        None
    }
}

/// Optional capability: produce and consume a compact state blob.
pub trait Snapshottable: Send + Sync {
    fn snapshot_state(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn restore_state(&mut self, state: serde_json::Value) -> Result<(), serde_json::Error>;
}

/// Builds the blank state an aggregate is replayed into.
pub trait AggregateFactory<A: Aggregate>: Send + Sync {
    fn create(&self) -> A;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAggregateFactory;

impl<A> AggregateFactory<A> for DefaultAggregateFactory
where
    A: Aggregate + Default,
{
    fn create(&self) -> A {
        A::default()
    }
}

/// Stream position as of the last successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamVersion {
    /// Never persisted: the store must not hold any event for this id.
    #[default]
    NotYetCreated,
    CreatedAt(usize),
}

impl StreamVersion {
    /// Numeric version, `0` for a stream that does not exist yet.
    #[must_use]
    pub fn value(&self) -> usize {
        match self {
            Self::NotYetCreated => 0,
            Self::CreatedAt(version) => *version,
        }
    }

    fn from_value(version: usize) -> Self {
        if version == 0 {
            Self::NotYetCreated
        } else {
            Self::CreatedAt(version)
        }
    }
}

impl Display for StreamVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotYetCreated => write!(f, "new stream"),
            Self::CreatedAt(version) => write!(f, "version {version}"),
        }
    }
}

/// An aggregate instance together with its persistence bookkeeping.
///
/// `version` counts every applied event, uncommitted ones included. The uncommitted
/// queue is drained only by a successful save.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: Uuid,
    state: A,
    version: usize,
    committed: StreamVersion,
    snapshot_version: Option<usize>,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// A brand-new aggregate with no history.
    #[must_use]
    pub fn new(id: Uuid, state: A) -> Self {
        Self {
            id,
            state,
            version: 0,
            committed: StreamVersion::NotYetCreated,
            snapshot_version: None,
            uncommitted: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn committed_version(&self) -> StreamVersion {
        self.committed
    }

    pub fn snapshot_version(&self) -> Option<usize> {
        self.snapshot_version
    }

    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Applies a freshly produced event and queues it for the next save.
    ///
    /// A rejected event leaves the root untouched.
    pub fn record(&mut self, event: A::Event) -> Result<(), A::Error> {
        self.state.apply(event.clone())?;
        self.uncommitted.push(event);
        self.version += 1;
        Ok(())
    }

    pub fn record_all<I>(&mut self, events: I) -> Result<(), A::Error>
    where
        I: IntoIterator<Item = A::Event>,
    {
        for event in events {
            self.record(event)?;
        }
        Ok(())
    }

    pub fn events_since_snapshot(&self) -> usize {
        self.version - self.snapshot_version.unwrap_or(0)
    }

    pub(crate) fn snapshot_candidate(&self) -> SnapshotCandidate {
        SnapshotCandidate {
            aggregate_type: A::TYPE,
            aggregate_id: self.id,
            version: self.version,
            events_since_snapshot: self.events_since_snapshot(),
        }
    }

    /// Version the first uncommitted event will be stamped with, minus one.
    pub(crate) fn base_version(&self) -> usize {
        self.version - self.uncommitted.len()
    }

    pub(crate) fn restore_snapshot(
        &mut self,
        state: serde_json::Value,
        version: usize,
    ) -> Result<(), CqrsError> {
        let target = self.state.as_snapshottable_mut().ok_or_else(|| {
            CqrsError::invalid_argument(format!("{} does not support snapshots", A::TYPE))
        })?;
        target.restore_state(state)?;
        self.version = version;
        self.committed = StreamVersion::from_value(version);
        self.snapshot_version = Some(version);
        Ok(())
    }

    /// Applies a persisted event. Versions must follow on without gaps.
    pub(crate) fn replay(&mut self, envelope: EventEnvelope<A>) -> Result<(), CqrsError> {
        let expected = self.version + 1;
        if envelope.version != expected {
            return Err(CqrsError::StreamGap {
                aggregate_id: self.id,
                expected,
                found: envelope.version,
            });
        }
        self.state
            .apply(envelope.payload)
            .map_err(CqrsError::user_error)?;
        self.version = envelope.version;
        self.committed = StreamVersion::CreatedAt(envelope.version);
        Ok(())
    }

    pub(crate) fn mark_committed(&mut self) {
        self.uncommitted.clear();
        self.committed = StreamVersion::from_value(self.version);
    }

    pub(crate) fn mark_snapshotted(&mut self) {
        self.snapshot_version = Some(self.version);
    }
}
