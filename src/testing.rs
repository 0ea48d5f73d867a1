use crate::es::inmemory::InMemoryPersist;
use crate::event_store::{EventStore, EventStream};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::{Aggregate, CqrsContext, CqrsError, EventEnvelope, EventPublisher, Snapshottable};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CounterError {
    #[error("Counter cannot go below zero (value {value}, decrement {by})")]
    BelowZero { value: i64, by: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CounterEvent {
    Incremented { by: i64 },
    Decremented { by: i64 },
    Renamed { name: String },
}

impl crate::Event for CounterEvent {
    fn event_type(&self) -> String {
        match self {
            CounterEvent::Incremented { .. } => "Incremented".to_string(),
            CounterEvent::Decremented { .. } => "Decremented".to_string(),
            CounterEvent::Renamed { .. } => "Renamed".to_string(),
        }
    }
}

/// Snapshottable aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
    pub name: String,
    pub applied: usize,
}

impl Counter {
    pub fn increment(root: &mut crate::AggregateRoot<Self>, by: i64) -> Result<(), CounterError> {
        root.record(CounterEvent::Incremented { by })
    }
}

impl Aggregate for Counter {
    const TYPE: &'static str = "COUNTER";

    type Event = CounterEvent;

    type Error = CounterError;

    fn apply(&mut self, event: Self::Event) -> Result<(), Self::Error> {
        match event {
            CounterEvent::Incremented { by } => self.value += by,
            CounterEvent::Decremented { by } => {
                if self.value < by {
                    return Err(CounterError::BelowZero {
                        value: self.value,
                        by,
                    });
                }
                self.value -= by;
            }
            CounterEvent::Renamed { name } => self.name = name,
        }
        self.applied += 1;
        Ok(())
    }

    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        Some(self)
    }

    fn as_snapshottable_mut(&mut self) -> Option<&mut dyn Snapshottable> {
        Some(self)
    }
}

impl Snapshottable for Counter {
    fn snapshot_state(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn restore_state(&mut self, state: serde_json::Value) -> Result<(), serde_json::Error> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}

/// Aggregate without the snapshot capability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub total: i64,
}

impl Aggregate for Tally {
    const TYPE: &'static str = "TALLY";

    type Event = CounterEvent;

    type Error = CounterError;

    fn apply(&mut self, event: Self::Event) -> Result<(), Self::Error> {
        if let CounterEvent::Incremented { by } = event {
            self.total += by;
        }
        Ok(())
    }
}

pub fn envelope(aggregate_id: Uuid, version: usize, payload: CounterEvent) -> EventEnvelope<Counter> {
    EventEnvelope {
        event_id: Uuid::new_v4(),
        aggregate_id,
        aggregate_type: Counter::TYPE.to_string(),
        version,
        event_type: crate::Event::event_type(&payload),
        payload,
        metadata: HashMap::new(),
        at: Utc::now(),
    }
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub read_from: AtomicUsize,
    pub read_last: AtomicUsize,
    pub append: AtomicUsize,
    pub snapshot_reads: AtomicUsize,
    pub snapshot_writes: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.read_from.load(Ordering::SeqCst)
            + self.read_last.load(Ordering::SeqCst)
            + self.append.load(Ordering::SeqCst)
            + self.snapshot_reads.load(Ordering::SeqCst)
            + self.snapshot_writes.load(Ordering::SeqCst)
    }
}

/// Wraps [`InMemoryPersist`], counting calls and optionally failing them.
#[derive(Clone)]
pub struct InstrumentedPersist<A: Aggregate> {
    pub inner: InMemoryPersist<A>,
    pub calls: Arc<CallCounts>,
    pub unreachable: Arc<AtomicBool>,
}

impl<A: Aggregate> InstrumentedPersist<A> {
    pub fn new() -> Self {
        Self {
            inner: InMemoryPersist::new(),
            calls: Arc::new(CallCounts::default()),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check(&self, counter: &AtomicUsize) -> Result<(), CqrsError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CqrsError::database_error("store unreachable"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<A: Aggregate> EventStore<A> for InstrumentedPersist<A> {
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<A>, CqrsError> {
        self.check(&self.calls.read_from)?;
        self.inner.read_from(aggregate_id, from_version).await
    }

    async fn read_last(&self, aggregate_id: Uuid) -> Result<Option<EventEnvelope<A>>, CqrsError> {
        self.check(&self.calls.read_last)?;
        self.inner.read_last(aggregate_id).await
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<A>>,
    ) -> Result<(), CqrsError> {
        self.check(&self.calls.append)?;
        self.inner.append(aggregate_id, events).await
    }
}

#[async_trait::async_trait]
impl<A: Aggregate> SnapshotStore for InstrumentedPersist<A> {
    async fn read_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, CqrsError> {
        self.check(&self.calls.snapshot_reads)?;
        self.inner.read_latest(aggregate_id).await
    }

    async fn write(&self, snapshot: Snapshot) -> Result<(), CqrsError> {
        self.check(&self.calls.snapshot_writes)?;
        self.inner.write(snapshot).await
    }
}

/// Publisher that counts calls and can be told to fail.
#[derive(Clone, Default)]
pub struct FlakyPublisher {
    pub calls: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl<A: Aggregate> EventPublisher<A> for FlakyPublisher {
    async fn publish(
        &self,
        _event: &EventEnvelope<A>,
        _context: &CqrsContext,
    ) -> Result<(), CqrsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CqrsError::publisher_error("broker down"));
        }
        Ok(())
    }
}

/// Event store whose `read_last` waits until `parties` callers reached it, so that
/// concurrent savers all pass the version check before any of them appends.
#[derive(Clone)]
pub struct GatedPersist<A: Aggregate> {
    pub inner: InMemoryPersist<A>,
    pub appends: Arc<AtomicUsize>,
    gate: Arc<tokio::sync::Barrier>,
}

impl<A: Aggregate> GatedPersist<A> {
    pub fn new(inner: InMemoryPersist<A>, parties: usize) -> Self {
        Self {
            inner,
            appends: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(tokio::sync::Barrier::new(parties)),
        }
    }
}

#[async_trait::async_trait]
impl<A: Aggregate> EventStore<A> for GatedPersist<A> {
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<A>, CqrsError> {
        self.inner.read_from(aggregate_id, from_version).await
    }

    async fn read_last(&self, aggregate_id: Uuid) -> Result<Option<EventEnvelope<A>>, CqrsError> {
        let last = self.inner.read_last(aggregate_id).await;
        self.gate.wait().await;
        last
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<A>>,
    ) -> Result<(), CqrsError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.inner.append(aggregate_id, events).await
    }
}
