use crate::errors::CqrsError;
use crate::{Aggregate, EventEnvelope};
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

pub type EventStream<A> = Pin<Box<dyn Stream<Item = Result<EventEnvelope<A>, CqrsError>> + Send>>;

pub type DynEventStore<A> = Arc<dyn EventStore<A> + 'static>;

/// Append-only log of aggregate events, keyed by aggregate id.
///
/// Implementations must make `append` atomic per aggregate: either the whole batch is
/// stored or none of it. A batch whose first version does not directly follow the
/// stored stream is rejected: with [`CqrsError::CreationConflict`] when it starts at
/// version 1 and the stream already exists, with [`CqrsError::ConcurrencyConflict`]
/// otherwise. Envelopes of another aggregate are an [`CqrsError::InvalidArgument`].
#[async_trait::async_trait]
pub trait EventStore<A>: Send + Sync
where
    A: Aggregate,
{
    /// Events with `version >= from_version`, in ascending order.
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<A>, CqrsError>;

    async fn read_last(&self, aggregate_id: Uuid) -> Result<Option<EventEnvelope<A>>, CqrsError>;

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<A>>,
    ) -> Result<(), CqrsError>;

    async fn read_all(&self, aggregate_id: Uuid) -> Result<EventStream<A>, CqrsError> {
        self.read_from(aggregate_id, 1).await
    }
}

#[async_trait::async_trait]
impl<A, T> EventStore<A> for Arc<T>
where
    A: Aggregate,
    T: EventStore<A> + ?Sized,
{
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<A>, CqrsError> {
        (**self).read_from(aggregate_id, from_version).await
    }

    async fn read_last(&self, aggregate_id: Uuid) -> Result<Option<EventEnvelope<A>>, CqrsError> {
        (**self).read_last(aggregate_id).await
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<A>>,
    ) -> Result<(), CqrsError> {
        (**self).append(aggregate_id, events).await
    }
}
