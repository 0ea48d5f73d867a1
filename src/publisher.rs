use crate::{Aggregate, CqrsContext, CqrsError, EventEnvelope};

/// Delivers committed events to subscribers.
///
/// Called once per event, in commit order, and only after the batch was durably
/// appended. A failure is reported to the caller of `save`; the events stay stored.
#[async_trait::async_trait]
pub trait EventPublisher<A: Aggregate>: Send + Sync {
    async fn publish(
        &self,
        event: &EventEnvelope<A>,
        context: &CqrsContext,
    ) -> Result<(), CqrsError>;
}
