use crate::{Aggregate, CqrsContext, CqrsError, EventEnvelope, EventPublisher};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// A simple in-memory publisher that keeps every published event.
/// Useful for testing or simple applications.
#[derive(Clone)]
pub struct InMemoryPublisher<A: Aggregate> {
    events: Arc<Mutex<HashMap<Uuid, Vec<EventEnvelope<A>>>>>,
    published: Arc<Mutex<Vec<EventEnvelope<A>>>>,
}

impl<A: Aggregate> InMemoryPublisher<A> {
    /// Creates a new in-memory publisher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(HashMap::new())),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Events published for one aggregate, in publication order.
    pub async fn get_events(&self, aggregate_id: Uuid) -> Vec<EventEnvelope<A>> {
        let events = self.events.lock().await;
        events.get(&aggregate_id).cloned().unwrap_or_default()
    }

    /// Every published event across aggregates, in publication order.
    pub async fn get_all_events(&self) -> Vec<EventEnvelope<A>> {
        self.published.lock().await.clone()
    }

    /// Clears all recorded events.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
        self.published.lock().await.clear();
    }
}

impl<A: Aggregate> Default for InMemoryPublisher<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<A: Aggregate> EventPublisher<A> for InMemoryPublisher<A> {
    async fn publish(
        &self,
        event: &EventEnvelope<A>,
        _context: &CqrsContext,
    ) -> Result<(), CqrsError> {
        debug!(event_id = %event.event_id, version = %event.version, "Recording published event");
        self.events
            .lock()
            .await
            .entry(event.aggregate_id)
            .or_default()
            .push(event.clone());
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}
