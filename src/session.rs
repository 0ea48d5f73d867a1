use crate::{Aggregate, AggregateRepository, AggregateRoot, CqrsError};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

struct Tracked<A: Aggregate> {
    id: Uuid,
    root: Mutex<AggregateRoot<A>>,
}

/// Shared handle to an in-flight aggregate.
///
/// Clones point at the same root. The id is readable without locking.
pub struct SharedAggregate<A: Aggregate> {
    inner: Arc<Tracked<A>>,
}

impl<A: Aggregate> SharedAggregate<A> {
    #[must_use]
    pub fn new(root: AggregateRoot<A>) -> Self {
        Self {
            inner: Arc::new(Tracked {
                id: root.id(),
                root: Mutex::new(root),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Exclusive access to the root.
    ///
    /// Release the guard before calling into an [`AggregateSession`]: a commit sweep
    /// running meanwhile fails with [`CqrsError::AggregateLocked`] for this aggregate.
    pub async fn lock(&self) -> MutexGuard<'_, AggregateRoot<A>> {
        self.inner.root.lock().await
    }

    /// `true` when both handles track the very same root.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn from_entry(entry: &CacheEntry) -> Option<Self> {
        entry
            .clone()
            .downcast::<Tracked<A>>()
            .ok()
            .map(|inner| Self { inner })
    }
}

impl<A: Aggregate> Clone for SharedAggregate<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Aggregate> From<AggregateRoot<A>> for SharedAggregate<A> {
    fn from(root: AggregateRoot<A>) -> Self {
        Self::new(root)
    }
}

type CacheKey = (&'static str, Uuid);
type CacheEntry = Arc<dyn Any + Send + Sync>;

/// Outcome of [`AggregateSession::commit_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Aggregates that had at least one event committed.
    pub aggregates: usize,
    pub events: usize,
    /// The sweep stopped early on the cancellation signal.
    pub cancelled: bool,
}

/// Unit of work: caches in-flight aggregates by `(A::TYPE, id)`.
///
/// The session never loads anything by itself. Every operation goes through one
/// session-wide lock, held for the whole duration of a commit sweep; conflict
/// detection against other writers is still the job of
/// [`AggregateRepository::save`].
#[derive(Default)]
pub struct AggregateSession {
    cache: Mutex<BTreeMap<CacheKey, CacheEntry>>,
}

impl AggregateSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `aggregate`. Returns `false`, leaving the cache unchanged, when
    /// an instance with the same type and id is already tracked.
    pub async fn attach<A: Aggregate>(&self, aggregate: &SharedAggregate<A>) -> bool {
        let mut cache = self.cache.lock().await;
        let key = (A::TYPE, aggregate.id());
        if cache.contains_key(&key) {
            debug!(aggregate_type = A::TYPE, aggregate_id = %aggregate.id(), "Already attached");
            return false;
        }
        cache.insert(key, aggregate.inner.clone());
        true
    }

    /// Stops tracking the entry with the same type and id. Returns whether one existed.
    pub async fn detach<A: Aggregate>(&self, aggregate: &SharedAggregate<A>) -> bool {
        let mut cache = self.cache.lock().await;
        cache.remove(&(A::TYPE, aggregate.id())).is_some()
    }

    /// Stops tracking every aggregate of type `A`, returning how many were dropped.
    pub async fn detach_all<A: Aggregate>(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|(aggregate_type, _), _| *aggregate_type != A::TYPE);
        before - cache.len()
    }

    pub async fn get<A: Aggregate>(&self, aggregate_id: Uuid) -> Option<SharedAggregate<A>> {
        let cache = self.cache.lock().await;
        cache
            .get(&(A::TYPE, aggregate_id))
            .and_then(SharedAggregate::from_entry)
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    /// Saves every tracked aggregate of type `A`, one after another, in id order.
    ///
    /// `cancellation` is checked before each save; once it reads `true` the remaining
    /// aggregates are skipped and the summary is flagged `cancelled`. Saves already done
    /// stay committed. The first failing save stops the sweep and its error is returned
    /// unchanged. An aggregate whose guard is held elsewhere is not waited for; the sweep
    /// stops with [`CqrsError::AggregateLocked`].
    #[instrument(skip(self, repository, cancellation), fields(aggregate_type = A::TYPE))]
    pub async fn commit_all<A: Aggregate>(
        &self,
        repository: &AggregateRepository<A>,
        cancellation: &watch::Receiver<bool>,
    ) -> Result<CommitSummary, CqrsError> {
        let cache = self.cache.lock().await;
        let mut summary = CommitSummary::default();

        for ((_, aggregate_id), entry) in cache
            .iter()
            .filter(|((aggregate_type, _), _)| *aggregate_type == A::TYPE)
        {
            let cancelled = *cancellation.borrow();
            if cancelled {
                info!(committed = summary.aggregates, "Commit sweep cancelled");
                summary.cancelled = true;
                break;
            }
            let Some(aggregate) = SharedAggregate::<A>::from_entry(entry) else {
                warn!(aggregate_id = %aggregate_id, "Cached entry has another type with the same name, skipping");
                continue;
            };
            let Ok(mut root) = aggregate.inner.root.try_lock() else {
                error!(aggregate_id = %aggregate_id, committed = summary.aggregates, "Aggregate is locked, commit sweep aborted");
                return Err(CqrsError::AggregateLocked {
                    aggregate_id: *aggregate_id,
                });
            };
            match repository.save(&mut root).await {
                Ok(0) => {}
                Ok(events) => {
                    summary.aggregates += 1;
                    summary.events += events;
                }
                Err(e) => {
                    error!(
                        aggregate_id = %aggregate_id,
                        error = %e,
                        committed = summary.aggregates,
                        "Commit sweep aborted"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            aggregates = summary.aggregates,
            events = summary.events,
            "Commit sweep completed"
        );
        Ok(summary)
    }
}
