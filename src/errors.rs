use crate::StreamVersion;
use uuid::Uuid;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure the repository and the session can report.
///
/// Conflicts are split in two so callers can branch without inspecting messages:
/// - `CreationConflict`: the caller saved an aggregate it believed new, but the store
///   already holds a stream for that id. Retrying will not help.
/// - `ConcurrencyConflict`: another writer advanced the stream since the aggregate was
///   loaded. Reload, re-apply the mutation and save again.
///
/// `AggregateLocked` is reported by a session commit that finds an aggregate guard held
/// elsewhere.
///
/// Adapter failures (`DatabaseError`, `PublisherError`) are propagated as-is; no retry or
/// backoff happens at this layer.
///
/// Example:
/// ```
/// use cqrs_repository::{CqrsError, StreamVersion};
/// use uuid::Uuid;
///
/// let error = CqrsError::concurrency_error(Uuid::nil(), StreamVersion::CreatedAt(2), Some(3));
/// assert!(error.is_conflict());
/// assert!(error.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CqrsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Aggregate {aggregate_id} already exists at version {actual}")]
    CreationConflict { aggregate_id: Uuid, actual: usize },
    #[error(
        "Concurrency conflict on aggregate {aggregate_id}: expected {expected}, found {}",
        format_actual(.actual)
    )]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: StreamVersion,
        actual: Option<usize>,
    },
    #[error("Gap in stream of aggregate {aggregate_id}: expected version {expected}, found {found}")]
    StreamGap {
        aggregate_id: Uuid,
        expected: usize,
        found: usize,
    },
    #[error("Aggregate {aggregate_id} is locked by another task")]
    AggregateLocked { aggregate_id: Uuid },
    #[error("{0}")]
    UserError(BoxedError),
    #[error("{0}")]
    DatabaseError(BoxedError),
    #[error("{0}")]
    PublisherError(BoxedError),
    #[error("{0}")]
    SerializationError(BoxedError),
}

fn format_actual(actual: &Option<usize>) -> String {
    match actual {
        Some(version) => format!("version {version}"),
        None => "no stream".to_string(),
    }
}

impl CqrsError {
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument(details.into())
    }

    pub fn creation_conflict(aggregate_id: Uuid, actual: usize) -> Self {
        Self::CreationConflict {
            aggregate_id,
            actual,
        }
    }

    pub fn concurrency_error(
        aggregate_id: Uuid,
        expected: StreamVersion,
        actual: Option<usize>,
    ) -> Self {
        Self::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual,
        }
    }

    pub fn user_error<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::UserError(Box::new(e))
    }

    pub fn database_error<E>(e: E) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::DatabaseError(e.into())
    }

    pub fn publisher_error<E>(e: E) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::PublisherError(e.into())
    }

    pub fn serialization_error<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SerializationError(Box::new(e))
    }

    /// `true` for both creation and concurrency conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::CreationConflict { .. } | Self::ConcurrencyConflict { .. }
        )
    }

    /// `true` when reloading the aggregate and re-applying the mutation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for CqrsError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_error(e)
    }
}
