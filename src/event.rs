use crate::Aggregate;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use uuid::Uuid;

pub trait Event: Debug + Serialize + DeserializeOwned + Clone + PartialEq + Sync + Send {
    fn event_type(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound = "")]
pub struct EventEnvelope<A>
where
    A: Aggregate,
{
    #[serde(rename = "_id")]
    pub event_id: Uuid,
    /// The id of the aggregate instance.
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    /// Position in the aggregate stream, starting at 1.
    pub version: usize,
    pub event_type: String,
    /// Event payload.
    pub payload: A::Event,
    /// Additional metadata.
    pub metadata: HashMap<String, String>,
    /// The time the event was committed.
    pub at: DateTime<Utc>,
}
