use std::collections::HashMap;
use uuid::Uuid;

pub const METADATA_USER: &str = "user";
pub const METADATA_REQUEST_ID: &str = "requestId";

/// Who is saving, and on behalf of which request.
///
/// The context is copied onto every envelope committed through
/// [`crate::AggregateRepository::save_with_context`] and handed to publishers.
#[derive(Debug, Clone)]
pub struct CqrsContext {
    current_user: Option<String>,
    metadata: Option<serde_json::Value>,
    request_id: String,
    rand_bytes: Option<[u8; 16]>,
}

impl CqrsContext {
    pub fn new(current_user: Option<String>) -> Self {
        Self {
            current_user,
            metadata: None,
            request_id: "".to_string(),
            rand_bytes: None,
        }
    }

    pub fn current_user(&self) -> String {
        self.current_user.clone().unwrap_or("anonymous".to_string())
    }

    pub fn request_id(&self) -> String {
        self.request_id.clone()
    }

    pub fn with_request_id(self, request_id: String) -> Self {
        Self { request_id, ..self }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Flat string metadata stamped on committed envelopes.
    ///
    /// Top-level string and scalar entries of the JSON metadata are copied; nested
    /// values are serialised. The user and request id always win over same-named keys.
    pub fn envelope_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(serde_json::Value::Object(values)) = &self.metadata {
            for (key, value) in values {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                metadata.insert(key.clone(), value);
            }
        }
        metadata.insert(METADATA_USER.to_string(), self.current_user());
        if !self.request_id.is_empty() {
            metadata.insert(METADATA_REQUEST_ID.to_string(), self.request_id());
        }
        metadata
    }

    /// Overrides the random bytes used by [`CqrsContext::next_uuid`].
    ///
    /// **Testing only**: every id generated from this context is identical.
    ///
    /// ```rust
    /// use cqrs_repository::CqrsContext;
    ///
    /// let context = CqrsContext::default().with_rand_bytes([0; 16]);
    /// assert_eq!(
    ///     context.next_uuid().to_string(),
    ///     "00000000-0000-4000-8000-000000000000"
    /// );
    /// ```
    pub fn with_rand_bytes(mut self, bytes: [u8; 16]) -> Self {
        self.rand_bytes = Some(bytes);
        self
    }

    pub fn next_uuid(&self) -> Uuid {
        let bytes = if let Some(b) = self.rand_bytes {
            b
        } else {
            rand::random::<[u8; 16]>()
        };
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

impl Default for CqrsContext {
    fn default() -> Self {
        Self::new(None)
    }
}
