//! Persisted handles for in-flight Azure long-running operations.
//!
//! A [`Future`] is written to the declarative status of the object being
//! reconciled, so an operation started by one reconcile (or one process) is
//! resumed by the next. The `data` field is the cloud client's own polling
//! state, base64 encoded; the core never interprets it beyond checking that it
//! decodes.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FutureType {
    /// Create-or-update (HTTP PUT).
    #[serde(rename = "PUT")]
    Put,
    /// Partial update (HTTP PATCH).
    #[serde(rename = "PATCH")]
    Patch,
    #[serde(rename = "DELETE")]
    Delete,
}

impl fmt::Display for FutureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FutureType::Put => write!(f, "CREATE-OR-UPDATE"),
            FutureType::Patch => write!(f, "PATCH"),
            FutureType::Delete => write!(f, "DELETE"),
        }
    }
}

/// A persisted long-running operation handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Future {
    #[serde(rename = "type")]
    pub kind: FutureType,
    pub service_name: String,
    pub name: String,
    pub resource_group: String,
    /// Base64 encoded polling state of the cloud client.
    pub data: String,
    /// Polling delay advertised by the cloud when the operation was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_after_seconds: Option<u64>,
}

impl Future {
    /// Build a Future from the cloud client's polling state.
    pub fn new<T: Serialize>(
        kind: FutureType,
        service_name: impl Into<String>,
        name: impl Into<String>,
        resource_group: impl Into<String>,
        state: &T,
    ) -> Result<Self> {
        let bytes = serde_json::to_vec(state)?;
        Ok(Self {
            kind,
            service_name: service_name.into(),
            name: name.into(),
            resource_group: resource_group.into(),
            data: STANDARD.encode(bytes),
            poll_after_seconds: None,
        })
    }

    pub fn with_delay_hint(mut self, delay: Duration) -> Self {
        self.poll_after_seconds = Some(delay.as_secs());
        self
    }

    pub fn delay_hint(&self) -> Option<Duration> {
        self.poll_after_seconds.map(Duration::from_secs)
    }

    /// Decode the polling state into `T`.
    pub fn decode_state<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let bytes = STANDARD.decode(&self.data).map_err(|e| {
            Error::internal(format!(
                "failed to base64 decode future data for {}/{}: {}",
                self.resource_group, self.name, e
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// True when this Future belongs to the given (name, service, kind) triple.
    pub fn matches(&self, name: &str, service_name: &str, kind: FutureType) -> bool {
        self.name == name && self.service_name == service_name && self.kind == kind
    }
}

/// The Futures recorded in an object's status.
///
/// Holds at most one Future per (service, name, kind).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Futures(Vec<Future>);

impl Futures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, service_name: &str, kind: FutureType) -> Option<&Future> {
        self.0.iter().find(|f| f.matches(name, service_name, kind))
    }

    /// Insert or replace the Future for the same (service, name, kind).
    pub fn set(&mut self, future: Future) {
        match self
            .0
            .iter_mut()
            .find(|f| f.matches(&future.name, &future.service_name, future.kind))
        {
            Some(existing) => *existing = future,
            None => self.0.push(future),
        }
    }

    pub fn delete(&mut self, name: &str, service_name: &str, kind: FutureType) {
        self.0.retain(|f| !f.matches(name, service_name, kind));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Future> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put_future(name: &str) -> Future {
        Future::new(
            FutureType::Put,
            "scalesets",
            name,
            "my-rg",
            &json!({"method": "PUT", "pollingURL": "https://management.azure.com/op/1"}),
        )
        .unwrap()
    }

    #[test]
    fn test_future_json_round_trip() {
        let future = put_future("my-vmss").with_delay_hint(Duration::from_secs(20));
        let encoded = serde_json::to_string(&future).unwrap();
        assert!(encoded.contains(r#""type":"PUT""#));
        assert!(encoded.contains(r#""serviceName":"scalesets""#));

        let decoded: Future = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, future);
        assert_eq!(decoded.delay_hint(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_decode_state_preserves_unknown_fields() {
        let state = json!({
            "method": "PATCH",
            "pollingURL": "https://management.azure.com/op/2",
            "vendorExtension": {"nested": [1, 2, 3]}
        });
        let future = Future::new(FutureType::Patch, "scalesets", "my-vmss", "my-rg", &state)
            .unwrap();

        let decoded: serde_json::Value = future.decode_state().unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_decode_state_rejects_garbage() {
        let mut future = put_future("my-vmss");
        future.data = "not base64 !!!".to_string();
        assert!(future.decode_state::<serde_json::Value>().is_err());

        future.data = STANDARD.encode(b"{not json");
        assert!(future.decode_state::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_display_uses_operation_names() {
        assert_eq!(FutureType::Put.to_string(), "CREATE-OR-UPDATE");
        assert_eq!(FutureType::Patch.to_string(), "PATCH");
        assert_eq!(FutureType::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_futures_set_replaces_same_triple() {
        let mut futures = Futures::new();
        futures.set(put_future("a"));
        let mut replacement = put_future("a");
        replacement.poll_after_seconds = Some(30);
        futures.set(replacement.clone());
        futures.set(put_future("b"));

        assert_eq!(futures.len(), 2);
        assert_eq!(futures.get("a", "scalesets", FutureType::Put), Some(&replacement));
    }

    #[test]
    fn test_futures_kinds_are_independent() {
        let mut futures = Futures::new();
        futures.set(put_future("a"));
        let mut delete = put_future("a");
        delete.kind = FutureType::Delete;
        futures.set(delete);

        assert_eq!(futures.len(), 2);
        futures.delete("a", "scalesets", FutureType::Put);
        assert!(futures.get("a", "scalesets", FutureType::Put).is_none());
        assert!(futures.get("a", "scalesets", FutureType::Delete).is_some());
    }
}
