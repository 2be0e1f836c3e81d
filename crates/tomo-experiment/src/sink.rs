//! Storage sink seam and the storage response contract.
//!
//! Every reply from storage is a JSON object with a `result` key; anything
//! other than `{"result": "success", ..}` is a [`TomoError::Sink`] labelled
//! `Problems with storage`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tomo_core::document::StorageEvent;
use tomo_core::error::{TomoError, TomoResult};
use tomo_driver_mock::ErrorConfig;
use tracing::debug;

/// Reply body of a healthy storage endpoint.
pub const SUCCESS_REPLY: &str = r#"{"result": "success"}"#;

/// Destination for frames and run events.
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Store one encoded frame. `live_preview` also forwards it to the viewer.
    async fn post_frame(
        &self,
        metadata: Value,
        payload: Bytes,
        live_preview: bool,
    ) -> TomoResult<()>;

    /// Store a run-level event.
    async fn post_event(&self, event: &StorageEvent) -> TomoResult<()>;
}

/// Check a storage reply body against the response contract.
pub fn check_storage_response(body: &[u8]) -> TomoResult<()> {
    let reply: Value = serde_json::from_slice(body)
        .map_err(|_| TomoError::sink("Storage's response is not JSON"))?;
    match reply.get("result") {
        None => Err(TomoError::sink(
            "Storage's response has incorrect format (no 'result' key)",
        )),
        Some(Value::String(result)) if result == "success" => Ok(()),
        Some(Value::String(other)) => Err(TomoError::sink(format!(
            "Storage's response:  {}",
            other
        ))),
        Some(other) => Err(TomoError::sink(format!("Storage's response:  {}", other))),
    }
}

/// A frame as received by [`MockStorageSink`].
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub metadata: Value,
    pub payload: Bytes,
    pub live_preview: bool,
}

impl StoredFrame {
    /// Zero-padded frame number from the metadata.
    pub fn number(&self) -> Option<&str> {
        self.metadata["frame"]["number"].as_str()
    }

    /// Acquisition phase from the metadata.
    pub fn mode(&self) -> Option<&str> {
        self.metadata["frame"]["mode"].as_str()
    }
}

#[derive(Debug, Default)]
struct SinkLog {
    frames: Vec<StoredFrame>,
    events: Vec<StorageEvent>,
}

/// In-memory storage endpoint.
///
/// Records everything it receives and answers with a scripted reply body,
/// which is run through [`check_storage_response`] like a real reply.
/// Transport faults come from an [`ErrorConfig`] on the `post_frame` and
/// `post_event` operations.
#[derive(Debug)]
pub struct MockStorageSink {
    log: Mutex<SinkLog>,
    frame_reply: Mutex<String>,
    event_reply: Mutex<String>,
    latency: Duration,
    errors: ErrorConfig,
}

impl MockStorageSink {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(SinkLog::default()),
            frame_reply: Mutex::new(SUCCESS_REPLY.to_string()),
            event_reply: Mutex::new(SUCCESS_REPLY.to_string()),
            latency: Duration::ZERO,
            errors: ErrorConfig::none(),
        }
    }

    /// Simulated round-trip time per request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Body returned for subsequent frame posts.
    pub fn set_frame_reply(&self, body: impl Into<String>) {
        *self.frame_reply.lock() = body.into();
    }

    /// Body returned for subsequent event posts.
    pub fn set_event_reply(&self, body: impl Into<String>) {
        *self.event_reply.lock() = body.into();
    }

    pub fn frames(&self) -> Vec<StoredFrame> {
        self.log.lock().frames.clone()
    }

    pub fn events(&self) -> Vec<StorageEvent> {
        self.log.lock().events.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.log.lock().frames.len()
    }

    async fn round_trip(&self, operation: &'static str) -> TomoResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.errors
            .check_operation("mock_storage", operation)
            .map_err(|fault| TomoError::sink(format!("Could not send to storage ({})", fault)))
    }
}

impl Default for MockStorageSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageSink for MockStorageSink {
    async fn post_frame(
        &self,
        metadata: Value,
        payload: Bytes,
        live_preview: bool,
    ) -> TomoResult<()> {
        self.round_trip("post_frame").await?;
        debug!(
            frame = metadata["frame"]["number"].as_str().unwrap_or_default(),
            bytes = payload.len(),
            live_preview,
            "Storage received frame"
        );
        self.log.lock().frames.push(StoredFrame {
            metadata,
            payload,
            live_preview,
        });
        let reply = self.frame_reply.lock().clone();
        check_storage_response(reply.as_bytes())
    }

    async fn post_event(&self, event: &StorageEvent) -> TomoResult<()> {
        self.round_trip("post_event").await?;
        debug!(exp_id = event.experiment_id(), "Storage received event");
        self.log.lock().events.push(event.clone());
        let reply = self.event_reply.lock().clone();
        check_storage_response(reply.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomo_core::document::TerminalEvent;
    use tomo_core::error::STORAGE_ERROR;
    use tomo_driver_mock::ErrorScenario;

    fn detail(body: &str) -> String {
        check_storage_response(body.as_bytes()).unwrap_err().detail()
    }

    #[test]
    fn test_response_contract() {
        assert!(check_storage_response(SUCCESS_REPLY.as_bytes()).is_ok());
        assert!(check_storage_response(br#"{"result": "success", "id": 4}"#).is_ok());

        assert_eq!(detail("<html>"), "Storage's response is not JSON");
        assert_eq!(
            detail(r#"{"status": "ok"}"#),
            "Storage's response has incorrect format (no 'result' key)"
        );
        assert_eq!(detail(r#"{"result": "disk full"}"#), "Storage's response:  disk full");
        assert_eq!(detail(r#"{"result": null}"#), "Storage's response:  null");

        let err = check_storage_response(b"").unwrap_err();
        assert_eq!(err.error(), STORAGE_ERROR);
    }

    #[tokio::test]
    async fn test_mock_records_and_replies() {
        let sink = MockStorageSink::new();
        let metadata = serde_json::json!({"type": "frame", "frame": {"number": "3", "mode": "dark"}});
        sink.post_frame(metadata, Bytes::from_static(b"px"), true)
            .await
            .unwrap();
        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].number(), Some("3"));
        assert_eq!(frames[0].mode(), Some("dark"));
        assert!(frames[0].live_preview);

        sink.set_event_reply(r#"{"result": "error"}"#);
        let event = StorageEvent::Finished(TerminalEvent::success("exp"));
        let err = sink.post_event(&event).await.unwrap_err();
        assert_eq!(err.detail(), "Storage's response:  error");
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_transport_fault() {
        let sink = MockStorageSink::new().with_errors(ErrorConfig::scenario(
            ErrorScenario::Timeout {
                operation: "post_frame",
            },
        ));
        let err = sink
            .post_frame(Value::Null, Bytes::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.error(), STORAGE_ERROR);
        assert!(err.detail().starts_with("Could not send to storage"));
        assert_eq!(sink.frame_count(), 0);
    }
}
