use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Media kind of a track flowing through the SFU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-room router created by the engine. The capabilities blob is what
/// joining peers load into their client-side device.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    pub id: String,
    pub rtp_capabilities: Value,
}

/// Transport connection details sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Consumer details sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("unknown {0} id {1}")]
    UnknownId(&'static str, String),
    #[error("invalid {0}: {1}")]
    InvalidParameters(&'static str, String),
    #[error("{0}")]
    Engine(String),
}

/// Notifications the engine surfaces outside the request path.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A transport's DTLS association closed underneath us; the owning
    /// peer's state on that transport must be reclaimed.
    TransportDtlsClosed { transport_id: String },
    /// A worker process died. Fatal: every room it hosted is gone.
    WorkerDied,
}

/// Contract between the signaling plane and the embedded SFU library.
///
/// Implementations own every engine-level object; the rest of the system
/// refers to routers/transports/producers/consumers by opaque string ids
/// and ships WebRTC parameter blobs as raw JSON.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(&self) -> Result<RouterHandle, EngineError>;

    async fn close_router(&self, router_id: &str);

    async fn create_transport(&self, router_id: &str) -> Result<TransportParams, EngineError>;

    /// Completes the DTLS handshake. The signaling layer enforces the
    /// connect-once rule before calling in.
    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), EngineError>;

    async fn close_transport(&self, transport_id: &str);

    /// Returns the new producer's id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, EngineError>;

    async fn close_producer(&self, producer_id: &str);

    /// Whether the router can forward the producer to a client with the
    /// given capabilities. Checked before every `consume`.
    fn can_consume(&self, router_id: &str, producer_id: &str, rtp_capabilities: &Value) -> bool;

    /// Creates a consumer in the paused state.
    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParams, EngineError>;

    async fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError>;

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError>;

    async fn close_consumer(&self, consumer_id: &str);

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
