use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::engine::{
    ConsumerParams, EngineError, EngineEvent, MediaEngine, MediaKind, RouterHandle,
    TransportParams,
};

/// In-memory media engine for exercising the signaling plane without
/// worker processes.
///
/// Tracks every handle it hands out so tests can assert that teardown
/// reclaimed all of them, and offers failure/rejection injection plus an
/// `emit` hook for the async notification path.
pub struct MockMediaEngine {
    /// Router id -> advertised capabilities.
    routers: DashMap<String, Value>,
    /// Transport id -> owning router id.
    transports: DashMap<String, String>,
    /// Producer id -> media kind.
    producers: DashMap<String, MediaKind>,
    /// Consumer id -> (producer id, paused).
    consumers: DashMap<String, (String, bool)>,
    routers_closed: AtomicUsize,
    fail_next_produce: AtomicBool,
    reject_consume: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
}

impl MockMediaEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            routers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            routers_closed: AtomicUsize::new(0),
            fail_next_produce: AtomicBool::new(false),
            reject_consume: AtomicBool::new(false),
            events,
        }
    }

    /// Engine objects currently alive (routers + transports + producers +
    /// consumers). Zero after a clean teardown.
    pub fn open_handles(&self) -> usize {
        self.routers.len() + self.transports.len() + self.producers.len() + self.consumers.len()
    }

    pub fn closed_router_count(&self) -> usize {
        self.routers_closed.load(Ordering::Relaxed)
    }

    /// Makes the next `produce` call fail with an engine error.
    pub fn fail_next_produce(&self) {
        self.fail_next_produce.store(true, Ordering::Relaxed);
    }

    /// Makes `can_consume` report false for every producer.
    pub fn set_reject_consume(&self, reject: bool) {
        self.reject_consume.store(reject, Ordering::Relaxed);
    }

    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.consumers.get(consumer_id).map(|c| c.1)
    }

    /// Injects an async engine notification, as a real worker would.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_router(&self) -> Result<RouterHandle, EngineError> {
        let id = Uuid::new_v4().to_string();
        let rtp_capabilities = json!({
            "routerId": id,
            "codecs": [
                { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 },
            ],
            "headerExtensions": [],
        });
        self.routers.insert(id.clone(), rtp_capabilities.clone());
        Ok(RouterHandle {
            id,
            rtp_capabilities,
        })
    }

    async fn close_router(&self, router_id: &str) {
        if self.routers.remove(router_id).is_some() {
            self.routers_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn create_transport(&self, router_id: &str) -> Result<TransportParams, EngineError> {
        if !self.routers.contains_key(router_id) {
            return Err(EngineError::UnknownId("router", router_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        self.transports.insert(id.clone(), router_id.to_string());
        Ok(TransportParams {
            id,
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().to_string(),
                "password": Uuid::new_v4().to_string(),
                "iceLite": true,
            }),
            ice_candidates: json!([]),
            dtls_parameters: json!({ "role": "auto", "fingerprints": [] }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        _dtls_parameters: Value,
    ) -> Result<(), EngineError> {
        if !self.transports.contains_key(transport_id) {
            return Err(EngineError::UnknownId("transport", transport_id.to_string()));
        }
        Ok(())
    }

    async fn close_transport(&self, transport_id: &str) {
        self.transports.remove(transport_id);
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        _rtp_parameters: Value,
    ) -> Result<String, EngineError> {
        if !self.transports.contains_key(transport_id) {
            return Err(EngineError::UnknownId("transport", transport_id.to_string()));
        }
        if self.fail_next_produce.swap(false, Ordering::Relaxed) {
            return Err(EngineError::Engine("injected produce failure".to_string()));
        }
        let id = Uuid::new_v4().to_string();
        self.producers.insert(id.clone(), kind);
        Ok(id)
    }

    async fn close_producer(&self, producer_id: &str) {
        self.producers.remove(producer_id);
    }

    fn can_consume(&self, _router_id: &str, producer_id: &str, _rtp_capabilities: &Value) -> bool {
        !self.reject_consume.load(Ordering::Relaxed) && self.producers.contains_key(producer_id)
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        _rtp_capabilities: Value,
    ) -> Result<ConsumerParams, EngineError> {
        if !self.transports.contains_key(transport_id) {
            return Err(EngineError::UnknownId("transport", transport_id.to_string()));
        }
        let kind = self
            .producers
            .get(producer_id)
            .map(|p| *p)
            .ok_or_else(|| EngineError::UnknownId("producer", producer_id.to_string()))?;

        let id = Uuid::new_v4().to_string();
        self.consumers
            .insert(id.clone(), (producer_id.to_string(), true));
        Ok(ConsumerParams {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: json!({ "codecs": [], "headerExtensions": [] }),
        })
    }

    async fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let mut consumer = self
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::UnknownId("consumer", consumer_id.to_string()))?;
        consumer.1 = true;
        Ok(())
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let mut consumer = self
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::UnknownId("consumer", consumer_id.to_string()))?;
        consumer.1 = false;
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &str) {
        self.consumers.remove(consumer_id);
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
