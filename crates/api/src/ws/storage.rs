use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Tracks the active WebSocket connection per peer id. The connection id
/// doubles as the peer id, so each peer has exactly one sender.
pub struct WsStorage {
    connections: DashMap<String, WsSender>,
}

impl WsStorage {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add(&self, peer_id: &str, sender: WsSender) {
        self.connections.insert(peer_id.to_string(), sender);
    }

    pub fn remove(&self, peer_id: &str) {
        self.connections.remove(peer_id);
    }

    pub fn get_sender(&self, peer_id: &str) -> Option<WsSender> {
        self.connections.get(peer_id).map(|s| s.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for WsStorage {
    fn default() -> Self {
        Self::new()
    }
}
