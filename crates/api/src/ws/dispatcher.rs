use axum::extract::ws::Message;
use futures::SinkExt;
use roomcast_services::signaling::events::ServerEvent;
use tracing::{debug, warn};

use super::storage::WsStorage;

/// Sends an event to every listed peer. Send failures are logged and
/// swallowed: a disconnecting recipient must not fail the originator.
pub async fn broadcast(ws_storage: &WsStorage, peer_ids: &[String], event: &ServerEvent) {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(%e, "failed to serialize server event");
            return;
        }
    };

    for peer_id in peer_ids {
        let Some(sender) = ws_storage.get_sender(peer_id) else {
            continue;
        };
        let mut guard = sender.lock().await;
        if let Err(e) = guard.send(Message::text(text.clone())).await {
            warn!(%peer_id, %e, "failed to send WS event");
        } else {
            debug!(%peer_id, "WS event sent");
        }
    }
}

/// Sends an event to a single peer.
pub async fn send_to_peer(ws_storage: &WsStorage, peer_id: &str, event: &ServerEvent) {
    broadcast(ws_storage, &[peer_id.to_string()], event).await;
}
