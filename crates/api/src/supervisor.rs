use roomcast_services::media::engine::EngineEvent;
use roomcast_services::signaling::events::ServerEvent;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use crate::state::AppState;
use crate::ws::dispatcher;

/// Listens for engine notifications: reclaims the state behind transports
/// the engine reports closed, and turns a worker death into a fatal
/// shutdown after notifying every peer currently in a room.
pub fn spawn(state: AppState) {
    let mut events = state.service.engine_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::TransportDtlsClosed { transport_id }) => {
                    handle_transport_closed(&state, &transport_id).await;
                }
                Ok(EngineEvent::WorkerDied) => {
                    handle_worker_died(&state).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_transport_closed(state: &AppState, transport_id: &str) {
    let Some(outcome) = state.service.handle_transport_closed(transport_id).await else {
        return;
    };
    for producer_id in &outcome.closed_producers {
        dispatcher::broadcast(
            &state.ws_storage,
            &outcome.others,
            &ServerEvent::ProducerClosed {
                producer_id: producer_id.clone(),
                peer_id: Some(outcome.peer_id.clone()),
            },
        )
        .await;
    }
}

async fn handle_worker_died(state: &AppState) {
    error!("media worker died; shutting down");
    let peers = state.service.peers_in_rooms();
    let event = ServerEvent::VideoRoomError {
        error: "engine-failure".to_string(),
        details: "a media worker died; the server is shutting down".to_string(),
    };
    dispatcher::broadcast(&state.ws_storage, &peers, &event).await;

    // Give the notifications a moment to flush, then let the process
    // supervisor restart us.
    tokio::time::sleep(Duration::from_secs(
        state.settings.signaling.fatal_grace_secs,
    ))
    .await;
    std::process::exit(1);
}
