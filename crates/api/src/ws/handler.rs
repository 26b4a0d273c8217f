use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roomcast_services::signaling::error::SignalError;
use roomcast_services::signaling::events::{ClientEvent, ServerEvent};
use roomcast_services::signaling::service::LeaveOutcome;

use super::dispatcher;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Externally verified peer identity; generated when absent.
    pub peer_id: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer_id = params
        .peer_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, peer_id: String) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    if !state.service.register_peer(&peer_id) {
        warn!(%peer_id, "rejecting connection reusing a live peer id");
        let event = ServerEvent::VideoRoomError {
            error: "already-connected".to_string(),
            details: format!("peer id {peer_id} is already in use"),
        };
        if let Ok(text) = serde_json::to_string(&event) {
            let mut guard = sender.lock().await;
            let _ = guard.send(Message::text(text)).await;
        }
        return;
    }

    info!(%peer_id, "signaling connection established");
    state.ws_storage.add(&peer_id, sender.clone());

    dispatcher::send_to_peer(
        &state.ws_storage,
        &peer_id,
        &ServerEvent::Connected {
            peer_id: peer_id.clone(),
        },
    )
    .await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_event(&state, &peer_id, &text).await;
            }
            Ok(Message::Ping(data)) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Err(e) => {
                warn!(%peer_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    state.ws_storage.remove(&peer_id);

    // Reclaim everything the peer owned and tell the rest of its room.
    if let Some(outcome) = state.service.disconnect(&peer_id).await {
        fan_out_departure(&state, &peer_id, &outcome).await;
    }

    info!(%peer_id, "signaling connection closed");
}

/// Notifies the remaining members about a departed peer: one
/// `producer-closed` per producer it owned, then `peer-left`.
async fn fan_out_departure(state: &AppState, peer_id: &str, outcome: &LeaveOutcome) {
    for producer_id in &outcome.closed_producers {
        dispatcher::broadcast(
            &state.ws_storage,
            &outcome.others,
            &ServerEvent::ProducerClosed {
                producer_id: producer_id.clone(),
                peer_id: Some(peer_id.to_string()),
            },
        )
        .await;
    }
    dispatcher::broadcast(
        &state.ws_storage,
        &outcome.others,
        &ServerEvent::PeerLeft {
            peer_id: peer_id.to_string(),
        },
    )
    .await;
}

async fn handle_client_event(state: &AppState, peer_id: &str, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(%peer_id, %e, "ignoring unparsable signaling event");
            return;
        }
    };

    match event {
        ClientEvent::JoinVideoRoom { room_id } => {
            match state.service.join(peer_id, &room_id).await {
                Ok(outcome) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::VideoRoomJoined {
                            room_id: outcome.room_id,
                            router_capabilities: outcome.router_capabilities,
                            existing_producers: outcome.existing_producers,
                        },
                    )
                    .await;
                    dispatcher::broadcast(
                        &state.ws_storage,
                        &outcome.others,
                        &ServerEvent::NewPeerJoined {
                            peer_id: peer_id.to_string(),
                        },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, room_error(&e)).await,
            }
        }
        ClientEvent::LeaveVideoRoom { room_id } => {
            match state.service.leave(peer_id, &room_id).await {
                Ok(outcome) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::VideoRoomLeft {
                            room_id: outcome.room_id.clone(),
                        },
                    )
                    .await;
                    fan_out_departure(state, peer_id, &outcome).await;
                }
                Err(e) => reply(state, peer_id, room_error(&e)).await,
            }
        }
        ClientEvent::CreateTransport { room_id, direction } => {
            match state
                .service
                .create_transport(peer_id, &room_id, direction)
                .await
            {
                Ok(params) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::TransportCreated {
                            direction,
                            transport_params: params,
                        },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, transport_error(&e)).await,
            }
        }
        ClientEvent::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            match state
                .service
                .connect_transport(peer_id, &transport_id, dtls_parameters)
                .await
            {
                Ok(()) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::TransportConnected { transport_id },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, transport_error(&e)).await,
            }
        }
        ClientEvent::CreateProducer {
            transport_id,
            room_id,
            kind,
            rtp_parameters,
        } => {
            match state
                .service
                .produce(peer_id, &transport_id, &room_id, kind, rtp_parameters)
                .await
            {
                Ok(outcome) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::ProducerCreated {
                            id: outcome.producer_id.clone(),
                            kind: outcome.kind,
                        },
                    )
                    .await;
                    dispatcher::broadcast(
                        &state.ws_storage,
                        &outcome.others,
                        &ServerEvent::NewProducerAvailable {
                            peer_id: peer_id.to_string(),
                            producer_id: outcome.producer_id,
                            kind: outcome.kind,
                        },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, producer_error(&e)).await,
            }
        }
        ClientEvent::CreateConsumer {
            transport_id,
            producer_id,
            rtp_capabilities,
        } => {
            match state
                .service
                .consume(peer_id, &transport_id, &producer_id, rtp_capabilities)
                .await
            {
                Ok(params) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::ConsumerCreated {
                            id: params.id,
                            producer_id: params.producer_id,
                            kind: params.kind,
                            rtp_parameters: params.rtp_parameters,
                        },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, consumer_error(&e)).await,
            }
        }
        ClientEvent::ResumeConsumer { consumer_id } => {
            match state.service.resume_consumer(peer_id, &consumer_id).await {
                Ok(()) => {
                    reply(state, peer_id, ServerEvent::ConsumerResumed { consumer_id }).await;
                }
                Err(e) => reply(state, peer_id, consumer_error(&e)).await,
            }
        }
        ClientEvent::PauseConsumer { consumer_id } => {
            match state.service.pause_consumer(peer_id, &consumer_id).await {
                Ok(()) => {
                    reply(state, peer_id, ServerEvent::ConsumerPaused { consumer_id }).await;
                }
                Err(e) => reply(state, peer_id, consumer_error(&e)).await,
            }
        }
        ClientEvent::CloseProducer {
            producer_id,
            room_id,
        } => {
            match state
                .service
                .close_producer(peer_id, &producer_id, &room_id)
                .await
            {
                Ok(outcome) => {
                    reply(
                        state,
                        peer_id,
                        ServerEvent::ProducerClosed {
                            producer_id: outcome.producer_id.clone(),
                            peer_id: None,
                        },
                    )
                    .await;
                    dispatcher::broadcast(
                        &state.ws_storage,
                        &outcome.others,
                        &ServerEvent::ProducerClosed {
                            producer_id: outcome.producer_id,
                            peer_id: Some(peer_id.to_string()),
                        },
                    )
                    .await;
                }
                Err(e) => reply(state, peer_id, producer_error(&e)).await,
            }
        }
    }
}

async fn reply(state: &AppState, peer_id: &str, event: ServerEvent) {
    dispatcher::send_to_peer(&state.ws_storage, peer_id, &event).await;
}

fn room_error(e: &SignalError) -> ServerEvent {
    ServerEvent::VideoRoomError {
        error: e.code().to_string(),
        details: e.to_string(),
    }
}

fn transport_error(e: &SignalError) -> ServerEvent {
    ServerEvent::TransportError {
        error: e.code().to_string(),
        details: e.to_string(),
    }
}

fn producer_error(e: &SignalError) -> ServerEvent {
    ServerEvent::ProducerError {
        error: e.code().to_string(),
        details: e.to_string(),
    }
}

fn consumer_error(e: &SignalError) -> ServerEvent {
    ServerEvent::ConsumerError {
        error: e.code().to_string(),
        details: e.to_string(),
    }
}
