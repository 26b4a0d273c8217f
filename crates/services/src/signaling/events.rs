use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::engine::{MediaKind, TransportParams};

/// Direction of a WebRTC transport relative to the peer: `send` carries
/// media from the peer to the SFU, `recv` the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl TransportDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A producer advertisement as other peers see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: String,
    pub peer_id: String,
    pub kind: MediaKind,
}

/// Client -> Server signaling events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "join-video-room", rename_all = "camelCase")]
    JoinVideoRoom { room_id: String },

    #[serde(rename = "leave-video-room", rename_all = "camelCase")]
    LeaveVideoRoom { room_id: String },

    #[serde(rename = "create-transport", rename_all = "camelCase")]
    CreateTransport {
        room_id: String,
        direction: TransportDirection,
    },

    #[serde(rename = "connect-transport", rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: Value,
    },

    #[serde(rename = "create-producer", rename_all = "camelCase")]
    CreateProducer {
        transport_id: String,
        room_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename = "create-consumer", rename_all = "camelCase")]
    CreateConsumer {
        transport_id: String,
        producer_id: String,
        rtp_capabilities: Value,
    },

    #[serde(rename = "resume-consumer", rename_all = "camelCase")]
    ResumeConsumer { consumer_id: String },

    #[serde(rename = "pause-consumer", rename_all = "camelCase")]
    PauseConsumer { consumer_id: String },

    #[serde(rename = "close-producer", rename_all = "camelCase")]
    CloseProducer {
        producer_id: String,
        room_id: String,
    },
}

/// Server -> Client signaling events: replies to the originator plus
/// fan-out notifications to the rest of the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum ServerEvent {
    /// Hello on connection accept; tells the client its peer id.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { peer_id: String },

    #[serde(rename = "video-room-joined", rename_all = "camelCase")]
    VideoRoomJoined {
        room_id: String,
        router_capabilities: Value,
        existing_producers: Vec<ProducerInfo>,
    },

    #[serde(rename = "video-room-left", rename_all = "camelCase")]
    VideoRoomLeft { room_id: String },

    #[serde(rename = "transport-created", rename_all = "camelCase")]
    TransportCreated {
        direction: TransportDirection,
        transport_params: TransportParams,
    },

    #[serde(rename = "transport-connected", rename_all = "camelCase")]
    TransportConnected { transport_id: String },

    #[serde(rename = "producer-created", rename_all = "camelCase")]
    ProducerCreated { id: String, kind: MediaKind },

    #[serde(rename = "consumer-created", rename_all = "camelCase")]
    ConsumerCreated {
        id: String,
        producer_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename = "consumer-resumed", rename_all = "camelCase")]
    ConsumerResumed { consumer_id: String },

    #[serde(rename = "consumer-paused", rename_all = "camelCase")]
    ConsumerPaused { consumer_id: String },

    /// Reply to the closing peer (`peer_id` absent) and fan-out to the
    /// rest of the room (`peer_id` present).
    #[serde(rename = "producer-closed", rename_all = "camelCase")]
    ProducerClosed {
        producer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
    },

    #[serde(rename = "new-peer-joined", rename_all = "camelCase")]
    NewPeerJoined { peer_id: String },

    #[serde(rename = "new-producer-available", rename_all = "camelCase")]
    NewProducerAvailable {
        peer_id: String,
        producer_id: String,
        kind: MediaKind,
    },

    #[serde(rename = "peer-left", rename_all = "camelCase")]
    PeerLeft { peer_id: String },

    #[serde(rename = "video-room-error")]
    VideoRoomError { error: String, details: String },

    #[serde(rename = "transport-error")]
    TransportError { error: String, details: String },

    #[serde(rename = "producer-error")]
    ProducerError { error: String, details: String },

    #[serde(rename = "consumer-error")]
    ConsumerError { error: String, details: String },
}
