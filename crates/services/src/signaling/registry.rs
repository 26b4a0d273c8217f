use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::Mutex;

use super::events::TransportDirection;
use crate::media::engine::MediaKind;

/// A live room. The mutex around [`RoomState`] is the room-scoped
/// serialization point: every mutation touching the room's membership, or
/// the transports/producers/consumers of its members, runs while it is
/// held, and fan-out recipient sets are snapshotted before it is released.
pub struct RoomEntry {
    pub state: Mutex<RoomState>,
}

pub struct RoomState {
    pub router_id: String,
    pub router_capabilities: Value,
    pub members: HashSet<String>,
    pub created_at: DateTime<Utc>,
    /// Set during teardown of an emptied room so a racing join re-creates
    /// the room instead of resurrecting a closed router.
    pub closed: bool,
}

impl RoomEntry {
    pub fn new(router_id: String, router_capabilities: Value) -> Self {
        Self {
            state: Mutex::new(RoomState {
                router_id,
                router_capabilities,
                members: HashSet::new(),
                created_at: Utc::now(),
                closed: false,
            }),
        }
    }
}

/// A signaling connection. The connection id doubles as the peer id; a
/// peer is in at most one room and holds at most one transport per
/// direction.
#[derive(Debug, Default)]
pub struct PeerRecord {
    pub room_id: Option<String>,
    pub send_transport: Option<String>,
    pub recv_transport: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransportRecord {
    pub id: String,
    pub peer_id: String,
    pub room_id: String,
    pub direction: TransportDirection,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub id: String,
    pub peer_id: String,
    pub room_id: String,
    pub transport_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub id: String,
    pub peer_id: String,
    pub room_id: String,
    pub transport_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub paused: bool,
}
