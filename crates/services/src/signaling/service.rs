use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use roomcast_config::SignalingSettings;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::SignalError;
use super::events::{ProducerInfo, TransportDirection};
use super::registry::{
    ConsumerRecord, PeerRecord, ProducerRecord, RoomEntry, TransportRecord,
};
use crate::media::engine::{
    ConsumerParams, EngineError, EngineEvent, MediaEngine, MediaKind, TransportParams,
};

/// Reply data for a successful join.
pub struct JoinOutcome {
    pub room_id: String,
    pub router_capabilities: Value,
    pub existing_producers: Vec<ProducerInfo>,
    /// Members to notify with `new-peer-joined`.
    pub others: Vec<String>,
}

/// Effects of a leave or disconnect cleanup.
pub struct LeaveOutcome {
    pub room_id: String,
    /// Producers the departing peer owned, now closed.
    pub closed_producers: Vec<String>,
    /// Remaining members to notify.
    pub others: Vec<String>,
    pub room_closed: bool,
}

pub struct ProduceOutcome {
    pub producer_id: String,
    pub kind: MediaKind,
    pub others: Vec<String>,
}

pub struct CloseProducerOutcome {
    pub producer_id: String,
    pub others: Vec<String>,
}

/// Effects of reclaiming a transport the engine reported closed.
pub struct TransportClosedOutcome {
    pub peer_id: String,
    pub closed_producers: Vec<String>,
    pub others: Vec<String>,
}

/// The signaling core: owns the room and peer registries plus the
/// transport/producer/consumer tables, and drives the media engine.
///
/// Locking model: the global maps are only ever touched with short-held
/// shard locks and never across an engine call or any other await. Every
/// mutation affecting a room runs under that room's mutex (which may be
/// held across the engine calls serving it), and fan-out recipient sets
/// are snapshotted under the mutex; the transport layer sends after the
/// call returns.
pub struct VideoRoomService {
    engine: Arc<dyn MediaEngine>,
    rooms: DashMap<String, Arc<RoomEntry>>,
    peers: DashMap<String, PeerRecord>,
    transports: DashMap<String, TransportRecord>,
    producers: DashMap<String, ProducerRecord>,
    consumers: DashMap<String, ConsumerRecord>,
    request_timeout: Duration,
}

impl VideoRoomService {
    pub fn new(engine: Arc<dyn MediaEngine>, settings: &SignalingSettings) -> Self {
        Self {
            engine,
            rooms: DashMap::new(),
            peers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }

    pub fn engine_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Registers a freshly accepted signaling connection. Returns false if
    /// the peer id is already live.
    pub fn register_peer(&self, peer_id: &str) -> bool {
        match self.peers.entry(peer_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(PeerRecord::default());
                true
            }
        }
    }

    /// Places the peer into the room, creating room + router on first join.
    pub async fn join(&self, peer_id: &str, room_id: &str) -> Result<JoinOutcome, SignalError> {
        {
            let peer = self.peers.get(peer_id).ok_or(SignalError::NotJoined)?;
            if let Some(current) = &peer.room_id {
                return Err(SignalError::AlreadyJoined(current.clone()));
            }
        }

        let outcome = loop {
            let existing = self.rooms.get(room_id).map(|e| e.clone());
            let entry = match existing {
                Some(entry) => entry,
                None => {
                    // Create the router before publishing the room entry so
                    // the global map is never held across an engine call.
                    let router = self.engine_call(self.engine.create_router()).await?;
                    let fresh = Arc::new(RoomEntry::new(
                        router.id.clone(),
                        router.rtp_capabilities,
                    ));
                    match self.rooms.entry(room_id.to_string()) {
                        Entry::Vacant(vacant) => {
                            vacant.insert(fresh.clone());
                            fresh
                        }
                        Entry::Occupied(_) => {
                            // Lost the creation race; discard our router.
                            self.engine.close_router(&router.id).await;
                            continue;
                        }
                    }
                }
            };

            let mut room = entry.state.lock().await;
            if room.closed {
                // Raced an empty-room teardown; the entry is gone from the
                // map, start over with a fresh router.
                continue;
            }

            room.members.insert(peer_id.to_string());
            if let Some(mut peer) = self.peers.get_mut(peer_id) {
                peer.room_id = Some(room_id.to_string());
            }

            let existing_producers = self
                .producers
                .iter()
                .filter(|p| p.room_id == room_id && p.peer_id != peer_id)
                .map(|p| ProducerInfo {
                    id: p.id.clone(),
                    peer_id: p.peer_id.clone(),
                    kind: p.kind,
                })
                .collect();
            let others = room
                .members
                .iter()
                .filter(|m| m.as_str() != peer_id)
                .cloned()
                .collect();

            break JoinOutcome {
                room_id: room_id.to_string(),
                router_capabilities: room.router_capabilities.clone(),
                existing_producers,
                others,
            };
        };

        info!(%peer_id, %room_id, "peer joined room");
        Ok(outcome)
    }

    /// Voluntary leave; the peer stays connected and may join again.
    pub async fn leave(&self, peer_id: &str, room_id: &str) -> Result<LeaveOutcome, SignalError> {
        {
            let peer = self.peers.get(peer_id).ok_or(SignalError::NotJoined)?;
            match &peer.room_id {
                Some(current) if current == room_id => {}
                _ => return Err(SignalError::NotJoined),
            }
        }
        let entry = self
            .rooms
            .get(room_id)
            .map(|e| e.clone())
            .ok_or(SignalError::NotJoined)?;

        Ok(self.cleanup_peer(entry, peer_id, room_id).await)
    }

    /// Cleanup entry point for a dropped connection. Idempotent; safe for
    /// peers that never joined or already left, and the recovery path for
    /// duplicate close signals.
    pub async fn disconnect(&self, peer_id: &str) -> Option<LeaveOutcome> {
        let room_id = self.peers.get(peer_id).and_then(|p| p.room_id.clone());

        let outcome = match room_id {
            Some(room_id) => match self.rooms.get(&room_id).map(|e| e.clone()) {
                Some(entry) => Some(self.cleanup_peer(entry, peer_id, &room_id).await),
                None => None,
            },
            None => None,
        };

        self.peers.remove(peer_id);
        outcome
    }

    pub async fn create_transport(
        &self,
        peer_id: &str,
        room_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportParams, SignalError> {
        let entry = self.member_room(peer_id, room_id)?;
        let room = entry.state.lock().await;
        if !room.members.contains(peer_id) {
            return Err(SignalError::NotJoined);
        }

        {
            let peer = self.peers.get(peer_id).ok_or(SignalError::NotJoined)?;
            let slot = match direction {
                TransportDirection::Send => &peer.send_transport,
                TransportDirection::Recv => &peer.recv_transport,
            };
            if slot.is_some() {
                return Err(SignalError::DuplicateTransport(direction));
            }
        }

        let params = self
            .engine_call(self.engine.create_transport(&room.router_id))
            .await?;

        self.transports.insert(
            params.id.clone(),
            TransportRecord {
                id: params.id.clone(),
                peer_id: peer_id.to_string(),
                room_id: room_id.to_string(),
                direction,
                connected: false,
            },
        );
        if let Some(mut peer) = self.peers.get_mut(peer_id) {
            match direction {
                TransportDirection::Send => peer.send_transport = Some(params.id.clone()),
                TransportDirection::Recv => peer.recv_transport = Some(params.id.clone()),
            }
        }

        debug!(%peer_id, %room_id, transport_id = %params.id, %direction, "transport created");
        Ok(params)
    }

    pub async fn connect_transport(
        &self,
        peer_id: &str,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), SignalError> {
        let record = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        if record.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }

        let entry = self
            .rooms
            .get(&record.room_id)
            .map(|e| e.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        let _room = entry.state.lock().await;

        // Re-check under the room lock; cleanup may have raced us.
        let connected = self
            .transports
            .get(transport_id)
            .map(|t| t.connected)
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        if connected {
            return Err(SignalError::AlreadyConnected(transport_id.to_string()));
        }

        self.engine_call(self.engine.connect_transport(transport_id, dtls_parameters))
            .await?;

        if let Some(mut transport) = self.transports.get_mut(transport_id) {
            transport.connected = true;
        }
        debug!(%peer_id, transport_id, "transport connected");
        Ok(())
    }

    pub async fn produce(
        &self,
        peer_id: &str,
        transport_id: &str,
        room_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProduceOutcome, SignalError> {
        let entry = self.member_room(peer_id, room_id)?;
        let room = entry.state.lock().await;

        let transport = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        if transport.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }
        if transport.direction != TransportDirection::Send {
            return Err(SignalError::WrongDirection(transport_id.to_string()));
        }
        if !transport.connected {
            return Err(SignalError::NotConnected(transport_id.to_string()));
        }

        // One live producer per (peer, kind).
        if self
            .producers
            .iter()
            .any(|p| p.peer_id == peer_id && p.room_id == room_id && p.kind == kind)
        {
            return Err(SignalError::DuplicateKind(kind));
        }

        let producer_id = self
            .engine_call(self.engine.produce(transport_id, kind, rtp_parameters))
            .await?;

        self.producers.insert(
            producer_id.clone(),
            ProducerRecord {
                id: producer_id.clone(),
                peer_id: peer_id.to_string(),
                room_id: room_id.to_string(),
                transport_id: transport_id.to_string(),
                kind,
            },
        );

        let others = room
            .members
            .iter()
            .filter(|m| m.as_str() != peer_id)
            .cloned()
            .collect();

        info!(%peer_id, %room_id, %producer_id, %kind, "producer created");
        Ok(ProduceOutcome {
            producer_id,
            kind,
            others,
        })
    }

    pub async fn consume(
        &self,
        peer_id: &str,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParams, SignalError> {
        let record = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        if record.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }
        if record.direction != TransportDirection::Recv {
            return Err(SignalError::WrongDirection(transport_id.to_string()));
        }

        let entry = self
            .rooms
            .get(&record.room_id)
            .map(|e| e.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        let room = entry.state.lock().await;

        // The transport may have been reclaimed while we waited.
        let transport = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| SignalError::UnknownTransport(transport_id.to_string()))?;
        if !transport.connected {
            return Err(SignalError::NotConnected(transport_id.to_string()));
        }

        let producer = self
            .producers
            .get(producer_id)
            .map(|p| p.clone())
            .ok_or_else(|| SignalError::UnknownProducer(producer_id.to_string()))?;
        if producer.room_id != transport.room_id {
            return Err(SignalError::UnknownProducer(producer_id.to_string()));
        }
        if producer.peer_id == peer_id {
            return Err(SignalError::CannotConsume(producer_id.to_string()));
        }

        if !self
            .engine
            .can_consume(&room.router_id, producer_id, &rtp_capabilities)
        {
            return Err(SignalError::CannotConsume(producer_id.to_string()));
        }

        let params = self
            .engine_call(self.engine.consume(transport_id, producer_id, rtp_capabilities))
            .await?;

        self.consumers.insert(
            params.id.clone(),
            ConsumerRecord {
                id: params.id.clone(),
                peer_id: peer_id.to_string(),
                room_id: transport.room_id.clone(),
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                kind: params.kind,
                paused: true,
            },
        );

        debug!(%peer_id, consumer_id = %params.id, %producer_id, "consumer created");
        Ok(params)
    }

    pub async fn resume_consumer(
        &self,
        peer_id: &str,
        consumer_id: &str,
    ) -> Result<(), SignalError> {
        let record = self
            .consumers
            .get(consumer_id)
            .map(|c| c.clone())
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        if record.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }

        let entry = self
            .rooms
            .get(&record.room_id)
            .map(|e| e.clone())
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        let _room = entry.state.lock().await;

        let paused = self
            .consumers
            .get(consumer_id)
            .map(|c| c.paused)
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        if !paused {
            return Err(SignalError::AlreadyResumed(consumer_id.to_string()));
        }

        self.engine_call(self.engine.resume_consumer(consumer_id))
            .await?;

        if let Some(mut consumer) = self.consumers.get_mut(consumer_id) {
            consumer.paused = false;
        }
        debug!(%peer_id, consumer_id, "consumer resumed");
        Ok(())
    }

    pub async fn pause_consumer(
        &self,
        peer_id: &str,
        consumer_id: &str,
    ) -> Result<(), SignalError> {
        let record = self
            .consumers
            .get(consumer_id)
            .map(|c| c.clone())
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        if record.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }

        let entry = self
            .rooms
            .get(&record.room_id)
            .map(|e| e.clone())
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        let _room = entry.state.lock().await;

        let paused = self
            .consumers
            .get(consumer_id)
            .map(|c| c.paused)
            .ok_or_else(|| SignalError::UnknownConsumer(consumer_id.to_string()))?;
        if paused {
            return Err(SignalError::AlreadyPaused(consumer_id.to_string()));
        }

        self.engine_call(self.engine.pause_consumer(consumer_id))
            .await?;

        if let Some(mut consumer) = self.consumers.get_mut(consumer_id) {
            consumer.paused = true;
        }
        debug!(%peer_id, consumer_id, "consumer paused");
        Ok(())
    }

    pub async fn close_producer(
        &self,
        peer_id: &str,
        producer_id: &str,
        room_id: &str,
    ) -> Result<CloseProducerOutcome, SignalError> {
        let entry = self.member_room(peer_id, room_id)?;
        let room = entry.state.lock().await;

        let record = self
            .producers
            .get(producer_id)
            .map(|p| p.clone())
            .ok_or_else(|| SignalError::UnknownProducer(producer_id.to_string()))?;
        if record.peer_id != peer_id {
            return Err(SignalError::NotOwner);
        }

        self.close_producer_cascade(&record).await;

        let others = room
            .members
            .iter()
            .filter(|m| m.as_str() != peer_id)
            .cloned()
            .collect();

        info!(%peer_id, %room_id, producer_id, "producer closed");
        Ok(CloseProducerOutcome {
            producer_id: producer_id.to_string(),
            others,
        })
    }

    /// Reclaims state behind a transport the engine reported closed. The
    /// peer keeps its membership; only the transport and everything riding
    /// on it goes away.
    pub async fn handle_transport_closed(
        &self,
        transport_id: &str,
    ) -> Option<TransportClosedOutcome> {
        let record = self.transports.get(transport_id).map(|t| t.clone())?;
        let entry = self.rooms.get(&record.room_id).map(|e| e.clone())?;
        let room = entry.state.lock().await;

        // Cleanup may have raced the notification.
        if !self.transports.contains_key(transport_id) {
            return None;
        }

        let closed_producers: Vec<ProducerRecord> = self
            .producers
            .iter()
            .filter(|p| p.transport_id == transport_id)
            .map(|p| p.clone())
            .collect();
        for producer in &closed_producers {
            self.close_producer_cascade(producer).await;
        }

        let stranded_consumers: Vec<String> = self
            .consumers
            .iter()
            .filter(|c| c.transport_id == transport_id)
            .map(|c| c.id.clone())
            .collect();
        for consumer_id in stranded_consumers {
            self.engine.close_consumer(&consumer_id).await;
            self.consumers.remove(&consumer_id);
        }

        self.engine.close_transport(transport_id).await;
        self.transports.remove(transport_id);
        if let Some(mut peer) = self.peers.get_mut(&record.peer_id) {
            match record.direction {
                TransportDirection::Send => {
                    if peer.send_transport.as_deref() == Some(transport_id) {
                        peer.send_transport = None;
                    }
                }
                TransportDirection::Recv => {
                    if peer.recv_transport.as_deref() == Some(transport_id) {
                        peer.recv_transport = None;
                    }
                }
            }
        }

        let others = room
            .members
            .iter()
            .filter(|m| m.as_str() != record.peer_id)
            .cloned()
            .collect();

        warn!(transport_id, peer_id = %record.peer_id, "transport closed by engine, state reclaimed");
        Some(TransportClosedOutcome {
            peer_id: record.peer_id.clone(),
            closed_producers: closed_producers.into_iter().map(|p| p.id).collect(),
            others,
        })
    }

    /// Peers currently in any room; the recipients of a fatal engine error.
    pub fn peers_in_rooms(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| p.value().room_id.is_some())
            .map(|p| p.key().clone())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Looks up the room entry for an event that requires membership.
    fn member_room(&self, peer_id: &str, room_id: &str) -> Result<Arc<RoomEntry>, SignalError> {
        let entry = self
            .rooms
            .get(room_id)
            .map(|e| e.clone())
            .ok_or_else(|| SignalError::UnknownRoom(room_id.to_string()))?;
        let peer = self.peers.get(peer_id).ok_or(SignalError::NotJoined)?;
        match &peer.room_id {
            Some(current) if current == room_id => Ok(entry),
            _ => Err(SignalError::NotJoined),
        }
    }

    /// Ordered teardown of everything the peer owns in the room: producers
    /// (cascading into their consumers on every peer), the peer's own
    /// consumers, its transports, its membership, and finally the room
    /// itself once empty. Runs under the room lock.
    async fn cleanup_peer(
        &self,
        entry: Arc<RoomEntry>,
        peer_id: &str,
        room_id: &str,
    ) -> LeaveOutcome {
        let mut room = entry.state.lock().await;

        // Membership may already be gone if a leave raced a disconnect.
        let was_member = room.members.remove(peer_id);

        let owned_producers: Vec<ProducerRecord> = self
            .producers
            .iter()
            .filter(|p| p.peer_id == peer_id && p.room_id == room_id)
            .map(|p| p.clone())
            .collect();
        for producer in &owned_producers {
            self.close_producer_cascade(producer).await;
        }

        let owned_consumers: Vec<String> = self
            .consumers
            .iter()
            .filter(|c| c.peer_id == peer_id && c.room_id == room_id)
            .map(|c| c.id.clone())
            .collect();
        for consumer_id in owned_consumers {
            self.engine.close_consumer(&consumer_id).await;
            self.consumers.remove(&consumer_id);
        }

        let owned_transports: Vec<String> = self
            .transports
            .iter()
            .filter(|t| t.peer_id == peer_id && t.room_id == room_id)
            .map(|t| t.id.clone())
            .collect();
        for transport_id in owned_transports {
            self.engine.close_transport(&transport_id).await;
            self.transports.remove(&transport_id);
        }

        if let Some(mut peer) = self.peers.get_mut(peer_id) {
            peer.room_id = None;
            peer.send_transport = None;
            peer.recv_transport = None;
        }

        let others: Vec<String> = room.members.iter().cloned().collect();
        let room_closed = was_member && room.members.is_empty();
        if room_closed {
            self.engine.close_router(&room.router_id).await;
            room.closed = true;
            drop(room);
            self.rooms
                .remove_if(room_id, |_, value| Arc::ptr_eq(value, &entry));
            info!(%room_id, "room emptied, router closed");
        }

        info!(%peer_id, %room_id, "peer left room");
        LeaveOutcome {
            room_id: room_id.to_string(),
            closed_producers: owned_producers.into_iter().map(|p| p.id).collect(),
            others,
            room_closed,
        }
    }

    /// Closes a producer and every consumer fed by it, engine-side and in
    /// the tables. Caller holds the room lock.
    async fn close_producer_cascade(&self, producer: &ProducerRecord) {
        let consumer_ids: Vec<String> = self
            .consumers
            .iter()
            .filter(|c| c.producer_id == producer.id)
            .map(|c| c.id.clone())
            .collect();
        for consumer_id in consumer_ids {
            self.engine.close_consumer(&consumer_id).await;
            self.consumers.remove(&consumer_id);
        }
        self.engine.close_producer(&producer.id).await;
        self.producers.remove(&producer.id);
    }

    /// Applies the per-event deadline to an engine call.
    async fn engine_call<T>(
        &self,
        call: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, SignalError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(SignalError::from),
            Err(_) => Err(SignalError::Timeout),
        }
    }
}
