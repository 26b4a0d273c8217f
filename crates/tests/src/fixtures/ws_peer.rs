use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use super::test_app::TestApp;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// A signaling peer driven over a real WebSocket connection.
pub struct WsPeer {
    pub id: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsPeer {
    /// Connects and consumes the `connected` hello.
    pub async fn connect(app: &TestApp, peer_id: &str) -> Self {
        let (stream, _) = connect_async(app.ws_url(peer_id))
            .await
            .expect("WS connect failed");
        let mut peer = Self {
            id: peer_id.to_string(),
            stream,
        };
        let (name, payload) = peer.recv().await;
        assert_eq!(name, "connected");
        assert_eq!(payload["peerId"], peer_id);
        peer
    }

    pub async fn send(&mut self, name: &str, payload: Value) {
        let text = serde_json::to_string(&json!({ "name": name, "payload": payload })).unwrap();
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("WS send failed");
    }

    /// Next event as (name, payload); panics after 2 seconds of silence.
    pub async fn recv(&mut self) -> (String, Value) {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed")
                .expect("WS error");
            if let Message::Text(text) = msg {
                let parsed: Value = serde_json::from_str(&text).unwrap();
                return (
                    parsed["name"].as_str().unwrap_or_default().to_string(),
                    parsed.get("payload").cloned().unwrap_or(Value::Null),
                );
            }
        }
    }

    /// Collects the next `n` events.
    pub async fn recv_n(&mut self, n: usize) -> Vec<(String, Value)> {
        let mut events = Vec::with_capacity(n);
        for _ in 0..n {
            events.push(self.recv().await);
        }
        events
    }

    /// Asserts the next event carries the given name; returns its payload.
    pub async fn expect(&mut self, name: &str) -> Value {
        let (got, payload) = self.recv().await;
        assert_eq!(got, name, "unexpected event (payload: {payload})");
        payload
    }

    /// Asserts no event arrives within the silence window.
    pub async fn expect_silence(&mut self) {
        let result = tokio::time::timeout(SILENCE_WINDOW, self.stream.next()).await;
        if let Ok(Some(Ok(Message::Text(text)))) = result {
            panic!("expected silence, got: {text}");
        }
    }

    pub async fn close(mut self) {
        self.stream.close(None).await.ok();
    }

    // --- protocol helpers ---

    /// Joins a room; returns the `video-room-joined` payload.
    pub async fn join(&mut self, room_id: &str) -> Value {
        self.send("join-video-room", json!({ "roomId": room_id }))
            .await;
        self.expect("video-room-joined").await
    }

    /// Leaves a room; returns the `video-room-left` payload.
    pub async fn leave(&mut self, room_id: &str) -> Value {
        self.send("leave-video-room", json!({ "roomId": room_id }))
            .await;
        self.expect("video-room-left").await
    }

    /// Creates and connects a transport; returns its id.
    pub async fn setup_transport(&mut self, room_id: &str, direction: &str) -> String {
        self.send(
            "create-transport",
            json!({ "roomId": room_id, "direction": direction }),
        )
        .await;
        let payload = self.expect("transport-created").await;
        assert_eq!(payload["direction"], direction);
        let transport_id = payload["transportParams"]["id"]
            .as_str()
            .expect("transport id missing")
            .to_string();

        self.send(
            "connect-transport",
            json!({
                "transportId": transport_id,
                "dtlsParameters": { "role": "client", "fingerprints": [] },
            }),
        )
        .await;
        let payload = self.expect("transport-connected").await;
        assert_eq!(payload["transportId"], transport_id.as_str());
        transport_id
    }

    /// Produces a track; returns the producer id.
    pub async fn produce(&mut self, room_id: &str, transport_id: &str, kind: &str) -> String {
        self.send(
            "create-producer",
            json!({
                "transportId": transport_id,
                "roomId": room_id,
                "kind": kind,
                "rtpParameters": { "codecs": [], "headerExtensions": [] },
            }),
        )
        .await;
        let payload = self.expect("producer-created").await;
        assert_eq!(payload["kind"], kind);
        payload["id"].as_str().expect("producer id missing").to_string()
    }

    /// Consumes a producer; returns the consumer id.
    pub async fn consume(&mut self, transport_id: &str, producer_id: &str) -> String {
        self.send(
            "create-consumer",
            json!({
                "transportId": transport_id,
                "producerId": producer_id,
                "rtpCapabilities": { "codecs": [], "headerExtensions": [] },
            }),
        )
        .await;
        let payload = self.expect("consumer-created").await;
        assert_eq!(payload["producerId"], producer_id);
        payload["id"].as_str().expect("consumer id missing").to_string()
    }

    pub async fn resume(&mut self, consumer_id: &str) {
        self.send("resume-consumer", json!({ "consumerId": consumer_id }))
            .await;
        let payload = self.expect("consumer-resumed").await;
        assert_eq!(payload["consumerId"], consumer_id);
    }
}
