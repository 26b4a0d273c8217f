use serde_json::json;

use crate::fixtures::test_app::TestApp;
use crate::fixtures::ws_peer::WsPeer;

#[tokio::test]
async fn create_transport_before_join_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.send(
        "create-transport",
        json!({ "roomId": "room-a", "direction": "send" }),
    )
    .await;
    let payload = p1.expect("transport-error").await;
    assert_eq!(payload["error"], "unknown-room");
    assert_eq!(app.state.service.transport_count(), 0);
}

#[tokio::test]
async fn create_transport_in_a_room_the_peer_is_not_in_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    // p1 brings the room into existence; p2 never joins it.
    p1.join("room-a").await;

    p2.send(
        "create-transport",
        json!({ "roomId": "room-a", "direction": "recv" }),
    )
    .await;
    let payload = p2.expect("transport-error").await;
    assert_eq!(payload["error"], "not-joined");
}

#[tokio::test]
async fn joining_twice_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    p1.send("join-video-room", json!({ "roomId": "room-b" }))
        .await;
    let payload = p1.expect("video-room-error").await;
    assert_eq!(payload["error"], "already-joined");
    assert_eq!(app.state.service.room_count(), 1);
}

#[tokio::test]
async fn produce_before_transport_connect_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    // Create the send transport without connecting it.
    p1.send(
        "create-transport",
        json!({ "roomId": "room-a", "direction": "send" }),
    )
    .await;
    let payload = p1.expect("transport-created").await;
    let transport_id = payload["transportParams"]["id"].as_str().unwrap().to_string();

    p1.send(
        "create-producer",
        json!({
            "transportId": transport_id,
            "roomId": "room-a",
            "kind": "video",
            "rtpParameters": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p1.expect("producer-error").await;
    assert_eq!(payload["error"], "not-connected");

    // No state change, no fan-out.
    assert_eq!(app.state.service.producer_count(), 0);
    p2.expect_silence().await;
}

#[tokio::test]
async fn second_transport_per_direction_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    p1.setup_transport("room-a", "send").await;

    p1.send(
        "create-transport",
        json!({ "roomId": "room-a", "direction": "send" }),
    )
    .await;
    let payload = p1.expect("transport-error").await;
    assert_eq!(payload["error"], "duplicate-transport");
    assert_eq!(app.state.service.transport_count(), 1);
}

#[tokio::test]
async fn connect_transport_twice_reports_already_connected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    let transport_id = p1.setup_transport("room-a", "send").await;

    p1.send(
        "connect-transport",
        json!({
            "transportId": transport_id,
            "dtlsParameters": { "role": "client", "fingerprints": [] },
        }),
    )
    .await;
    let payload = p1.expect("transport-error").await;
    assert_eq!(payload["error"], "already-connected");
}

#[tokio::test]
async fn connecting_a_foreign_transport_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_transport = p1.setup_transport("room-a", "send").await;

    p2.send(
        "connect-transport",
        json!({
            "transportId": p1_transport,
            "dtlsParameters": { "role": "client", "fingerprints": [] },
        }),
    )
    .await;
    let payload = p2.expect("transport-error").await;
    assert_eq!(payload["error"], "not-owner");
}

#[tokio::test]
async fn unknown_transport_is_reported() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    p1.send(
        "connect-transport",
        json!({
            "transportId": "no-such-transport",
            "dtlsParameters": { "role": "client", "fingerprints": [] },
        }),
    )
    .await;
    let payload = p1.expect("transport-error").await;
    assert_eq!(payload["error"], "unknown-transport");
}

#[tokio::test]
async fn duplicate_kind_producer_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    let send = p1.setup_transport("room-a", "send").await;
    p1.produce("room-a", &send, "video").await;

    p1.send(
        "create-producer",
        json!({
            "transportId": send,
            "roomId": "room-a",
            "kind": "video",
            "rtpParameters": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p1.expect("producer-error").await;
    assert_eq!(payload["error"], "duplicate-kind");
    assert_eq!(app.state.service.producer_count(), 1);

    // A different kind on the same transport is still fine.
    p1.produce("room-a", &send, "audio").await;
    assert_eq!(app.state.service.producer_count(), 2);
}

#[tokio::test]
async fn consuming_on_a_send_transport_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    let producer_id = p1.produce("room-a", &p1_send, "audio").await;
    p2.expect("new-producer-available").await;

    let p2_send = p2.setup_transport("room-a", "send").await;
    p2.send(
        "create-consumer",
        json!({
            "transportId": p2_send,
            "producerId": producer_id,
            "rtpCapabilities": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p2.expect("consumer-error").await;
    assert_eq!(payload["error"], "wrong-direction");
}

#[tokio::test]
async fn consuming_own_producer_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;

    p1.join("room-a").await;
    let send = p1.setup_transport("room-a", "send").await;
    let recv = p1.setup_transport("room-a", "recv").await;
    let producer_id = p1.produce("room-a", &send, "video").await;

    p1.send(
        "create-consumer",
        json!({
            "transportId": recv,
            "producerId": producer_id,
            "rtpCapabilities": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p1.expect("consumer-error").await;
    assert_eq!(payload["error"], "cannot-consume");
    assert_eq!(app.state.service.consumer_count(), 0);
}

#[tokio::test]
async fn incompatible_capabilities_cannot_consume() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    let producer_id = p1.produce("room-a", &p1_send, "video").await;
    p2.expect("new-producer-available").await;

    let p2_recv = p2.setup_transport("room-a", "recv").await;
    app.engine.set_reject_consume(true);

    p2.send(
        "create-consumer",
        json!({
            "transportId": p2_recv,
            "producerId": producer_id,
            "rtpCapabilities": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p2.expect("consumer-error").await;
    assert_eq!(payload["error"], "cannot-consume");
    assert_eq!(app.state.service.consumer_count(), 0);
}

#[tokio::test]
async fn resuming_a_foreign_consumer_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    let producer_id = p1.produce("room-a", &p1_send, "audio").await;
    p2.expect("new-producer-available").await;

    let p2_recv = p2.setup_transport("room-a", "recv").await;
    let consumer_id = p2.consume(&p2_recv, &producer_id).await;

    p1.send("resume-consumer", json!({ "consumerId": consumer_id }))
        .await;
    let payload = p1.expect("consumer-error").await;
    assert_eq!(payload["error"], "not-owner");
}

#[tokio::test]
async fn redundant_resume_and_pause_are_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    let producer_id = p1.produce("room-a", &p1_send, "audio").await;
    p2.expect("new-producer-available").await;

    let p2_recv = p2.setup_transport("room-a", "recv").await;
    let consumer_id = p2.consume(&p2_recv, &producer_id).await;

    // A pause before the first resume is redundant (consumers start paused).
    p2.send("pause-consumer", json!({ "consumerId": consumer_id }))
        .await;
    let payload = p2.expect("consumer-error").await;
    assert_eq!(payload["error"], "already-paused");

    p2.resume(&consumer_id).await;

    p2.send("resume-consumer", json!({ "consumerId": consumer_id }))
        .await;
    let payload = p2.expect("consumer-error").await;
    assert_eq!(payload["error"], "already-resumed");
}

#[tokio::test]
async fn engine_produce_failure_rolls_back_without_fanout() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    app.engine.fail_next_produce();

    p1.send(
        "create-producer",
        json!({
            "transportId": p1_send,
            "roomId": "room-a",
            "kind": "video",
            "rtpParameters": { "codecs": [], "headerExtensions": [] },
        }),
    )
    .await;
    let payload = p1.expect("producer-error").await;
    assert_eq!(payload["error"], "engine-failure");

    assert_eq!(app.state.service.producer_count(), 0);
    assert_eq!(app.engine.open_handles(), 2); // the router and p1's transport, nothing else
    p2.expect_silence().await;

    // The failure is transient; the next attempt succeeds.
    p1.produce("room-a", &p1_send, "video").await;
    p2.expect("new-producer-available").await;
}

#[tokio::test]
async fn closing_a_foreign_producer_is_rejected() {
    let app = TestApp::spawn().await;
    let mut p1 = WsPeer::connect(&app, "p1").await;
    let mut p2 = WsPeer::connect(&app, "p2").await;

    p1.join("room-a").await;
    p2.join("room-a").await;
    p1.expect("new-peer-joined").await;

    let p1_send = p1.setup_transport("room-a", "send").await;
    let producer_id = p1.produce("room-a", &p1_send, "video").await;
    p2.expect("new-producer-available").await;

    p2.send(
        "close-producer",
        json!({ "producerId": producer_id, "roomId": "room-a" }),
    )
    .await;
    let payload = p2.expect("producer-error").await;
    assert_eq!(payload["error"], "not-owner");
    assert_eq!(app.state.service.producer_count(), 1);
}
