use async_trait::async_trait;
use dashmap::DashMap;
use mediasoup::prelude::*;
use mediasoup::webrtc_transport::{
    WebRtcTransportListenInfos, WebRtcTransportOptions, WebRtcTransportRemoteParameters,
};
use roomcast_config::MediasoupSettings;
use serde_json::Value;
use std::net::IpAddr;
use std::num::NonZero;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;

use super::engine::{
    ConsumerParams, EngineError, EngineEvent, MediaEngine, MediaKind, RouterHandle,
    TransportParams,
};
use super::worker_pool::WorkerPool;

/// Media engine backed by mediasoup workers.
///
/// The only module that touches mediasoup types. It keeps every live
/// engine object in its own tables so that dropping an entry closes the
/// underlying worker-side resource.
pub struct MediasoupEngine {
    worker_pool: WorkerPool,
    routers: DashMap<String, Router>,
    transports: DashMap<String, WebRtcTransport>,
    producers: DashMap<String, Producer>,
    consumers: DashMap<String, Consumer>,
    listen_ip: IpAddr,
    announced_ip: Option<String>,
    events: broadcast::Sender<EngineEvent>,
}

impl MediasoupEngine {
    /// Boots the worker pool. Called once at startup; failure is fatal.
    pub async fn new(settings: &MediasoupSettings) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(64);
        let worker_pool = WorkerPool::new(settings, events.clone()).await?;

        let listen_ip: IpAddr = settings
            .listen_ip
            .parse()
            .unwrap_or_else(|_| "0.0.0.0".parse().unwrap());

        let announced_ip = if settings.announced_ip.is_empty() {
            None
        } else {
            Some(settings.announced_ip.clone())
        };

        Ok(Self {
            worker_pool,
            routers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            listen_ip,
            announced_ip,
            events,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    fn listen_info(&self, protocol: Protocol) -> ListenInfo {
        ListenInfo {
            protocol,
            ip: self.listen_ip,
            announced_address: self.announced_ip.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        }
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    async fn create_router(&self) -> Result<RouterHandle, EngineError> {
        let worker = self.worker_pool.get_worker();
        let router = worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| EngineError::Engine(format!("create_router: {e}")))?;

        let id = router.id().to_string();
        let rtp_capabilities = serde_json::to_value(router.rtp_capabilities())
            .map_err(|e| EngineError::Engine(format!("serialize router capabilities: {e}")))?;

        self.routers.insert(id.clone(), router);
        debug!(router_id = %id, "router created");
        Ok(RouterHandle {
            id,
            rtp_capabilities,
        })
    }

    async fn close_router(&self, router_id: &str) {
        // Dropping the Router closes it (and its children) in the worker.
        self.routers.remove(router_id);
    }

    async fn create_transport(&self, router_id: &str) -> Result<TransportParams, EngineError> {
        let router = self
            .routers
            .get(router_id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::UnknownId("router", router_id.to_string()))?;

        let listen_infos = WebRtcTransportListenInfos::new(self.listen_info(Protocol::Udp))
            .insert(self.listen_info(Protocol::Tcp));
        let mut options = WebRtcTransportOptions::new(listen_infos);
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;

        let transport = router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| EngineError::Engine(format!("create_webrtc_transport: {e}")))?;

        let id = transport.id().to_string();

        // Surface DTLS teardown so the signaling plane can reclaim state.
        let events = self.events.clone();
        let transport_id = id.clone();
        transport
            .on_dtls_state_change(move |state| {
                if state == DtlsState::Closed {
                    let _ = events.send(EngineEvent::TransportDtlsClosed {
                        transport_id: transport_id.clone(),
                    });
                }
            })
            .detach();

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: serde_json::to_value(transport.ice_parameters()).unwrap_or_default(),
            ice_candidates: serde_json::to_value(transport.ice_candidates()).unwrap_or_default(),
            dtls_parameters: serde_json::to_value(transport.dtls_parameters()).unwrap_or_default(),
        };

        self.transports.insert(id, transport);
        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), EngineError> {
        let transport = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| EngineError::UnknownId("transport", transport_id.to_string()))?;

        let dtls_parameters: DtlsParameters = serde_json::from_value(dtls_parameters)
            .map_err(|e| EngineError::InvalidParameters("dtls parameters", e.to_string()))?;

        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| EngineError::Engine(format!("connect_transport: {e}")))?;

        debug!(transport_id, "transport connected");
        Ok(())
    }

    async fn close_transport(&self, transport_id: &str) {
        self.transports.remove(transport_id);
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, EngineError> {
        let transport = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| EngineError::UnknownId("transport", transport_id.to_string()))?;

        let rtp_parameters: RtpParameters = serde_json::from_value(rtp_parameters)
            .map_err(|e| EngineError::InvalidParameters("rtp parameters", e.to_string()))?;

        let producer = transport
            .produce(ProducerOptions::new(engine_kind(kind), rtp_parameters))
            .await
            .map_err(|e| EngineError::Engine(format!("produce: {e}")))?;

        let id = producer.id().to_string();
        self.producers.insert(id.clone(), producer);
        debug!(producer_id = %id, %kind, "producer created");
        Ok(id)
    }

    async fn close_producer(&self, producer_id: &str) {
        self.producers.remove(producer_id);
    }

    fn can_consume(&self, router_id: &str, producer_id: &str, rtp_capabilities: &Value) -> bool {
        let Some(router) = self.routers.get(router_id) else {
            return false;
        };
        let Ok(producer_id) = ProducerId::from_str(producer_id) else {
            return false;
        };
        let Ok(rtp_capabilities) =
            serde_json::from_value::<RtpCapabilities>(rtp_capabilities.clone())
        else {
            return false;
        };
        router.can_consume(&producer_id, &rtp_capabilities)
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParams, EngineError> {
        let transport = self
            .transports
            .get(transport_id)
            .map(|t| t.clone())
            .ok_or_else(|| EngineError::UnknownId("transport", transport_id.to_string()))?;

        let producer_id = ProducerId::from_str(producer_id)
            .map_err(|e| EngineError::InvalidParameters("producer id", e.to_string()))?;
        let rtp_capabilities: RtpCapabilities = serde_json::from_value(rtp_capabilities)
            .map_err(|e| EngineError::InvalidParameters("rtp capabilities", e.to_string()))?;

        // Consumers start paused; the client resumes once its side is wired.
        let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = true;

        let consumer = transport
            .consume(options)
            .await
            .map_err(|e| EngineError::Engine(format!("consume: {e}")))?;

        let params = ConsumerParams {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: track_kind(consumer.kind()),
            rtp_parameters: serde_json::to_value(consumer.rtp_parameters()).unwrap_or_default(),
        };

        self.consumers.insert(params.id.clone(), consumer);
        debug!(consumer_id = %params.id, "consumer created");
        Ok(params)
    }

    async fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let consumer = self
            .consumers
            .get(consumer_id)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::UnknownId("consumer", consumer_id.to_string()))?;
        consumer
            .pause()
            .await
            .map_err(|e| EngineError::Engine(format!("pause_consumer: {e}")))
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let consumer = self
            .consumers
            .get(consumer_id)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::UnknownId("consumer", consumer_id.to_string()))?;
        consumer
            .resume()
            .await
            .map_err(|e| EngineError::Engine(format!("resume_consumer: {e}")))
    }

    async fn close_consumer(&self, consumer_id: &str) {
        self.consumers.remove(consumer_id);
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

fn engine_kind(kind: MediaKind) -> mediasoup::prelude::MediaKind {
    match kind {
        MediaKind::Audio => mediasoup::prelude::MediaKind::Audio,
        MediaKind::Video => mediasoup::prelude::MediaKind::Video,
    }
}

fn track_kind(kind: mediasoup::prelude::MediaKind) -> MediaKind {
    match kind {
        mediasoup::prelude::MediaKind::Audio => MediaKind::Audio,
        mediasoup::prelude::MediaKind::Video => MediaKind::Video,
    }
}

/// SFU media codecs: opus audio plus VP8/VP9/H264 video.
fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        // Opus audio
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: Some(111),
            clock_rate: NonZero::new(48000).unwrap(),
            channels: NonZero::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        // VP8 video
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: Some(96),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([(
                "x-google-start-bitrate",
                1000_u32.into(),
            )]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
        // VP9 video
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp9,
            preferred_payload_type: Some(98),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("profile-id", 2_u32.into()),
                ("x-google-start-bitrate", 1000_u32.into()),
            ]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
        // H264 video
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: Some(125),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("level-asymmetry-allowed", 1_u32.into()),
                ("packetization-mode", 1_u32.into()),
                ("profile-level-id", "4d0032".into()),
                ("x-google-start-bitrate", 1000_u32.into()),
            ]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}
