use roomcast_config::Settings;
use roomcast_services::media::engine::MediaEngine;
use roomcast_services::media::mediasoup::MediasoupEngine;
use roomcast_services::signaling::service::VideoRoomService;
use std::sync::Arc;

use crate::ws::storage::WsStorage;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub service: Arc<VideoRoomService>,
    pub ws_storage: Arc<WsStorage>,
}

impl AppState {
    /// Boots the mediasoup engine (spawns the worker pool) and assembles
    /// the signaling state. Worker spawn failure is fatal.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let engine = Arc::new(MediasoupEngine::new(&settings.mediasoup).await?);
        Ok(Self::with_engine(settings, engine))
    }

    /// Assembles the state around an already-built engine; used by tests
    /// to substitute an in-memory engine.
    pub fn with_engine(settings: Settings, engine: Arc<dyn MediaEngine>) -> Self {
        let service = Arc::new(VideoRoomService::new(engine, &settings.signaling));
        Self {
            settings,
            service,
            ws_storage: Arc::new(WsStorage::new()),
        }
    }
}
