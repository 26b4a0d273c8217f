use mediasoup::worker::{Worker, WorkerSettings};
use mediasoup::worker_manager::WorkerManager;
use roomcast_config::MediasoupSettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{error, info};

use super::engine::EngineEvent;

/// Pool of mediasoup workers with round-robin selection.
pub struct WorkerPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawns the worker processes. Called once at boot; failure is fatal.
    pub async fn new(
        settings: &MediasoupSettings,
        events: broadcast::Sender<EngineEvent>,
    ) -> anyhow::Result<Self> {
        let worker_manager = WorkerManager::new();
        let mut workers = Vec::with_capacity(settings.num_workers as usize);

        for i in 0..settings.num_workers {
            let mut worker_settings = WorkerSettings::default();
            worker_settings.rtc_port_range = settings.rtc_min_port..=settings.rtc_max_port;

            let worker = worker_manager
                .create_worker(worker_settings)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create mediasoup worker {}: {}", i, e))?;

            let worker_id = worker.id();
            let events = events.clone();
            worker
                .on_dead(move |reason| {
                    error!(?reason, %worker_id, "mediasoup worker died");
                    let _ = events.send(EngineEvent::WorkerDied);
                })
                .detach();

            info!(worker_id = %worker.id(), "mediasoup worker {} created", i);
            workers.push(worker);
        }

        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next worker using round-robin selection.
    pub fn get_worker(&self) -> &Worker {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[idx]
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
