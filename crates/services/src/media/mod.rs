pub mod engine;
pub mod mediasoup;
#[cfg(feature = "mock-engine")]
pub mod mock;
pub mod worker_pool;
