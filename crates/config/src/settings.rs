use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub mediasoup: MediasoupSettings,
    pub signaling: SignalingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediasoupSettings {
    pub num_workers: u32,
    /// Local IP the workers bind ICE candidates to.
    pub listen_ip: String,
    /// Public IP advertised in ICE candidates. Empty means "announce the
    /// listen IP"; set via ROOMCAST__MEDIASOUP__ANNOUNCED_IP in production.
    pub announced_ip: String,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalingSettings {
    /// Deadline for each media-engine call made on behalf of a client event.
    pub request_timeout_secs: u64,
    /// How long to keep serving after a fatal worker death before exiting.
    pub fatal_grace_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("ROOMCAST"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("mediasoup.num_workers", 2)?
            .set_default("mediasoup.listen_ip", "0.0.0.0")?
            .set_default("mediasoup.announced_ip", "")?
            .set_default("mediasoup.rtc_min_port", 10000)?
            .set_default("mediasoup.rtc_max_port", 10100)?
            .set_default("signaling.request_timeout_secs", 10)?
            .set_default("signaling.fatal_grace_secs", 3)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
