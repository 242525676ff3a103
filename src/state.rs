use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::engine::Engine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        // No overall request timeout: generation streams are open-ended and
        // each backend adapter sets its own per-request timeout.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let engine = Engine::from_config(&config, http_client)?;
        Ok(Self::with_engine(config, engine))
    }

    /// State around an already assembled engine.
    pub fn with_engine(config: Config, engine: Engine) -> Self {
        let permits = config.chat_max_concurrent.max(1);
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }
}
