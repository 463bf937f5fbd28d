//! # Application State
//!
//! State shared by every request handler. Unlike a typical mutable app state, nothing
//! in here changes after startup: the configuration is fixed once loaded, and the
//! OpenAI client is safe to use from many requests at once. So there are no locks,
//! just an `Arc` around the config and a cheaply cloneable HTTP client.
//!
//! Per-request data (the debug trail) never lives here.

use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::openai::OpenAiClient;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration as loaded at startup. The API key is read from here on every
    /// request, so a missing key fails requests rather than the server.
    pub config: Arc<AppConfig>,

    /// Client for the transcription and chat services
    pub openai: OpenAiClient,

    /// Backoff policy used for both upstream calls
    pub retry: RetryPolicy,

    /// When the server started (for uptime reporting)
    pub start_time: Instant,
}

impl AppState {
    /// Build the state from a loaded configuration.
    ///
    /// Fails only if the HTTP client cannot be constructed (e.g. the TLS backend
    /// cannot initialise).
    pub fn new(config: AppConfig) -> reqwest::Result<Self> {
        let openai = OpenAiClient::new(&config.openai)?;
        let retry = config.retry.to_policy();

        Ok(Self {
            config: Arc::new(config),
            openai,
            retry,
            start_time: Instant::now(),
        })
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn credential_configured(&self) -> bool {
        self.config.openai.credential().is_some()
    }
}
