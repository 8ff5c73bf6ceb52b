//! Client configuration

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:3777";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Path of the realtime endpoint on the service origin.
pub const REALTIME_PATH: &str = "/realtime";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service origin, e.g. `http://localhost:3777`. No trailing slash.
    pub api_url: String,
    /// Quiet window for non-first knock intents.
    pub debounce: Duration,
    /// Cosmetic delay between a knock completing and the in-flight flag clearing.
    pub settle: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl ClientConfig {
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// WebSocket URL of the realtime channel, derived from the API origin.
    pub fn realtime_url(&self) -> String {
        let base = if let Some(rest) = self.api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.api_url.clone()
        };
        format!("{base}{REALTIME_PATH}")
    }
}
