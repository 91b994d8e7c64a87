//! Endpoint and credential configuration.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Header carrying the subscription key on the WebSocket upgrade request.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Audio format requested when none is configured.
pub const DEFAULT_OUTPUT_FORMAT: &str = "audio-24khz-96kbitrate-mono-mp3";

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const REGION_HOST_SUFFIX: &str = "tts.speech.microsoft.com";
const WEBSOCKET_PATH: &str = "/cognitiveservices/websocket/v1";

/// Where and how to connect for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerConfig {
    /// WebSocket endpoint URL. Empty means not configured.
    pub endpoint: String,
    /// Subscription key. Empty means no key header is sent.
    pub subscription_key: String,
    /// Output audio format name sent in `speech.config`.
    pub output_format: String,
    /// Limit on establishing the connection (proxy, TLS and upgrade).
    pub connect_timeout: Duration,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            subscription_key: String::new(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SynthesizerConfig {
    /// Targets the regional endpoint with key-based auth.
    pub fn subscription(key: impl Into<String>, region: &str) -> Self {
        Self {
            endpoint: region_endpoint(region),
            subscription_key: key.into(),
            ..Self::default()
        }
    }

    /// Targets an explicit WebSocket URL.
    pub fn websocket(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            endpoint: url.into(),
            subscription_key: key.into(),
            ..Self::default()
        }
    }

    /// Reads `SPEECH_KEY` plus `SPEECH_WEBSOCKET_URL` or `SPEECH_REGION`.
    ///
    /// Returns `None` when the key or both target variables are missing.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("SPEECH_KEY").ok().filter(|k| !k.is_empty())?;
        if let Some(url) = std::env::var("SPEECH_WEBSOCKET_URL").ok().filter(|u| !u.is_empty()) {
            return Some(Self::websocket(key, url));
        }
        let region = std::env::var("SPEECH_REGION").ok().filter(|r| !r.is_empty())?;
        Some(Self::subscription(key, &region))
    }

    /// Sets the output format.
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// True once an endpoint has been set.
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Parses the endpoint, checking it is a WebSocket URL.
    pub fn endpoint_url(&self) -> Result<Url, Error> {
        if !self.is_configured() {
            return Err(Error::NotConfigured);
        }
        let url = Url::parse(self.endpoint.trim())?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::ConnectionFailed(format!(
                "unsupported endpoint scheme '{other}'"
            ))),
        }
    }
}

fn region_endpoint(region: &str) -> String {
    format!("wss://{}.{REGION_HOST_SUFFIX}{WEBSOCKET_PATH}", region.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_endpoint() {
        let config = SynthesizerConfig::subscription("key", "westeurope");
        assert_eq!(
            config.endpoint,
            "wss://westeurope.tts.speech.microsoft.com/cognitiveservices/websocket/v1"
        );
        assert_eq!(config.subscription_key, "key");
        assert_eq!(config.output_format, DEFAULT_OUTPUT_FORMAT);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(
            config.endpoint_url().unwrap().host_str(),
            Some("westeurope.tts.speech.microsoft.com")
        );
    }

    #[test]
    fn test_default_is_unconfigured() {
        let config = SynthesizerConfig::default();
        assert!(!config.is_configured());
        assert!(matches!(config.endpoint_url(), Err(Error::NotConfigured)));
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let config = SynthesizerConfig::websocket("", "https://example.com/tts");
        assert!(matches!(config.endpoint_url(), Err(Error::ConnectionFailed(_))));
        let config = SynthesizerConfig::websocket("", "not a url");
        assert!(matches!(config.endpoint_url(), Err(Error::Url(_))));
    }

    #[test]
    fn test_builders() {
        let config = SynthesizerConfig::websocket("", "ws://127.0.0.1:9000/")
            .with_output_format("raw-16khz-16bit-mono-pcm")
            .with_connect_timeout(Duration::from_millis(500));
        assert_eq!(config.output_format, "raw-16khz-16bit-mono-pcm");
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert!(config.is_configured());
    }
}
