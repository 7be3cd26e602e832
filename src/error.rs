// THEORY:
// Nothing in here is fatal to a running feed: transport and decode failures
// are recovered inside the engine and surface as status flags or counters.
// Inside a session a transport error is rendered through `FeedError` into the
// `Errored` status reason. The variants are returned directly to the callers
// that do see a `Result` (loading a configuration, decoding a single frame,
// the control client).

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Error, Debug)]
pub enum FeedError {
    /// The WebSocket transport failed to connect or broke mid-stream.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// An image frame could not be decoded into a displayable resource.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] image::ImageError),
    /// A text message was not valid threat metadata.
    #[error("metadata decode error: {0}")]
    Metadata(#[from] serde_json::Error),
    /// A configuration value was missing or malformed.
    #[error("invalid configuration for {key}: {reason}")]
    Config { key: &'static str, reason: String },
    /// A control or event-listing request failed.
    #[cfg(feature = "control")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    pub(crate) fn config(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            key,
            reason: reason.into(),
        }
    }
}
