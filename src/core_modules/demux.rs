// THEORY:
// The stream interleaves two kinds of payload on one socket with no framing of
// its own: binary messages are rendered frames, text messages are metadata.
// The demultiplexer is the single place that decides which is which. It is
// forgiving: a text message that does not decode is reported as
// `Unparseable` and counted, never turned into an error, so one bad metadata
// frame cannot stall image delivery.

use bytes::Bytes;
use tracing::debug;

use crate::core_modules::metadata::MetadataFrame;

/// A transport message after control frames (ping, pong, close) are stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Binary(Bytes),
    Text(String),
}

/// An encoded image as it arrived from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub data: Bytes,
}

impl ImageFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Image(ImageFrame),
    Metadata(MetadataFrame),
    Unparseable { reason: String },
}

pub fn classify(message: InboundMessage) -> Classified {
    match message {
        InboundMessage::Binary(data) => Classified::Image(ImageFrame { data }),
        InboundMessage::Text(text) => match MetadataFrame::from_json(&text) {
            Ok(meta) => Classified::Metadata(meta),
            Err(err) => {
                debug!(error = %err, len = text.len(), "dropping unparseable metadata message");
                Classified::Unparseable {
                    reason: err.to_string(),
                }
            }
        },
    }
}

/// Diagnostic counters kept by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxStats {
    pub image_frames: u64,
    pub metadata_frames: u64,
    pub unparseable: u64,
    /// Image frames that arrived but could not be decoded for display.
    pub decode_failures: u64,
    /// Messages that arrived from a session already told to close.
    pub stale: u64,
    pub last_unparseable: Option<String>,
}

impl DemuxStats {
    pub fn record(&mut self, classified: &Classified) {
        match classified {
            Classified::Image(_) => self.image_frames += 1,
            Classified::Metadata(_) => self.metadata_frames += 1,
            Classified::Unparseable { reason } => {
                self.unparseable += 1;
                self.last_unparseable = Some(reason.clone());
            }
        }
    }
}
