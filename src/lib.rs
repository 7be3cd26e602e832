// THEORY:
// This file is the entry point for the `sentinel_feed` library crate: the
// real-time ingestion and analytics engine behind a security-camera monitoring
// client.
//
// The public surface is small. A consumer mounts a `LiveFeed` (one owned
// transport session plus one `StreamEngine`), reads results through a
// `FeedReader` and unmounts it when the view goes away. The leaf stages in
// `core_modules` (demultiplexing, frame swapping, projection, alert gating,
// history) are public so they can be driven and tested on their own.
//
// The optional `control` feature adds the HTTP client for the backend's
// simulation, feedback and event-listing endpoints.

pub mod bus;
pub mod config;
#[cfg(feature = "control")]
pub mod control;
pub mod core_modules;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod session;

pub use bus::{FeedBus, FeedReader};
pub use config::{FeedConfig, ReconnectPolicy};
pub use core_modules::alert::{Alert, Clock, ManualClock, SystemClock};
pub use core_modules::display_surface::SurfaceState;
pub use core_modules::history::HistorySample;
pub use core_modules::metadata::{MetadataFrame, ThreatLevel};
pub use error::{FeedError, Result};
pub use events::{EventRecord, EventSummary};
pub use pipeline::{ColorTier, LiveFeed, ProjectedThreatState, StreamEngine};
pub use session::{SessionHandle, SessionId, SessionStatus};
