// THEORY:
// The leaf stages of the feed. Each one is synchronous and knows nothing about
// sockets or tasks; `pipeline` strings them together.

pub mod alert;
pub mod demux;
pub mod display_surface;
pub mod history;
pub mod metadata;
pub mod projector;
