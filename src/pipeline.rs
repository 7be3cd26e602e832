// THEORY:
// The `pipeline` module is the top-level API of the feed. It wires the leaf
// modules into one event-driven engine and gives consumers a single mount
// point for it.
//
// 1.  **One queue, one consumer**: every transport callback (opened, message,
//     closed, errored) arrives as an `Envelope` on a single queue and is handled
//     to completion by `StreamEngine::handle` before the next one. No stage
//     runs in parallel with another, so arrival order is processing order.
// 2.  **Routing**: binary messages go to the frame tracker (swap and release),
//     text messages are projected, gated for alerts and appended to history.
//     Image and metadata frames are never paired; the newest of each wins.
// 3.  **Staleness**: a message from a session that has been told to close, or
//     from a session other than the active one, is counted and ignored.
// 4.  **Freeze, don't reset**: when the transport goes away the surface drops
//     to its offline presentation and the connection flag goes false, while
//     the projected state and history keep their last values.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{FeedBus, FeedReader};
use crate::config::FeedConfig;
use crate::core_modules::alert::{Alert, AlertDebouncer, Clock, SystemClock};
use crate::core_modules::demux::{Classified, DemuxStats, classify};
use crate::core_modules::display_surface::{FrameDecoder, FrameTracker, HeaderProbe};
use crate::core_modules::history::HistorySample;
use crate::core_modules::metadata::MetadataFrame;
use crate::core_modules::projector::project_with;
use crate::session::{Envelope, SessionEvent, SessionHandle, SessionId, SessionStatus};

pub use crate::core_modules::projector::{ColorTier, ProjectedThreatState};

/// The ingestion and analytics state engine.
pub struct StreamEngine<D: FrameDecoder, C: Clock> {
    tracker: FrameTracker<D>,
    debouncer: AlertDebouncer,
    clock: C,
    weapon_threshold: f64,
    bus: FeedBus,
    stats: DemuxStats,
    active: Option<SessionId>,
}

impl<D: FrameDecoder, C: Clock> StreamEngine<D, C> {
    pub fn new(config: &FeedConfig, decoder: D, clock: C) -> Self {
        Self {
            tracker: FrameTracker::new(decoder),
            debouncer: AlertDebouncer::new(config.alert_threshold, config.alert_cooldown),
            clock,
            weapon_threshold: config.weapon_threshold,
            bus: FeedBus::new(config.history_capacity),
            stats: DemuxStats::default(),
            active: None,
        }
    }

    pub fn reader(&self) -> FeedReader {
        self.bus.reader()
    }

    pub fn tracker(&self) -> &FrameTracker<D> {
        &self.tracker
    }

    /// Handles one queued event to completion.
    pub fn handle(&mut self, envelope: Envelope) {
        let Envelope {
            session,
            liveness,
            event,
        } = envelope;

        match event {
            SessionEvent::Opened => {
                if liveness.is_closed() {
                    self.mark_stale();
                    return;
                }
                self.active = Some(session);
                self.bus.set_connected(true);
                debug!(session = %session, "engine attached to session");
            }
            SessionEvent::Message(message) => {
                if liveness.is_closed() || self.active != Some(session) {
                    self.mark_stale();
                    return;
                }
                let classified = classify(message);
                self.stats.record(&classified);
                match classified {
                    Classified::Image(frame) => match self.tracker.submit(&frame) {
                        Ok(surface) => self.bus.set_surface(surface),
                        Err(err) => {
                            self.stats.decode_failures += 1;
                            debug!(error = %err, bytes = frame.len(), "dropping undecodable image frame");
                        }
                    },
                    Classified::Metadata(meta) => self.apply_metadata(meta),
                    Classified::Unparseable { .. } => {}
                }
                self.publish_stats();
            }
            SessionEvent::Closed => self.detach(session, None),
            SessionEvent::Errored(reason) => self.detach(session, Some(reason)),
        }
    }

    /// Transport gone: offline surface, frozen projections.
    fn detach(&mut self, session: SessionId, error: Option<String>) {
        if self.active.is_some_and(|active| active != session) {
            self.mark_stale();
            return;
        }
        self.active = None;
        self.bus.set_connected(false);
        let surface = self.tracker.go_offline();
        self.bus.set_surface(surface);
        match error {
            Some(reason) => debug!(session = %session, %reason, "engine detached after transport error"),
            None => debug!(session = %session, "engine detached"),
        }
    }

    fn apply_metadata(&mut self, meta: MetadataFrame) {
        let projected = project_with(&meta, self.weapon_threshold);
        let now = self.clock.now_millis();

        if self.debouncer.should_fire(meta.intent_score, now) {
            let alert = Alert {
                intent_score: meta.intent_score,
                level: meta.threat_level.clone(),
                at: now,
            };
            warn!(
                intent = meta.intent_score,
                level = %alert.level,
                percent = alert.percent(),
                "high intent alert"
            );
            let _ = self.bus.alert_tx.send(alert);
        }

        self.bus.history.append(HistorySample::from_frame(&meta, now));
        self.bus.state_tx.send_replace(Some(projected));
        self.bus.metadata_tx.send_replace(Some(meta));
    }

    fn mark_stale(&mut self) {
        self.stats.stale += 1;
        self.publish_stats();
    }

    fn publish_stats(&self) {
        self.bus.stats_tx.send_replace(self.stats.clone());
    }

    /// Drains the queue until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = events.recv().await {
            self.handle(envelope);
        }
        debug!("stream engine queue drained");
    }
}

/// A mounted live view: one engine and exactly one session.
pub struct LiveFeed {
    session: SessionHandle,
    reader: FeedReader,
    engine: JoinHandle<()>,
}

impl LiveFeed {
    /// Mounts with the header-probing decoder and the system clock.
    pub fn mount(config: &FeedConfig) -> Self {
        Self::mount_with(config, HeaderProbe, SystemClock)
    }

    pub fn mount_with<D, C>(config: &FeedConfig, decoder: D, clock: C) -> Self
    where
        D: FrameDecoder + 'static,
        C: Clock + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = StreamEngine::new(config, decoder, clock);
        let reader = engine.reader();
        let engine = tokio::spawn(engine.run(events_rx));
        let session = SessionHandle::open(config.stream_url.clone(), config.reconnect, events_tx);
        info!(session = %session.id(), "live feed mounted");
        Self {
            session,
            reader,
            engine,
        }
    }

    pub fn reader(&self) -> FeedReader {
        self.reader.clone()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Closes the session and waits for the engine to drain what is queued.
    pub async fn unmount(self) {
        let Self {
            mut session,
            engine,
            ..
        } = self;
        let id = session.id();
        session.close();
        session.join().await;
        drop(session);
        if let Err(err) = engine.await {
            warn!(error = %err, "stream engine ended abnormally");
        }
        info!(session = %id, "live feed unmounted");
    }
}
