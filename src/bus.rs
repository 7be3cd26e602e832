// THEORY:
// The bus is how results leave the engine. "Latest wins" values (projected
// state, surface, connection flag, diagnostics) travel on `watch` channels so a
// slow consumer only ever sees the newest value and never a backlog. Alerts
// are discrete events and travel on a `broadcast` channel. The history ring is
// shared directly because charts read it as a whole.
//
// The engine owns the `FeedBus`; consumers get cheap, cloneable `FeedReader`s.

use tokio::sync::{broadcast, watch};

use crate::core_modules::alert::Alert;
use crate::core_modules::demux::DemuxStats;
use crate::core_modules::display_surface::SurfaceState;
use crate::core_modules::history::{HistoryRing, HistorySample};
use crate::core_modules::metadata::MetadataFrame;
use crate::core_modules::projector::ProjectedThreatState;

const ALERT_CHANNEL_CAPACITY: usize = 16;

pub struct FeedBus {
    pub(crate) state_tx: watch::Sender<Option<ProjectedThreatState>>,
    pub(crate) metadata_tx: watch::Sender<Option<MetadataFrame>>,
    pub(crate) surface_tx: watch::Sender<SurfaceState>,
    pub(crate) connected_tx: watch::Sender<bool>,
    pub(crate) stats_tx: watch::Sender<DemuxStats>,
    pub(crate) alert_tx: broadcast::Sender<Alert>,
    pub(crate) history: HistoryRing,
}

impl FeedBus {
    pub fn new(history_capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(None);
        let (metadata_tx, _) = watch::channel(None);
        let (surface_tx, _) = watch::channel(SurfaceState::Offline);
        let (connected_tx, _) = watch::channel(false);
        let (stats_tx, _) = watch::channel(DemuxStats::default());
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            state_tx,
            metadata_tx,
            surface_tx,
            connected_tx,
            stats_tx,
            alert_tx,
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn reader(&self) -> FeedReader {
        FeedReader {
            state: self.state_tx.subscribe(),
            metadata: self.metadata_tx.subscribe(),
            surface: self.surface_tx.subscribe(),
            connected: self.connected_tx.subscribe(),
            stats: self.stats_tx.subscribe(),
            alert_tx: self.alert_tx.clone(),
            history: self.history.clone(),
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected_tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    pub(crate) fn set_surface(&self, state: SurfaceState) {
        self.surface_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// Read side of a feed, handed to UI surfaces.
#[derive(Clone)]
pub struct FeedReader {
    state: watch::Receiver<Option<ProjectedThreatState>>,
    metadata: watch::Receiver<Option<MetadataFrame>>,
    surface: watch::Receiver<SurfaceState>,
    connected: watch::Receiver<bool>,
    stats: watch::Receiver<DemuxStats>,
    alert_tx: broadcast::Sender<Alert>,
    history: HistoryRing,
}

impl FeedReader {
    /// Most recent projection, or `None` before the first metadata frame.
    pub fn state(&self) -> Option<ProjectedThreatState> {
        self.state.borrow().clone()
    }

    /// Most recent raw metadata, for signal lists.
    pub fn metadata(&self) -> Option<MetadataFrame> {
        self.metadata.borrow().clone()
    }

    pub fn surface(&self) -> SurfaceState {
        *self.surface.borrow()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats.borrow().clone()
    }

    pub fn history(&self) -> Vec<HistorySample> {
        self.history.snapshot()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<Option<ProjectedThreatState>> {
        self.state.clone()
    }

    pub fn watch_surface(&self) -> watch::Receiver<SurfaceState> {
        self.surface.clone()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn watch_stats(&self) -> watch::Receiver<DemuxStats> {
        self.stats.clone()
    }
}
