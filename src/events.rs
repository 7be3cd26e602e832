// THEORY:
// Historical event records as returned by the backend's event listing, and
// the dashboard counters derived from them. Records share the threat-level
// vocabulary with the live stream, so an unknown level in a listing is kept
// verbatim just as it is on the socket.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_modules::metadata::ThreatLevel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalStat {
    pub mean: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTransition {
    pub timestamp: f64,
    pub rel_time: f64,
    pub from: ThreatLevel,
    pub to: ThreatLevel,
}

/// One recorded clip and its threat summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub clip_id: Option<String>,
    /// Unix seconds at which recording started.
    pub timestamp: f64,
    /// Clip length in seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub trigger_level: Option<ThreatLevel>,
    #[serde(default)]
    pub final_level: Option<ThreatLevel>,
    #[serde(default)]
    pub max_intent: f64,
    #[serde(default)]
    pub mean_intent: f64,
    #[serde(default)]
    pub weapon_detected: bool,
    #[serde(default)]
    pub transitions: Vec<LevelTransition>,
    #[serde(default)]
    pub signals_stats: BTreeMap<String, SignalStat>,
    /// Path relative to the API base, e.g. `/videos/event_x.mp4`.
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub meta_filename: Option<String>,
}

impl EventRecord {
    /// Final level when known, otherwise the level that triggered recording.
    pub fn level(&self) -> Option<&ThreatLevel> {
        self.final_level.as_ref().or(self.trigger_level.as_ref())
    }

    fn reached(&self, level: &ThreatLevel) -> bool {
        self.final_level.as_ref() == Some(level) || self.trigger_level.as_ref() == Some(level)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis((self.timestamp * 1000.0) as i64)
    }

    /// First eight characters of the clip id, for compact listings.
    pub fn short_id(&self) -> Option<&str> {
        self.clip_id
            .as_deref()
            .map(|id| id.char_indices().nth(8).map_or(id, |(cut, _)| &id[..cut]))
    }

    pub fn video_href(&self, api_base: &str) -> Option<String> {
        self.video_url
            .as_ref()
            .map(|path| format!("{}{}", api_base.trim_end_matches('/'), path))
    }
}

/// Dashboard counters over an event listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EventSummary {
    pub total_visits: usize,
    pub threats: usize,
    pub suspicious: usize,
}

impl EventSummary {
    pub fn from_events(events: &[EventRecord]) -> Self {
        Self {
            total_visits: events.len(),
            threats: events.iter().filter(|e| e.reached(&ThreatLevel::Threat)).count(),
            suspicious: events.iter().filter(|e| e.reached(&ThreatLevel::Suspicious)).count(),
        }
    }
}

/// The newest `n` events; the listing already arrives newest first.
pub fn recent(events: &[EventRecord], n: usize) -> &[EventRecord] {
    &events[..n.min(events.len())]
}
