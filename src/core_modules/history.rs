// THEORY:
// The history ring is what the analytics chart draws: one sample per metadata
// frame, oldest first, capped at a fixed capacity. It is the only structure in
// the feed that is written by the stream handler while being read by someone
// else (a chart renderer on another task), so the whole ring sits behind a
// lock and every sample is built completely before it is pushed. A reader's
// `snapshot()` is a clone taken under the read lock: it can be one append
// behind, never half an append.
//
// The ring is never the source of truth for "now". The latest state lives in
// the projected threat state; the ring is for looking back.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

use crate::core_modules::metadata::MetadataFrame;

/// One chart point derived from a metadata frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySample {
    /// Capture time in milliseconds since the Unix epoch.
    pub time: u64,
    /// Raw intent score, never clamped.
    pub intent: f64,
    /// 1.0 for THREAT, 0.5 for SUSPICIOUS, 0.0 otherwise.
    pub threat: f64,
    #[serde(flatten)]
    pub signals: BTreeMap<String, f64>,
}

impl HistorySample {
    pub fn from_frame(meta: &MetadataFrame, time: u64) -> Self {
        Self {
            time,
            intent: meta.intent_score,
            threat: meta.threat_level.chart_tier(),
            signals: meta.signals.clone(),
        }
    }

    /// Local wall-clock label for the chart's x axis.
    pub fn time_label(&self) -> String {
        let Ok(millis) = i64::try_from(self.time) else {
            return String::new();
        };
        Local
            .timestamp_millis_opt(millis)
            .single()
            .map(|t: DateTime<Local>| t.format("%H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

/// Bounded, arrival-ordered sample history. Cloning shares the same ring.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    inner: Arc<RwLock<VecDeque<HistorySample>>>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn append(&self, sample: HistorySample) {
        let mut ring = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        ring.push_back(sample);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    /// Copy of the ring, oldest sample first.
    pub fn snapshot(&self) -> Vec<HistorySample> {
        let ring = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        ring.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<HistorySample> {
        let ring = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        ring.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
