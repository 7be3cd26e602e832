// THEORY:
// High-intent alerts are rate limited by a small stateful gate. The gate only
// answers "would an alert fire now?"; delivering the alert (toast, log line,
// push) is the caller's business. Time always comes in from outside, either
// as an explicit `now` or through a `Clock`, so tests drive it without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::core_modules::metadata::ThreatLevel;

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(millis)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Emitted whenever the debouncer lets a high-intent reading through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub intent_score: f64,
    pub level: ThreatLevel,
    /// Milliseconds since the Unix epoch.
    pub at: u64,
}

impl Alert {
    /// Rounded percentage for a notification body ("87% Threat Probability").
    pub fn percent(&self) -> u32 {
        (self.intent_score.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone)]
pub struct AlertDebouncer {
    threshold: f64,
    cooldown_ms: u64,
    /// `None` until the first alert, so the first qualifying score always fires.
    last_alert: Option<u64>,
}

impl AlertDebouncer {
    pub fn new(threshold: f64, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown_ms: cooldown.as_millis() as u64,
            last_alert: None,
        }
    }

    /// True iff `score` exceeds the threshold and the last alert is more than
    /// one cooldown in the past. Records `now` when it returns true.
    pub fn should_fire(&mut self, score: f64, now: u64) -> bool {
        if !(score > self.threshold) {
            return false;
        }
        let cooled = match self.last_alert {
            None => true,
            Some(last) => now.saturating_sub(last) > self.cooldown_ms,
        };
        if cooled {
            self.last_alert = Some(now);
        }
        cooled
    }

    pub fn last_alert(&self) -> Option<u64> {
        self.last_alert
    }
}

impl Default for AlertDebouncer {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_ALERT_THRESHOLD,
            Duration::from_millis(crate::config::DEFAULT_ALERT_COOLDOWN_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_then_suppresses_then_fires() {
        let mut gate = AlertDebouncer::default();
        let fired: Vec<bool> = [(0.9, 0), (0.9, 2000), (0.9, 6000)]
            .into_iter()
            .map(|(score, t)| gate.should_fire(score, t))
            .collect();
        assert_eq!(fired, vec![true, false, true]);
        assert_eq!(gate.last_alert(), Some(6000));
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut gate = AlertDebouncer::default();
        assert!(!gate.should_fire(0.7, 0));
        assert!(!gate.should_fire(f64::NAN, 0));
        assert!(gate.should_fire(0.71, 0));
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let mut gate = AlertDebouncer::default();
        assert!(gate.should_fire(0.8, 10_000));
        assert!(!gate.should_fire(0.8, 15_000));
        assert!(gate.should_fire(0.8, 15_001));
    }

    #[test]
    fn low_scores_do_not_reset_the_window() {
        let mut gate = AlertDebouncer::default();
        assert!(gate.should_fire(0.95, 1_000));
        assert!(!gate.should_fire(0.1, 9_000));
        assert_eq!(gate.last_alert(), Some(1_000));
        assert!(gate.should_fire(0.95, 9_000));
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::starting_at(100);
        let other = clock.clone();
        other.advance(Duration::from_millis(50));
        assert_eq!(clock.now_millis(), 150);
        clock.set(7);
        assert_eq!(other.now_millis(), 7);
    }

    #[test]
    fn alert_percent_is_clamped() {
        let a = Alert { intent_score: 1.7, level: ThreatLevel::Threat, at: 0 };
        assert_eq!(a.percent(), 100);
        let a = Alert { intent_score: 0.874, level: ThreatLevel::Threat, at: 0 };
        assert_eq!(a.percent(), 87);
    }
}
