// THEORY:
// Every tunable of the feed lives in one `FeedConfig`. Defaults describe a
// local backend on port 8000, a 100-point chart, alerts above 0.7 at most
// every 5 s and no reconnection.
//
// Overrides come from `SENTINEL_*` environment variables. Parsing is written
// against a lookup closure rather than `std::env` directly so that tests can
// feed a plain map and never mutate the process environment.

use std::time::Duration;

use crate::error::{FeedError, Result};

pub const DEFAULT_STREAM_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.7;
pub const DEFAULT_ALERT_COOLDOWN_MS: u64 = 5000;
pub const DEFAULT_WEAPON_THRESHOLD: f64 = 0.6;

/// What the session does after the transport drops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay offline until the feed is remounted.
    #[default]
    Disabled,
    /// Wait `delay` and try again, at most `max_attempts` times in a row
    /// (forever when `None`). A successful handshake resets the count.
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Whether another attempt is allowed after `failures` consecutive drops.
    pub fn allows(&self, failures: u32) -> bool {
        match self {
            Self::Disabled => false,
            Self::Fixed { max_attempts, .. } => max_attempts.is_none_or(|max| failures <= max),
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Fixed { delay, .. } => Some(*delay),
        }
    }

    /// Parses `off` or `fixed:<delay_ms>[:<max_attempts>]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("disabled") {
            return Ok(Self::Disabled);
        }
        let mut parts = raw.split(':');
        match parts.next() {
            Some(kind) if kind.eq_ignore_ascii_case("fixed") => {}
            _ => {
                return Err(FeedError::config(
                    "SENTINEL_RECONNECT",
                    format!("expected `off` or `fixed:<delay_ms>[:<max>]`, got `{raw}`"),
                ));
            }
        }
        let delay_ms = parts
            .next()
            .ok_or_else(|| FeedError::config("SENTINEL_RECONNECT", "missing delay"))?
            .parse::<u64>()
            .map_err(|e| FeedError::config("SENTINEL_RECONNECT", e.to_string()))?;
        let max_attempts = parts
            .next()
            .map(|m| {
                m.parse::<u32>()
                    .map_err(|e| FeedError::config("SENTINEL_RECONNECT", e.to_string()))
            })
            .transpose()?;
        if parts.next().is_some() {
            return Err(FeedError::config("SENTINEL_RECONNECT", "too many fields"));
        }
        Ok(Self::Fixed {
            delay: Duration::from_millis(delay_ms),
            max_attempts,
        })
    }
}

/// Configuration for a live feed and its collaborators.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint that streams frames and metadata.
    pub stream_url: String,
    /// Base URL of the REST collaborators (control, feedback, events).
    pub api_base: String,
    /// Maximum number of samples kept for charting.
    pub history_capacity: usize,
    /// Intent score that must be exceeded for an alert.
    pub alert_threshold: f64,
    /// Minimum gap between two alerts.
    pub alert_cooldown: Duration,
    /// `weapon_score` above which a weapon is flagged.
    pub weapon_threshold: f64,
    pub reconnect: ReconnectPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            alert_cooldown: Duration::from_millis(DEFAULT_ALERT_COOLDOWN_MS),
            weapon_threshold: DEFAULT_WEAPON_THRESHOLD,
            reconnect: ReconnectPolicy::Disabled,
        }
    }
}

impl FeedConfig {
    /// Defaults overridden by `SENTINEL_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("SENTINEL_STREAM_URL") {
            let url = url.trim().to_string();
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(FeedError::config(
                    "SENTINEL_STREAM_URL",
                    format!("expected a ws:// or wss:// URL, got `{url}`"),
                ));
            }
            cfg.stream_url = url;
        }
        if let Some(base) = get("SENTINEL_API_BASE") {
            cfg.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(raw) = get("SENTINEL_HISTORY_CAPACITY") {
            let capacity = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| FeedError::config("SENTINEL_HISTORY_CAPACITY", e.to_string()))?;
            if capacity == 0 {
                return Err(FeedError::config("SENTINEL_HISTORY_CAPACITY", "must be at least 1"));
            }
            cfg.history_capacity = capacity;
        }
        if let Some(raw) = get("SENTINEL_ALERT_THRESHOLD") {
            cfg.alert_threshold = parse_unit_interval("SENTINEL_ALERT_THRESHOLD", &raw)?;
        }
        if let Some(raw) = get("SENTINEL_ALERT_COOLDOWN_MS") {
            let ms = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| FeedError::config("SENTINEL_ALERT_COOLDOWN_MS", e.to_string()))?;
            cfg.alert_cooldown = Duration::from_millis(ms);
        }
        if let Some(raw) = get("SENTINEL_WEAPON_THRESHOLD") {
            cfg.weapon_threshold = parse_unit_interval("SENTINEL_WEAPON_THRESHOLD", &raw)?;
        }
        if let Some(raw) = get("SENTINEL_RECONNECT") {
            cfg.reconnect = ReconnectPolicy::parse(&raw)?;
        }
        Ok(cfg)
    }
}

fn parse_unit_interval(key: &'static str, raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| FeedError::config(key, e.to_string()))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(FeedError::config(key, format!("{value} is outside 0.0..=1.0")));
    }
    Ok(value)
}
