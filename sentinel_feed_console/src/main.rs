//! Sentinel Feed Console
//!
//! Headless viewer for the threat stream: mounts one live feed, logs the
//! projected threat state, raises alerts in the log and drives the backend's
//! control endpoints.
//!
//! ## Usage
//!
//! ```bash
//! # Watch the default stream (ws://localhost:8000/ws)
//! sentinel_feed_console
//!
//! # Switch the backend to a test clip, then watch
//! sentinel_feed_console --simulate shoplifting_01.mp4
//!
//! # One-shot commands
//! sentinel_feed_console --list-videos
//! sentinel_feed_console --events 5
//! sentinel_feed_console --feedback <clip_id> inaccurate
//!
//! # Point at another backend, reconnect every 2 s
//! SENTINEL_STREAM_URL=ws://cam-host:8000/ws SENTINEL_API_BASE=http://cam-host:8000 \
//!   SENTINEL_RECONNECT=fixed:2000 sentinel_feed_console
//!
//! # With verbose logging
//! RUST_LOG=sentinel_feed=debug sentinel_feed_console
//! ```

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, interval};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentinel_feed::control::{ControlClient, FeedbackType, spawn_detached};
use sentinel_feed::core_modules::projector::signal_readings;
use sentinel_feed::events::recent;
use sentinel_feed::{EventSummary, FeedConfig, FeedReader, LiveFeed, SurfaceState};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_EVENT_COUNT: usize = 10;
const DEFAULT_LOG_FILTER: &str = "sentinel_feed=info,sentinel_feed_console=info";

/// What to do before (or instead of) watching the stream.
enum Command {
    Watch,
    Live,
    Simulate(String),
    StopSimulation,
    ListVideos,
    Events(usize),
    Feedback { clip_id: String, feedback: FeedbackType },
}

impl Command {
    fn from_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let value_after = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        if args.iter().any(|arg| arg == "--list-videos") {
            return Ok(Self::ListVideos);
        }
        if args.iter().any(|arg| arg == "--events") {
            let count = match value_after("--events") {
                Some(n) => n.parse().context("--events expects a number")?,
                None => DEFAULT_EVENT_COUNT,
            };
            return Ok(Self::Events(count));
        }
        if let Some(i) = args.iter().position(|arg| arg == "--feedback") {
            let (Some(clip_id), Some(kind)) = (args.get(i + 1), args.get(i + 2)) else {
                bail!("usage: --feedback <clip_id> <accurate|inaccurate>");
            };
            let feedback = kind.parse::<FeedbackType>().map_err(anyhow::Error::msg)?;
            return Ok(Self::Feedback {
                clip_id: clip_id.clone(),
                feedback,
            });
        }
        if args.iter().any(|arg| arg == "--simulate") {
            let file = value_after("--simulate").context("--simulate expects a filename")?;
            return Ok(Self::Simulate(file));
        }
        if args.iter().any(|arg| arg == "--stop-simulation") {
            return Ok(Self::StopSimulation);
        }
        if args.iter().any(|arg| arg == "--live") {
            return Ok(Self::Live);
        }
        Ok(Self::Watch)
    }
}

/// `RUST_LOG` when it is set and valid, otherwise info for this workspace.
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .init();

    let config = FeedConfig::from_env().context("invalid SENTINEL_* configuration")?;
    let command = Command::from_args()?;
    let control = ControlClient::new(config.api_base.clone()).context("failed to build HTTP client")?;

    match command {
        Command::ListVideos => {
            let videos = control.list_videos().await.context("failed to list videos")?;
            if videos.is_empty() {
                info!("no test videos available");
            }
            for video in videos {
                info!("  {video}");
            }
            return Ok(());
        }
        Command::Events(count) => {
            let events = control.list_events().await.context("failed to list events")?;
            let summary = EventSummary::from_events(&events);
            info!(
                total_visits = summary.total_visits,
                threats = summary.threats,
                suspicious = summary.suspicious,
                "event summary"
            );
            for event in recent(&events, count) {
                let started = event
                    .started_at()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "?".into());
                let level = event.level().map(|l| l.as_str()).unwrap_or("UNKNOWN");
                info!(
                    "  {} [{}] {} peak={:.2} weapon={} {}",
                    event.short_id().unwrap_or("--------"),
                    level,
                    started,
                    event.max_intent,
                    event.weapon_detected,
                    event.video_href(&config.api_base).unwrap_or_default(),
                );
            }
            return Ok(());
        }
        Command::Feedback { clip_id, feedback } => {
            let report = control
                .submit_feedback(&clip_id, feedback)
                .await
                .context("failed to submit feedback")?;
            info!(clip_id, conclusion = %report.conclusion, "feedback recorded");
            return Ok(());
        }
        // Source switches never hold up the stream.
        Command::Live => {
            let client = control.clone();
            spawn_detached("start live", async move { client.start_live().await });
        }
        Command::Simulate(file) => {
            let client = control.clone();
            spawn_detached("start simulation", async move { client.start_simulation(&file).await });
        }
        Command::StopSimulation => {
            let client = control.clone();
            spawn_detached("stop simulation", async move { client.stop_simulation().await });
        }
        Command::Watch => {}
    }

    info!(url = %config.stream_url, "Sentinel feed console starting");
    let feed = LiveFeed::mount(&config);
    let reader = feed.reader();
    let mut alerts = reader.subscribe_alerts();
    let mut ticker = interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, unmounting feed");
                break;
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => warn!("HIGH INTENT ALERT: {} ({}%)", alert.level, alert.percent()),
                Err(RecvError::Lagged(missed)) => warn!(missed, "alert receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => log_status(&reader, &feed),
        }
    }

    feed.unmount().await;
    Ok(())
}

fn log_status(reader: &FeedReader, feed: &LiveFeed) {
    let surface = match reader.surface() {
        SurfaceState::Offline => "offline".to_string(),
        SurfaceState::Showing { width, height, .. } => format!("{width}x{height}"),
    };
    let stats = reader.stats();
    info!(
        status = ?feed.status(),
        connected = reader.is_connected(),
        surface = %surface,
        images = stats.image_frames,
        metadata = stats.metadata_frames,
        unparseable = stats.unparseable,
        stale = stats.stale,
        "feed status"
    );

    let Some(state) = reader.state() else {
        info!("waiting for threat metadata");
        return;
    };
    let history = reader.history();
    let last_sample = history.last().map(|sample| sample.time_label()).unwrap_or_default();
    info!(
        "  threat={} intent={:.0}% tier={:?} gauge={:?} weapon={} history={} last={}",
        state.level,
        state.display_intent() * 100.0,
        state.color_tier,
        state.gauge_tier(),
        state.weapon_detected,
        history.len(),
        last_sample,
    );
    if let Some(meta) = reader.metadata() {
        for reading in signal_readings(&meta) {
            info!("    {:<24} {:>8.3} {:?}", reading.label, reading.value, reading.emphasis);
        }
    }
}
