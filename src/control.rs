// THEORY:
// The control client talks to the backend's plain request/response endpoints:
// switching the camera source, driving test simulations, submitting feedback on
// recorded events and listing them. None of this is part of the stream core.
// The core never waits on these calls; callers that must not block frame
// processing use `spawn_detached`, which runs a request on its own task and
// only logs the outcome.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::EventRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Accurate,
    Inaccurate,
}

impl std::str::FromStr for FeedbackType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accurate" => Ok(Self::Accurate),
            "inaccurate" => Ok(Self::Inaccurate),
            other => Err(format!("unknown feedback type `{other}`")),
        }
    }
}

/// The backend's reply to a feedback submission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedbackReport {
    #[serde(default)]
    pub conclusion: String,
}

#[derive(Serialize)]
struct StartSimulation<'a> {
    filename: &'a str,
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    event_id: &'a str,
    feedback_type: FeedbackType,
}

#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    api_base: String,
}

impl ControlClient {
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Names of the clips available for simulation.
    pub async fn list_videos(&self) -> Result<Vec<String>> {
        let videos = self
            .http
            .get(self.url("/api/test/videos"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(videos)
    }

    pub async fn start_simulation(&self, filename: &str) -> Result<()> {
        self.http
            .post(self.url("/api/test/start"))
            .json(&StartSimulation { filename })
            .send()
            .await?
            .error_for_status()?;
        debug!(filename, "simulation started");
        Ok(())
    }

    pub async fn stop_simulation(&self) -> Result<()> {
        self.http
            .post(self.url("/api/test/stop"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Switches the backend back to the live camera.
    pub async fn start_live(&self) -> Result<()> {
        self.http
            .post(self.url("/api/live/start"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn submit_feedback(&self, clip_id: &str, feedback: FeedbackType) -> Result<FeedbackReport> {
        let report = self
            .http
            .post(self.url("/api/feedback"))
            .json(&FeedbackRequest {
                event_id: clip_id,
                feedback_type: feedback,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(report)
    }

    /// Recorded events, newest first.
    pub async fn list_events(&self) -> Result<Vec<EventRecord>> {
        let events = self
            .http
            .get(self.url("/api/events"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(events)
    }
}

/// Runs a control request on its own task; failures are logged, not returned.
pub fn spawn_detached<F>(what: &'static str, request: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = request.await {
            warn!(request = what, error = %err, "control request failed");
        }
    })
}
