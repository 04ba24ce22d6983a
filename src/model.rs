use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Module locator for the execution engine binary.
    pub engine_path: PathBuf,
    pub isolation: IsolationMode,
    #[serde(with = "humantime_serde")]
    pub exec_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub spawn_timeout: Duration,
    /// Cap on captured engine output, in bytes.
    pub max_output_bytes: usize,
}

/// Where submitted code actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// Call the engine directly on the runtime.
    InProcess,
    /// Run the engine on a dedicated worker thread.
    Worker,
}

/// Immutable snapshot of the code buffer taken when a run is triggered.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: String,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(code: String) -> Self {
        Self {
            id: gen_request_id(),
            code,
        }
    }
}

/// Generate a random id for an execution request.
fn gen_request_id() -> String {
    use rand::RngCore;
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

/// What the engine reported back for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub timestamp_utc: String,
    /// Guest exit status; zero means success.
    pub status: i32,
    /// Lines the engine emitted while running.
    pub output: Vec<String>,
    pub wall_time_ms: u64,
    #[serde(default)]
    pub truncated: bool,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

/// Current UTC time as an RFC3339 string for stamping outcomes.
pub fn utc_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        request_id: String,
    },
    /// First successful engine load; later runs reuse the handle.
    EngineReady,
    RunCompleted {
        // Box to keep RunEvent size small; RunOutcome carries the full output.
        outcome: Box<RunOutcome>,
    },
    RunFailed {
        request_id: String,
        error: String,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    LoadingEngine { path: PathBuf },
    RunInFlight,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::LoadingEngine { path } => {
                format!("Loading engine module: {}", path.display())
            }
            InfoEvent::RunInFlight => "A run is already in flight".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_snapshots_code() {
        let req = ExecutionRequest::new("print(1)".into());
        assert_eq!(req.code, "print(1)");
        assert!(!req.id.is_empty());
    }

    #[test]
    fn outcome_success_follows_status() {
        let ok = RunOutcome {
            request_id: "1".into(),
            timestamp_utc: utc_timestamp(),
            status: 0,
            output: vec!["1".into()],
            wall_time_ms: 3,
            truncated: false,
        };
        assert!(ok.succeeded());
        let failed = RunOutcome { status: 70, ..ok };
        assert!(!failed.succeeded());
    }
}
