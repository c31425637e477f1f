use cmon_core::sse::{BackoffConfig, ReconnectBackoff};
use cmon_core::{FlatRun, RunStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const RUNS_FLAT_EMPTY: Duration = Duration::from_millis(1500);
const RUNS_FLAT_ACTIVE: Duration = Duration::from_millis(800);
const RUNS_FLAT_IDLE: Duration = Duration::from_millis(2500);
const RUNS_FLAT_STREAM_SYNC_EMPTY: Duration = Duration::from_millis(1000);
const RUNS_FLAT_STREAM_SYNC_ACTIVE: Duration = Duration::from_millis(810);
const RUNS_FLAT_STREAM_SYNC_IDLE: Duration = Duration::from_millis(3000);
const RUN_FILE_ACTIVE: Duration = Duration::from_millis(2500);
const MESSAGE_FALLBACK: Duration = Duration::from_millis(3000);
pub const PROJECT_STATS_REFETCH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Error,
    Disabled,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
            ConnectionState::Disabled => "disabled",
        }
    }

    /// Open or about to be; pushes are expected to arrive.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "connecting" => Ok(ConnectionState::Connecting),
            "open" => Ok(ConnectionState::Open),
            "reconnecting" => Ok(ConnectionState::Reconnecting),
            "error" => Ok(ConnectionState::Error),
            "disabled" => Ok(ConnectionState::Disabled),
            other => Err(format!("Unknown connection state: {other}")),
        }
    }
}

/// Polling cadence for the flat run listing. A healthy stream already
/// delivers status pushes, so active polling relaxes slightly and idle
/// polling backs off further.
pub fn runs_flat_refetch_interval(runs: Option<&[FlatRun]>, state: Option<ConnectionState>) -> Duration {
    let healthy = state == Some(ConnectionState::Open);
    let runs = runs.unwrap_or_default();
    if runs.is_empty() {
        return if healthy {
            RUNS_FLAT_STREAM_SYNC_EMPTY
        } else {
            RUNS_FLAT_EMPTY
        };
    }
    let active = runs.iter().any(|run| run.status.is_active());
    match (healthy, active) {
        (true, true) => RUNS_FLAT_STREAM_SYNC_ACTIVE,
        (true, false) => RUNS_FLAT_STREAM_SYNC_IDLE,
        (false, true) => RUNS_FLAT_ACTIVE,
        (false, false) => RUNS_FLAT_IDLE,
    }
}

/// Message polling only runs while the stream is down.
pub fn message_fallback_refetch_interval(state: Option<ConnectionState>) -> Option<Duration> {
    match state {
        Some(state) if !state.is_live() => Some(MESSAGE_FALLBACK),
        _ => None,
    }
}

pub fn run_file_refetch_interval(
    status: Option<RunStatus>,
    state: Option<ConnectionState>,
) -> Option<Duration> {
    if !status.is_some_and(|status| status.is_active()) {
        return None;
    }
    if state.is_some_and(|state| state.is_live()) {
        return None;
    }
    Some(RUN_FILE_ACTIVE)
}

/// Connection health of the live stream, with the reconnect schedule.
#[derive(Debug, Clone)]
pub struct StreamHealth {
    state: ConnectionState,
    error_count: u32,
    backoff: ReconnectBackoff,
}

impl StreamHealth {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Disabled,
            error_count: 0,
            backoff: ReconnectBackoff::new(config),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn opened(&mut self) {
        if self.state != ConnectionState::Open {
            info!(event = "live_stream_open", errors = self.error_count);
        }
        self.state = ConnectionState::Open;
        self.backoff.reset();
    }

    /// Records a stream failure; returns how long to wait before reconnecting.
    pub fn failed(&mut self, reason: &str) -> Duration {
        self.error_count = self.error_count.saturating_add(1);
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff.next_delay();
        warn!(
            event = "live_stream_error",
            reason,
            attempt = self.backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        );
        delay
    }

    pub fn disable(&mut self) {
        self.state = ConnectionState::Disabled;
    }
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: RunStatus) -> FlatRun {
        FlatRun::new("run-1", "task-1", status, "2026-02-22T21:00:00Z")
    }

    #[test]
    fn runs_polling_depends_on_activity_and_stream_health() {
        let open = Some(ConnectionState::Open);
        let down = Some(ConnectionState::Reconnecting);
        let active = vec![run(RunStatus::Running)];
        let idle = vec![run(RunStatus::Completed)];

        assert_eq!(runs_flat_refetch_interval(None, open), Duration::from_millis(1000));
        assert_eq!(runs_flat_refetch_interval(Some(&[] as &[FlatRun]), down), Duration::from_millis(1500));
        assert_eq!(runs_flat_refetch_interval(Some(active.as_slice()), open), Duration::from_millis(810));
        assert_eq!(runs_flat_refetch_interval(Some(active.as_slice()), down), Duration::from_millis(800));
        assert_eq!(runs_flat_refetch_interval(Some(idle.as_slice()), open), Duration::from_millis(3000));
        assert_eq!(runs_flat_refetch_interval(Some(idle.as_slice()), None), Duration::from_millis(2500));
    }

    #[test]
    fn message_fallback_only_when_stream_is_down() {
        assert_eq!(message_fallback_refetch_interval(None), None);
        assert_eq!(message_fallback_refetch_interval(Some(ConnectionState::Open)), None);
        assert_eq!(
            message_fallback_refetch_interval(Some(ConnectionState::Connecting)),
            None
        );
        assert_eq!(
            message_fallback_refetch_interval(Some(ConnectionState::Error)),
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn run_file_polls_active_runs_without_healthy_stream() {
        assert_eq!(
            run_file_refetch_interval(Some(RunStatus::Completed), None),
            None
        );
        assert_eq!(
            run_file_refetch_interval(Some(RunStatus::Running), Some(ConnectionState::Open)),
            None
        );
        assert_eq!(
            run_file_refetch_interval(Some(RunStatus::Queued), Some(ConnectionState::Disabled)),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(
            run_file_refetch_interval(Some(RunStatus::Running), None),
            Some(Duration::from_millis(2500))
        );
    }

    #[test]
    fn stream_health_backs_off_and_resets_on_open() {
        let mut health = StreamHealth::default();
        health.connecting();
        assert_eq!(health.failed("eof"), Duration::from_millis(1000));
        assert_eq!(health.failed("eof"), Duration::from_millis(2000));
        assert_eq!(health.state(), ConnectionState::Reconnecting);
        health.opened();
        assert_eq!(health.state(), ConnectionState::Open);
        assert_eq!(health.error_count(), 2);
        assert_eq!(health.failed("reset"), Duration::from_millis(1000));
    }

    #[test]
    fn connection_state_parses_leniently() {
        assert_eq!(
            " Reconnecting ".parse::<ConnectionState>(),
            Ok(ConnectionState::Reconnecting)
        );
        assert!("closed".parse::<ConnectionState>().is_err());
    }
}
