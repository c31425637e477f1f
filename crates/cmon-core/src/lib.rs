use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod events;
pub mod paging;
pub mod sse;
pub mod time;

pub use events::{parse_live_event, EventError, LiveEvent, RunEventRef};
pub use paging::{drain_pages, FetchError, Page};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Queued,
    Completed,
    Failed,
    Blocked,
    Stopped,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Queued => "queued",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Running, queued and blocked tasks keep their history in high-frequency tree rebuilds.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::Queued | TaskStatus::Blocked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "running" => Ok(TaskStatus::Running),
            "queued" => Ok(TaskStatus::Queued),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            "stopped" => Ok(TaskStatus::Stopped),
            "unknown" => Ok(TaskStatus::Unknown),
            other => Err(format!("Unknown task status: {other}")),
        }
    }
}

impl From<RunStatus> for TaskStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => TaskStatus::Running,
            RunStatus::Queued => TaskStatus::Queued,
            RunStatus::Completed => TaskStatus::Completed,
            RunStatus::Failed => TaskStatus::Failed,
            RunStatus::Stopped => TaskStatus::Stopped,
            RunStatus::Unknown => TaskStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Queued,
    Completed,
    Failed,
    Stopped,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Queued => "queued",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
            RunStatus::Unknown => "unknown",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Queued)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Parses a status carried by a live event. Blank input means "no status
    /// in this event"; unrecognised values map to `Unknown`.
    pub fn from_event(input: &str) -> Option<Self> {
        if input.trim().is_empty() {
            return None;
        }
        Some(input.parse().unwrap_or(RunStatus::Unknown))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "running" => Ok(RunStatus::Running),
            "queued" => Ok(RunStatus::Queued),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            "unknown" => Ok(RunStatus::Unknown),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}

/// Declares a task as a conversational child of another task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ThreadParent {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Server-authoritative; never recomputed from the runs that happen to be visible.
    #[serde(default)]
    pub last_activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_parent: Option<ThreadParent>,
}

impl Task {
    pub fn new(id: impl Into<String>, status: TaskStatus, last_activity: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            last_activity: last_activity.into(),
            ..Self::default()
        }
    }

    /// The thread parent task id, if this task declares one.
    pub fn thread_parent_task_id(&self) -> Option<&str> {
        self.thread_parent
            .as_ref()
            .map(|parent| parent.task_id.trim())
            .filter(|task_id| !task_id.is_empty())
    }
}

/// A run as delivered by the project-wide flat runs listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlatRun {
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub start_time: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_run_id: Option<String>,
}

impl FlatRun {
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        status: RunStatus,
        start_time: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            status,
            start_time: start_time.into(),
            ..Self::default()
        }
    }

    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    pub fn previous_run_id(&self) -> Option<&str> {
        self.previous_run_id.as_deref()
    }

    /// End time when the run has finished, otherwise start time.
    pub fn activity_time(&self) -> &str {
        match self.end_time.as_deref() {
            Some(end) if time::has_real_end_time(Some(end)) => end,
            _ => &self.start_time,
        }
    }
}

/// A run as embedded in a task detail payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub id: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub start_time: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_run_id: Option<String>,
}

impl RunSummary {
    pub fn activity_time(&self) -> &str {
        match self.end_time.as_deref() {
            Some(end) if time::has_real_end_time(Some(end)) => end,
            _ => &self.start_time,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDetail {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_activity: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    #[serde(default)]
    pub version: u32,
    pub run_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub parent_run_id: String,
    #[serde(default)]
    pub previous_run_id: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub start_time: String,
    /// The backend reports `0001-01-01T00:00:00Z` while the run is live.
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectStats {
    pub project_id: String,
    #[serde(default)]
    pub total_tasks: u64,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub running_runs: u64,
    #[serde(default)]
    pub completed_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
    #[serde(default)]
    pub crashed_runs: u64,
    #[serde(default)]
    pub message_bus_files: u64,
    #[serde(default)]
    pub message_bus_total_bytes: u64,
}

/// A parent reference on a bus message: either a bare id or a structured link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageParent {
    Id(String),
    Link {
        msg_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BusMessage {
    pub msg_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<MessageParent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl BusMessage {
    pub fn new(
        msg_id: impl Into<String>,
        timestamp: impl Into<String>,
        kind: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            timestamp: timestamp.into(),
            kind: kind.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn timestamp_millis(&self) -> i64 {
        time::parse_timestamp_millis(&self.timestamp)
    }

    /// Project this message is scoped to, whichever field the backend filled in.
    pub fn project_ref(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .or(self.project.as_deref())
            .filter(|value| !value.is_empty())
    }

    pub fn task_ref(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .or(self.task.as_deref())
            .filter(|value| !value.is_empty())
    }
}

/// Treats missing, null and blank strings alike as `None`.
fn deserialize_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
