use crate::{BusMessage, RunStatus};
use serde_json::Value;
use thiserror::Error;

pub const EVENT_STATUS: &str = "status";
pub const EVENT_LOG: &str = "log";
pub const EVENT_MESSAGE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event payload is not valid json: {0}")]
    Json(String),
    #[error("unknown live event: {0}")]
    UnknownEvent(String),
    #[error("event payload missing field: {0}")]
    MissingField(&'static str),
}

/// Run identity carried by `status` and `log` events.
///
/// Fields of the wrong JSON type read as empty rather than failing the event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEventRef {
    pub run_id: String,
    pub project_id: String,
    pub task_id: String,
    pub status: String,
    pub exit_code: Option<i32>,
}

impl RunEventRef {
    pub fn from_payload(data: &str) -> Result<Self, EventError> {
        let payload: Value =
            serde_json::from_str(data).map_err(|err| EventError::Json(err.to_string()))?;
        let text = |field: &str| -> String {
            payload
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let exit_code = payload
            .get("exit_code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok());
        Ok(Self {
            run_id: text("run_id"),
            project_id: text("project_id"),
            task_id: text("task_id"),
            status: text("status"),
            exit_code,
        })
    }

    pub fn run_status(&self) -> Option<RunStatus> {
        RunStatus::from_event(&self.status)
    }

    pub fn run_id(&self) -> Option<&str> {
        non_empty(&self.run_id)
    }

    pub fn project_id(&self) -> Option<&str> {
        non_empty(&self.project_id)
    }

    pub fn task_id(&self) -> Option<&str> {
        non_empty(&self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Status(RunEventRef),
    Log(RunEventRef),
    Message(Box<BusMessage>),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Status(_) => EVENT_STATUS,
            LiveEvent::Log(_) => EVENT_LOG,
            LiveEvent::Message(_) => EVENT_MESSAGE,
        }
    }
}

/// Decodes one named event from the live stream.
pub fn parse_live_event(name: &str, data: &str) -> Result<LiveEvent, EventError> {
    match name.trim() {
        EVENT_STATUS => RunEventRef::from_payload(data).map(LiveEvent::Status),
        EVENT_LOG => RunEventRef::from_payload(data).map(LiveEvent::Log),
        EVENT_MESSAGE => {
            let payload: Value =
                serde_json::from_str(data).map_err(|err| EventError::Json(err.to_string()))?;
            let has_id = payload
                .get("msg_id")
                .and_then(Value::as_str)
                .is_some_and(|id| !id.trim().is_empty());
            if !has_id {
                return Err(EventError::MissingField("msg_id"));
            }
            let message: BusMessage =
                serde_json::from_value(payload).map_err(|err| EventError::Json(err.to_string()))?;
            Ok(LiveEvent::Message(Box::new(message)))
        }
        other => Err(EventError::UnknownEvent(other.to_string())),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
