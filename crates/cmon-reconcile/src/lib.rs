use cmon_core::{FlatRun, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod cache;
mod patch;
mod plan;
mod poll;
mod scheduler;
mod stabilize;
mod sync;
mod timer;

pub use cache::{
    CacheValue, CachedValue, MemoryCache, QueryCache, QueryKey, INVALIDATION_LOG_CAPACITY,
};
pub use patch::{
    derive_task_status_from_runs, patch_flat_runs_status, patch_run_info_status,
    patch_task_status, should_set_end_time,
};
pub use plan::{resolve_status_refresh_plan, RefreshPlan};
pub use poll::{
    message_fallback_refetch_interval, run_file_refetch_interval, runs_flat_refetch_interval,
    ConnectionState, StreamHealth, PROJECT_STATS_REFETCH_INTERVAL,
};
pub use scheduler::{LiveRefreshConfig, LiveRunRefresh, STATUS_REFRESH_DELAY};
pub use stabilize::{
    merge_flat_runs_for_tree, scoped_runs_for_tree, stabilize_flat_runs, stabilize_project_stats,
};
pub use sync::{
    apply_project_stats, apply_runs_snapshot, apply_tasks_snapshot, message_cursor,
    project_tree, refresh_messages, store_messages, MessageRefresh,
};
pub use timer::{CoalescingTimer, TimerState};

pub type RunList = Arc<Vec<FlatRun>>;
pub type TaskList = Arc<Vec<Task>>;

/// What the operator is looking at. Every live-event decision is made
/// relative to this; with no project selected, events are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Selection {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        non_empty(self.project_id.as_deref())
    }

    pub fn task_id(&self) -> Option<&str> {
        non_empty(self.task_id.as_deref())
    }

    pub fn run_id(&self) -> Option<&str> {
        non_empty(self.run_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
