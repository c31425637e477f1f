use crate::RunList;
use cmon_core::time::{has_real_end_time, parse_timestamp_millis};
use cmon_core::{RunEventRef, RunInfo, RunStatus, RunSummary, TaskDetail, TaskStatus};
use std::sync::Arc;

/// A finished status stamps an end time unless a real one is already recorded.
pub fn should_set_end_time(status: Option<RunStatus>, end_time: Option<&str>) -> bool {
    match status {
        Some(status) if status.is_terminal() => !has_real_end_time(end_time),
        _ => false,
    }
}

struct RunPatch {
    status: RunStatus,
    exit_code: i32,
    end_time: Option<String>,
}

impl RunPatch {
    /// `None` when applying the event would change nothing.
    fn resolve(
        event: &RunEventRef,
        status: RunStatus,
        exit_code: i32,
        end_time: Option<&str>,
        now: &str,
    ) -> Option<Self> {
        let next_status = event.run_status().unwrap_or(status);
        let next_exit_code = event.exit_code.unwrap_or(exit_code);
        let stamp = should_set_end_time(Some(next_status), end_time);
        if next_status == status && next_exit_code == exit_code && !stamp {
            return None;
        }
        Some(Self {
            status: next_status,
            exit_code: next_exit_code,
            end_time: if stamp {
                Some(now.to_string())
            } else {
                end_time.map(str::to_string)
            },
        })
    }
}

/// Applies a status event to the matching run of a flat slice.
pub fn patch_flat_runs_status(runs: &RunList, event: &RunEventRef, now: &str) -> RunList {
    let Some(run_id) = event.run_id() else {
        return Arc::clone(runs);
    };
    let Some(index) = runs.iter().position(|run| run.id == run_id) else {
        return Arc::clone(runs);
    };
    let current = &runs[index];
    let Some(patch) = RunPatch::resolve(
        event,
        current.status,
        current.exit_code,
        current.end_time.as_deref(),
        now,
    ) else {
        return Arc::clone(runs);
    };
    let mut next = runs.to_vec();
    let run = &mut next[index];
    run.status = patch.status;
    run.exit_code = patch.exit_code;
    run.end_time = patch.end_time;
    Arc::new(next)
}

/// Task status implied by its runs: any running, else any queued, else the
/// status of the run with the latest end-or-start time.
pub fn derive_task_status_from_runs(runs: &[RunSummary], fallback: TaskStatus) -> TaskStatus {
    if runs.iter().any(|run| run.status == RunStatus::Running) {
        return TaskStatus::Running;
    }
    if runs.iter().any(|run| run.status == RunStatus::Queued) {
        return TaskStatus::Queued;
    }
    let mut latest: Option<(&RunSummary, i64)> = None;
    for run in runs {
        let at = parse_timestamp_millis(run.activity_time());
        if latest.map_or(true, |(_, best)| at > best) {
            latest = Some((run, at));
        }
    }
    latest.map_or(fallback, |(run, _)| run.status.into())
}

/// Applies a status event to a task detail and re-derives the task status.
pub fn patch_task_status(task: &Arc<TaskDetail>, event: &RunEventRef, now: &str) -> Arc<TaskDetail> {
    let Some(run_id) = event.run_id() else {
        return Arc::clone(task);
    };
    let Some(index) = task.runs.iter().position(|run| run.id == run_id) else {
        return Arc::clone(task);
    };
    let current = &task.runs[index];
    let Some(patch) = RunPatch::resolve(
        event,
        current.status,
        current.exit_code,
        current.end_time.as_deref(),
        now,
    ) else {
        return Arc::clone(task);
    };

    let mut next = TaskDetail::clone(task);
    let run = &mut next.runs[index];
    run.status = patch.status;
    run.exit_code = patch.exit_code;
    run.end_time = patch.end_time;
    next.status = derive_task_status_from_runs(&next.runs, task.status);
    next.last_activity = now.to_string();
    Arc::new(next)
}

/// Applies exit code and end time to the selected run's detail. Run info
/// carries no status of its own.
pub fn patch_run_info_status(info: &Arc<RunInfo>, event: &RunEventRef, now: &str) -> Arc<RunInfo> {
    if event.run_id() != Some(info.run_id.as_str()) {
        return Arc::clone(info);
    }
    let exit_code = event.exit_code.unwrap_or(info.exit_code);
    let stamp = should_set_end_time(event.run_status(), Some(&info.end_time));
    if exit_code == info.exit_code && !stamp {
        return Arc::clone(info);
    }
    let mut next = RunInfo::clone(info);
    next.exit_code = exit_code;
    if stamp {
        next.end_time = now.to_string();
    }
    Arc::new(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmon_core::time::ZERO_TIME_SENTINEL;
    use cmon_core::FlatRun;

    const NOW: &str = "2026-02-22T21:05:00.000Z";

    fn event(run_id: &str, status: &str, exit_code: Option<i32>) -> RunEventRef {
        RunEventRef {
            run_id: run_id.to_string(),
            project_id: "proj-1".to_string(),
            task_id: "task-1".to_string(),
            status: status.to_string(),
            exit_code,
        }
    }

    fn summary(id: &str, status: RunStatus, start: &str, end: Option<&str>) -> RunSummary {
        RunSummary {
            id: id.to_string(),
            status,
            start_time: start.to_string(),
            end_time: end.map(str::to_string),
            ..RunSummary::default()
        }
    }

    #[test]
    fn end_time_only_stamped_for_terminal_without_real_end() {
        assert!(should_set_end_time(Some(RunStatus::Completed), None));
        assert!(should_set_end_time(Some(RunStatus::Failed), Some("  ")));
        assert!(should_set_end_time(
            Some(RunStatus::Stopped),
            Some(ZERO_TIME_SENTINEL)
        ));
        assert!(!should_set_end_time(
            Some(RunStatus::Completed),
            Some("2026-02-22T21:01:00Z")
        ));
        assert!(!should_set_end_time(Some(RunStatus::Running), None));
        assert!(!should_set_end_time(Some(RunStatus::Queued), None));
        assert!(!should_set_end_time(None, None));
    }

    #[test]
    fn flat_run_patch_updates_status_exit_and_end_time() {
        let mut run = FlatRun::new("run-1", "task-1", RunStatus::Running, "2026-02-22T21:00:00Z");
        run.exit_code = -1;
        let runs: RunList = Arc::new(vec![run]);

        let patched = patch_flat_runs_status(&runs, &event("run-1", "completed", Some(0)), NOW);
        assert!(!Arc::ptr_eq(&patched, &runs));
        assert_eq!(patched[0].status, RunStatus::Completed);
        assert_eq!(patched[0].exit_code, 0);
        assert_eq!(patched[0].end_time.as_deref(), Some(NOW));

        let again = patch_flat_runs_status(&patched, &event("run-1", "completed", Some(0)), NOW);
        assert!(Arc::ptr_eq(&again, &patched));
        let unknown = patch_flat_runs_status(&runs, &event("run-9", "completed", Some(0)), NOW);
        assert!(Arc::ptr_eq(&unknown, &runs));
    }

    #[test]
    fn blank_status_and_missing_exit_keep_current_values() {
        let mut run = FlatRun::new("run-1", "task-1", RunStatus::Running, "2026-02-22T21:00:00Z");
        run.exit_code = -1;
        let runs: RunList = Arc::new(vec![run]);
        let patched = patch_flat_runs_status(&runs, &event("run-1", "", None), NOW);
        assert!(Arc::ptr_eq(&patched, &runs));
    }

    #[test]
    fn task_status_derivation_follows_latest_run() {
        let runs = vec![
            summary(
                "run-1",
                RunStatus::Failed,
                "2026-02-22T21:00:00Z",
                Some("2026-02-22T21:02:00Z"),
            ),
            summary(
                "run-2",
                RunStatus::Completed,
                "2026-02-22T21:01:00Z",
                Some("2026-02-22T21:03:00Z"),
            ),
        ];
        assert_eq!(
            derive_task_status_from_runs(&runs, TaskStatus::Unknown),
            TaskStatus::Completed
        );
        let mut with_queued = runs.clone();
        with_queued.push(summary("run-3", RunStatus::Queued, "2026-02-22T20:00:00Z", None));
        assert_eq!(
            derive_task_status_from_runs(&with_queued, TaskStatus::Unknown),
            TaskStatus::Queued
        );
        assert_eq!(
            derive_task_status_from_runs(&[], TaskStatus::Blocked),
            TaskStatus::Blocked
        );
    }

    #[test]
    fn task_patch_rederives_status_and_touches_activity() {
        let task = Arc::new(TaskDetail {
            id: "task-1".to_string(),
            project_id: "proj-1".to_string(),
            status: TaskStatus::Running,
            last_activity: "2026-02-22T21:00:00Z".to_string(),
            runs: vec![summary("run-1", RunStatus::Running, "2026-02-22T21:00:00Z", None)],
            ..TaskDetail::default()
        });
        let patched = patch_task_status(&task, &event("run-1", "failed", Some(1)), NOW);
        assert_eq!(patched.status, TaskStatus::Failed);
        assert_eq!(patched.last_activity, NOW);
        assert_eq!(patched.runs[0].exit_code, 1);
        assert_eq!(patched.runs[0].end_time.as_deref(), Some(NOW));

        let untouched = patch_task_status(&task, &event("run-2", "failed", Some(1)), NOW);
        assert!(Arc::ptr_eq(&untouched, &task));
    }

    #[test]
    fn run_info_patch_replaces_zero_sentinel_end_time() {
        let info = Arc::new(RunInfo {
            run_id: "run-1".to_string(),
            end_time: ZERO_TIME_SENTINEL.to_string(),
            exit_code: -1,
            ..RunInfo::default()
        });
        let patched = patch_run_info_status(&info, &event("run-1", "completed", Some(0)), NOW);
        assert_eq!(patched.exit_code, 0);
        assert_eq!(patched.end_time, NOW);

        let running = patch_run_info_status(&info, &event("run-1", "running", None), NOW);
        assert!(Arc::ptr_eq(&running, &info));
        let other = patch_run_info_status(&info, &event("run-2", "completed", Some(0)), NOW);
        assert!(Arc::ptr_eq(&other, &info));
    }
}
