use crate::Selection;
use cmon_core::{FlatRun, RunEventRef, Task};
use serde::Serialize;

/// Which caches a live event makes stale. Each flag is independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshPlan {
    pub runs_flat: bool,
    pub task_list: bool,
    pub task: bool,
    pub run: bool,
}

impl RefreshPlan {
    pub fn is_empty(&self) -> bool {
        !(self.runs_flat || self.task_list || self.task || self.run)
    }

    pub fn merge(&mut self, other: RefreshPlan) {
        self.runs_flat |= other.runs_flat;
        self.task_list |= other.task_list;
        self.task |= other.task;
        self.run |= other.run;
    }
}

/// Decides what to refetch after a status event, given what the caches
/// already know. A run already present in the project slice was handled by
/// the optimistic patch; an unknown run needs the slice refetched, and the
/// task list too when its task is unknown as well.
pub fn resolve_status_refresh_plan(
    selection: &Selection,
    event: &RunEventRef,
    known_runs: Option<&[FlatRun]>,
    known_tasks: Option<&[Task]>,
) -> RefreshPlan {
    let Some(project_id) = selection.project_id() else {
        return RefreshPlan::default();
    };
    if event.project_id().is_some_and(|id| id != project_id) {
        return RefreshPlan::default();
    }

    let known_run = event
        .run_id()
        .and_then(|run_id| known_runs?.iter().find(|run| run.id == run_id));
    let runs_flat = known_run.is_none();
    let event_task_id = event
        .task_id()
        .or_else(|| known_run.map(|run| run.task_id.as_str()))
        .filter(|id| !id.is_empty());
    let task_known = event_task_id.is_some_and(|task_id| {
        known_tasks.is_some_and(|tasks| tasks.iter().any(|task| task.id == task_id))
    });
    let task_list = runs_flat && !task_known;

    let Some(selected_task_id) = selection.task_id() else {
        return RefreshPlan {
            runs_flat,
            task_list,
            ..RefreshPlan::default()
        };
    };
    let selected_run_id = selection.run_id();

    if event.run_id().is_none() && event.task_id().is_none() {
        return RefreshPlan {
            runs_flat,
            task_list,
            task: runs_flat,
            run: runs_flat && selected_run_id.is_some(),
        };
    }

    let names_selected_run = selected_run_id.is_some() && event.run_id() == selected_run_id;
    let task = names_selected_run || event_task_id == Some(selected_task_id) || runs_flat;
    let run = match selected_run_id {
        Some(selected) => event.run_id() == Some(selected) || (event.run_id().is_none() && runs_flat),
        None => false,
    };

    RefreshPlan {
        runs_flat,
        task_list,
        task,
        run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmon_core::{RunStatus, TaskStatus};

    fn event(run_id: &str, project_id: &str, task_id: &str) -> RunEventRef {
        RunEventRef {
            run_id: run_id.to_string(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            status: "completed".to_string(),
            exit_code: None,
        }
    }

    fn runs() -> Vec<FlatRun> {
        vec![FlatRun::new("run-1", "task-1", RunStatus::Running, "2026-02-22T21:00:00Z")]
    }

    fn tasks() -> Vec<Task> {
        vec![Task::new("task-1", TaskStatus::Running, "2026-02-22T21:00:00Z")]
    }

    fn selected() -> Selection {
        Selection::project("proj-1").with_task("task-1").with_run("run-1")
    }

    #[test]
    fn unknown_run_and_task_refresh_project_caches() {
        let plan = resolve_status_refresh_plan(
            &selected(),
            &event("run-2", "", "task-2"),
            Some(runs().as_slice()),
            Some(tasks().as_slice()),
        );
        assert_eq!(
            plan,
            RefreshPlan {
                runs_flat: true,
                task_list: true,
                task: true,
                run: false,
            }
        );
    }

    #[test]
    fn unknown_run_of_known_task_skips_task_list() {
        let plan = resolve_status_refresh_plan(
            &Selection::project("proj-1"),
            &event("run-2", "proj-1", "task-1"),
            Some(runs().as_slice()),
            Some(tasks().as_slice()),
        );
        assert!(plan.runs_flat);
        assert!(!plan.task_list);
        assert!(!plan.task);
    }

    #[test]
    fn known_run_without_task_id_avoids_project_refresh() {
        let plan = resolve_status_refresh_plan(
            &selected(),
            &event("run-1", "proj-1", ""),
            Some(runs().as_slice()),
            Some(tasks().as_slice()),
        );
        assert!(!plan.runs_flat);
        assert!(!plan.task_list);
        assert!(plan.task);
        assert!(plan.run);
    }

    #[test]
    fn other_project_and_unselected_project_are_ignored() {
        let plan = resolve_status_refresh_plan(
            &selected(),
            &event("run-2", "proj-2", "task-2"),
            Some(runs().as_slice()),
            Some(tasks().as_slice()),
        );
        assert!(plan.is_empty());
        let plan = resolve_status_refresh_plan(
            &Selection::default(),
            &event("run-2", "", ""),
            None,
            None,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn known_unrelated_run_refreshes_nothing() {
        let mut known = runs();
        known.push(FlatRun::new("run-x", "task-x", RunStatus::Running, "2026-02-22T21:00:00Z"));
        let plan = resolve_status_refresh_plan(
            &selected(),
            &event("run-x", "proj-1", "task-x"),
            Some(known.as_slice()),
            Some(tasks().as_slice()),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn event_without_identifiers_follows_project_refresh() {
        let plan = resolve_status_refresh_plan(&selected(), &event("", "proj-1", ""), None, None);
        assert_eq!(
            plan,
            RefreshPlan {
                runs_flat: true,
                task_list: true,
                task: true,
                run: true,
            }
        );
    }

    #[test]
    fn merge_accumulates_flags() {
        let mut plan = RefreshPlan {
            runs_flat: true,
            ..RefreshPlan::default()
        };
        plan.merge(RefreshPlan {
            run: true,
            ..RefreshPlan::default()
        });
        assert!(plan.runs_flat && plan.run);
        assert!(!plan.task && !plan.task_list);
    }
}
