use crate::cache::{QueryCache, QueryKey};
use crate::patch::{patch_flat_runs_status, patch_run_info_status, patch_task_status};
use crate::plan::{resolve_status_refresh_plan, RefreshPlan};
use crate::timer::CoalescingTimer;
use crate::{RunList, Selection, TaskList};
use cmon_core::time::now_rfc3339;
use cmon_core::{LiveEvent, RunEventRef, RunInfo, TaskDetail};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const STATUS_REFRESH_DELAY: Duration = Duration::from_millis(90);

/// `status_refresh_delay` is the coalescing window for every live-driven
/// refresh, log lines included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRefreshConfig {
    pub status_refresh_delay: Duration,
}

impl Default for LiveRefreshConfig {
    fn default() -> Self {
        Self {
            status_refresh_delay: STATUS_REFRESH_DELAY,
        }
    }
}

/// Turns `status` and `log` events into optimistic cache patches plus a
/// coalesced batch of invalidations.
///
/// Callers drive time explicitly: every handler takes `now`, and
/// [`LiveRunRefresh::flush_due`] should be invoked at
/// [`LiveRunRefresh::next_deadline`].
#[derive(Debug, Clone)]
pub struct LiveRunRefresh {
    config: LiveRefreshConfig,
    selection: Selection,
    pending: RefreshPlan,
    timer: CoalescingTimer,
}

impl LiveRunRefresh {
    pub fn new(config: LiveRefreshConfig, selection: Selection) -> Self {
        Self {
            config,
            selection,
            pending: RefreshPlan::default(),
            timer: CoalescingTimer::new(),
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Switches selection. Pending refreshes belong to the old view and are dropped.
    pub fn set_selection(&mut self, selection: Selection) {
        if selection != self.selection {
            self.teardown();
            self.selection = selection;
        }
    }

    pub fn pending(&self) -> RefreshPlan {
        self.pending
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.due_at()
    }

    /// Dispatches a decoded live event. `message` events are not handled here.
    pub fn on_event<C: QueryCache>(
        &mut self,
        cache: &mut C,
        event: &LiveEvent,
        now: Instant,
    ) -> RefreshPlan {
        match event {
            LiveEvent::Status(event) => self.on_status(cache, event, now),
            LiveEvent::Log(event) => self.on_log(cache, event, now),
            LiveEvent::Message(_) => RefreshPlan::default(),
        }
    }

    /// Patches the caches the event touches, then queues whatever still needs
    /// a refetch.
    pub fn on_status<C: QueryCache>(
        &mut self,
        cache: &mut C,
        event: &RunEventRef,
        now: Instant,
    ) -> RefreshPlan {
        let Some(project_id) = self.selection.project_id().map(str::to_string) else {
            return RefreshPlan::default();
        };
        self.patch_status_caches(cache, &project_id, event);
        let plan = self.plan_for(cache, &project_id, event);
        self.queue(plan, now, self.config.status_refresh_delay);
        plan
    }

    /// Log lines carry no status. Only a log for a run the caches have never
    /// seen queues a refresh.
    pub fn on_log<C: QueryCache>(
        &mut self,
        cache: &mut C,
        event: &RunEventRef,
        now: Instant,
    ) -> RefreshPlan {
        let Some(project_id) = self.selection.project_id().map(str::to_string) else {
            return RefreshPlan::default();
        };
        if event.run_id().is_none() || event.project_id() != Some(project_id.as_str()) {
            debug!(
                event = "live_log_ignored",
                run_id = %event.run_id,
                project_id = %event.project_id,
            );
            return RefreshPlan::default();
        }
        let plan = self.plan_for(cache, &project_id, event);
        if !plan.runs_flat {
            return RefreshPlan::default();
        }
        self.queue(plan, now, self.config.status_refresh_delay);
        plan
    }

    /// Invalidates the accumulated keys if the deadline has passed.
    pub fn flush_due<C: QueryCache>(&mut self, cache: &mut C, now: Instant) -> Vec<QueryKey> {
        if !self.timer.fire(now) {
            return Vec::new();
        }
        self.flush(cache)
    }

    /// Invalidates the accumulated keys now, one call per key.
    pub fn flush<C: QueryCache>(&mut self, cache: &mut C) -> Vec<QueryKey> {
        self.timer.cancel();
        let plan = std::mem::take(&mut self.pending);
        let keys = self.keys_for(plan);
        for key in &keys {
            cache.invalidate(key);
        }
        if !keys.is_empty() {
            info!(
                event = "live_refresh_flush",
                keys = keys.len(),
                runs_flat = plan.runs_flat,
                task_list = plan.task_list,
                task = plan.task,
                run = plan.run,
            );
        }
        keys
    }

    /// Drops the pending timer and flags.
    pub fn teardown(&mut self) {
        self.timer.cancel();
        self.pending = RefreshPlan::default();
    }

    fn queue(&mut self, plan: RefreshPlan, now: Instant, delay: Duration) {
        if plan.is_empty() {
            return;
        }
        self.pending.merge(plan);
        if self.timer.arm(now, delay) {
            debug!(
                event = "live_refresh_armed",
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            );
        }
    }

    fn plan_for<C: QueryCache>(&self, cache: &C, project_id: &str, event: &RunEventRef) -> RefreshPlan {
        let known_runs: Option<RunList> = cache.get(&QueryKey::runs_flat(project_id));
        let known_tasks: Option<TaskList> = cache.get(&QueryKey::tasks(project_id));
        resolve_status_refresh_plan(
            &self.selection,
            event,
            known_runs.as_deref().map(Vec::as_slice),
            known_tasks.as_deref().map(Vec::as_slice),
        )
    }

    fn patch_status_caches<C: QueryCache>(&self, cache: &mut C, project_id: &str, event: &RunEventRef) {
        let Some(run_id) = event.run_id() else {
            return;
        };
        if event.project_id().is_some_and(|id| id != project_id) {
            debug!(
                event = "live_status_ignored",
                run_id,
                project_id = %event.project_id,
            );
            return;
        }

        let stamp = now_rfc3339();
        let runs_key = QueryKey::runs_flat(project_id);
        let known_runs: Option<RunList> = cache.get(&runs_key);
        for key in cache.keys_under(&runs_key) {
            cache.update::<RunList, _>(&key, |current| {
                current.map(|runs| patch_flat_runs_status(runs, event, &stamp))
            });
        }

        let Some(task_id) = self.selection.task_id() else {
            return;
        };
        let selected_run_id = self.selection.run_id();
        let run_in_selected_task = known_runs
            .as_deref()
            .and_then(|runs| runs.iter().find(|run| run.id == run_id))
            .is_some_and(|run| run.task_id == task_id);
        let affects_task = event.task_id() == Some(task_id)
            || selected_run_id == Some(run_id)
            || run_in_selected_task;
        if affects_task {
            cache.update::<Arc<TaskDetail>, _>(&QueryKey::task(project_id, task_id), |current| {
                current.map(|task| patch_task_status(task, event, &stamp))
            });
        }

        if let Some(selected_run_id) = selected_run_id.filter(|selected| *selected == run_id) {
            cache.update::<Arc<RunInfo>, _>(
                &QueryKey::run(project_id, task_id, selected_run_id),
                |current| current.map(|info| patch_run_info_status(info, event, &stamp)),
            );
        }
    }

    fn keys_for(&self, plan: RefreshPlan) -> Vec<QueryKey> {
        let Some(project_id) = self.selection.project_id() else {
            return Vec::new();
        };
        let mut keys = Vec::new();
        if plan.runs_flat {
            keys.push(QueryKey::runs_flat(project_id));
        }
        if plan.task_list {
            keys.push(QueryKey::tasks(project_id));
        }
        let Some(task_id) = self.selection.task_id() else {
            return keys;
        };
        if plan.task {
            keys.push(QueryKey::task(project_id, task_id));
        }
        if let (true, Some(run_id)) = (plan.run, self.selection.run_id()) {
            keys.push(QueryKey::run(project_id, task_id, run_id));
        }
        keys
    }
}
