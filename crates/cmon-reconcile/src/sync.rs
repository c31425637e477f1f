use crate::cache::{QueryCache, QueryKey};
use crate::stabilize::{merge_flat_runs_for_tree, scoped_runs_for_tree, stabilize_project_stats};
use crate::{RunList, Selection, TaskList};
use cmon_core::{BusMessage, FetchError, FlatRun, ProjectStats, Task};
use cmon_messages::{merge_messages_by_id, MessageList};
use cmon_tree::{build_tree, select_tree_runs, Tree};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies a fetched run slice: the scoped entry gets the stabilized
/// selection view, and the project-wide entry absorbs it by id. Entries are
/// only written when their value changes.
pub fn apply_runs_snapshot<C: QueryCache>(
    cache: &mut C,
    selection: &Selection,
    limit: Option<usize>,
    incoming: Vec<FlatRun>,
) -> Option<RunList> {
    let project_id = selection.project_id()?;
    let task_id = selection.task_id();
    let limit = limit.filter(|limit| *limit > 0);
    let scoped_key = QueryKey::runs_flat_scoped(project_id, task_id, limit);
    let project_key = QueryKey::runs_flat(project_id);

    let previous_scoped: Option<RunList> = cache.get(&scoped_key);
    let previous_project: Option<RunList> = cache.get(&project_key);
    let scoped = scoped_runs_for_tree(
        previous_scoped.as_ref(),
        Arc::new(incoming),
        task_id,
        limit,
        previous_project.as_ref(),
    );

    let project = merge_flat_runs_for_tree(previous_project.as_ref(), &scoped);
    let project_changed = cache.update::<RunList, _>(&project_key, |_| Some(project));
    let scoped_changed = cache.update::<RunList, _>(&scoped_key, |_| Some(Arc::clone(&scoped)));
    debug!(
        event = "runs_snapshot_applied",
        project_id,
        runs = scoped.len(),
        project_changed,
        scoped_changed,
    );
    Some(scoped)
}

pub fn apply_tasks_snapshot<C: QueryCache>(cache: &mut C, project_id: &str, incoming: Vec<Task>) -> TaskList {
    let key = QueryKey::tasks(project_id);
    let previous: Option<TaskList> = cache.get(&key);
    let next = match previous {
        Some(previous) if *previous == incoming => previous,
        _ => Arc::new(incoming),
    };
    cache.update::<TaskList, _>(&key, |_| Some(Arc::clone(&next)));
    next
}

pub fn apply_project_stats<C: QueryCache>(
    cache: &mut C,
    project_id: &str,
    incoming: ProjectStats,
) -> Arc<ProjectStats> {
    let key = QueryKey::ProjectStats {
        project_id: project_id.to_string(),
    };
    let previous: Option<Arc<ProjectStats>> = cache.get(&key);
    let next = stabilize_project_stats(previous.as_ref(), incoming);
    cache.update::<Arc<ProjectStats>, _>(&key, |_| Some(Arc::clone(&next)));
    next
}

/// Tree for the current selection from cached tasks and scoped runs.
pub fn project_tree<C: QueryCache>(cache: &C, selection: &Selection, limit: Option<usize>) -> Option<Tree> {
    let project_id = selection.project_id()?;
    let tasks: TaskList = cache.get(&QueryKey::tasks(project_id)).unwrap_or_default();
    let scoped_key =
        QueryKey::runs_flat_scoped(project_id, selection.task_id(), limit.filter(|limit| *limit > 0));
    let runs: RunList = cache
        .get(&scoped_key)
        .or_else(|| cache.get(&QueryKey::runs_flat(project_id)))
        .unwrap_or_default();
    let runs = select_tree_runs(&tasks, &runs, selection.task_id());
    Some(build_tree(project_id, &tasks, &runs))
}

/// Cursor for an incremental message fetch: the newest cached id.
pub fn message_cursor(cached: &MessageList) -> Option<&str> {
    cached
        .first()
        .map(|message| message.msg_id.as_str())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageRefresh {
    Ready(MessageList),
    /// The server no longer recognises the cursor; refetch without one.
    Resnapshot,
}

/// Folds the result of an incremental message fetch into the cache value.
pub fn refresh_messages(
    cached: &MessageList,
    since: Option<&str>,
    result: Result<Vec<BusMessage>, FetchError>,
    max_messages: usize,
) -> Result<MessageRefresh, FetchError> {
    let incoming = match result {
        Ok(incoming) => incoming,
        Err(FetchError::StaleCursor { cursor }) => {
            info!(event = "message_cursor_stale", cursor = %cursor);
            return Ok(MessageRefresh::Resnapshot);
        }
        Err(err) => return Err(err),
    };
    if since.is_some() && incoming.is_empty() {
        return Ok(MessageRefresh::Ready(Arc::clone(cached)));
    }
    let incoming: Vec<Arc<BusMessage>> = incoming.into_iter().map(Arc::new).collect();
    Ok(MessageRefresh::Ready(merge_messages_by_id(
        cached,
        &incoming,
        max_messages,
    )))
}

/// Writes a refreshed message list under `key` when it changed.
pub fn store_messages<C: QueryCache>(cache: &mut C, key: &QueryKey, list: &MessageList) -> bool {
    cache.update::<MessageList, _>(key, |_| Some(Arc::clone(list)))
}
