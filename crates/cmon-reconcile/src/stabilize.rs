use crate::RunList;
use cmon_core::time::parse_timestamp_millis;
use cmon_core::{FlatRun, ProjectStats};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Returns `previous` when `incoming` holds the same runs in the same order.
pub fn stabilize_flat_runs(previous: Option<&RunList>, incoming: RunList) -> RunList {
    match previous {
        Some(previous) if Arc::ptr_eq(previous, &incoming) || **previous == *incoming => {
            Arc::clone(previous)
        }
        _ => incoming,
    }
}

pub fn stabilize_project_stats(
    previous: Option<&Arc<ProjectStats>>,
    incoming: ProjectStats,
) -> Arc<ProjectStats> {
    match previous {
        Some(previous) if **previous == incoming => Arc::clone(previous),
        _ => Arc::new(incoming),
    }
}

/// Upserts a scoped slice into the project-wide slice by run id.
///
/// Rows absent from `incoming` are kept: they may be ancestors the tree
/// still needs for nesting. Returns `previous` when nothing differs.
pub fn merge_flat_runs_for_tree(previous: Option<&RunList>, incoming: &RunList) -> RunList {
    let previous = match previous {
        Some(previous) if !previous.is_empty() => previous,
        _ => return Arc::clone(incoming),
    };
    if incoming.is_empty() {
        return Arc::clone(previous);
    }

    let mut merged: Vec<FlatRun> = previous.to_vec();
    let mut index_by_id: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, run)| (run.id.as_str(), index))
        .collect();
    let mut changed = false;
    for run in incoming.iter() {
        match index_by_id.get(run.id.as_str()) {
            Some(&index) => {
                if merged[index] != *run {
                    merged[index] = run.clone();
                    changed = true;
                }
            }
            None => {
                index_by_id.insert(run.id.as_str(), merged.len());
                merged.push(run.clone());
                changed = true;
            }
        }
    }

    if !changed {
        return Arc::clone(previous);
    }
    merged.sort_by(by_start_time);
    Arc::new(merged)
}

/// Run slice for the tree when a task may be selected.
///
/// Without a selected task the incoming slice is used as is; the server
/// already bounds it to active work. With a selected task and a `limit`, only
/// the exact parent and restart lineage of the incoming runs is rehydrated
/// from the cached slices, so the result stays bounded however many times
/// the task restarts.
pub fn scoped_runs_for_tree(
    previous_scoped: Option<&RunList>,
    incoming: RunList,
    selected_task_id: Option<&str>,
    limit: Option<usize>,
    previous_project: Option<&RunList>,
) -> RunList {
    let incoming = stabilize_flat_runs(previous_scoped, incoming);
    if selected_task_id.map_or(true, |id| id.trim().is_empty()) {
        return incoming;
    }
    if limit.is_some_and(|limit| limit > 0) {
        return scoped_runs_with_limit(previous_scoped, incoming, previous_project);
    }
    let merged = merge_flat_runs_for_tree(previous_scoped, &incoming);
    stabilize_flat_runs(previous_scoped, merged)
}

fn scoped_runs_with_limit(
    previous_scoped: Option<&RunList>,
    incoming: RunList,
    previous_project: Option<&RunList>,
) -> RunList {
    if incoming.is_empty() {
        return previous_scoped.map(Arc::clone).unwrap_or(incoming);
    }

    let mut ancestry: HashMap<&str, &FlatRun> = HashMap::new();
    for runs in [previous_scoped, previous_project].into_iter().flatten() {
        for run in runs.iter() {
            let preferred = match ancestry.get(run.id.as_str()) {
                Some(existing) => prefer_richer_ancestry_run(existing, run),
                None => run,
            };
            ancestry.insert(run.id.as_str(), preferred);
        }
    }
    if ancestry.is_empty() {
        return incoming;
    }

    let mut included: HashSet<&str> = incoming.iter().map(|run| run.id.as_str()).collect();
    let mut extra: Vec<&FlatRun> = Vec::new();
    for run in incoming.iter() {
        include_parent_chain(run, &ancestry, &mut included, &mut extra);
        let Some(previous_id) = run.previous_run_id() else {
            continue;
        };
        if included.contains(previous_id) {
            continue;
        }
        if let Some(previous_run) = ancestry.get(previous_id).copied() {
            included.insert(previous_run.id.as_str());
            extra.push(previous_run);
            include_parent_chain(previous_run, &ancestry, &mut included, &mut extra);
        }
    }

    if extra.is_empty() {
        return incoming;
    }
    let mut next: Vec<FlatRun> = incoming.iter().cloned().collect();
    next.extend(extra.into_iter().cloned());
    next.sort_by(by_start_time);
    stabilize_flat_runs(previous_scoped, Arc::new(next))
}

fn include_parent_chain<'a>(
    run: &'a FlatRun,
    ancestry: &HashMap<&'a str, &'a FlatRun>,
    included: &mut HashSet<&'a str>,
    extra: &mut Vec<&'a FlatRun>,
) {
    let mut parent_id = run.parent_run_id();
    while let Some(id) = parent_id {
        if included.contains(id) {
            break;
        }
        let Some(parent) = ancestry.get(id).copied() else {
            break;
        };
        included.insert(parent.id.as_str());
        extra.push(parent);
        parent_id = parent.parent_run_id();
    }
}

/// Picks the copy of a run carrying more lineage, then the more recent one.
fn prefer_richer_ancestry_run<'a>(existing: &'a FlatRun, candidate: &'a FlatRun) -> &'a FlatRun {
    let edges = |run: &FlatRun| {
        usize::from(run.parent_run_id().is_some()) + usize::from(run.previous_run_id().is_some())
    };
    let ranked = edges(candidate)
        .cmp(&edges(existing))
        .then_with(|| {
            parse_timestamp_millis(candidate.activity_time())
                .cmp(&parse_timestamp_millis(existing.activity_time()))
        })
        .then_with(|| {
            parse_timestamp_millis(&candidate.start_time)
                .cmp(&parse_timestamp_millis(&existing.start_time))
        });
    if ranked == Ordering::Greater {
        candidate
    } else {
        existing
    }
}

fn by_start_time(a: &FlatRun, b: &FlatRun) -> Ordering {
    parse_timestamp_millis(&a.start_time)
        .cmp(&parse_timestamp_millis(&b.start_time))
        .then_with(|| a.id.cmp(&b.id))
}
