use crate::build::{newer_run, RunIndex};
use cmon_core::{FlatRun, Task};
use std::collections::{HashMap, HashSet};

/// Narrows a run slice to the history worth rebuilding on every refresh:
/// active tasks, the selected task, their thread relatives, and the run
/// lineage that keeps those rows attached to the tree.
///
/// When no task qualifies, every run is returned; an empty tree would hide
/// valid `parent_run_id` history.
pub fn select_tree_runs(
    tasks: &[Task],
    runs: &[FlatRun],
    selected_task_id: Option<&str>,
) -> Vec<FlatRun> {
    let included = included_tasks(tasks, selected_task_id);
    if included.is_empty() {
        return runs.to_vec();
    }

    let index = RunIndex::new(runs);
    let mut keep: HashSet<&str> = HashSet::new();

    let seeds: Vec<&FlatRun> = index
        .ordered
        .iter()
        .copied()
        .filter(|run| included.contains(run.task_id.as_str()))
        .collect();
    for seed in &seeds {
        keep_with_ancestors(seed, &index, &mut keep);
    }

    let mut queue: Vec<&FlatRun> = seeds.clone();
    while let Some(run) = queue.pop() {
        let Some(children) = index.spawned.get(run.id.as_str()) else {
            continue;
        };
        for child in children {
            if keep.insert(child.id.as_str()) {
                queue.push(*child);
            }
        }
    }

    add_bridge_runs(&index, &mut keep);

    runs.iter()
        .filter(|run| keep.contains(run.id.as_str()))
        .cloned()
        .collect()
}

/// Active and selected tasks, closed over `thread_parent` links in both directions.
fn included_tasks<'a>(tasks: &'a [Task], selected_task_id: Option<&'a str>) -> HashSet<&'a str> {
    let mut included: HashSet<&str> = tasks
        .iter()
        .filter(|task| task.status.is_active())
        .map(|task| task.id.as_str())
        .collect();
    if let Some(selected) = selected_task_id.map(str::trim).filter(|id| !id.is_empty()) {
        included.insert(selected);
    }

    let links: Vec<(&str, &str)> = tasks
        .iter()
        .filter_map(|task| {
            task.thread_parent_task_id()
                .filter(|parent| *parent != task.id)
                .map(|parent| (task.id.as_str(), parent))
        })
        .collect();

    loop {
        let mut changed = false;
        for &(child, parent) in &links {
            if included.contains(child) && included.insert(parent) {
                changed = true;
            }
            if included.contains(parent) && included.insert(child) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    included
}

/// Keeps `run` and everything reachable through `parent_run_id` and
/// `previous_run_id`. The walk is bounded by the slice size so cyclic links end.
fn keep_with_ancestors<'a>(run: &'a FlatRun, index: &RunIndex<'a>, keep: &mut HashSet<&'a str>) {
    keep.insert(run.id.as_str());
    let mut stack = vec![run];
    let mut steps = 0usize;
    let bound = index.ordered.len();
    while let Some(current) = stack.pop() {
        steps += 1;
        if steps > bound {
            break;
        }
        for link in [index.parent_of(current), index.previous_of(current)]
            .into_iter()
            .flatten()
        {
            if keep.insert(link.id.as_str()) {
                stack.push(link);
            }
        }
    }
}

/// For a task represented by a single kept run that does not reach a kept
/// run in another task, keep the task's latest run that does carry a
/// cross-task parent, with its lineage. A kept run with no parent at all
/// counts as unanchored too, so a task whose latest run is a fresh root
/// still shows how it was spawned.
fn add_bridge_runs<'a>(index: &RunIndex<'a>, keep: &mut HashSet<&'a str>) {
    let mut bridged: HashSet<&str> = HashSet::new();
    loop {
        let mut kept_by_task: HashMap<&str, Vec<&FlatRun>> = HashMap::new();
        for run in index.ordered.iter().copied() {
            if keep.contains(run.id.as_str()) {
                kept_by_task.entry(run.task_id.as_str()).or_default().push(run);
            }
        }

        let mut bridges: Vec<&FlatRun> = Vec::new();
        for (task_id, kept) in &kept_by_task {
            if kept.len() != 1 || bridged.contains(task_id) {
                continue;
            }
            let only = kept[0];
            let anchored = index
                .cross_task_parent(only)
                .is_some_and(|parent| keep.contains(parent.id.as_str()));
            if anchored {
                continue;
            }
            let bridge = index
                .by_task
                .get(task_id)
                .into_iter()
                .flatten()
                .copied()
                .filter(|run| run.id != only.id && index.cross_task_parent(run).is_some())
                .max_by(|a, b| newer_run(a, b));
            if let Some(bridge) = bridge {
                bridged.insert(*task_id);
                bridges.push(bridge);
            }
        }

        if bridges.is_empty() {
            break;
        }
        bridges.sort_by(|a, b| a.id.cmp(&b.id));
        for bridge in bridges {
            keep_with_ancestors(bridge, index, keep);
        }
    }
}
