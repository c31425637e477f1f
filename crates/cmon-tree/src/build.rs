use crate::{LatestRun, Node, NodeId, NodeKind, ProjectStatus, RunNode, TaskNode, Tree};
use cmon_core::time::parse_timestamp_millis;
use cmon_core::{FlatRun, RunStatus, Task, TaskStatus};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

const SHORT_RUN_ID_CHARS: usize = 20;

/// Lookup tables over a run slice. Duplicate ids keep their first occurrence.
pub(crate) struct RunIndex<'a> {
    pub(crate) by_id: HashMap<&'a str, &'a FlatRun>,
    pub(crate) ordered: Vec<&'a FlatRun>,
    pub(crate) by_task: HashMap<&'a str, Vec<&'a FlatRun>>,
    pub(crate) spawned: HashMap<&'a str, Vec<&'a FlatRun>>,
    predecessor: HashMap<&'a str, &'a FlatRun>,
    superseded: HashSet<&'a str>,
}

impl<'a> RunIndex<'a> {
    pub(crate) fn new(runs: &'a [FlatRun]) -> Self {
        let mut by_id: HashMap<&str, &FlatRun> = HashMap::with_capacity(runs.len());
        let mut ordered = Vec::with_capacity(runs.len());
        for run in runs {
            if !by_id.contains_key(run.id.as_str()) {
                by_id.insert(run.id.as_str(), run);
                ordered.push(run);
            }
        }
        ordered.sort_by(|a, b| run_order(a, b));

        let mut by_task: HashMap<&str, Vec<&FlatRun>> = HashMap::new();
        let mut spawned: HashMap<&str, Vec<&FlatRun>> = HashMap::new();
        let mut predecessor = HashMap::new();
        let mut superseded = HashSet::new();
        for run in &ordered {
            by_task.entry(run.task_id.as_str()).or_default().push(*run);
            if let Some(parent) = resolve(&by_id, run, run.parent_run_id()) {
                spawned.entry(parent.id.as_str()).or_default().push(*run);
            }
            if let Some(previous) = resolve(&by_id, run, run.previous_run_id()) {
                if previous.task_id == run.task_id && !superseded.contains(previous.id.as_str()) {
                    superseded.insert(previous.id.as_str());
                    predecessor.insert(run.id.as_str(), previous);
                }
            }
        }

        Self {
            by_id,
            ordered,
            by_task,
            spawned,
            predecessor,
            superseded,
        }
    }

    pub(crate) fn parent_of(&self, run: &FlatRun) -> Option<&'a FlatRun> {
        resolve(&self.by_id, run, run.parent_run_id())
    }

    pub(crate) fn previous_of(&self, run: &FlatRun) -> Option<&'a FlatRun> {
        resolve(&self.by_id, run, run.previous_run_id())
    }

    /// Parent run that lives in another task, if resolvable.
    pub(crate) fn cross_task_parent(&self, run: &FlatRun) -> Option<&'a FlatRun> {
        self.parent_of(run)
            .filter(|parent| parent.task_id != run.task_id)
    }

    fn is_root(&self, run: &FlatRun) -> bool {
        self.parent_of(run).is_none() && !self.superseded.contains(run.id.as_str())
    }

    fn child_candidates(&self, run: &FlatRun) -> Vec<&'a FlatRun> {
        let mut candidates: Vec<&FlatRun> = self
            .spawned
            .get(run.id.as_str())
            .cloned()
            .unwrap_or_default();
        if let Some(previous) = self.predecessor.get(run.id.as_str()) {
            if !candidates.iter().any(|candidate| candidate.id == previous.id) {
                candidates.push(*previous);
            }
        }
        candidates.sort_by(|a, b| run_order(a, b));
        candidates
    }

    fn latest_for_task(&self, task_id: &str) -> Option<&'a FlatRun> {
        self.by_task
            .get(task_id)?
            .iter()
            .copied()
            .max_by(|a, b| newer_run(a, b))
    }
}

fn resolve<'a>(
    by_id: &HashMap<&'a str, &'a FlatRun>,
    run: &FlatRun,
    link: Option<&str>,
) -> Option<&'a FlatRun> {
    let link = link?;
    if link == run.id {
        return None;
    }
    by_id.get(link).copied()
}

/// Display order for sibling runs: start time ascending, then id.
pub(crate) fn run_order(a: &FlatRun, b: &FlatRun) -> Ordering {
    parse_timestamp_millis(&a.start_time)
        .cmp(&parse_timestamp_millis(&b.start_time))
        .then_with(|| a.id.cmp(&b.id))
}

/// Orders runs by recency: end-or-start time, then restart succession, then
/// start time and id.
pub(crate) fn newer_run(a: &FlatRun, b: &FlatRun) -> Ordering {
    parse_timestamp_millis(a.activity_time())
        .cmp(&parse_timestamp_millis(b.activity_time()))
        .then_with(|| {
            if a.previous_run_id() == Some(b.id.as_str()) {
                Ordering::Greater
            } else if b.previous_run_id() == Some(a.id.as_str()) {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| run_order(a, b))
}

struct TaskEntry<'a> {
    id: &'a str,
    record: Option<&'a Task>,
    activity: i64,
}

/// Deterministic sibling order: last activity descending, id ascending.
fn task_order(a: &TaskEntry<'_>, b: &TaskEntry<'_>) -> Ordering {
    b.activity.cmp(&a.activity).then_with(|| a.id.cmp(b.id))
}

fn explicit_parent<'a>(task: &'a Task, project_id: &str) -> Option<&'a str> {
    let parent = task.thread_parent.as_ref()?;
    let parent_task = task.thread_parent_task_id()?;
    let parent_project = parent.project_id.trim();
    if parent_task == task.id {
        return None;
    }
    if !parent_project.is_empty() && parent_project != project_id {
        return None;
    }
    Some(parent_task)
}

pub fn build_tree(project_id: &str, tasks: &[Task], runs: &[FlatRun]) -> Tree {
    let index = RunIndex::new(runs);

    let mut records: HashMap<&str, &Task> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        records.entry(task.id.as_str()).or_insert(task);
    }

    let mut explicit: HashMap<&str, &str> = HashMap::new();
    for task in records.values().copied() {
        if let Some(parent) = explicit_parent(task, project_id) {
            explicit.insert(task.id.as_str(), parent);
        }
    }

    // Latest cross-task edge per task wins.
    let mut inferred: HashMap<&str, (&FlatRun, &str)> = HashMap::new();
    for run in &index.ordered {
        let Some(parent) = index.cross_task_parent(run) else {
            continue;
        };
        let task_id = run.task_id.as_str();
        if explicit.contains_key(task_id) {
            continue;
        }
        match inferred.get(task_id) {
            Some((current, _)) if newer_run(run, current) != Ordering::Greater => {}
            _ => {
                inferred.insert(task_id, (*run, parent.task_id.as_str()));
            }
        }
    }

    let mut parent_task: HashMap<&str, &str> = explicit.clone();
    for (task_id, (_, parent)) in &inferred {
        parent_task.insert(*task_id, *parent);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut entries: Vec<TaskEntry<'_>> = Vec::new();
    let candidate_ids = tasks
        .iter()
        .map(|task| task.id.as_str())
        .chain(index.ordered.iter().map(|run| run.task_id.as_str()))
        .chain(explicit.values().copied());
    for task_id in candidate_ids {
        if !seen.insert(task_id) {
            continue;
        }
        let record = records.get(task_id).copied();
        let activity = match record {
            Some(task) => parse_timestamp_millis(&task.last_activity),
            None => index
                .by_task
                .get(task_id)
                .and_then(|runs| {
                    runs.iter()
                        .map(|run| parse_timestamp_millis(run.activity_time()))
                        .max()
                })
                .unwrap_or(0),
        };
        entries.push(TaskEntry {
            id: task_id,
            record,
            activity,
        });
    }
    entries.sort_by(task_order);

    let attached = attach_tasks(&entries, &parent_task);
    let placement = place_runs(&entries, &index);

    let mut tree = Tree::with_root(Node {
        id: project_id.to_string(),
        label: project_id.to_string(),
        kind: NodeKind::Project {
            status: ProjectStatus::Idle,
        },
        parent: None,
        children: Vec::new(),
    });

    let mut task_nodes: HashMap<&str, NodeId> = HashMap::with_capacity(entries.len());
    let mut inline: HashSet<&str> = HashSet::new();
    for entry in &entries {
        let latest = index.latest_for_task(entry.id);
        let roots = placement.task_roots.get(entry.id);
        let inline_latest_run = match (latest, roots) {
            (Some(latest), Some(roots)) => {
                roots.len() == 1
                    && roots[0].id == latest.id
                    && placement
                        .children
                        .get(latest.id.as_str())
                        .map_or(true, |children| children.is_empty())
            }
            _ => false,
        };
        if inline_latest_run {
            inline.insert(entry.id);
        }
        let node_id = tree.push(task_node(entry, &index, latest, inline_latest_run));
        task_nodes.insert(entry.id, node_id);
    }

    for entry in &entries {
        let node_id = task_nodes[entry.id];
        let parent_id = attached
            .get(entry.id)
            .and_then(|parent| task_nodes.get(parent))
            .copied()
            .unwrap_or(tree.root_id());
        tree.node_mut(node_id).parent = Some(parent_id);
        tree.node_mut(parent_id).children.push(node_id);
    }

    for entry in &entries {
        if inline.contains(entry.id) {
            continue;
        }
        let Some(roots) = placement.task_roots.get(entry.id) else {
            continue;
        };
        let task_node_id = task_nodes[entry.id];
        let mut stack: Vec<(&FlatRun, NodeId)> =
            roots.iter().rev().map(|run| (*run, task_node_id)).collect();
        while let Some((run, parent_id)) = stack.pop() {
            let node_id = tree.push(run_node(run, parent_id));
            tree.node_mut(parent_id).children.push(node_id);
            if let Some(children) = placement.children.get(run.id.as_str()) {
                stack.extend(children.iter().rev().map(|child| (*child, node_id)));
            }
        }
    }

    let root_statuses: Vec<TaskStatus> = tree
        .children(tree.root_id())
        .filter_map(|node| node.as_task().map(|task| task.status))
        .collect();
    let project_status = if root_statuses.contains(&TaskStatus::Running) {
        ProjectStatus::Running
    } else if root_statuses.contains(&TaskStatus::Queued) {
        ProjectStatus::Queued
    } else {
        ProjectStatus::Idle
    };
    let root_id = tree.root_id();
    tree.node_mut(root_id).kind = NodeKind::Project {
        status: project_status,
    };

    tree
}

/// Resolves each task's parent, refusing any attachment that would close a cycle.
fn attach_tasks<'a>(
    entries: &[TaskEntry<'a>],
    parent_task: &HashMap<&'a str, &'a str>,
) -> HashMap<&'a str, &'a str> {
    let mut attached: HashMap<&str, &str> = HashMap::new();
    let bound = entries.len() + 1;
    for entry in entries {
        let Some(parent) = parent_task.get(entry.id).copied() else {
            continue;
        };
        let mut cursor = Some(parent);
        let mut steps = 0;
        let mut closes_cycle = false;
        while let Some(current) = cursor {
            if current == entry.id || steps > bound {
                closes_cycle = true;
                break;
            }
            cursor = attached.get(current).copied();
            steps += 1;
        }
        if !closes_cycle {
            attached.insert(entry.id, parent);
        }
    }
    attached
}

struct Placement<'a> {
    task_roots: HashMap<&'a str, Vec<&'a FlatRun>>,
    children: HashMap<&'a str, Vec<&'a FlatRun>>,
}

/// Decides where each run hangs. A run is placed once; the first claim wins.
fn place_runs<'a>(entries: &[TaskEntry<'a>], index: &RunIndex<'a>) -> Placement<'a> {
    let mut placement = Placement {
        task_roots: HashMap::new(),
        children: HashMap::new(),
    };
    let mut placed: HashSet<&str> = HashSet::with_capacity(index.ordered.len());

    let mut roots: Vec<&FlatRun> = Vec::new();
    for entry in entries {
        if let Some(runs) = index.by_task.get(entry.id) {
            roots.extend(runs.iter().copied().filter(|run| index.is_root(run)));
        }
    }
    for run in roots {
        place_subtree(run, index, &mut placed, &mut placement);
    }

    // Runs only reachable through a cycle become roots of their own task.
    for run in index.ordered.iter().copied() {
        place_subtree(run, index, &mut placed, &mut placement);
    }

    for runs in placement.task_roots.values_mut() {
        runs.sort_by(|a, b| run_order(a, b));
    }
    placement
}

fn place_subtree<'a>(
    root: &'a FlatRun,
    index: &RunIndex<'a>,
    placed: &mut HashSet<&'a str>,
    placement: &mut Placement<'a>,
) {
    if !placed.insert(root.id.as_str()) {
        return;
    }
    placement
        .task_roots
        .entry(root.task_id.as_str())
        .or_default()
        .push(root);
    let mut stack = vec![root];
    while let Some(run) = stack.pop() {
        let claimed: Vec<&FlatRun> = index
            .child_candidates(run)
            .into_iter()
            .filter(|candidate| placed.insert(candidate.id.as_str()))
            .collect();
        if claimed.is_empty() {
            continue;
        }
        stack.extend(claimed.iter().rev().copied());
        placement.children.insert(run.id.as_str(), claimed);
    }
}

fn task_node(
    entry: &TaskEntry<'_>,
    index: &RunIndex<'_>,
    latest: Option<&FlatRun>,
    inline_latest_run: bool,
) -> Node {
    let (status, last_activity) = match entry.record {
        Some(task) => (task.status, task.last_activity.clone()),
        None => (
            derive_task_status(index.by_task.get(entry.id).map(Vec::as_slice).unwrap_or(&[]), latest),
            latest
                .map(|run| run.activity_time().to_string())
                .unwrap_or_default(),
        ),
    };
    Node {
        id: entry.id.to_string(),
        label: task_label(entry.id),
        kind: NodeKind::Task(TaskNode {
            status,
            last_activity,
            latest_run: latest.map(|run| LatestRun {
                id: run.id.clone(),
                agent: run.agent.clone(),
                status: run.status,
                start_time: run.start_time.clone(),
                end_time: run.end_time.clone(),
            }),
            inline_latest_run,
        }),
        parent: None,
        children: Vec::new(),
    }
}

fn run_node(run: &FlatRun, parent: NodeId) -> Node {
    Node {
        id: run.id.clone(),
        label: run_label(&run.agent, &run.id),
        kind: NodeKind::Run(RunNode {
            task_id: run.task_id.clone(),
            agent: run.agent.clone(),
            status: run.status,
            start_time: run.start_time.clone(),
            end_time: run.end_time.clone(),
            parent_run_id: run.parent_run_id.clone(),
            previous_run_id: run.previous_run_id.clone(),
        }),
        parent: Some(parent),
        children: Vec::new(),
    }
}

fn derive_task_status(runs: &[&FlatRun], latest: Option<&FlatRun>) -> TaskStatus {
    if runs.iter().any(|run| run.status == RunStatus::Running) {
        return TaskStatus::Running;
    }
    if runs.iter().any(|run| run.status == RunStatus::Queued) {
        return TaskStatus::Queued;
    }
    latest
        .map(|run| TaskStatus::from(run.status))
        .unwrap_or(TaskStatus::Unknown)
}

fn task_id_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^task-\d{8}-\d{6}-").expect("valid regex"))
}

pub(crate) fn task_label(task_id: &str) -> String {
    let stripped = task_id_prefix().replace(task_id, "");
    if stripped.is_empty() {
        task_id.to_string()
    } else {
        stripped.into_owned()
    }
}

pub(crate) fn run_label(agent: &str, run_id: &str) -> String {
    let short_id = if run_id.chars().count() > SHORT_RUN_ID_CHARS {
        let mut short: String = run_id.chars().take(SHORT_RUN_ID_CHARS).collect();
        short.push('…');
        short
    } else {
        run_id.to_string()
    };
    format!("[{agent}] {short_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus, last_activity: &str) -> Task {
        Task::new(id, status, last_activity)
    }

    fn run(id: &str, task_id: &str, status: RunStatus, start: &str) -> FlatRun {
        let mut run = FlatRun::new(id, task_id, status, start);
        run.agent = "codex".to_string();
        run
    }

    fn ended(mut run: FlatRun, end: &str) -> FlatRun {
        run.end_time = Some(end.to_string());
        run
    }

    fn with_parent(mut run: FlatRun, parent: &str) -> FlatRun {
        run.parent_run_id = Some(parent.to_string());
        run
    }

    fn with_previous(mut run: FlatRun, previous: &str) -> FlatRun {
        run.previous_run_id = Some(previous.to_string());
        run
    }

    #[test]
    fn empty_inputs_yield_bare_project() {
        let tree = build_tree("proj", &[], &[]);
        assert_eq!(tree.len(), 1);
        assert!(tree.is_empty());
        assert_eq!(tree.project_status(), ProjectStatus::Idle);
    }

    #[test]
    fn single_running_run_is_inlined() {
        let tasks = vec![task("t1", TaskStatus::Running, "2026-01-01T12:00:00Z")];
        let runs = vec![run("r1", "t1", RunStatus::Running, "2026-01-01T12:00:00Z")];
        let tree = build_tree("proj", &tasks, &runs);

        assert_eq!(tree.child_ids(tree.root_id()), vec!["t1"]);
        let task_id = tree.find_task("t1").expect("task node");
        let node = tree.node(task_id).expect("node");
        let task_node = node.as_task().expect("task kind");
        assert!(task_node.inline_latest_run);
        assert!(node.children.is_empty());
        assert_eq!(
            task_node.latest_run.as_ref().map(|latest| latest.id.as_str()),
            Some("r1")
        );
        assert_eq!(tree.project_status(), ProjectStatus::Running);
    }

    #[test]
    fn restart_chain_nests_superseded_runs() {
        let tasks = vec![task("t1", TaskStatus::Failed, "2026-02-21T23:06:00Z")];
        let runs = vec![
            ended(run("run-1", "t1", RunStatus::Failed, "2026-02-21T23:00:00Z"), "2026-02-21T23:01:00Z"),
            with_previous(
                ended(run("run-2", "t1", RunStatus::Failed, "2026-02-21T23:02:00Z"), "2026-02-21T23:03:00Z"),
                "run-1",
            ),
        ];
        let tree = build_tree("proj", &tasks, &runs);
        let task_id = tree.find_task("t1").expect("task");
        assert_eq!(tree.child_ids(task_id), vec!["run-2"]);
        let run_2 = tree.find_run("run-2").expect("run-2");
        assert_eq!(tree.child_ids(run_2), vec!["run-1"]);
        let task_node = tree.node(task_id).and_then(Node::as_task).expect("task kind");
        assert!(!task_node.inline_latest_run);
    }

    #[test]
    fn sibling_order_ignores_input_permutation() {
        let at = "2026-02-22T10:00:00Z";
        let a = task("A", TaskStatus::Completed, at);
        let b = task("B", TaskStatus::Completed, at);
        let c = task("C", TaskStatus::Completed, at);
        let forward = build_tree("proj", &[a.clone(), b.clone(), c.clone()], &[]);
        let backward = build_tree("proj", &[c, a, b], &[]);
        assert_eq!(forward.child_ids(0), vec!["A", "B", "C"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn later_runs_do_not_reorder_tasks() {
        let tasks = vec![
            task("A", TaskStatus::Completed, "2026-02-22T09:00:00Z"),
            task("B", TaskStatus::Completed, "2026-02-22T10:00:00Z"),
        ];
        let runs = vec![ended(
            run("run-a", "A", RunStatus::Completed, "2026-02-22T09:00:00Z"),
            "2026-02-22T11:00:00Z",
        )];
        let tree = build_tree("proj", &tasks, &runs);
        assert_eq!(tree.child_ids(0), vec!["B", "A"]);
    }

    #[test]
    fn mutual_thread_parents_do_not_loop() {
        let mut a = task("A", TaskStatus::Running, "2026-02-22T10:00:00Z");
        let mut b = task("B", TaskStatus::Running, "2026-02-22T09:00:00Z");
        a.thread_parent = Some(cmon_core::ThreadParent {
            task_id: "B".to_string(),
            ..Default::default()
        });
        b.thread_parent = Some(cmon_core::ThreadParent {
            task_id: "A".to_string(),
            ..Default::default()
        });
        let tree = build_tree("proj", &[a, b], &[]);
        assert!(tree.find_task("A").is_some());
        assert!(tree.find_task("B").is_some());
        assert_eq!(tree.child_ids(0), vec!["B"]);
        let b_id = tree.find_task("B").expect("B");
        assert_eq!(tree.child_ids(b_id), vec!["A"]);
    }

    #[test]
    fn thread_parent_from_other_project_is_ignored() {
        let root = task("root", TaskStatus::Running, "2026-02-22T10:00:00Z");
        let mut child = task("child", TaskStatus::Running, "2026-02-22T09:00:00Z");
        child.thread_parent = Some(cmon_core::ThreadParent {
            project_id: "elsewhere".to_string(),
            task_id: "root".to_string(),
            ..Default::default()
        });
        let tree = build_tree("proj", &[root, child], &[]);
        assert_eq!(tree.child_ids(0), vec!["root", "child"]);
    }

    #[test]
    fn dangling_links_fall_back_to_root_placement() {
        let tasks = vec![task("t1", TaskStatus::Completed, "2026-02-22T10:00:00Z")];
        let runs = vec![
            with_parent(run("r1", "t1", RunStatus::Completed, "2026-02-22T09:00:00Z"), "ghost"),
            with_previous(run("r2", "t1", RunStatus::Completed, "2026-02-22T09:30:00Z"), "missing"),
        ];
        let tree = build_tree("proj", &tasks, &runs);
        let task_id = tree.find_task("t1").expect("task");
        assert_eq!(tree.child_ids(task_id), vec!["r1", "r2"]);
    }

    #[test]
    fn run_cycles_are_placed_once() {
        let tasks = vec![task("t1", TaskStatus::Completed, "2026-02-22T10:00:00Z")];
        let runs = vec![
            with_parent(run("r1", "t1", RunStatus::Completed, "2026-02-22T09:00:00Z"), "r2"),
            with_parent(run("r2", "t1", RunStatus::Completed, "2026-02-22T09:30:00Z"), "r1"),
        ];
        let tree = build_tree("proj", &tasks, &runs);
        let run_nodes = tree.nodes().filter(|(_, node)| node.is_run()).count();
        assert_eq!(run_nodes, 2);
        let task_id = tree.find_task("t1").expect("task");
        assert_eq!(tree.child_ids(task_id), vec!["r1"]);
    }

    #[test]
    fn tasks_known_only_from_runs_get_a_row() {
        let runs = vec![run("r1", "orphan-task", RunStatus::Queued, "2026-02-22T09:00:00Z")];
        let tree = build_tree("proj", &[], &runs);
        let task_id = tree.find_task("orphan-task").expect("fallback task row");
        let task_node = tree.node(task_id).and_then(Node::as_task).expect("task kind");
        assert_eq!(task_node.status, TaskStatus::Queued);
        assert_eq!(tree.project_status(), ProjectStatus::Queued);
    }

    #[test]
    fn labels_strip_task_prefix_and_shorten_run_ids() {
        assert_eq!(task_label("task-20260221-210000-ui-density"), "ui-density");
        assert_eq!(task_label("plain-task"), "plain-task");
        assert_eq!(run_label("codex", "run-002"), "[codex] run-002");
        assert_eq!(
            run_label("claude", "run-20260221-210000-0123456789"),
            "[claude] run-20260221-210000-…"
        );
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let tasks = vec![
            task("t1", TaskStatus::Running, "2026-02-22T10:00:00Z"),
            task("t2", TaskStatus::Completed, "2026-02-22T09:00:00Z"),
        ];
        let runs = vec![
            run("r1", "t1", RunStatus::Running, "2026-02-22T09:00:00Z"),
            with_parent(run("r2", "t2", RunStatus::Completed, "2026-02-22T09:10:00Z"), "r1"),
        ];
        assert_eq!(build_tree("proj", &tasks, &runs), build_tree("proj", &tasks, &runs));
    }
}
