use cmon_core::{FlatRun, RunStatus, Task, TaskStatus, ThreadParent};
use cmon_tree::{build_tree, select_tree_runs, Tree};

fn task(id: &str, status: TaskStatus, last_activity: &str) -> Task {
    Task::new(id, status, last_activity)
}

fn run(id: &str, task_id: &str, status: RunStatus, start: &str, end: Option<&str>) -> FlatRun {
    let mut run = FlatRun::new(id, task_id, status, start);
    run.agent = "codex".to_string();
    run.end_time = end.map(str::to_string);
    run
}

fn child_of(mut run: FlatRun, parent: &str) -> FlatRun {
    run.parent_run_id = Some(parent.to_string());
    run
}

fn restart_of(mut run: FlatRun, previous: &str) -> FlatRun {
    run.previous_run_id = Some(previous.to_string());
    run
}

fn thread_child(mut task: Task, parent: &str) -> Task {
    task.thread_parent = Some(ThreadParent {
        project_id: "conductor-loop".to_string(),
        task_id: parent.to_string(),
        run_id: String::new(),
        message_id: String::new(),
    });
    task
}

fn ids(runs: &[FlatRun]) -> Vec<&str> {
    runs.iter().map(|run| run.id.as_str()).collect()
}

fn task_children<'a>(tree: &'a Tree, task_id: &str) -> Vec<&'a str> {
    let node = tree.find_task(task_id).expect("task node");
    tree.children(node)
        .filter(|child| child.is_task())
        .map(|child| child.id.as_str())
        .collect()
}

fn three_level_tasks() -> Vec<Task> {
    vec![
        task("task-root", TaskStatus::Completed, "2026-02-22T21:05:00Z"),
        task("task-child", TaskStatus::Completed, "2026-02-22T21:07:00Z"),
        task("task-grandchild", TaskStatus::Failed, "2026-02-22T21:09:00Z"),
    ]
}

#[test]
fn selected_grandchild_keeps_lineage_after_parent_restart() {
    let tasks = three_level_tasks();
    let runs = vec![
        run("run-root", "task-root", RunStatus::Completed, "2026-02-22T21:00:00Z", Some("2026-02-22T21:01:00Z")),
        child_of(
            run("run-child-linked", "task-child", RunStatus::Completed, "2026-02-22T21:02:00Z", Some("2026-02-22T21:03:00Z")),
            "run-root",
        ),
        restart_of(
            run("run-child-restarted", "task-child", RunStatus::Completed, "2026-02-22T21:04:00Z", Some("2026-02-22T21:05:00Z")),
            "run-child-linked",
        ),
        child_of(
            run("run-grandchild-selected", "task-grandchild", RunStatus::Failed, "2026-02-22T21:06:00Z", Some("2026-02-22T21:07:00Z")),
            "run-child-restarted",
        ),
    ];

    let filtered = select_tree_runs(&tasks, &runs, Some("task-grandchild"));
    assert_eq!(
        ids(&filtered),
        vec!["run-root", "run-child-linked", "run-child-restarted", "run-grandchild-selected"]
    );

    let tree = build_tree("conductor-loop", &tasks, &filtered);
    assert_eq!(tree.child_ids(tree.root_id()), vec!["task-root"]);
    assert_eq!(task_children(&tree, "task-root"), vec!["task-child"]);
    assert_eq!(task_children(&tree, "task-child"), vec!["task-grandchild"]);
}

#[test]
fn selected_grandchild_bridges_through_detached_parent_run() {
    let tasks = three_level_tasks();
    let runs = vec![
        run("run-root", "task-root", RunStatus::Completed, "2026-02-22T21:00:00Z", Some("2026-02-22T21:01:00Z")),
        child_of(
            run("run-child-linked", "task-child", RunStatus::Completed, "2026-02-22T21:02:00Z", Some("2026-02-22T21:03:00Z")),
            "run-root",
        ),
        run("run-child-detached", "task-child", RunStatus::Completed, "2026-02-22T21:04:00Z", Some("2026-02-22T21:05:00Z")),
        child_of(
            run("run-grandchild-selected", "task-grandchild", RunStatus::Failed, "2026-02-22T21:06:00Z", Some("2026-02-22T21:07:00Z")),
            "run-child-detached",
        ),
    ];

    let filtered = select_tree_runs(&tasks, &runs, Some("task-grandchild"));
    assert_eq!(
        ids(&filtered),
        vec!["run-root", "run-child-linked", "run-child-detached", "run-grandchild-selected"]
    );

    let tree = build_tree("conductor-loop", &tasks, &filtered);
    assert_eq!(tree.child_ids(tree.root_id()), vec!["task-root"]);
    assert_eq!(task_children(&tree, "task-root"), vec!["task-child"]);
    assert_eq!(task_children(&tree, "task-child"), vec!["task-grandchild"]);
}

#[test]
fn selected_task_keeps_descendants_of_older_anchor_run() {
    let tasks = vec![
        task("task-root", TaskStatus::Completed, "2026-02-22T19:30:00Z"),
        task("task-selected", TaskStatus::Completed, "2026-02-22T19:33:00Z"),
        task("task-grandchild", TaskStatus::Completed, "2026-02-22T19:32:00Z"),
    ];
    let runs = vec![
        run("run-root", "task-root", RunStatus::Completed, "2026-02-22T19:30:00Z", Some("2026-02-22T19:30:30Z")),
        child_of(
            run("run-selected-old", "task-selected", RunStatus::Completed, "2026-02-22T19:31:00Z", Some("2026-02-22T19:31:30Z")),
            "run-root",
        ),
        child_of(
            run("run-grandchild", "task-grandchild", RunStatus::Completed, "2026-02-22T19:32:00Z", Some("2026-02-22T19:32:30Z")),
            "run-selected-old",
        ),
        restart_of(
            run("run-selected-new", "task-selected", RunStatus::Completed, "2026-02-22T19:33:00Z", Some("2026-02-22T19:33:30Z")),
            "run-selected-old",
        ),
    ];

    let filtered = select_tree_runs(&tasks, &runs, Some("task-selected"));
    assert_eq!(
        ids(&filtered),
        vec!["run-root", "run-selected-old", "run-grandchild", "run-selected-new"]
    );

    let tree = build_tree("conductor-loop", &tasks, &filtered);
    assert_eq!(tree.child_ids(tree.root_id()), vec!["task-root"]);
    assert_eq!(task_children(&tree, "task-root"), vec!["task-selected"]);
    assert_eq!(task_children(&tree, "task-selected"), vec!["task-grandchild"]);
}

#[test]
fn level_three_runs_nest_under_their_spawning_runs() {
    let tasks = vec![
        task("task-20260222-180000-root-review", TaskStatus::Running, "2026-02-22T18:05:00Z"),
        task("task-20260222-180100-child-audit", TaskStatus::Running, "2026-02-22T18:06:00Z"),
        task("task-20260222-180200-grandchild-check", TaskStatus::Running, "2026-02-22T18:07:00Z"),
    ];
    let runs = vec![
        run("run-root", "task-20260222-180000-root-review", RunStatus::Running, "2026-02-22T18:00:00Z", None),
        child_of(
            run("run-child", "task-20260222-180100-child-audit", RunStatus::Running, "2026-02-22T18:02:00Z", None),
            "run-root",
        ),
        child_of(
            run("run-grandchild", "task-20260222-180200-grandchild-check", RunStatus::Running, "2026-02-22T18:04:00Z", None),
            "run-child",
        ),
    ];

    let tree = build_tree("conductor-loop", &tasks, &runs);
    let root_task = tree.find_task("task-20260222-180000-root-review").expect("root task");
    assert_eq!(tree.child_ids(tree.root_id()), vec!["task-20260222-180000-root-review"]);
    assert_eq!(
        tree.child_ids(root_task),
        vec!["task-20260222-180100-child-audit", "run-root"]
    );
    assert_eq!(
        task_children(&tree, "task-20260222-180100-child-audit"),
        vec!["task-20260222-180200-grandchild-check"]
    );
    let run_root = tree.find_run("run-root").expect("run-root");
    assert_eq!(tree.child_ids(run_root), vec!["run-child"]);
    let run_child = tree.find_run("run-child").expect("run-child");
    assert_eq!(tree.child_ids(run_child), vec!["run-grandchild"]);
    assert_eq!(tree.root().label, "conductor-loop");
    let root_node = tree.node(root_task).expect("node");
    assert_eq!(root_node.label, "root-review");
}

#[test]
fn parent_restart_keeps_spawned_runs_under_the_superseded_run() {
    let tasks = vec![
        task("task-root", TaskStatus::Running, "2026-02-22T19:05:00Z"),
        task("task-child", TaskStatus::Running, "2026-02-22T19:03:00Z"),
    ];
    let runs = vec![
        run("run-root-1", "task-root", RunStatus::Completed, "2026-02-22T19:00:00Z", Some("2026-02-22T19:01:00Z")),
        child_of(
            run("run-child-1", "task-child", RunStatus::Running, "2026-02-22T19:02:00Z", None),
            "run-root-1",
        ),
        restart_of(
            run("run-root-2", "task-root", RunStatus::Running, "2026-02-22T19:04:00Z", None),
            "run-root-1",
        ),
    ];

    let tree = build_tree("conductor-loop", &tasks, &runs);
    let root_task = tree.find_task("task-root").expect("root task");
    assert_eq!(tree.child_ids(root_task), vec!["task-child", "run-root-2"]);
    let latest = tree.find_run("run-root-2").expect("run-root-2");
    assert_eq!(tree.child_ids(latest), vec!["run-root-1"]);
    let superseded = tree.find_run("run-root-1").expect("run-root-1");
    assert_eq!(tree.child_ids(superseded), vec!["run-child-1"]);
}

#[test]
fn latest_cross_task_edge_decides_inferred_parent() {
    let tasks = vec![
        task("task-root-a", TaskStatus::Completed, "2026-02-22T19:01:00Z"),
        task("task-root-b", TaskStatus::Completed, "2026-02-22T19:03:00Z"),
        task("task-child", TaskStatus::Completed, "2026-02-22T19:05:00Z"),
    ];
    let runs = vec![
        run("run-root-a", "task-root-a", RunStatus::Completed, "2026-02-22T19:00:00Z", Some("2026-02-22T19:01:00Z")),
        child_of(
            run("run-child-a", "task-child", RunStatus::Completed, "2026-02-22T19:01:30Z", Some("2026-02-22T19:02:30Z")),
            "run-root-a",
        ),
        run("run-root-b", "task-root-b", RunStatus::Completed, "2026-02-22T19:02:30Z", Some("2026-02-22T19:03:00Z")),
        child_of(
            run("run-child-b", "task-child", RunStatus::Completed, "2026-02-22T19:03:30Z", Some("2026-02-22T19:04:00Z")),
            "run-root-b",
        ),
    ];

    let tree = build_tree("conductor-loop", &tasks, &runs);
    assert_eq!(task_children(&tree, "task-root-b"), vec!["task-child"]);
    assert!(task_children(&tree, "task-root-a").is_empty());
}

#[test]
fn explicit_thread_parent_beats_run_edges() {
    let tasks = vec![
        task("task-thread-root", TaskStatus::Running, "2026-02-22T21:00:00Z"),
        thread_child(
            task("task-thread-child", TaskStatus::Running, "2026-02-22T21:01:00Z"),
            "task-thread-root",
        ),
        task("task-noise-parent", TaskStatus::Running, "2026-02-22T21:02:00Z"),
    ];
    let runs = vec![
        run("run-thread-root", "task-thread-root", RunStatus::Running, "2026-02-22T20:58:00Z", None),
        run("run-noise-parent", "task-noise-parent", RunStatus::Running, "2026-02-22T20:59:00Z", None),
        child_of(
            run("run-thread-child", "task-thread-child", RunStatus::Running, "2026-02-22T21:00:00Z", None),
            "run-noise-parent",
        ),
    ];

    let tree = build_tree("conductor-loop", &tasks, &runs);
    assert_eq!(task_children(&tree, "task-thread-root"), vec!["task-thread-child"]);
    assert!(task_children(&tree, "task-noise-parent").is_empty());
}

#[test]
fn missing_thread_parent_task_gets_a_placeholder_row() {
    let tasks = vec![
        thread_child(
            task("task-thread-child", TaskStatus::Running, "2026-02-22T21:01:00Z"),
            "task-thread-root",
        ),
        thread_child(
            task("task-thread-grandchild", TaskStatus::Running, "2026-02-22T21:02:00Z"),
            "task-thread-child",
        ),
    ];
    let runs = vec![
        run("run-thread-child", "task-thread-child", RunStatus::Running, "2026-02-22T20:59:00Z", None),
        run("run-thread-grandchild", "task-thread-grandchild", RunStatus::Running, "2026-02-22T21:00:00Z", None),
    ];

    let tree = build_tree("conductor-loop", &tasks, &runs);
    assert_eq!(tree.child_ids(tree.root_id()), vec!["task-thread-root"]);
    assert_eq!(task_children(&tree, "task-thread-root"), vec!["task-thread-child"]);
    assert_eq!(task_children(&tree, "task-thread-child"), vec!["task-thread-grandchild"]);
}

#[test]
fn threaded_parent_without_run_edges_still_nests() {
    let tasks = vec![
        task("task-thread-root", TaskStatus::Completed, "2026-02-22T21:18:00Z"),
        thread_child(
            task("task-thread-child", TaskStatus::Running, "2026-02-22T21:20:00Z"),
            "task-thread-root",
        ),
    ];
    let runs = vec![
        run("run-thread-root", "task-thread-root", RunStatus::Completed, "2026-02-22T21:10:00Z", Some("2026-02-22T21:12:00Z")),
        run("run-thread-child-active", "task-thread-child", RunStatus::Running, "2026-02-22T21:19:00Z", None),
    ];

    let filtered = select_tree_runs(&tasks, &runs, None);
    assert_eq!(ids(&filtered), vec!["run-thread-root", "run-thread-child-active"]);
    let tree = build_tree("conductor-loop", &tasks, &filtered);
    assert_eq!(task_children(&tree, "task-thread-root"), vec!["task-thread-child"]);
}

#[test]
fn tree_serializes_with_node_type_tags() {
    let tasks = vec![task("t1", TaskStatus::Running, "2026-01-01T12:00:00Z")];
    let runs = vec![run("r1", "t1", RunStatus::Running, "2026-01-01T12:00:00Z", None)];
    let tree = build_tree("proj", &tasks, &runs);
    let value = serde_json::to_value(&tree).expect("serialize tree");
    let nodes = value["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes[0]["kind"]["type"], "project");
    assert_eq!(nodes[1]["kind"]["type"], "task");
    assert_eq!(nodes[1]["kind"]["inline_latest_run"], true);
    assert_eq!(tree.outline(), vec!["project proj", "  task t1 [inline r1]"]);
}
