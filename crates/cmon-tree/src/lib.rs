//! Project → task → run hierarchy built from flat task and run slices.
//!
//! The tree is an arena: nodes live in one `Vec` and refer to each other by
//! index, so `thread_parent` and `parent_run_id` back-references never turn
//! into ownership cycles.

use cmon_core::{RunStatus, TaskStatus};
use serde::Serialize;

mod build;
mod path;
mod select;

pub use build::build_tree;
pub use path::build_selection_path_node_ids;
pub use select::select_tree_runs;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Running,
    Queued,
    Idle,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Running => "running",
            ProjectStatus::Queued => "queued",
            ProjectStatus::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LatestRun {
    pub id: String,
    pub agent: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskNode {
    pub status: TaskStatus,
    pub last_activity: String,
    pub latest_run: Option<LatestRun>,
    /// Rendering hint: the task's single run is folded into the task row.
    pub inline_latest_run: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunNode {
    pub task_id: String,
    pub agent: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: Option<String>,
    pub parent_run_id: Option<String>,
    pub previous_run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Project { status: ProjectStatus },
    Task(TaskNode),
    Run(RunNode),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn is_task(&self) -> bool {
        matches!(self.kind, NodeKind::Task(_))
    }

    pub fn is_run(&self) -> bool {
        matches!(self.kind, NodeKind::Run(_))
    }

    pub fn as_task(&self) -> Option<&TaskNode> {
        match &self.kind {
            NodeKind::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_run(&self) -> Option<&RunNode> {
        match &self.kind {
            NodeKind::Run(run) => Some(run),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Project { .. } => "project",
            NodeKind::Task(_) => "task",
            NodeKind::Run(_) => "run",
        }
    }
}

/// Arena-backed tree. Index 0 is always the project node.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn with_root(root: Node) -> Self {
        Self { nodes: vec![root] }
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn root_id(&self) -> NodeId {
        0
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(*child))
    }

    pub fn child_ids(&self, id: NodeId) -> Vec<&str> {
        self.children(id).map(|node| node.id.as_str()).collect()
    }

    pub fn project_status(&self) -> ProjectStatus {
        match self.root().kind {
            NodeKind::Project { status } => status,
            _ => ProjectStatus::Idle,
        }
    }

    pub fn find_task(&self, task_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.is_task() && node.id == task_id)
    }

    pub fn find_run(&self, run_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.is_run() && node.id == run_id)
    }

    /// Indented `kind id` lines in display order, one per visible node.
    pub fn outline(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root_id(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let mut line = format!("{}{} {}", "  ".repeat(depth), node.kind_name(), node.id);
            if let NodeKind::Task(task) = &node.kind {
                if task.inline_latest_run {
                    if let Some(latest) = &task.latest_run {
                        line.push_str(&format!(" [inline {}]", latest.id));
                    }
                }
            }
            lines.push(line);
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        lines
    }
}
