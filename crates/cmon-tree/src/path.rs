use crate::{NodeKind, Tree};
use std::collections::HashSet;

/// Ids of every node between the selected task/run and the project root,
/// inclusive, computed in one post-order pass over the tree.
///
/// A run folded into an inline task row is not a node, so it never appears;
/// its task does when selected.
pub fn build_selection_path_node_ids(
    tree: &Tree,
    selected_task_id: Option<&str>,
    selected_run_id: Option<&str>,
) -> HashSet<String> {
    let selected_task_id = selected_task_id.filter(|id| !id.is_empty());
    let selected_run_id = selected_run_id.filter(|id| !id.is_empty());
    let mut path = HashSet::new();
    if selected_task_id.is_none() && selected_run_id.is_none() {
        return path;
    }

    let mut on_path = vec![false; tree.len()];
    let mut stack = vec![(tree.root_id(), false)];
    while let Some((id, expanded)) = stack.pop() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        if !expanded {
            stack.push((id, true));
            stack.extend(node.children.iter().map(|child| (*child, false)));
            continue;
        }
        let is_target = match node.kind {
            NodeKind::Task(_) => selected_task_id == Some(node.id.as_str()),
            NodeKind::Run(_) => selected_run_id == Some(node.id.as_str()),
            NodeKind::Project { .. } => false,
        };
        let hit = is_target || node.children.iter().any(|child| on_path[*child]);
        if hit {
            on_path[id] = true;
            path.insert(node.id.clone());
        }
    }
    path
}
