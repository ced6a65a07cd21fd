//! Relationship registry: parent→child and dependency edges over a
//! [`ContainerGraph`], kept in step with each node's `children` list.

use std::collections::HashSet;

use canopy_types::{CanopyError, Result};

use crate::graph::{ContainerGraph, NodeIndex};

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

impl ContainerGraph {
    /// Link `child` under `parent`. Idempotent per pair; returns `true` when a
    /// new edge was recorded.
    pub fn add_parent_child(&mut self, parent: NodeIndex, child: NodeIndex) -> bool {
        let new_edge = !self.parent_to_child.contains(&(parent, child));
        if new_edge {
            self.parent_to_child.push((parent, child));
        }
        let listed = self.node_at_mut(parent).push_child(child);
        new_edge || listed
    }

    /// Id-based variant of [`ContainerGraph::add_parent_child`].
    pub fn link(&mut self, parent_id: &str, child_id: &str) -> Result<bool> {
        let parent = self
            .index_of(parent_id)
            .ok_or_else(|| CanopyError::UnknownParent { id: parent_id.to_string() })?;
        let child = self
            .index_of(child_id)
            .ok_or_else(|| CanopyError::UnknownContainer { id: child_id.to_string() })?;
        Ok(self.add_parent_child(parent, child))
    }

    /// Record that `from` depends on `to`. Consulted by the planner only.
    pub fn add_depends(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        if self.depends.contains(&(from, to)) {
            return false;
        }
        self.depends.push((from, to));
        true
    }

    /// Targets `idx` depends on, in registration order.
    pub fn depends_of(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.depends
            .iter()
            .filter(move |(from, _)| *from == idx)
            .map(|(_, to)| *to)
    }

    /// Depth-first color marking over parent→child edges.
    pub fn has_cycle(&self) -> bool {
        let mut color = vec![Color::White; self.len()];
        for start in self.indices() {
            if color[start.index()] != Color::White {
                continue;
            }
            // Explicit stack of (node, next child offset)
            let mut stack: Vec<(NodeIndex, usize)> = vec![(start, 0)];
            color[start.index()] = Color::Gray;
            while let Some((node, offset)) = stack.pop() {
                let children = self.children_of(node);
                if offset < children.len() {
                    stack.push((node, offset + 1));
                    let next = children[offset];
                    match color[next.index()] {
                        Color::Gray => return true,
                        Color::White => {
                            color[next.index()] = Color::Gray;
                            stack.push((next, 0));
                        }
                        Color::Black => {}
                    }
                } else {
                    color[node.index()] = Color::Black;
                }
            }
        }
        false
    }

    /// Check that `children` lists and parent→child edges agree.
    pub fn check_consistency(&self) -> Result<()> {
        let edges: HashSet<(NodeIndex, NodeIndex)> = self.parent_to_child.iter().copied().collect();
        for &(parent, child) in &edges {
            if parent.index() >= self.len() || child.index() >= self.len() {
                return Err(CanopyError::Other(format!(
                    "edge {}→{} references a missing node",
                    parent.index(),
                    child.index()
                )));
            }
            if !self.children_of(parent).contains(&child) {
                return Err(CanopyError::Other(format!(
                    "edge {}→{} missing from children list",
                    self.node_at(parent).id(),
                    self.node_at(child).id()
                )));
            }
        }
        for parent in self.indices() {
            for &child in self.children_of(parent) {
                if !edges.contains(&(parent, child)) {
                    return Err(CanopyError::Other(format!(
                        "child {} of {} has no parent→child edge",
                        self.node_at(child).id(),
                        self.node_at(parent).id()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ContainerNode;
    use canopy_catalog::ContainerDefinition;
    use canopy_types::ElementHandle;
    use std::sync::Arc;

    fn graph_of(ids: &[&str]) -> (ContainerGraph, Vec<NodeIndex>) {
        let mut graph = ContainerGraph::new();
        let idx = ids
            .iter()
            .map(|id| {
                let def = ContainerDefinition::new(*id, &[*id]);
                graph
                    .insert(ContainerNode::located(Arc::new(def), ElementHandle::new(*id)))
                    .0
            })
            .collect();
        (graph, idx)
    }

    #[test]
    fn add_parent_child_is_idempotent() {
        let (mut graph, n) = graph_of(&["r", "c"]);
        assert!(graph.add_parent_child(n[0], n[1]));
        assert!(!graph.add_parent_child(n[0], n[1]));
        assert_eq!(graph.parent_to_child().len(), 1);
        assert_eq!(graph.children_of(n[0]), &[n[1]]);
        assert_eq!(graph.parent_of(n[1]), Some(n[0]));
        graph.check_consistency().unwrap();
    }

    #[test]
    fn second_parent_adds_edge_but_keeps_first() {
        let (mut graph, n) = graph_of(&["a", "b", "shared"]);
        graph.add_parent_child(n[0], n[2]);
        graph.add_parent_child(n[1], n[2]);
        assert_eq!(graph.parent_to_child().len(), 2);
        assert_eq!(graph.parent_of(n[2]), Some(n[0]));
        assert_eq!(graph.child_ids("b"), vec!["shared"]);
        graph.check_consistency().unwrap();
    }

    #[test]
    fn link_by_id_reports_unknown_ids() {
        let (mut graph, _) = graph_of(&["r", "c"]);
        assert!(graph.link("r", "c").unwrap());
        assert!(matches!(
            graph.link("ghost", "c"),
            Err(CanopyError::UnknownParent { .. })
        ));
        assert!(matches!(
            graph.link("r", "ghost"),
            Err(CanopyError::UnknownContainer { .. })
        ));
        assert_eq!(graph.edge_ids(), vec![("r", "c")]);
    }

    #[test]
    fn depends_edges_are_deduped() {
        let (mut graph, n) = graph_of(&["a", "b", "c"]);
        assert!(graph.add_depends(n[0], n[1]));
        assert!(!graph.add_depends(n[0], n[1]));
        graph.add_depends(n[0], n[2]);
        let targets: Vec<NodeIndex> = graph.depends_of(n[0]).collect();
        assert_eq!(targets, vec![n[1], n[2]]);
        assert_eq!(graph.depends_of(n[1]).count(), 0);
    }

    #[test]
    fn detects_cycle() {
        let (mut graph, n) = graph_of(&["a", "b", "c"]);
        graph.add_parent_child(n[0], n[1]);
        graph.add_parent_child(n[1], n[2]);
        assert!(!graph.has_cycle());
        graph.add_parent_child(n[2], n[0]);
        assert!(graph.has_cycle());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let (mut graph, n) = graph_of(&["a", "b", "c", "d"]);
        graph.add_parent_child(n[0], n[1]);
        graph.add_parent_child(n[0], n[2]);
        graph.add_parent_child(n[1], n[3]);
        graph.add_parent_child(n[2], n[3]);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (mut graph, n) = graph_of(&["a"]);
        graph.add_parent_child(n[0], n[0]);
        assert!(graph.has_cycle());
    }
}
