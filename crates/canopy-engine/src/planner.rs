//! Static execution planning over a discovered graph.

use serde::Serialize;

use canopy_types::{CanopyError, Result, RunMode};

use crate::graph::{ContainerGraph, NodeIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub container_id: String,
    pub op_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub order: Vec<PlanStep>,
    pub mode: RunMode,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Distinct container ids in visitation order.
    pub fn containers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for step in &self.order {
            if out.last() != Some(&step.container_id.as_str()) {
                out.push(&step.container_id);
            }
        }
        out
    }
}

/// Depth-first order from `root_id` along parent→child edges.
///
/// One step per (container, operation index). Each container is visited once;
/// containers it depends on are visited first when they are in the graph.
pub fn build_plan(graph: &ContainerGraph, root_id: &str, mode: RunMode) -> Result<ExecutionPlan> {
    let root = graph
        .index_of(root_id)
        .ok_or_else(|| CanopyError::UnknownContainer { id: root_id.to_string() })?;

    let mut visited = vec![false; graph.len()];
    let mut order = Vec::new();
    let mut stack = vec![Frame::Enter(root)];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(node) => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                // Pushed in reverse: dependencies pop first, then the node, then its children.
                stack.extend(graph.children_of(node).iter().rev().map(|c| Frame::Enter(*c)));
                stack.push(Frame::Emit(node));
                let deps: Vec<NodeIndex> = graph.depends_of(node).collect();
                stack.extend(deps.into_iter().rev().map(Frame::Enter));
            }
            Frame::Emit(node) => {
                let container = graph.node_at(node);
                order.extend((0..container.queue.len()).map(|op_index| PlanStep {
                    container_id: container.id().to_string(),
                    op_index,
                }));
            }
        }
    }

    tracing::debug!(root = %root_id, mode = %mode, steps = order.len(), "Execution plan built");
    Ok(ExecutionPlan { order, mode })
}

enum Frame {
    Enter(NodeIndex),
    Emit(NodeIndex),
}
