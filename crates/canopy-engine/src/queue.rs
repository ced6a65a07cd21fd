//! Per-node operation queues and the sibling-concurrency scheduler gate.

use serde::{Deserialize, Serialize};

use canopy_catalog::OperationDef;
use canopy_types::{CanopyError, Result, RunMode};

use crate::graph::{ContainerGraph, ContainerNode, NodeIndex};

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

/// Status lattice: `pending -> running -> {done | failed | skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Done => "done",
            OperationStatus::Failed => "failed",
            OperationStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Done | OperationStatus::Failed | OperationStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::Running)
                | (OperationStatus::Running, OperationStatus::Done)
                | (OperationStatus::Running, OperationStatus::Failed)
                | (OperationStatus::Running, OperationStatus::Skipped)
        )
    }
}

// ---------------------------------------------------------------------------
// OperationInstance
// ---------------------------------------------------------------------------

/// One seeded operation of a node's queue. Never recycled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationInstance {
    pub definition: OperationDef,
    status: OperationStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

impl OperationInstance {
    pub fn new(definition: OperationDef) -> Self {
        Self {
            definition,
            status: OperationStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn op_type(&self) -> &str {
        &self.definition.op_type
    }

    fn transition(&mut self, next: OperationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CanopyError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(OperationStatus::Running)
    }

    pub fn mark_done(&mut self, result: serde_json::Value) -> Result<()> {
        self.transition(OperationStatus::Done)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(OperationStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(OperationStatus::Skipped)?;
        self.error = Some(reason.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OperationQueue
// ---------------------------------------------------------------------------

/// FIFO of operation instances in definition order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OperationQueue {
    ops: Vec<OperationInstance>,
}

/// Seed a queue from a definition's operations; an empty list becomes a
/// single implicit `find-child`.
pub fn build_default_queue(definitions: &[OperationDef]) -> OperationQueue {
    let ops = if definitions.is_empty() {
        vec![OperationInstance::new(OperationDef::find_child())]
    } else {
        definitions.iter().cloned().map(OperationInstance::new).collect()
    };
    OperationQueue { ops }
}

impl OperationQueue {
    /// Index of the first pending instance.
    pub fn next_runnable(&self) -> Option<usize> {
        self.ops
            .iter()
            .position(|op| op.status == OperationStatus::Pending)
    }

    pub fn get(&self, index: usize) -> Option<&OperationInstance> {
        self.ops.get(index)
    }

    fn instance_mut(&mut self, index: usize) -> Result<&mut OperationInstance> {
        let len = self.ops.len();
        self.ops.get_mut(index).ok_or_else(|| {
            CanopyError::Other(format!("operation index {index} out of range ({len} queued)"))
        })
    }

    pub fn mark_running(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.mark_running()
    }

    pub fn mark_done(&mut self, index: usize, result: serde_json::Value) -> Result<()> {
        self.instance_mut(index)?.mark_done(result)
    }

    pub fn mark_failed(&mut self, index: usize, error: impl Into<String>) -> Result<()> {
        self.instance_mut(index)?.mark_failed(error)
    }

    pub fn mark_skipped(&mut self, index: usize, reason: impl Into<String>) -> Result<()> {
        self.instance_mut(index)?.mark_skipped(reason)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationInstance> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.next_runnable().is_some()
    }

    pub fn has_running(&self) -> bool {
        self.ops.iter().any(|op| op.status == OperationStatus::Running)
    }

    /// Every instance has reached a terminal status.
    pub fn is_drained(&self) -> bool {
        self.ops.iter().all(|op| op.status.is_terminal())
    }

    pub fn count(&self, status: OperationStatus) -> usize {
        self.ops.iter().filter(|op| op.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Sibling-concurrency gate.
///
/// A container's run mode governs how its children are scheduled: children of
/// a `sequential` container run one at a time, children of a `parallel`
/// container run up to its `concurrency` hint (or the configured maximum).
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_parallel: usize,
}

impl Scheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Whether `node` may start its next operation under run `mode`.
    pub fn can_run(&self, graph: &ContainerGraph, node: NodeIndex, mode: RunMode) -> bool {
        match mode {
            RunMode::Sequential => true,
            RunMode::Parallel => {
                // Operations within one node stay strictly ordered.
                if graph.node_at(node).queue.has_running() {
                    return false;
                }
                let Some(parent) = graph.parent_of(node) else {
                    return true;
                };
                let limit = self.sibling_limit(graph.node_at(parent));
                let running = graph
                    .node_at(parent)
                    .children()
                    .iter()
                    .filter(|c| graph.node_at(**c).queue.has_running())
                    .count();
                running < limit
            }
        }
    }

    fn sibling_limit(&self, parent: &ContainerNode) -> usize {
        match parent.run_mode {
            RunMode::Sequential => 1,
            RunMode::Parallel => parent
                .definition
                .hints
                .concurrency
                .unwrap_or(self.max_parallel)
                .max(1),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
