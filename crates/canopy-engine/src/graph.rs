//! Runtime container graph.
//!
//! Nodes live in a dense arena addressed by [`NodeIndex`]; edges are plain
//! index pairs. A node is never removed for the lifetime of a run.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use canopy_catalog::ContainerDefinition;
use canopy_types::{BoundingBox, ElementHandle, RunMode};

use crate::queue::{build_default_queue, OperationQueue};

/// Position of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    Unknown,
    Located,
    Stable,
    Failed,
}

impl DiscoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryState::Unknown => "unknown",
            DiscoveryState::Located => "located",
            DiscoveryState::Stable => "stable",
            DiscoveryState::Failed => "failed",
        }
    }
}

/// Adaptive counters accumulated during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub hits: u32,
    pub fails: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_reached: Option<bool>,
}

// ---------------------------------------------------------------------------
// ContainerNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContainerNode {
    pub definition: Arc<ContainerDefinition>,
    pub state: DiscoveryState,
    pub handle: ElementHandle,
    pub bbox: Option<BoundingBox>,
    pub visible: Option<bool>,
    pub score: Option<f64>,
    pub queue: OperationQueue,
    pub run_mode: RunMode,
    pub feedback: Feedback,
    children: Vec<NodeIndex>,
}

impl ContainerNode {
    /// A node in `unknown` state with its queue seeded from the definition.
    pub fn new(definition: Arc<ContainerDefinition>, handle: ElementHandle) -> Self {
        let queue = build_default_queue(&definition.operations);
        let run_mode = definition.run_mode;
        Self {
            definition,
            state: DiscoveryState::Unknown,
            handle,
            bbox: None,
            visible: None,
            score: None,
            queue,
            run_mode,
            feedback: Feedback::default(),
            children: Vec::new(),
        }
    }

    pub fn located(definition: Arc<ContainerDefinition>, handle: ElementHandle) -> Self {
        Self {
            state: DiscoveryState::Located,
            ..Self::new(definition, handle)
        }
    }

    pub fn with_geometry(mut self, bbox: Option<BoundingBox>, visible: bool, score: f64) -> Self {
        self.bbox = bbox;
        self.visible = Some(visible);
        self.score = Some(score);
        self
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Realized children, in discovery order.
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub(crate) fn push_child(&mut self, child: NodeIndex) -> bool {
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }

    pub fn is_located(&self) -> bool {
        matches!(self.state, DiscoveryState::Located | DiscoveryState::Stable)
    }
}

// ---------------------------------------------------------------------------
// Indices
// ---------------------------------------------------------------------------

/// Convenience lookups over definition attributes, grown on every insert.
#[derive(Debug, Clone, Default)]
struct GraphIndices {
    by_name: HashMap<String, Vec<NodeIndex>>,
    by_type: HashMap<String, Vec<NodeIndex>>,
    by_scope: HashMap<String, Vec<NodeIndex>>,
    by_capability: HashMap<String, Vec<NodeIndex>>,
    page_patterns: Vec<(Regex, NodeIndex)>,
}

impl GraphIndices {
    fn record(&mut self, idx: NodeIndex, def: &ContainerDefinition) {
        self.by_name.entry(def.name.clone()).or_default().push(idx);
        if let Some(kind) = &def.kind {
            self.by_type.entry(kind.clone()).or_default().push(idx);
        }
        if let Some(scope) = &def.scope {
            self.by_scope.entry(scope.clone()).or_default().push(idx);
        }
        for cap in &def.capabilities {
            self.by_capability.entry(cap.clone()).or_default().push(idx);
        }
        for pattern in &def.page_patterns {
            match Regex::new(pattern) {
                Ok(re) => self.page_patterns.push((re, idx)),
                Err(e) => tracing::warn!(
                    container = %def.id,
                    pattern = %pattern,
                    error = %e,
                    "Ignoring invalid page pattern"
                ),
            }
        }
    }
}

fn lookup<'a>(map: &'a HashMap<String, Vec<NodeIndex>>, key: &str) -> &'a [NodeIndex] {
    map.get(key).map(Vec::as_slice).unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// ContainerGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ContainerGraph {
    nodes: Vec<ContainerNode>,
    ids: HashMap<String, NodeIndex>,
    pub(crate) parent_to_child: Vec<(NodeIndex, NodeIndex)>,
    pub(crate) depends: Vec<(NodeIndex, NodeIndex)>,
    indices: GraphIndices,
}

impl ContainerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its index and whether it was newly added.
    ///
    /// The first node inserted under an id wins; a later insert with the same
    /// id returns the existing index and leaves the node untouched.
    pub fn insert(&mut self, node: ContainerNode) -> (NodeIndex, bool) {
        if let Some(&existing) = self.ids.get(node.id()) {
            return (existing, false);
        }
        let idx = NodeIndex(self.nodes.len());
        self.ids.insert(node.id().to_string(), idx);
        self.indices.record(idx, &node.definition);
        self.nodes.push(node);
        (idx, true)
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&ContainerNode> {
        self.index_of(id).map(|idx| &self.nodes[idx.0])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ContainerNode> {
        let idx = self.index_of(id)?;
        Some(&mut self.nodes[idx.0])
    }

    pub fn node_at(&self, idx: NodeIndex) -> &ContainerNode {
        &self.nodes[idx.0]
    }

    pub fn node_at_mut(&mut self, idx: NodeIndex) -> &mut ContainerNode {
        &mut self.nodes[idx.0]
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ContainerNode> {
        self.nodes.iter()
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.nodes.len()).map(NodeIndex)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The first inserted node.
    pub fn root(&self) -> Option<NodeIndex> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeIndex(0))
        }
    }

    pub fn parent_to_child(&self) -> &[(NodeIndex, NodeIndex)] {
        &self.parent_to_child
    }

    pub fn depends(&self) -> &[(NodeIndex, NodeIndex)] {
        &self.depends
    }

    /// The parent through which `idx` was first linked.
    pub fn parent_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.parent_to_child
            .iter()
            .find(|(_, child)| *child == idx)
            .map(|(parent, _)| *parent)
    }

    pub fn children_of(&self, idx: NodeIndex) -> &[NodeIndex] {
        self.nodes[idx.0].children()
    }

    /// Ids of a node's realized children, in discovery order.
    pub fn child_ids(&self, id: &str) -> Vec<&str> {
        match self.node(id) {
            Some(node) => node
                .children()
                .iter()
                .map(|c| self.nodes[c.0].id())
                .collect(),
            None => Vec::new(),
        }
    }

    /// `(parent id, child id)` pairs of every parent→child edge.
    pub fn edge_ids(&self) -> Vec<(&str, &str)> {
        self.parent_to_child
            .iter()
            .map(|(p, c)| (self.nodes[p.0].id(), self.nodes[c.0].id()))
            .collect()
    }

    // --- Index lookups ---

    pub fn by_name(&self, name: &str) -> &[NodeIndex] {
        lookup(&self.indices.by_name, name)
    }

    pub fn by_type(&self, kind: &str) -> &[NodeIndex] {
        lookup(&self.indices.by_type, kind)
    }

    pub fn by_scope(&self, scope: &str) -> &[NodeIndex] {
        lookup(&self.indices.by_scope, scope)
    }

    pub fn by_capability(&self, capability: &str) -> &[NodeIndex] {
        lookup(&self.indices.by_capability, capability)
    }

    /// Nodes whose definition carries a page pattern matching `url`.
    pub fn nodes_for_url(&self, url: &str) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = Vec::new();
        for (re, idx) in &self.indices.page_patterns {
            if re.is_match(url) && !out.contains(idx) {
                out.push(*idx);
            }
        }
        out
    }
}
