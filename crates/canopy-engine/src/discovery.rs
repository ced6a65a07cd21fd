//! Discovery engine: resolves a definition's declared children against a live
//! scope through the injected [`QueryCapability`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use canopy_catalog::{Catalog, ClassSelector, ContainerDefinition};
use canopy_types::{BoundingBox, CanopyError, ElementHandle, Result};

use crate::capability::QueryCapability;
use crate::config::EngineConfig;
use crate::graph::{ContainerGraph, ContainerNode, NodeIndex};

/// One matched element for a child definition.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub definition: Arc<ContainerDefinition>,
    pub score: f64,
    pub bbox: Option<BoundingBox>,
    pub visible: bool,
    pub handle: ElementHandle,
}

impl Candidate {
    pub fn definition_id(&self) -> &str {
        &self.definition.id
    }
}

/// One strategy attempt, recorded per child definition id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyTrace {
    pub name: String,
    pub success: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub candidates: Vec<Candidate>,
    pub trace: Vec<StrategyTrace>,
}

impl DiscoveryResult {
    /// Candidate definition ids in match order, without repeats.
    pub fn distinct_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for c in &self.candidates {
            if !ids.contains(&c.definition_id()) {
                ids.push(c.definition_id());
            }
        }
        ids
    }
}

pub struct DiscoveryEngine {
    catalog: Arc<Catalog>,
    query: Arc<dyn QueryCapability>,
    default_score: f64,
    visibility_bonus: f64,
}

impl DiscoveryEngine {
    pub fn new(catalog: Arc<Catalog>, query: Arc<dyn QueryCapability>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            catalog,
            query,
            default_score: defaults.default_score,
            visibility_bonus: defaults.visibility_bonus,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.default_score = config.default_score;
        self.visibility_bonus = config.visibility_bonus;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn query(&self) -> &Arc<dyn QueryCapability> {
        &self.query
    }

    /// Seed a graph with the located root, then run one discovery pass over
    /// its declared children.
    ///
    /// A missing root definition is a configuration error and propagates.
    /// Anything that goes wrong during the pass itself yields an empty child
    /// set instead.
    pub async fn discover_from_root(
        &self,
        root_id: &str,
        root_handle: &ElementHandle,
    ) -> Result<ContainerGraph> {
        let definition = self.catalog.require(root_id)?.clone();
        let mut graph = ContainerGraph::new();
        let (root, _) = graph.insert(ContainerNode::located(definition, root_handle.clone()));

        match self.discover_children(root_id, root_handle).await {
            Ok(result) => {
                seed_children(&mut graph, root, &result);
            }
            Err(e) => {
                tracing::warn!(root = %root_id, error = %e, "Initial discovery pass failed");
            }
        }
        Ok(graph)
    }

    /// Query every declared child of `parent_id` under `parent_handle`.
    ///
    /// Every matching handle becomes a candidate; repeats of one definition
    /// are kept and left for the caller to dedupe.
    pub async fn discover_children(
        &self,
        parent_id: &str,
        parent_handle: &ElementHandle,
    ) -> Result<DiscoveryResult> {
        let parent = self
            .catalog
            .get(parent_id)
            .ok_or_else(|| CanopyError::UnknownParent { id: parent_id.to_string() })?;

        let mut result = DiscoveryResult::default();
        for child_id in &parent.children {
            let started = Instant::now();
            let Some(child) = self.catalog.get(child_id) else {
                tracing::warn!(parent = %parent_id, child = %child_id, "Child definition not in catalog");
                result.trace.push(StrategyTrace {
                    name: child_id.clone(),
                    success: false,
                    duration: started.elapsed(),
                });
                continue;
            };

            let mut matched = false;
            for selector in &child.selectors {
                for handle in self.query_selector(child_id, parent_handle, selector).await {
                    matched = true;
                    result.candidates.push(self.probe(child, selector, handle).await);
                }
            }

            let duration = started.elapsed();
            tracing::debug!(
                parent = %parent_id,
                child = %child_id,
                success = matched,
                elapsed_ms = duration.as_millis() as u64,
                "Discovery strategy finished"
            );
            result.trace.push(StrategyTrace {
                name: child_id.clone(),
                success: matched,
                duration,
            });
        }
        Ok(result)
    }

    async fn query_selector(
        &self,
        child_id: &str,
        scope: &ElementHandle,
        selector: &ClassSelector,
    ) -> Vec<ElementHandle> {
        match self.query.query_by_classes(scope, selector).await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(
                    child = %child_id,
                    selector = %selector.css(),
                    error = %e,
                    "Selector query failed, treating as no match"
                );
                Vec::new()
            }
        }
    }

    async fn probe(
        &self,
        child: &Arc<ContainerDefinition>,
        selector: &ClassSelector,
        handle: ElementHandle,
    ) -> Candidate {
        let visible = self.query.visible(&handle).await.unwrap_or_else(|e| {
            tracing::debug!(handle = %handle, error = %e, "Visibility probe failed");
            false
        });
        let bbox = if visible {
            self.query.bbox_of(&handle).await.unwrap_or_else(|e| {
                tracing::debug!(handle = %handle, error = %e, "Bounding box probe failed");
                None
            })
        } else {
            None
        };
        let mut score = selector.score.unwrap_or(self.default_score);
        if visible {
            score += self.visibility_bonus;
        }
        Candidate {
            definition: child.clone(),
            score,
            bbox,
            visible,
            handle,
        }
    }
}

/// Insert discovery results under `parent`, one node per child definition.
///
/// The first candidate of each definition wins. A definition already present
/// elsewhere in the graph keeps its node and only gains the new edge. Returns
/// the children newly linked under `parent`; each one counts as a hit.
pub fn seed_children(
    graph: &mut ContainerGraph,
    parent: NodeIndex,
    result: &DiscoveryResult,
) -> Vec<NodeIndex> {
    let mut linked = Vec::new();
    for candidate in &result.candidates {
        let known = graph
            .children_of(parent)
            .iter()
            .any(|c| graph.node_at(*c).id() == candidate.definition_id());
        if known {
            continue;
        }

        let node = ContainerNode::located(candidate.definition.clone(), candidate.handle.clone())
            .with_geometry(candidate.bbox, candidate.visible, candidate.score);
        let (child, added) = graph.insert(node);
        if !added {
            tracing::debug!(
                container = %candidate.definition_id(),
                parent = %graph.node_at(parent).id(),
                "Container already in graph, linking existing node"
            );
        }
        graph.add_parent_child(parent, child);
        graph.node_at_mut(parent).feedback.hits += 1;
        if added {
            register_dependencies(graph, child);
        }
        linked.push(child);
    }
    linked
}

/// Record `dependsOn` edges between `node` and whatever is already present.
fn register_dependencies(graph: &mut ContainerGraph, node: NodeIndex) {
    let id = graph.node_at(node).id().to_string();
    let outgoing: Vec<NodeIndex> = graph
        .node_at(node)
        .definition
        .depends_on
        .iter()
        .filter_map(|dep| graph.index_of(dep))
        .collect();
    let incoming: Vec<NodeIndex> = graph
        .indices()
        .filter(|other| *other != node)
        .filter(|other| graph.node_at(*other).definition.depends_on.contains(&id))
        .collect();
    for to in outgoing {
        graph.add_depends(node, to);
    }
    for from in incoming {
        graph.add_depends(from, node);
    }
}
