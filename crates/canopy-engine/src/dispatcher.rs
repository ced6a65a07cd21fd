//! De-duplicated appear notifications for located containers.

use std::collections::HashSet;

use crate::events::{emit_to, EventEmitter, RuntimeEvent};
use crate::graph::ContainerGraph;

const SOURCE: &str = "dispatcher";

#[derive(Default)]
pub struct ContainerEventDispatcher {
    seen: HashSet<String>,
    events: Option<EventEmitter>,
}

impl ContainerEventDispatcher {
    pub fn new(events: Option<EventEmitter>) -> Self {
        Self {
            seen: HashSet::new(),
            events,
        }
    }

    /// Emit appear events for every located container not seen before.
    /// Returns the ids that appeared, in graph order.
    pub fn process_match_result(
        &mut self,
        graph: &ContainerGraph,
        session_id: Option<&str>,
    ) -> Vec<String> {
        let mut appeared = Vec::new();
        for node in graph.nodes().filter(|n| n.is_located()) {
            if !self.seen.insert(node.id().to_string()) {
                continue;
            }
            let container_id = node.id().to_string();
            let session_id = session_id.map(str::to_string);
            emit_to(
                self.events.as_ref(),
                SOURCE,
                RuntimeEvent::Appear {
                    container_id: container_id.clone(),
                    session_id: session_id.clone(),
                },
            );
            emit_to(
                self.events.as_ref(),
                SOURCE,
                RuntimeEvent::ContainerAppear {
                    container_id: container_id.clone(),
                    session_id,
                },
            );
            appeared.push(container_id);
        }
        if !appeared.is_empty() {
            tracing::debug!(count = appeared.len(), "Containers appeared");
        }
        appeared
    }

    /// Forget every seen container so the next pass re-announces them.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn mark_known(&mut self, id: impl Into<String>) {
        self.seen.insert(id.into());
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.seen.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContainerNode, DiscoveryState};
    use canopy_catalog::ContainerDefinition;
    use canopy_types::ElementHandle;
    use std::sync::Arc;

    fn graph() -> ContainerGraph {
        let mut graph = ContainerGraph::new();
        for id in ["root", "a", "b"] {
            let def = ContainerDefinition::new(id, &[id]);
            graph.insert(ContainerNode::located(Arc::new(def), ElementHandle::new(id)));
        }
        let hidden = ContainerDefinition::new("pending", &["pending"]);
        graph.insert(ContainerNode::new(Arc::new(hidden), ElementHandle::document()));
        graph
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<crate::events::EventEnvelope>) -> Vec<String> {
        let mut channels = Vec::new();
        while let Ok(env) = rx.try_recv() {
            channels.push(env.channel);
        }
        channels
    }

    #[test]
    fn second_pass_emits_nothing() {
        let emitter = EventEmitter::new(64);
        let mut rx = emitter.subscribe();
        let mut dispatcher = ContainerEventDispatcher::new(Some(emitter));
        let graph = graph();

        let first = dispatcher.process_match_result(&graph, Some("s1"));
        assert_eq!(first, vec!["root", "a", "b"]);
        assert_eq!(
            drain(&mut rx),
            vec![
                "container:appear",
                "container:root:appear",
                "container:appear",
                "container:a:appear",
                "container:appear",
                "container:b:appear",
            ]
        );

        assert!(dispatcher.process_match_result(&graph, Some("s1")).is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn reset_and_mark_known() {
        let mut dispatcher = ContainerEventDispatcher::new(None);
        let mut graph = graph();
        dispatcher.mark_known("a");
        assert_eq!(dispatcher.process_match_result(&graph, None), vec!["root", "b"]);

        graph.node_mut("pending").unwrap().state = DiscoveryState::Located;
        assert_eq!(dispatcher.process_match_result(&graph, None), vec!["pending"]);

        dispatcher.reset();
        assert!(!dispatcher.is_known("root"));
        assert_eq!(dispatcher.process_match_result(&graph, None).len(), 4);
    }
}
