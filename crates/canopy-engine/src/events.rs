//! Runtime event system.
//!
//! Emits [`EventEnvelope`]s via a [`tokio::sync::broadcast`] channel so that
//! outside consumers (highlighters, auto-click, workflow overlays, loggers) can
//! observe the graph evolving without coupling to the controller internals.
//! Events are best-effort: nothing in the engine depends on them being read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canopy_types::{BoundingBox, RunMode};

/// Events emitted while discovering and driving a container graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// Generic appear notification, one per newly located container.
    Appear {
        container_id: String,
        session_id: Option<String>,
    },
    /// Container-scoped twin of [`RuntimeEvent::Appear`].
    ContainerAppear {
        container_id: String,
        session_id: Option<String>,
    },
    Discovered {
        container_id: String,
        parent_id: String,
        score: f64,
        visible: bool,
        bbox: Option<BoundingBox>,
    },
    ChildrenDiscovered {
        container_id: String,
        count: usize,
        child_ids: Vec<String>,
    },
    OperationCompleted {
        container_id: String,
        operation: String,
        op_index: Option<usize>,
        result: serde_json::Value,
        rule_id: Option<String>,
    },
    OperationFailed {
        container_id: String,
        operation: String,
        op_index: Option<usize>,
        error: String,
        rule_id: Option<String>,
    },
    ClickRequested {
        container_id: String,
    },
    Executing {
        container_id: String,
        operation: String,
        bbox: Option<BoundingBox>,
    },
    LoopCompleted {
        node_count: usize,
        mode: RunMode,
        stopped: bool,
    },
}

impl RuntimeEvent {
    /// The string channel this event is published on.
    pub fn channel(&self) -> String {
        match self {
            RuntimeEvent::Appear { .. } => "container:appear".to_string(),
            RuntimeEvent::ContainerAppear { container_id, .. } => {
                format!("container:{container_id}:appear")
            }
            RuntimeEvent::Discovered { container_id, .. } => {
                format!("container:{container_id}:discovered")
            }
            RuntimeEvent::ChildrenDiscovered { container_id, .. } => {
                format!("container:{container_id}:children_discovered")
            }
            RuntimeEvent::OperationCompleted { container_id, .. } => {
                format!("container:{container_id}:operation:completed")
            }
            RuntimeEvent::OperationFailed { container_id, .. } => {
                format!("container:{container_id}:operation:failed")
            }
            RuntimeEvent::ClickRequested { container_id } => {
                format!("container:{container_id}:click")
            }
            RuntimeEvent::Executing { .. } => "ui:container:executing".to_string(),
            RuntimeEvent::LoopCompleted { .. } => "runtime:loop:completed".to_string(),
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::Appear { container_id, .. }
            | RuntimeEvent::ContainerAppear { container_id, .. }
            | RuntimeEvent::Discovered { container_id, .. }
            | RuntimeEvent::ChildrenDiscovered { container_id, .. }
            | RuntimeEvent::OperationCompleted { container_id, .. }
            | RuntimeEvent::OperationFailed { container_id, .. }
            | RuntimeEvent::ClickRequested { container_id }
            | RuntimeEvent::Executing { container_id, .. } => Some(container_id),
            RuntimeEvent::LoopCompleted { .. } => None,
        }
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub channel: String,
    /// Which component emitted the event (`"runtime"`, `"dispatcher"`, ...).
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub event: RuntimeEvent,
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<EventEnvelope>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, source: &str, event: RuntimeEvent) {
        let envelope = EventEnvelope {
            channel: event.channel(),
            source: source.to_string(),
            timestamp: Utc::now(),
            event,
        };
        tracing::trace!(channel = %envelope.channel, source, "Event emitted");
        let _ = self.sender.send(envelope);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emit on an optional sink; `None` is the no-op sink.
pub(crate) fn emit_to(sink: Option<&EventEmitter>, source: &str, event: RuntimeEvent) {
    if let Some(emitter) = sink {
        emitter.emit(source, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(
            "runtime",
            RuntimeEvent::LoopCompleted {
                node_count: 3,
                mode: RunMode::Sequential,
                stopped: false,
            },
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "runtime:loop:completed");
        assert_eq!(envelope.source, "runtime");
        match envelope.event {
            RuntimeEvent::LoopCompleted { node_count, .. } => assert_eq!(node_count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_capacity_from_config_is_clamped() {
        let config = crate::config::EngineConfig::from_json(r#"{"eventCapacity": 0}"#).unwrap();
        assert_eq!(config.event_capacity, 0);
        let emitter = EventEmitter::new(config.event_capacity);
        let mut rx = emitter.subscribe();
        emitter.emit(
            "runtime",
            RuntimeEvent::ClickRequested {
                container_id: "btn".into(),
            },
        );
        assert_eq!(rx.recv().await.unwrap().channel, "container:btn:click");
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(
            "runtime",
            RuntimeEvent::ClickRequested {
                container_id: "btn".into(),
            },
        );
        emit_to(None, "runtime", RuntimeEvent::ClickRequested {
            container_id: "btn".into(),
        });
    }

    #[test]
    fn channel_names() {
        let id = || "post".to_string();
        let cases = vec![
            (
                RuntimeEvent::Appear { container_id: id(), session_id: None },
                "container:appear",
            ),
            (
                RuntimeEvent::ContainerAppear { container_id: id(), session_id: None },
                "container:post:appear",
            ),
            (
                RuntimeEvent::Discovered {
                    container_id: id(),
                    parent_id: "feed".into(),
                    score: 0.7,
                    visible: true,
                    bbox: None,
                },
                "container:post:discovered",
            ),
            (
                RuntimeEvent::ChildrenDiscovered { container_id: id(), count: 0, child_ids: vec![] },
                "container:post:children_discovered",
            ),
            (
                RuntimeEvent::OperationCompleted {
                    container_id: id(),
                    operation: "click".into(),
                    op_index: Some(0),
                    result: serde_json::Value::Null,
                    rule_id: None,
                },
                "container:post:operation:completed",
            ),
            (
                RuntimeEvent::OperationFailed {
                    container_id: id(),
                    operation: "click".into(),
                    op_index: Some(0),
                    error: "boom".into(),
                    rule_id: None,
                },
                "container:post:operation:failed",
            ),
            (RuntimeEvent::ClickRequested { container_id: id() }, "container:post:click"),
            (
                RuntimeEvent::Executing { container_id: id(), operation: "click".into(), bbox: None },
                "ui:container:executing",
            ),
        ];
        for (event, channel) in cases {
            assert_eq!(event.channel(), channel);
            assert_eq!(event.container_id(), Some("post"));
        }
    }

    #[test]
    fn envelope_serializes_to_json() {
        let emitter = EventEmitter::new(4);
        let mut rx = emitter.subscribe();
        emitter.emit("dispatcher", RuntimeEvent::Appear {
            container_id: "feed".into(),
            session_id: Some("s1".into()),
        });
        let envelope = rx.try_recv().unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["channel"], "container:appear");
        assert_eq!(json["source"], "dispatcher");
        assert_eq!(json["event"]["Appear"]["container_id"], "feed");
    }
}
