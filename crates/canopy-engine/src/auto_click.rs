//! Automatic clicks for containers flagged `autoClick`, with debounce.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use canopy_catalog::Catalog;

use crate::config::EngineConfig;
use crate::events::{EventEmitter, EventEnvelope, RuntimeEvent};

const SOURCE: &str = "auto-click";

pub struct AutoClickHandler {
    catalog: Arc<Catalog>,
    events: EventEmitter,
    debounce: Duration,
    /// Debounce deadline per container id.
    armed: HashMap<String, Instant>,
}

impl AutoClickHandler {
    pub fn new(catalog: Arc<Catalog>, events: EventEmitter, debounce: Duration) -> Self {
        Self {
            catalog,
            events,
            debounce,
            armed: HashMap::new(),
        }
    }

    pub fn from_config(catalog: Arc<Catalog>, events: EventEmitter, config: &EngineConfig) -> Self {
        Self::new(catalog, events, config.auto_click_debounce())
    }

    /// React to one envelope. Returns the container id a click was requested
    /// for, if any.
    pub fn handle_event(&mut self, envelope: &EventEnvelope) -> Option<String> {
        let RuntimeEvent::Appear { container_id, .. } = &envelope.event else {
            return None;
        };
        let flagged = self
            .catalog
            .get(container_id)
            .is_some_and(|def| def.metadata.auto_click);
        if !flagged {
            return None;
        }

        let now = Instant::now();
        self.armed.retain(|_, deadline| *deadline > now);
        if self.armed.contains_key(container_id) {
            tracing::debug!(container = %container_id, "Auto-click debounced");
            return None;
        }
        self.armed.insert(container_id.clone(), now + self.debounce);

        tracing::info!(container = %container_id, "Auto-click requested");
        self.events.emit(
            SOURCE,
            RuntimeEvent::ClickRequested {
                container_id: container_id.clone(),
            },
        );
        Some(container_id.clone())
    }

    /// Drop every pending debounce timer.
    pub fn cleanup(&mut self) {
        self.armed.clear();
    }

    /// Containers currently inside their debounce window.
    pub fn pending(&self) -> usize {
        let now = Instant::now();
        self.armed.values().filter(|deadline| **deadline > now).count()
    }

    /// Consume appear events until the bus closes.
    pub async fn run(mut self, mut rx: broadcast::Receiver<EventEnvelope>) {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    self.handle_event(&envelope);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auto-click handler lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.cleanup();
    }
}
