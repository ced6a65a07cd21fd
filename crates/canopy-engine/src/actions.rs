//! Action handlers and the registry that dispatches operations to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use canopy_types::{ElementHandle, Result};

use crate::capability::{
    ExecutionOutput, HighlightOptions, HighlightSink, HighlightTarget, OperationExecutor,
};

// ---------------------------------------------------------------------------
// ActionHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The operation type this handler serves (e.g. "wait", "highlight").
    fn action_type(&self) -> &str;

    async fn run(
        &self,
        container_id: &str,
        config: &serde_json::Value,
        handle: &ElementHandle,
    ) -> Result<ExecutionOutput>;
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `wait` action, plus `highlight` when a sink
    /// is supplied.
    pub fn with_defaults(highlight: Option<(Arc<dyn HighlightSink>, HighlightOptions)>) -> Self {
        let mut registry = Self::new();
        registry.register(WaitAction);
        if let Some((sink, options)) = highlight {
            registry.register(HighlightAction::new(sink, options));
        }
        registry
    }

    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        let t = handler.action_type().to_string();
        self.handlers.insert(t, Arc::new(handler));
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    pub fn has(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered action types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[async_trait]
impl OperationExecutor for ActionRegistry {
    async fn execute(
        &self,
        container_id: &str,
        operation: &str,
        config: &serde_json::Value,
        handle: &ElementHandle,
    ) -> Result<ExecutionOutput> {
        match self.handlers.get(operation) {
            Some(handler) => handler.run(container_id, config, handle).await,
            None => {
                tracing::debug!(container = %container_id, op = %operation, "No action handler registered");
                Ok(ExecutionOutput::unsupported(operation))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in actions
// ---------------------------------------------------------------------------

/// Sleeps for `config.ms` milliseconds.
pub struct WaitAction;

#[async_trait]
impl ActionHandler for WaitAction {
    fn action_type(&self) -> &str {
        "wait"
    }

    async fn run(
        &self,
        _container_id: &str,
        config: &serde_json::Value,
        _handle: &ElementHandle,
    ) -> Result<ExecutionOutput> {
        let ms = config.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ExecutionOutput::ok(serde_json::json!({ "waitedMs": ms })))
    }
}

/// Forwards the container's element to a [`HighlightSink`].
pub struct HighlightAction {
    sink: Arc<dyn HighlightSink>,
    options: HighlightOptions,
}

impl HighlightAction {
    pub fn new(sink: Arc<dyn HighlightSink>, options: HighlightOptions) -> Self {
        Self { sink, options }
    }
}

#[async_trait]
impl ActionHandler for HighlightAction {
    fn action_type(&self) -> &str {
        "highlight"
    }

    async fn run(
        &self,
        container_id: &str,
        config: &serde_json::Value,
        handle: &ElementHandle,
    ) -> Result<ExecutionOutput> {
        let mut options = self.options.clone();
        if let Some(color) = config.get("color").and_then(|v| v.as_str()) {
            options.color = color.to_string();
        }
        let label = config
            .get("label")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| options.label.take())
            .unwrap_or_else(|| container_id.to_string());
        options.label = Some(label);
        self.sink
            .highlight(HighlightTarget::Element(handle.clone()), options);
        Ok(ExecutionOutput::ok(serde_json::json!({ "highlighted": handle })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HighlightConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(HighlightTarget, HighlightOptions)>>,
    }

    impl HighlightSink for RecordingSink {
        fn highlight(&self, target: HighlightTarget, options: HighlightOptions) {
            self.calls.lock().push((target, options));
        }
    }

    #[tokio::test]
    async fn unknown_action_is_unsupported() {
        let registry = ActionRegistry::with_defaults(None);
        let out = registry
            .execute("post", "hover", &serde_json::Value::Null, &ElementHandle::new("p1"))
            .await
            .unwrap();
        assert!(!out.ok);
        assert_eq!(out.code.as_deref(), Some(ExecutionOutput::UNSUPPORTED));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_for_configured_ms() {
        let registry = ActionRegistry::with_defaults(None);
        let started = tokio::time::Instant::now();
        let out = registry
            .execute("post", "wait", &serde_json::json!({"ms": 250}), &ElementHandle::new("p1"))
            .await
            .unwrap();
        assert!(out.ok);
        assert_eq!(out.data["waitedMs"], 250);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn highlight_forwards_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let options = HighlightOptions::from(&HighlightConfig::default());
        let dyn_sink: Arc<dyn HighlightSink> = sink.clone();
        let registry = ActionRegistry::with_defaults(Some((dyn_sink, options)));
        assert_eq!(registry.types(), vec!["highlight", "wait"]);

        let out = registry
            .execute(
                "post",
                "highlight",
                &serde_json::json!({"color": "red"}),
                &ElementHandle::new("p1"),
            )
            .await
            .unwrap();
        assert!(out.ok);

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HighlightTarget::Element(ElementHandle::new("p1")));
        assert_eq!(calls[0].1.color, "red");
        assert_eq!(calls[0].1.label.as_deref(), Some("post"));
    }

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        fn action_type(&self) -> &str {
            "echo"
        }

        async fn run(
            &self,
            container_id: &str,
            config: &serde_json::Value,
            _handle: &ElementHandle,
        ) -> Result<ExecutionOutput> {
            Ok(ExecutionOutput::ok(
                serde_json::json!({ "container": container_id, "config": config }),
            ))
        }
    }

    #[tokio::test]
    async fn custom_handlers_are_dispatched() {
        let mut registry = ActionRegistry::new();
        registry.register(Echo);
        assert!(registry.has("echo"));
        assert!(!registry.has("wait"));
        let out = registry
            .execute("form", "echo", &serde_json::json!({"x": 1}), &ElementHandle::new("f"))
            .await
            .unwrap();
        assert_eq!(out.data["container"], "form");
        assert_eq!(out.data["config"]["x"], 1);
    }
}
