//! Capabilities the engine consumes from its host: element queries, action
//! execution, and visual highlighting. Implementations live outside the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canopy_catalog::ClassSelector;
use canopy_types::{BoundingBox, ElementHandle, PageContext, Result};

use crate::config::HighlightConfig;
use crate::graph::ContainerNode;
use crate::queue::OperationInstance;

// ---------------------------------------------------------------------------
// QueryCapability
// ---------------------------------------------------------------------------

/// Selector queries and element probes against a live document.
#[async_trait]
pub trait QueryCapability: Send + Sync {
    /// All elements under `scope` carrying every class of `selector`.
    async fn query_by_classes(
        &self,
        scope: &ElementHandle,
        selector: &ClassSelector,
    ) -> Result<Vec<ElementHandle>>;

    async fn visible(&self, handle: &ElementHandle) -> Result<bool>;

    async fn bbox_of(&self, handle: &ElementHandle) -> Result<Option<BoundingBox>>;

    async fn page_context(&self) -> Result<PageContext>;
}

// ---------------------------------------------------------------------------
// Execution backends
// ---------------------------------------------------------------------------

/// Legacy direct path: performs an operation given the whole node.
#[async_trait]
pub trait Performer: Send + Sync {
    async fn perform(
        &self,
        node: &ContainerNode,
        operation: &OperationInstance,
    ) -> Result<serde_json::Value>;
}

/// Result payload of an [`OperationExecutor`].
///
/// `ok == false` is a typed failure: the runtime treats it exactly like an
/// `Err` from the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub ok: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionOutput {
    pub const UNSUPPORTED: &'static str = "UNSUPPORTED_OPERATION";

    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data,
            code: None,
            message: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: serde_json::Value::Null,
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }

    pub fn unsupported(op_type: &str) -> Self {
        Self::failure(
            Self::UNSUPPORTED,
            format!("Unsupported operation type '{op_type}'"),
        )
    }

    /// Human-readable failure text, `code: message`.
    pub fn failure_text(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "operation reported failure".to_string(),
        }
    }
}

/// Preferred path: executes an operation by container id and operation type.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(
        &self,
        container_id: &str,
        operation: &str,
        config: &serde_json::Value,
        handle: &ElementHandle,
    ) -> Result<ExecutionOutput>;
}

// ---------------------------------------------------------------------------
// HighlightSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HighlightTarget {
    Element(ElementHandle),
    Region(BoundingBox),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightOptions {
    pub color: String,
    pub label: Option<String>,
    pub persistent: bool,
    pub duration_ms: Option<u64>,
}

impl From<&HighlightConfig> for HighlightOptions {
    fn from(config: &HighlightConfig) -> Self {
        Self {
            color: config.color.clone(),
            label: config.label.clone(),
            persistent: config.persistent,
            duration_ms: config.duration_ms,
        }
    }
}

/// Visual feedback sink. Must not block: implementations queue the request.
pub trait HighlightSink: Send + Sync {
    fn highlight(&self, target: HighlightTarget, options: HighlightOptions);
}
