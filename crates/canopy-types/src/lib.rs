//! Shared types, errors, handles, and geometry for the Canopy container engine.
//!
//! This crate provides the foundational types used across all other Canopy crates:
//! - `CanopyError`: unified error taxonomy
//! - `ElementHandle`: opaque reference to a live element or scope
//! - `BoundingBox`: element geometry as reported by the query capability
//! - `PageContext`: what the driver knows about the current page
//! - `RunMode`: sequential vs. parallel sibling execution

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all Canopy subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CanopyError {
    // === Configuration Errors ===
    #[error("Unknown container definition '{id}'")]
    UnknownContainer { id: String },

    #[error("Unknown parent container '{id}'")]
    UnknownParent { id: String },

    #[error("Catalog validation failed: {0}")]
    ValidationError(String),

    // === Discovery Errors ===
    #[error("Query for selector '{selector}' failed: {message}")]
    Query { selector: String, message: String },

    // === Operation Errors ===
    #[error("Operation '{operation}' failed on container '{container}': {message}")]
    Execution {
        container: String,
        operation: String,
        message: String,
    },

    #[error("Invalid operation status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CanopyError {
    /// Returns `true` for caller/config bugs that must abort a run instead of
    /// being folded into feedback counters.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CanopyError::UnknownContainer { .. }
                | CanopyError::UnknownParent { .. }
                | CanopyError::ValidationError(_)
        )
    }

    /// Shorthand for an execution failure on a container.
    pub fn execution(
        container: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CanopyError::Execution {
            container: container.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A convenience alias for `Result<T, CanopyError>`.
pub type Result<T> = std::result::Result<T, CanopyError>;

// ---------------------------------------------------------------------------
// ElementHandle: opaque scope / element reference
// ---------------------------------------------------------------------------

/// Opaque reference to a live element (or the whole document) owned by the
/// query capability. The engine never inspects the token; it only hands it
/// back to the capability that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub const DOCUMENT: &'static str = "#document";

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Handle that scopes a query to the full page.
    pub fn document() -> Self {
        Self(Self::DOCUMENT.to_string())
    }

    pub fn is_document(&self) -> bool {
        self.0 == Self::DOCUMENT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BoundingBox
// ---------------------------------------------------------------------------

/// Element rectangle in page coordinates, as two corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Zero-area boxes are what detached or `display:none` elements report.
    pub fn is_empty(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }
}

// ---------------------------------------------------------------------------
// PageContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

// ---------------------------------------------------------------------------
// RunMode
// ---------------------------------------------------------------------------

/// How a container's children (and a whole run) are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Sequential,
    Parallel,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Sequential => "sequential",
            RunMode::Parallel => "parallel",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
