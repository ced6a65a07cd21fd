//! Workflow overlays: per-workflow behavior overrides merged onto a catalog.

use std::path::Path;

use serde::{Deserialize, Serialize};

use canopy_types::{Result, RunMode};

use crate::catalog::Catalog;
use crate::definition::OperationDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOverlay {
    pub id: String,
    pub root_id: String,
    #[serde(default)]
    pub overrides: Vec<BehaviorOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorOverride {
    pub container_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<RunMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<OperationDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl WorkflowOverlay {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }
}

/// Merge `overlay` onto `catalog`, returning a new catalog.
///
/// Run mode and operation list are replaced wholesale when given; priority and
/// concurrency are attached as scheduler hints. Overrides naming a container
/// the catalog does not have are ignored. The input catalog is never modified.
pub fn apply_overlay(catalog: &Catalog, overlay: Option<&WorkflowOverlay>) -> Catalog {
    let overlay = match overlay {
        Some(o) if !o.overrides.is_empty() => o,
        _ => return catalog.clone(),
    };

    let mut result = catalog.clone();
    for ov in &overlay.overrides {
        let Some(base) = catalog.get(&ov.container_id) else {
            tracing::warn!(
                overlay = %overlay.id,
                container = %ov.container_id,
                "Overlay targets unknown container; skipping"
            );
            continue;
        };

        let mut def = (**base).clone();
        if let Some(mode) = ov.run_mode {
            def.run_mode = mode;
        }
        if let Some(ref ops) = ov.operations {
            def.operations = ops.clone();
        }
        if ov.priority.is_some() {
            def.hints.priority = ov.priority;
        }
        if ov.concurrency.is_some() {
            def.hints.concurrency = ov.concurrency;
        }
        result = result.with_definition(def);
    }

    tracing::debug!(overlay = %overlay.id, overrides = overlay.overrides.len(), "Overlay applied");
    result
}
