//! Recorded DOM snapshot that answers element queries offline.
//!
//! A snapshot is a JSON element tree. Handles are element ids; the document
//! handle scopes a query to every element.
//!
//! ```json
//! {
//!   "url": "https://example.com/feed",
//!   "elements": [
//!     {"id": "f", "classes": ["feed"], "children": [
//!       {"id": "p1", "classes": ["post"], "bbox": {"x1": 0, "y1": 0, "x2": 10, "y2": 10}}
//!     ]}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canopy_catalog::ClassSelector;
use canopy_types::{BoundingBox, CanopyError, ElementHandle, PageContext, Result};

use crate::capability::QueryCapability;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub id: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotElement>,
}

fn default_visible() -> bool {
    true
}

impl SnapshotElement {
    pub fn new(id: impl Into<String>, classes: &[&str]) -> Self {
        Self {
            id: id.into(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            visible: true,
            bbox: None,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<SnapshotElement>) -> Self {
        self.children = children;
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    #[serde(flatten)]
    page: PageContext,
    #[serde(default)]
    elements: Vec<SnapshotElement>,
}

/// Flattened element: `end` is one past the last descendant in pre-order.
#[derive(Debug)]
struct FlatElement {
    classes: Vec<String>,
    visible: bool,
    bbox: Option<BoundingBox>,
    end: usize,
    id: String,
}

#[derive(Debug)]
pub struct DomSnapshot {
    page: PageContext,
    elements: Vec<FlatElement>,
    by_id: HashMap<String, usize>,
}

impl DomSnapshot {
    pub fn new(page: PageContext, roots: Vec<SnapshotElement>) -> Self {
        let mut elements = Vec::new();
        for root in roots {
            flatten(root, &mut elements);
        }
        let mut by_id = HashMap::new();
        for (i, el) in elements.iter().enumerate() {
            // First occurrence of a duplicate id wins
            by_id.entry(el.id.clone()).or_insert(i);
        }
        Self { page, elements, by_id }
    }

    pub fn from_json(source: &str) -> Result<Self> {
        let file: SnapshotFile = serde_json::from_str(source)?;
        Ok(Self::new(file.page, file.elements))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn element(&self, handle: &ElementHandle) -> Result<&FlatElement> {
        self.by_id
            .get(handle.as_str())
            .map(|i| &self.elements[*i])
            .ok_or_else(|| CanopyError::Other(format!("unknown element handle '{handle}'")))
    }

    /// Pre-order range of elements inside `scope`, excluding `scope` itself.
    fn scope_range(&self, scope: &ElementHandle) -> Option<std::ops::Range<usize>> {
        if scope.is_document() {
            return Some(0..self.elements.len());
        }
        let start = *self.by_id.get(scope.as_str())?;
        Some(start + 1..self.elements[start].end)
    }
}

fn flatten(element: SnapshotElement, out: &mut Vec<FlatElement>) {
    let index = out.len();
    out.push(FlatElement {
        classes: element.classes,
        visible: element.visible,
        bbox: element.bbox,
        end: index + 1,
        id: element.id,
    });
    for child in element.children {
        flatten(child, out);
    }
    out[index].end = out.len();
}

#[async_trait]
impl QueryCapability for DomSnapshot {
    async fn query_by_classes(
        &self,
        scope: &ElementHandle,
        selector: &ClassSelector,
    ) -> Result<Vec<ElementHandle>> {
        let range = self.scope_range(scope).ok_or_else(|| CanopyError::Query {
            selector: selector.css(),
            message: format!("scope '{scope}' is not in the snapshot"),
        })?;
        if selector.classes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.elements[range]
            .iter()
            .filter(|el| selector.classes.iter().all(|c| el.classes.contains(c)))
            .map(|el| ElementHandle::new(el.id.clone()))
            .collect())
    }

    async fn visible(&self, handle: &ElementHandle) -> Result<bool> {
        Ok(self.element(handle)?.visible)
    }

    async fn bbox_of(&self, handle: &ElementHandle) -> Result<Option<BoundingBox>> {
        Ok(self.element(handle)?.bbox)
    }

    async fn page_context(&self) -> Result<PageContext> {
        Ok(self.page.clone())
    }
}
