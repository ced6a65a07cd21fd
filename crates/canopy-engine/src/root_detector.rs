//! One-shot detection of a catalog root on a freshly loaded page.

use std::sync::Arc;

use canopy_catalog::ContainerDefinition;
use canopy_types::ElementHandle;

use crate::capability::QueryCapability;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub found: bool,
    pub handle: Option<ElementHandle>,
    /// CSS form of the selector that matched.
    pub selector: Option<String>,
}

impl Detection {
    pub fn not_found() -> Self {
        Self {
            found: false,
            handle: None,
            selector: None,
        }
    }
}

pub struct RootDetector {
    query: Arc<dyn QueryCapability>,
}

impl RootDetector {
    pub fn new(query: Arc<dyn QueryCapability>) -> Self {
        Self { query }
    }

    /// Try the definition's anchors, then its selectors, against the whole
    /// document. The first selector with any match wins. Query failures count
    /// as no match.
    pub async fn detect(&self, definition: &ContainerDefinition) -> Detection {
        let document = ElementHandle::document();
        for selector in definition.detection_selectors() {
            match self.query.query_by_classes(&document, selector).await {
                Ok(handles) => {
                    if let Some(handle) = handles.into_iter().next() {
                        tracing::debug!(container = %definition.id, selector = %selector.css(), "Root detected");
                        return Detection {
                            found: true,
                            handle: Some(handle),
                            selector: Some(selector.css()),
                        };
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        container = %definition.id,
                        selector = %selector.css(),
                        error = %e,
                        "Root selector query failed"
                    );
                }
            }
        }
        Detection::not_found()
    }
}
