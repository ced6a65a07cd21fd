use serde::{Deserialize, Serialize};

use canopy_types::RunMode;

/// Static description of a dynamically locatable region of a page.
///
/// Definitions are immutable at runtime. Workflow overlays produce modified
/// copies; they never edit a definition in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub selectors: Vec<ClassSelector>,
    /// Dedicated root-detection anchors, tried before `selectors`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<ClassSelector>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
    /// URL regexes for pages this container lives on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_patterns: Vec<String>,
    #[serde(default)]
    pub metadata: DefinitionMetadata,
    #[serde(default)]
    pub hints: SchedulingHints,
}

impl ContainerDefinition {
    /// Minimal definition with one selector built from `classes`.
    pub fn new(id: impl Into<String>, classes: &[&str]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: None,
            scope: None,
            selectors: vec![ClassSelector::new(classes)],
            anchors: Vec::new(),
            children: Vec::new(),
            depends_on: Vec::new(),
            capabilities: Vec::new(),
            run_mode: RunMode::Sequential,
            operations: Vec::new(),
            pagination: None,
            reliability: None,
            page_patterns: Vec::new(),
            metadata: DefinitionMetadata::default(),
            hints: SchedulingHints::default(),
        }
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_operations(mut self, operations: Vec<OperationDef>) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_auto_click(mut self) -> Self {
        self.metadata.auto_click = true;
        self
    }

    /// Whether any of the page patterns matches `url`. Invalid patterns never match.
    pub fn matches_url(&self, url: &str) -> bool {
        self.page_patterns.iter().any(|pattern| match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(url),
            Err(e) => {
                tracing::warn!(container = %self.id, pattern = %pattern, error = %e, "Invalid page pattern");
                false
            }
        })
    }

    /// Anchors first, then general selectors: the order root detection tries them in.
    pub fn detection_selectors(&self) -> impl Iterator<Item = &ClassSelector> {
        self.anchors.iter().chain(self.selectors.iter())
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorVariant {
    Primary,
    Backup,
}

/// A class-token selector: an element matches when it carries every token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSelector {
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<SelectorVariant>,
    /// Score hint for candidates found through this selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ClassSelector {
    pub fn new(classes: &[&str]) -> Self {
        Self {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            variant: None,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_variant(mut self, variant: SelectorVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    /// CSS form (`.a.b`), used in logs and traces.
    pub fn css(&self) -> String {
        self.classes.iter().map(|c| format!(".{c}")).collect()
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One entry of a container's operation list, e.g. `{"type": "click"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

/// The two dispatch families the runtime distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind<'a> {
    /// Discover realized children under this container.
    FindChild,
    /// Anything else, handed to the configured execution backend.
    Action(&'a str),
}

impl OperationDef {
    pub const FIND_CHILD: &'static str = "find-child";

    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn find_child() -> Self {
        Self::new(Self::FIND_CHILD)
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn kind(&self) -> OperationKind<'_> {
        if self.op_type == Self::FIND_CHILD {
            OperationKind::FindChild
        } else {
            OperationKind::Action(&self.op_type)
        }
    }
}

// ---------------------------------------------------------------------------
// Pagination, metadata, hints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    Scroll,
    NextButton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationPolicy {
    pub mode: PaginationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<ClassSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionMetadata {
    /// Trigger a click whenever this container first appears.
    #[serde(default)]
    pub auto_click: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Scheduler hints attached by workflow overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchedulingHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Cap on concurrently running children in parallel mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_url_checks_every_pattern() {
        let mut def = ContainerDefinition::new("post", &["post"]);
        assert!(!def.matches_url("https://example.com/post/1"));
        def.page_patterns = vec!["([".to_string(), r"^https://example\.com/post/\d+$".to_string()];
        assert!(def.matches_url("https://example.com/post/1"));
        assert!(!def.matches_url("https://example.com/feed"));
    }

    #[test]
    fn deserialize_full_definition() {
        let json = r#"{
            "id": "feed",
            "name": "Feed list",
            "type": "list",
            "selectors": [
                {"classes": ["feed", "main"], "variant": "primary", "score": 0.9},
                {"classes": ["feed-fallback"], "variant": "backup"}
            ],
            "anchors": [{"classes": ["feed-root"]}],
            "children": ["post"],
            "dependsOn": ["header"],
            "capabilities": ["scroll"],
            "runMode": "parallel",
            "operations": [{"type": "find-child"}, {"type": "scroll", "config": {"px": 400}}],
            "pagination": {"mode": "scroll", "maxPages": 5},
            "reliability": 0.8,
            "pagePatterns": ["^https://example\\.com/feed"],
            "metadata": {"autoClick": true, "owner": "growth"}
        }"#;
        let def: ContainerDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.kind.as_deref(), Some("list"));
        assert_eq!(def.selectors.len(), 2);
        assert_eq!(def.selectors[0].variant, Some(SelectorVariant::Primary));
        assert_eq!(def.selectors[0].score, Some(0.9));
        assert_eq!(def.anchors[0].classes, vec!["feed-root"]);
        assert_eq!(def.depends_on, vec!["header"]);
        assert_eq!(def.run_mode, RunMode::Parallel);
        assert_eq!(def.operations[1].config["px"], 400);
        assert_eq!(def.pagination.as_ref().unwrap().max_pages, Some(5));
        assert!(def.metadata.auto_click);
        assert_eq!(def.metadata.extra["owner"], "growth");
    }

    #[test]
    fn minimal_definition_uses_defaults() {
        let def: ContainerDefinition =
            serde_json::from_str(r#"{"id": "post", "selectors": [{"classes": ["post"]}]}"#)
                .unwrap();
        assert_eq!(def.run_mode, RunMode::Sequential);
        assert!(def.operations.is_empty());
        assert!(def.children.is_empty());
        assert!(!def.metadata.auto_click);
        assert_eq!(def.hints, SchedulingHints::default());
    }

    #[test]
    fn operation_kind_dispatch() {
        assert_eq!(OperationDef::find_child().kind(), OperationKind::FindChild);
        assert_eq!(OperationDef::new("click").kind(), OperationKind::Action("click"));
    }

    #[test]
    fn selector_css_form() {
        assert_eq!(ClassSelector::new(&["a", "b"]).css(), ".a.b");
    }

    #[test]
    fn detection_selectors_try_anchors_first() {
        let mut def = ContainerDefinition::new("root", &["page"]);
        def.anchors = vec![ClassSelector::new(&["page-anchor"])];
        let order: Vec<String> = def.detection_selectors().map(|s| s.css()).collect();
        assert_eq!(order, vec![".page-anchor", ".page"]);
    }
}
