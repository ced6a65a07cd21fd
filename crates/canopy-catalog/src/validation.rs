//! Catalog validation: lint rules and diagnostics.
//!
//! Provides built-in rules that check the structural correctness of a
//! [`Catalog`]. Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::collections::HashMap;

use canopy_types::CanopyError;

use crate::catalog::Catalog;
use crate::definition::ContainerDefinition;
use crate::overlay::WorkflowOverlay;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub container_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// CatalogRule trait
// ---------------------------------------------------------------------------

pub trait CatalogRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ChildExistsRule;
impl CatalogRule for ChildExistsRule {
    fn name(&self) -> &str { "child_exists" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        catalog
            .iter()
            .flat_map(|def| {
                def.children
                    .iter()
                    .filter(|c| !catalog.contains(c))
                    .map(move |c| Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!("Container '{}' lists unknown child '{c}'", def.id),
                        container_id: Some(def.id.clone()),
                        fix: Some(format!("Define container '{c}' or remove it from children")),
                    })
            })
            .collect()
    }
}

struct DependsExistsRule;
impl CatalogRule for DependsExistsRule {
    fn name(&self) -> &str { "depends_exists" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        catalog
            .iter()
            .flat_map(|def| {
                def.depends_on
                    .iter()
                    .filter(|d| !catalog.contains(d))
                    .map(move |d| Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!("Container '{}' depends on unknown container '{d}'", def.id),
                        container_id: Some(def.id.clone()),
                        fix: Some(format!("Define container '{d}' or drop the dependency")),
                    })
            })
            .collect()
    }
}

struct HasSelectorsRule;
impl CatalogRule for HasSelectorsRule {
    fn name(&self) -> &str { "has_selectors" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        catalog
            .iter()
            .filter(|def| def.selectors.is_empty() && def.anchors.is_empty())
            .map(|def| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Container '{}' has no selectors or anchors", def.id),
                container_id: Some(def.id.clone()),
                fix: Some("Add at least one class selector".into()),
            })
            .collect()
    }
}

struct SelectorTokensRule;
impl CatalogRule for SelectorTokensRule {
    fn name(&self) -> &str { "selector_tokens" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        catalog
            .iter()
            .filter(|def| {
                def.detection_selectors().any(|s| {
                    s.classes.is_empty() || s.classes.iter().any(|c| c.trim().is_empty())
                })
            })
            .map(|def| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Container '{}' has a selector with empty class tokens", def.id),
                container_id: Some(def.id.clone()),
                fix: Some("Remove blank class tokens from the selector".into()),
            })
            .collect()
    }
}

struct ScoreRangeRule;
impl CatalogRule for ScoreRangeRule {
    fn name(&self) -> &str { "score_range" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        let out_of_range = |v: f64| !(0.0..=1.0).contains(&v);
        catalog
            .iter()
            .filter(|def| {
                def.reliability.is_some_and(out_of_range)
                    || def.detection_selectors().any(|s| s.score.is_some_and(out_of_range))
            })
            .map(|def| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Container '{}' has a score or reliability outside 0..=1", def.id),
                container_id: Some(def.id.clone()),
                fix: None,
            })
            .collect()
    }
}

struct PagePatternRule;
impl CatalogRule for PagePatternRule {
    fn name(&self) -> &str { "page_pattern" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        catalog
            .iter()
            .flat_map(|def| {
                def.page_patterns.iter().filter_map(move |p| match regex::Regex::new(p) {
                    Ok(_) => None,
                    Err(e) => Some(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!("Container '{}' has invalid page pattern '{p}': {e}", def.id),
                        container_id: Some(def.id.clone()),
                        fix: Some("Fix the regular expression".into()),
                    }),
                })
            })
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

struct StaticCycleRule;
impl StaticCycleRule {
    fn visit<'a>(
        catalog: &'a Catalog,
        def: &'a ContainerDefinition,
        marks: &mut HashMap<&'a str, Mark>,
        cycles: &mut Vec<String>,
    ) {
        marks.insert(def.id.as_str(), Mark::Visiting);
        for child in &def.children {
            match marks.get(child.as_str()) {
                Some(Mark::Visiting) => cycles.push(format!("{} -> {child}", def.id)),
                Some(Mark::Done) => {}
                None => {
                    if let Some(child_def) = catalog.get(child) {
                        Self::visit(catalog, child_def, marks, cycles);
                    }
                }
            }
        }
        marks.insert(def.id.as_str(), Mark::Done);
    }
}

impl CatalogRule for StaticCycleRule {
    fn name(&self) -> &str { "static_cycle" }
    fn apply(&self, catalog: &Catalog) -> Vec<Diagnostic> {
        let mut marks = HashMap::new();
        let mut cycles = Vec::new();
        for def in catalog.iter() {
            if !marks.contains_key(def.id.as_str()) {
                Self::visit(catalog, def, &mut marks, &mut cycles);
            }
        }
        cycles
            .into_iter()
            .map(|edge| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Static children form a cycle at edge {edge}"),
                container_id: edge.split(" -> ").next().map(String::from),
                fix: Some("Break the cycle in the children lists".into()),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(catalog: &Catalog) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn CatalogRule>> = vec![
        Box::new(ChildExistsRule),
        Box::new(DependsExistsRule),
        Box::new(HasSelectorsRule),
        Box::new(SelectorTokensRule),
        Box::new(ScoreRangeRule),
        Box::new(PagePatternRule),
        Box::new(StaticCycleRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(catalog));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(catalog: &Catalog) -> canopy_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(catalog);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(CanopyError::ValidationError(messages.join("; ")));
    }
    Ok(diagnostics)
}

/// Check an overlay against the catalog it will be applied to.
pub fn validate_overlay(catalog: &Catalog, overlay: &WorkflowOverlay) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if !catalog.contains(&overlay.root_id) {
        diagnostics.push(Diagnostic {
            rule: "overlay_root".into(),
            severity: Severity::Error,
            message: format!(
                "Overlay '{}' roots at unknown container '{}'",
                overlay.id, overlay.root_id
            ),
            container_id: Some(overlay.root_id.clone()),
            fix: None,
        });
    }
    for ov in overlay.overrides.iter().filter(|o| !catalog.contains(&o.container_id)) {
        diagnostics.push(Diagnostic {
            rule: "overlay_target".into(),
            severity: Severity::Warning,
            message: format!(
                "Overlay '{}' overrides unknown container '{}'",
                overlay.id, ov.container_id
            ),
            container_id: Some(ov.container_id.clone()),
            fix: Some("Remove the override or fix the container id".into()),
        });
    }
    diagnostics
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ClassSelector;
    use crate::overlay::BehaviorOverride;

    fn build(defs: Vec<ContainerDefinition>) -> Catalog {
        Catalog::from_definitions(defs).unwrap()
    }

    fn has_rule(diags: &[Diagnostic], rule: &str) -> bool {
        diags.iter().any(|d| d.rule == rule)
    }

    #[test]
    fn valid_catalog_passes() {
        let catalog = build(vec![
            ContainerDefinition::new("page", &["app"]).with_children(&["feed"]),
            ContainerDefinition::new("feed", &["feed"]).with_children(&["post"]),
            ContainerDefinition::new("post", &["post"]),
        ]);
        let diags = validate(&catalog);
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
        assert!(validate_or_raise(&catalog).is_ok());
    }

    #[test]
    fn unknown_child_is_error() {
        let catalog = build(vec![
            ContainerDefinition::new("page", &["app"]).with_children(&["ghost"]),
        ]);
        let diags = validate(&catalog);
        assert!(diags
            .iter()
            .any(|d| d.rule == "child_exists" && d.severity == Severity::Error));
        let err = validate_or_raise(&catalog).unwrap_err();
        assert!(err.to_string().contains("unknown child 'ghost'"));
    }

    #[test]
    fn unknown_dependency_is_error() {
        let mut def = ContainerDefinition::new("page", &["app"]);
        def.depends_on = vec!["login".into()];
        let diags = validate(&build(vec![def]));
        assert!(has_rule(&diags, "depends_exists"));
    }

    #[test]
    fn missing_selectors_is_error() {
        let mut def = ContainerDefinition::new("page", &["app"]);
        def.selectors.clear();
        assert!(has_rule(&validate(&build(vec![def.clone()])), "has_selectors"));

        // Anchors alone are enough
        def.anchors = vec![ClassSelector::new(&["anchor"])];
        assert!(!has_rule(&validate(&build(vec![def])), "has_selectors"));
    }

    #[test]
    fn blank_class_token_is_error() {
        let mut def = ContainerDefinition::new("page", &["app"]);
        def.selectors.push(ClassSelector::new(&["ok", " "]));
        assert!(has_rule(&validate(&build(vec![def])), "selector_tokens"));
    }

    #[test]
    fn score_out_of_range_is_warning() {
        let mut def = ContainerDefinition::new("page", &["app"]);
        def.selectors[0].score = Some(1.5);
        let diags = validate(&build(vec![def]));
        let d = diags.iter().find(|d| d.rule == "score_range").unwrap();
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn invalid_page_pattern_is_error() {
        let mut def = ContainerDefinition::new("page", &["app"]);
        def.page_patterns = vec!["(unclosed".into()];
        assert!(has_rule(&validate(&build(vec![def])), "page_pattern"));
    }

    #[test]
    fn static_cycle_detected() {
        let catalog = build(vec![
            ContainerDefinition::new("a", &["a"]).with_children(&["b"]),
            ContainerDefinition::new("b", &["b"]).with_children(&["c"]),
            ContainerDefinition::new("c", &["c"]).with_children(&["a"]),
        ]);
        let diags = validate(&catalog);
        let cycles: Vec<_> = diags.iter().filter(|d| d.rule == "static_cycle").collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.contains("c -> a"));
    }

    #[test]
    fn self_reference_is_cycle() {
        let catalog = build(vec![ContainerDefinition::new("a", &["a"]).with_children(&["a"])]);
        assert!(has_rule(&validate(&catalog), "static_cycle"));
    }

    #[test]
    fn shared_child_is_not_a_cycle() {
        let catalog = build(vec![
            ContainerDefinition::new("root", &["r"]).with_children(&["left", "right"]),
            ContainerDefinition::new("left", &["l"]).with_children(&["leaf"]),
            ContainerDefinition::new("right", &["r2"]).with_children(&["leaf"]),
            ContainerDefinition::new("leaf", &["leaf"]),
        ]);
        assert!(!has_rule(&validate(&catalog), "static_cycle"));
    }

    #[test]
    fn overlay_checks_root_and_targets() {
        let catalog = build(vec![ContainerDefinition::new("page", &["app"])]);
        let overlay = WorkflowOverlay {
            id: "wf".into(),
            root_id: "missing".into(),
            overrides: vec![BehaviorOverride {
                container_id: "ghost".into(),
                run_mode: None,
                operations: None,
                priority: None,
                concurrency: None,
            }],
        };
        let diags = validate_overlay(&catalog, &overlay);
        assert!(diags
            .iter()
            .any(|d| d.rule == "overlay_root" && d.severity == Severity::Error));
        assert!(diags
            .iter()
            .any(|d| d.rule == "overlay_target" && d.severity == Severity::Warning));
    }
}
