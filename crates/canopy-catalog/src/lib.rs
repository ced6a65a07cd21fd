//! Container definition catalog, workflow overlays, and catalog lint rules.
//!
//! A [`Catalog`] is the immutable, site-specific set of [`ContainerDefinition`]s
//! that the engine discovers and drives. Catalogs are loaded from JSON, reshaped
//! per workflow with [`apply_overlay`], and checked with [`validate`].

pub mod catalog;
pub mod definition;
pub mod overlay;
pub mod validation;

pub use catalog::{Catalog, CatalogFile};
pub use definition::{
    ClassSelector, ContainerDefinition, DefinitionMetadata, OperationDef, OperationKind,
    PaginationMode, PaginationPolicy, SchedulingHints, SelectorVariant,
};
pub use overlay::{apply_overlay, BehaviorOverride, WorkflowOverlay};
pub use validation::{
    validate, validate_or_raise, validate_overlay, CatalogRule, Diagnostic, Severity,
};
