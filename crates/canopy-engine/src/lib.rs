//! Discovery, scheduling, and execution over container graphs.
//!
//! This crate turns a static [`canopy_catalog::Catalog`] into a live
//! [`ContainerGraph`] by querying a pluggable [`QueryCapability`], keeps a
//! per-node operation queue, and drives the discovery/execution loop in the
//! [`RuntimeController`]. The graph's evolution is published as
//! [`EventEnvelope`]s for highlighters, auto-click rules, and other observers.

pub mod actions;
pub mod auto_click;
pub mod capability;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod focus;
pub mod graph;
pub mod lifecycle;
pub mod planner;
pub mod queue;
pub mod relations;
pub mod root_detector;
pub mod runtime;
pub mod snapshot;

pub use actions::{ActionHandler, ActionRegistry, HighlightAction, WaitAction};
pub use auto_click::AutoClickHandler;
pub use capability::{
    ExecutionOutput, HighlightOptions, HighlightSink, HighlightTarget, OperationExecutor,
    Performer, QueryCapability,
};
pub use config::{EngineConfig, HighlightConfig};
pub use discovery::{seed_children, Candidate, DiscoveryEngine, DiscoveryResult, StrategyTrace};
pub use dispatcher::ContainerEventDispatcher;
pub use events::{EventEmitter, EventEnvelope, RuntimeEvent};
pub use focus::FocusManager;
pub use graph::{ContainerGraph, ContainerNode, DiscoveryState, Feedback, NodeIndex};
pub use lifecycle::PageLifecycle;
pub use planner::{build_plan, ExecutionPlan, PlanStep};
pub use queue::{build_default_queue, OperationInstance, OperationQueue, OperationStatus, Scheduler};
pub use root_detector::{Detection, RootDetector};
pub use runtime::{ExecutionBackend, OperationRequest, RunSummary, RuntimeController, AUTO_CLICK_RULE};
pub use snapshot::{DomSnapshot, SnapshotElement};
