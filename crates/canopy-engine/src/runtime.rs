//! Runtime controller: the discovery/execution loop over a container graph.
//!
//! A run builds the initial graph through the [`DiscoveryEngine`], then
//! repeatedly picks the first located node (in insertion order) with a
//! pending operation, dispatches it, and folds the outcome back into the graph
//! until no runnable work is left or the run is stopped. Operations run as
//! futures polled by the loop itself; nothing is spawned onto other threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use canopy_catalog::{OperationDef, OperationKind};
use canopy_types::{CanopyError, ElementHandle, Result, RunMode};

use crate::capability::{OperationExecutor, Performer};
use crate::config::EngineConfig;
use crate::discovery::{seed_children, DiscoveryEngine, DiscoveryResult};
use crate::dispatcher::ContainerEventDispatcher;
use crate::events::{emit_to, EventEmitter, EventEnvelope, RuntimeEvent};
use crate::focus::FocusManager;
use crate::graph::{ContainerGraph, ContainerNode, DiscoveryState, NodeIndex};
use crate::queue::{OperationInstance, OperationStatus, Scheduler};

const SOURCE: &str = "runtime";

/// Rule id attached to click requests raised from `container:<id>:click`.
pub const AUTO_CLICK_RULE: &str = "auto-click";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where non-discovery operations are sent.
#[derive(Clone, Default)]
pub enum ExecutionBackend {
    /// No backend: action operations are marked skipped.
    #[default]
    Unconfigured,
    /// Legacy direct path.
    Performer(Arc<dyn Performer>),
    /// Preferred path, addressed by container id and operation type.
    Executor(Arc<dyn OperationExecutor>),
}

impl ExecutionBackend {
    fn name(&self) -> &'static str {
        match self {
            ExecutionBackend::Unconfigured => "none",
            ExecutionBackend::Performer(_) => "performer",
            ExecutionBackend::Executor(_) => "executor",
        }
    }
}

/// An operation requested from outside the graph, e.g. by a rule system.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub container_id: String,
    pub operation: OperationDef,
    pub rule_id: Option<String>,
}

impl OperationRequest {
    pub fn new(container_id: impl Into<String>, operation: OperationDef) -> Self {
        Self {
            container_id: container_id.into(),
            operation,
            rule_id: None,
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Totals for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub node_count: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

enum Outcome {
    Discovered(Result<DiscoveryResult>),
    Executed(Result<serde_json::Value>),
    Skipped(String),
}

/// A finished operation, waiting to be folded into the graph.
struct Completion {
    node: NodeIndex,
    /// Queue position; `None` for external requests.
    op_index: Option<usize>,
    container_id: String,
    operation: String,
    rule_id: Option<String>,
    outcome: Outcome,
}

#[derive(Default)]
struct Tally {
    completed: usize,
    failed: usize,
    skipped: usize,
}

/// Everything an operation future needs, detached from the graph lock.
struct Dispatch {
    node: NodeIndex,
    op_index: Option<usize>,
    snapshot: ContainerNode,
    instance: OperationInstance,
    rule_id: Option<String>,
}

/// Arms a fresh stop token and clears the running flag however the run ends.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a Mutex<CancellationToken>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.cancel.lock() = CancellationToken::new();
        self.running.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// RuntimeController
// ---------------------------------------------------------------------------

pub struct RuntimeController {
    discovery: Arc<DiscoveryEngine>,
    backend: ExecutionBackend,
    events: Option<EventEmitter>,
    dispatcher: Option<Mutex<ContainerEventDispatcher>>,
    config: EngineConfig,
    scheduler: Scheduler,
    session_id: Option<String>,
    graph: RwLock<ContainerGraph>,
    focus: FocusManager,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    request_tx: mpsc::UnboundedSender<OperationRequest>,
    request_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OperationRequest>>,
}

impl RuntimeController {
    pub fn new(discovery: DiscoveryEngine, config: EngineConfig) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            discovery: Arc::new(discovery),
            backend: ExecutionBackend::Unconfigured,
            events: None,
            dispatcher: None,
            scheduler: Scheduler::new(config.max_parallel_siblings),
            config,
            session_id: None,
            graph: RwLock::new(ContainerGraph::new()),
            focus: FocusManager::new(),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            request_tx,
            request_rx: tokio::sync::Mutex::new(request_rx),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.backend = ExecutionBackend::Executor(executor);
        self
    }

    pub fn with_performer(mut self, performer: Arc<dyn Performer>) -> Self {
        self.backend = ExecutionBackend::Performer(performer);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: ContainerEventDispatcher) -> Self {
        self.dispatcher = Some(Mutex::new(dispatcher));
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    // --- Accessors ---

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the graph as of the last completed step.
    pub fn current_graph(&self) -> ContainerGraph {
        self.graph.read().clone()
    }

    /// Run `f` against the live graph without cloning it.
    pub fn with_graph<R>(&self, f: impl FnOnce(&ContainerGraph) -> R) -> R {
        f(&self.graph.read())
    }

    pub fn current_focus(&self) -> Option<String> {
        self.focus.get_focus()
    }

    pub fn focus(&self) -> &FocusManager {
        &self.focus
    }

    pub fn events(&self) -> Option<&EventEmitter> {
        self.events.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sender for operation requests raised outside the graph. Requests are
    /// picked up by the running loop, or by the next run.
    pub fn request_sender(&self) -> mpsc::UnboundedSender<OperationRequest> {
        self.request_tx.clone()
    }

    /// Ask the current run to stop. In-flight operations finish first.
    ///
    /// A stop that lands before a spawned `start` reaches its loop still
    /// applies to that run; the token is only re-armed once a run ends.
    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.cancel.lock().cancel();
    }

    // --- Run ---

    /// Build the graph rooted at `root_id` and drive it to completion.
    ///
    /// Configuration errors (unknown root) abort the call; discovery and
    /// operation failures are folded into feedback and events.
    pub async fn start(
        &self,
        root_id: &str,
        root_handle: ElementHandle,
        mode: RunMode,
    ) -> Result<RunSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CanopyError::Other("controller is already running".into()));
        }
        let _guard = RunningGuard {
            running: &self.running,
            cancel: &self.cancel,
        };
        let token = self.cancel.lock().clone();

        let run_id = Uuid::new_v4();
        let graph = self
            .discovery
            .discover_from_root(root_id, &root_handle)
            .await?;
        tracing::info!(
            run_id = %run_id,
            root = %root_id,
            mode = %mode,
            backend = self.backend.name(),
            nodes = graph.len(),
            "Run started"
        );
        *self.graph.write() = graph;
        self.focus.clear();
        self.announce_initial();

        let mut requests = self.request_rx.lock().await;
        let mut clicks = self.events.as_ref().map(|e| e.subscribe());
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Completion>> =
            FuturesUnordered::new();
        let mut tally = Tally::default();
        let mut stopped = false;

        loop {
            if token.is_cancelled() {
                stopped = true;
                break;
            }
            if let Some(rx) = clicks.as_mut() {
                self.collect_clicks(rx);
            }

            match mode {
                RunMode::Sequential => {
                    if in_flight.is_empty() {
                        let mut next = None;
                        while next.is_none() {
                            match requests.try_recv() {
                                Ok(request) => next = self.dispatch_request(request),
                                Err(_) => break,
                            }
                        }
                        if let Some(dispatch) = next.or_else(|| self.next_dispatch(mode)) {
                            in_flight.push(self.launch(dispatch));
                        }
                    }
                }
                RunMode::Parallel => {
                    while let Ok(request) = requests.try_recv() {
                        if let Some(dispatch) = self.dispatch_request(request) {
                            in_flight.push(self.launch(dispatch));
                        }
                    }
                    while let Some(dispatch) = self.next_dispatch(mode) {
                        in_flight.push(self.launch(dispatch));
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(done) = in_flight.next() => self.complete(done, &mut tally),
                _ = token.cancelled() => {
                    stopped = true;
                    break;
                }
            }

            if mode == RunMode::Sequential && self.config.inter_operation_delay_ms > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_operation_delay()) => {}
                    _ = token.cancelled() => {
                        stopped = true;
                        break;
                    }
                }
            }
        }

        // Stopping never abandons an operation mid-flight.
        while let Some(done) = in_flight.next().await {
            self.complete(done, &mut tally);
        }

        let node_count = self.graph.read().len();
        emit_to(
            self.events.as_ref(),
            SOURCE,
            RuntimeEvent::LoopCompleted {
                node_count,
                mode,
                stopped,
            },
        );
        tracing::info!(
            run_id = %run_id,
            nodes = node_count,
            completed = tally.completed,
            failed = tally.failed,
            skipped = tally.skipped,
            stopped,
            "Run finished"
        );

        Ok(RunSummary {
            run_id,
            mode,
            node_count,
            completed: tally.completed,
            failed: tally.failed,
            skipped: tally.skipped,
            stopped,
        })
    }

    // --- Loop steps ---

    /// Events for the children found by the initial discovery pass.
    fn announce_initial(&self) {
        let graph = self.graph.read();
        if let Some(root) = graph.root() {
            let children = graph.children_of(root).to_vec();
            self.announce_children(&graph, root, &children);
        }
        self.dispatch_appear(&graph);
    }

    fn announce_children(&self, graph: &ContainerGraph, parent: NodeIndex, children: &[NodeIndex]) {
        let parent_id = graph.node_at(parent).id().to_string();
        for &child in children {
            let node = graph.node_at(child);
            tracing::info!(container = %node.id(), parent = %parent_id, "Container discovered");
            emit_to(
                self.events.as_ref(),
                SOURCE,
                RuntimeEvent::Discovered {
                    container_id: node.id().to_string(),
                    parent_id: parent_id.clone(),
                    score: node.score.unwrap_or_default(),
                    visible: node.visible.unwrap_or(false),
                    bbox: node.bbox,
                },
            );
        }
        emit_to(
            self.events.as_ref(),
            SOURCE,
            RuntimeEvent::ChildrenDiscovered {
                container_id: parent_id,
                count: children.len(),
                child_ids: children
                    .iter()
                    .map(|c| graph.node_at(*c).id().to_string())
                    .collect(),
            },
        );
    }

    fn dispatch_appear(&self, graph: &ContainerGraph) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher
                .lock()
                .process_match_result(graph, self.session_id.as_deref());
        }
    }

    /// Turn `container:<id>:click` events into operation requests.
    fn collect_clicks(&self, rx: &mut broadcast::Receiver<EventEnvelope>) {
        loop {
            match rx.try_recv() {
                Ok(envelope) => {
                    if let RuntimeEvent::ClickRequested { container_id } = envelope.event {
                        let request = OperationRequest::new(container_id, OperationDef::new("click"))
                            .with_rule(AUTO_CLICK_RULE);
                        let _ = self.request_tx.send(request);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged, click requests may be lost");
                }
                Err(_) => break,
            }
        }
    }

    /// Pick the next graph operation and mark it running.
    fn next_dispatch(&self, mode: RunMode) -> Option<Dispatch> {
        let mut graph = self.graph.write();
        let (node, op_index) = graph.indices().find_map(|idx| {
            let n = graph.node_at(idx);
            if n.state != DiscoveryState::Located {
                return None;
            }
            let op_index = n.queue.next_runnable()?;
            self.scheduler
                .can_run(&graph, idx, mode)
                .then_some((idx, op_index))
        })?;

        let container = graph.node_at_mut(node);
        if let Err(e) = container.queue.mark_running(op_index) {
            tracing::warn!(container = %container.id(), error = %e, "Could not start operation");
            return None;
        }
        let instance = container.queue.get(op_index)?.clone();
        Some(Dispatch {
            node,
            op_index: Some(op_index),
            snapshot: container.clone(),
            instance,
            rule_id: None,
        })
    }

    /// Resolve an external request against the graph.
    fn dispatch_request(&self, request: OperationRequest) -> Option<Dispatch> {
        let graph = self.graph.read();
        let Some(node) = graph.index_of(&request.container_id) else {
            tracing::warn!(
                container = %request.container_id,
                op = %request.operation.op_type,
                rule = ?request.rule_id,
                "Operation requested for a container not in the graph"
            );
            emit_to(
                self.events.as_ref(),
                SOURCE,
                RuntimeEvent::OperationFailed {
                    container_id: request.container_id.clone(),
                    operation: request.operation.op_type.clone(),
                    op_index: None,
                    error: CanopyError::UnknownContainer { id: request.container_id }.to_string(),
                    rule_id: request.rule_id,
                },
            );
            return None;
        };
        let mut instance = OperationInstance::new(request.operation);
        instance.mark_running().ok()?;
        Some(Dispatch {
            node,
            op_index: None,
            snapshot: graph.node_at(node).clone(),
            instance,
            rule_id: request.rule_id,
        })
    }

    /// Announce and start one operation.
    fn launch(&self, dispatch: Dispatch) -> BoxFuture<'static, Completion> {
        let Dispatch {
            node,
            op_index,
            snapshot,
            instance,
            rule_id,
        } = dispatch;
        let container_id = snapshot.id().to_string();
        let operation = instance.op_type().to_string();

        self.focus.set_focus(container_id.clone());
        emit_to(
            self.events.as_ref(),
            SOURCE,
            RuntimeEvent::Executing {
                container_id: container_id.clone(),
                operation: operation.clone(),
                bbox: snapshot.bbox,
            },
        );
        tracing::debug!(container = %container_id, op = %operation, op_index = ?op_index, "Operation started");

        let is_discovery = op_index.is_some()
            && matches!(instance.definition.kind(), OperationKind::FindChild);
        let discovery = self.discovery.clone();
        let backend = self.backend.clone();

        async move {
            let outcome = if is_discovery {
                Outcome::Discovered(
                    discovery
                        .discover_children(&container_id, &snapshot.handle)
                        .await,
                )
            } else {
                execute(&backend, &snapshot, &instance).await
            };
            Completion {
                node,
                op_index,
                container_id,
                operation,
                rule_id,
                outcome,
            }
        }
        .boxed()
    }

    /// Fold a finished operation back into the graph.
    fn complete(&self, done: Completion, tally: &mut Tally) {
        let Completion {
            node,
            op_index,
            container_id,
            operation,
            rule_id,
            outcome,
        } = done;
        let mut graph = self.graph.write();

        let result = match outcome {
            Outcome::Discovered(Ok(found)) => {
                let linked = seed_children(&mut graph, node, &found);
                let payload = serde_json::json!({
                    "discovered": linked.len(),
                    "candidates": found.candidates.len(),
                });
                // The summary goes out even when nothing new was linked.
                self.announce_children(&graph, node, &linked);
                if !linked.is_empty() {
                    self.dispatch_appear(&graph);
                }
                Ok(payload)
            }
            Outcome::Discovered(Err(e)) | Outcome::Executed(Err(e)) => Err(e.to_string()),
            Outcome::Executed(Ok(data)) => Ok(data),
            Outcome::Skipped(reason) => {
                tracing::debug!(container = %container_id, op = %operation, reason = %reason, "Operation skipped");
                if let Some(index) = op_index {
                    let container = graph.node_at_mut(node);
                    if let Err(e) = container.queue.mark_skipped(index, reason) {
                        tracing::warn!(container = %container_id, error = %e, "Status update rejected");
                    }
                    settle(container);
                }
                tally.skipped += 1;
                return;
            }
        };

        let container = graph.node_at_mut(node);
        match result {
            Ok(data) => {
                if data.get("boundaryReached").and_then(|v| v.as_bool()) == Some(true) {
                    container.feedback.boundary_reached = Some(true);
                }
                if let Some(index) = op_index {
                    if let Err(e) = container.queue.mark_done(index, data.clone()) {
                        tracing::warn!(container = %container_id, error = %e, "Status update rejected");
                    }
                }
                tally.completed += 1;
                tracing::debug!(container = %container_id, op = %operation, "Operation completed");
                emit_to(
                    self.events.as_ref(),
                    SOURCE,
                    RuntimeEvent::OperationCompleted {
                        container_id: container_id.clone(),
                        operation,
                        op_index,
                        result: data,
                        rule_id,
                    },
                );
            }
            Err(message) => {
                container.feedback.fails += 1;
                if let Some(index) = op_index {
                    if let Err(e) = container.queue.mark_failed(index, message.clone()) {
                        tracing::warn!(container = %container_id, error = %e, "Status update rejected");
                    }
                }
                tally.failed += 1;
                tracing::warn!(container = %container_id, op = %operation, error = %message, "Operation failed");
                emit_to(
                    self.events.as_ref(),
                    SOURCE,
                    RuntimeEvent::OperationFailed {
                        container_id: container_id.clone(),
                        operation,
                        op_index,
                        error: message,
                        rule_id,
                    },
                );
            }
        }
        settle(graph.node_at_mut(node));
    }
}

/// Send an action to the configured backend. Typed failures become errors.
async fn execute(
    backend: &ExecutionBackend,
    node: &ContainerNode,
    instance: &OperationInstance,
) -> Outcome {
    match backend {
        ExecutionBackend::Unconfigured => {
            Outcome::Skipped("no execution backend configured".to_string())
        }
        ExecutionBackend::Performer(performer) => {
            Outcome::Executed(performer.perform(node, instance).await)
        }
        ExecutionBackend::Executor(executor) => {
            let result = executor
                .execute(
                    node.id(),
                    instance.op_type(),
                    &instance.definition.config,
                    &node.handle,
                )
                .await
                .and_then(|output| {
                    if output.ok {
                        Ok(output.data)
                    } else {
                        Err(CanopyError::Other(output.failure_text()))
                    }
                });
            Outcome::Executed(result)
        }
    }
}

/// Close out a node whose queue has drained.
fn settle(node: &mut ContainerNode) {
    if node.state != DiscoveryState::Located || !node.queue.is_drained() {
        return;
    }
    node.state = if node.queue.count(OperationStatus::Failed) > 0 {
        DiscoveryState::Failed
    } else {
        DiscoveryState::Stable
    };
    tracing::debug!(container = %node.id(), state = node.state.as_str(), "Container settled");
}
