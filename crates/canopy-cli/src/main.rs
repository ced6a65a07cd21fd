//! CLI binary for validating catalogs and replaying runs against DOM snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use canopy_catalog::{apply_overlay, validate, validate_overlay, Catalog, Diagnostic, Severity, WorkflowOverlay};
use canopy_engine::{
    build_plan, ActionRegistry, AutoClickHandler, ContainerEventDispatcher, DiscoveryEngine, DomSnapshot,
    EngineConfig, EventEmitter, EventEnvelope, ExecutionOutput, HighlightOptions, HighlightSink,
    HighlightTarget, OperationExecutor, RootDetector, RuntimeController,
};
use canopy_types::{ElementHandle, RunMode};

#[derive(Parser)]
#[command(name = "canopy", version, about = "Discover and drive container graphs over recorded pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint a catalog file (and optionally an overlay against it)
    Validate {
        /// Path to the catalog .json file
        catalog: PathBuf,

        /// Workflow overlay to check against the catalog
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Show the containers in a catalog
    Info {
        /// Path to the catalog .json file
        catalog: PathBuf,
    },

    /// Discover the graph on a snapshot and print the execution plan
    Plan {
        /// Path to the catalog .json file
        catalog: PathBuf,

        /// Recorded page snapshot (.json)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Root container id
        #[arg(short, long)]
        root: String,

        /// Workflow overlay applied before discovery
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Plan in parallel mode
        #[arg(long)]
        parallel: bool,
    },

    /// Run the discovery/execution loop against a snapshot with a dry-run executor
    Run {
        /// Path to the catalog .json file
        catalog: PathBuf,

        /// Recorded page snapshot (.json)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Root container id
        #[arg(short, long)]
        root: String,

        /// Workflow overlay applied before discovery
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Engine configuration (.json); defaults apply to missing fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run in parallel mode
        #[arg(long)]
        parallel: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { catalog, overlay } => {
            cmd_validate(&catalog, overlay.as_deref())?;
        }
        Commands::Info { catalog } => {
            cmd_info(&catalog)?;
        }
        Commands::Plan {
            catalog,
            snapshot,
            root,
            overlay,
            parallel,
        } => {
            cmd_plan(&catalog, &snapshot, &root, overlay.as_deref(), run_mode(parallel)).await?;
        }
        Commands::Run {
            catalog,
            snapshot,
            root,
            overlay,
            config,
            parallel,
        } => {
            cmd_run(
                &catalog,
                &snapshot,
                &root,
                overlay.as_deref(),
                config.as_deref(),
                run_mode(parallel),
            )
            .await?;
        }
    }

    Ok(())
}

fn run_mode(parallel: bool) -> RunMode {
    if parallel {
        RunMode::Parallel
    } else {
        RunMode::Sequential
    }
}

/// Load a catalog and, if given, apply an overlay to it.
fn load_catalog(path: &Path, overlay: Option<&Path>) -> anyhow::Result<Catalog> {
    let catalog = Catalog::load(path)?;
    match overlay {
        Some(overlay_path) => {
            let overlay = WorkflowOverlay::load(overlay_path)?;
            Ok(apply_overlay(&catalog, Some(&overlay)))
        }
        None => Ok(catalog),
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) -> bool {
    let mut has_error = false;
    for diag in diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.container_id {
            Some(id) => println!("[{}] {} ({}): {}", severity, diag.rule, id, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }
    has_error
}

fn cmd_validate(path: &Path, overlay: Option<&Path>) -> anyhow::Result<()> {
    let catalog = Catalog::load(path)?;
    let mut diagnostics = validate(&catalog);
    if let Some(overlay_path) = overlay {
        let overlay = WorkflowOverlay::load(overlay_path)?;
        diagnostics.extend(validate_overlay(&catalog, &overlay));
    }

    if diagnostics.is_empty() {
        println!("Catalog is valid ({} containers)", catalog.len());
        return Ok(());
    }

    if print_diagnostics(&diagnostics) {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let catalog = Catalog::load(path)?;

    println!("Containers: {}", catalog.len());
    let roots: Vec<&str> = catalog.roots().iter().map(|def| def.id.as_str()).collect();
    println!("Roots: {}", roots.join(", "));

    println!("\nContainers:");
    let mut ids: Vec<&str> = catalog.ids().collect();
    ids.sort_unstable();
    for id in ids {
        let Some(def) = catalog.get(id) else { continue };
        let selectors: Vec<String> = def.selectors.iter().map(|s| s.css()).collect();
        let operations: Vec<&str> = def.operations.iter().map(|op| op.op_type.as_str()).collect();
        println!(
            "  {} [{}] mode={} selectors={}",
            def.id,
            def.kind.as_deref().unwrap_or("(untyped)"),
            def.run_mode,
            selectors.join(" | ")
        );
        if !def.children.is_empty() {
            println!("    children: {}", def.children.join(", "));
        }
        if !def.depends_on.is_empty() {
            println!("    depends on: {}", def.depends_on.join(", "));
        }
        if !operations.is_empty() {
            println!("    operations: {}", operations.join(", "));
        }
        if def.metadata.auto_click {
            println!("    auto-click");
        }
    }

    Ok(())
}

/// Find the root on the page, falling back to the document itself.
async fn locate_root(catalog: &Catalog, page: Arc<DomSnapshot>, root: &str) -> anyhow::Result<ElementHandle> {
    let definition = catalog.require(root)?;
    let detection = RootDetector::new(page).detect(definition).await;
    match detection.handle {
        Some(handle) => {
            tracing::info!(
                root = %root,
                handle = %handle,
                selector = detection.selector.as_deref().unwrap_or(""),
                "Root located"
            );
            Ok(handle)
        }
        None => {
            tracing::warn!(root = %root, "Root not found on page, scoping to the document");
            Ok(ElementHandle::document())
        }
    }
}

async fn cmd_plan(
    catalog_path: &Path,
    snapshot: &Path,
    root: &str,
    overlay: Option<&Path>,
    mode: RunMode,
) -> anyhow::Result<()> {
    let catalog = Arc::new(load_catalog(catalog_path, overlay)?);
    let page = Arc::new(DomSnapshot::load(snapshot)?);
    let handle = locate_root(&catalog, page.clone(), root).await?;

    let engine = DiscoveryEngine::new(catalog, page);
    let graph = engine.discover_from_root(root, &handle).await?;
    let plan = build_plan(&graph, root, mode)?;

    println!("Graph: {} nodes, {} edges", graph.len(), graph.parent_to_child().len());
    for (parent, child) in graph.edge_ids() {
        println!("  {} -> {}", parent, child);
    }
    println!("\nPlan ({}, {} steps):", plan.mode, plan.len());
    for (i, step) in plan.order.iter().enumerate() {
        let op = graph
            .node(&step.container_id)
            .and_then(|n| n.queue.get(step.op_index))
            .map(|op| op.op_type().to_string())
            .unwrap_or_default();
        println!("  {:>3}. {} #{} {}", i + 1, step.container_id, step.op_index, op);
    }

    Ok(())
}

async fn cmd_run(
    catalog_path: &Path,
    snapshot: &Path,
    root: &str,
    overlay: Option<&Path>,
    config: Option<&Path>,
    mode: RunMode,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let catalog = Arc::new(load_catalog(catalog_path, overlay)?);
    let page = Arc::new(DomSnapshot::load(snapshot)?);
    let handle = locate_root(&catalog, page.clone(), root).await?;

    let events = EventEmitter::new(config.event_capacity);
    let printer = tokio::spawn(print_events(events.subscribe()));
    let auto_click = tokio::spawn(
        AutoClickHandler::from_config(catalog.clone(), events.clone(), &config).run(events.subscribe()),
    );

    let highlight: Arc<dyn HighlightSink> = Arc::new(LogHighlighter);
    let registry = ActionRegistry::with_defaults(Some((highlight, HighlightOptions::from(&config.highlight))));
    let controller = RuntimeController::new(
        DiscoveryEngine::new(catalog, page).with_config(&config),
        config,
    )
    .with_executor(Arc::new(DryRunExecutor::new(registry)))
    .with_dispatcher(ContainerEventDispatcher::new(Some(events.clone())))
    .with_events(events.clone());

    let summary = controller.start(root, handle, mode).await?;

    drop(controller);
    drop(events);
    auto_click.abort();
    let _ = printer.await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Print every event as one JSON line until the bus closes.
async fn print_events(mut rx: broadcast::Receiver<EventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Could not serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Dry-run backend
// ---------------------------------------------------------------------------

/// Runs registered actions for real and logs everything else as a no-op success.
struct DryRunExecutor {
    actions: ActionRegistry,
}

impl DryRunExecutor {
    fn new(actions: ActionRegistry) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl OperationExecutor for DryRunExecutor {
    async fn execute(
        &self,
        container_id: &str,
        operation: &str,
        config: &serde_json::Value,
        handle: &ElementHandle,
    ) -> canopy_types::Result<ExecutionOutput> {
        if self.actions.has(operation) {
            return self.actions.execute(container_id, operation, config, handle).await;
        }
        tracing::info!(container = %container_id, op = %operation, handle = %handle, "Dry run");
        Ok(ExecutionOutput::ok(serde_json::json!({
            "dryRun": true,
            "operation": operation,
            "handle": handle,
        })))
    }
}

struct LogHighlighter;

impl HighlightSink for LogHighlighter {
    fn highlight(&self, target: HighlightTarget, options: HighlightOptions) {
        match target {
            HighlightTarget::Element(handle) => {
                tracing::info!(handle = %handle, color = %options.color, label = ?options.label, "Highlight");
            }
            HighlightTarget::Region(bbox) => {
                tracing::info!(region = ?bbox, color = %options.color, label = ?options.label, "Highlight");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    const CATALOG: &str = r#"{
        "containers": [
            { "id": "feed", "selectors": [{ "classes": ["feed"] }], "children": ["post"] },
            { "id": "post", "selectors": [{ "classes": ["post"] }],
              "operations": [{ "type": "click" }] }
        ]
    }"#;

    #[test]
    fn overlay_is_applied_when_loading() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write(&dir, "catalog.json", CATALOG);
        let overlay = write(
            &dir,
            "overlay.json",
            r#"{ "id": "wf", "rootId": "feed",
                 "overrides": [{ "containerId": "post", "runMode": "parallel" }] }"#,
        );

        let plain = load_catalog(&catalog, None).unwrap();
        assert_eq!(plain.get("post").unwrap().run_mode, RunMode::Sequential);
        let overlaid = load_catalog(&catalog, Some(&overlay)).unwrap();
        assert_eq!(overlaid.get("post").unwrap().run_mode, RunMode::Parallel);
    }

    #[tokio::test]
    async fn missing_root_falls_back_to_document() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = load_catalog(&write(&dir, "catalog.json", CATALOG), None).unwrap();
        let page = Arc::new(DomSnapshot::from_json(r#"{ "url": "about:blank", "elements": [] }"#).unwrap());
        let handle = locate_root(&catalog, page.clone(), "feed").await.unwrap();
        assert!(handle.is_document());
        assert!(locate_root(&catalog, page, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn dry_run_executor_defers_to_registered_actions() {
        let executor = DryRunExecutor::new(ActionRegistry::with_defaults(None));
        let handle = ElementHandle::new("n1");

        let waited = executor
            .execute("post", "wait", &serde_json::json!({ "ms": 0 }), &handle)
            .await
            .unwrap();
        assert_eq!(waited.data["waitedMs"], 0);

        let clicked = executor
            .execute("post", "click", &serde_json::Value::Null, &handle)
            .await
            .unwrap();
        assert!(clicked.ok);
        assert_eq!(clicked.data["dryRun"], true);
        assert_eq!(clicked.data["handle"], "n1");
    }
}
