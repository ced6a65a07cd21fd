//! Page lifecycle: one controller run per navigation that shows the root.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use canopy_catalog::Catalog;
use canopy_types::{CanopyError, Result, RunMode};

use crate::capability::{HighlightOptions, HighlightSink, HighlightTarget};
use crate::root_detector::RootDetector;
use crate::runtime::{RunSummary, RuntimeController};

pub struct PageLifecycle {
    catalog: Arc<Catalog>,
    root_id: String,
    mode: RunMode,
    detector: RootDetector,
    controller: Arc<RuntimeController>,
    highlight: Option<Arc<dyn HighlightSink>>,
    highlight_options: HighlightOptions,
    current: Option<JoinHandle<Result<RunSummary>>>,
}

impl PageLifecycle {
    pub fn new(
        catalog: Arc<Catalog>,
        root_id: impl Into<String>,
        detector: RootDetector,
        controller: Arc<RuntimeController>,
    ) -> Self {
        let highlight_options = HighlightOptions::from(&controller.config().highlight);
        Self {
            catalog,
            root_id: root_id.into(),
            mode: RunMode::Sequential,
            detector,
            controller,
            highlight: None,
            highlight_options,
            current: None,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_highlight(mut self, sink: Arc<dyn HighlightSink>) -> Self {
        self.highlight = Some(sink);
        self
    }

    pub fn controller(&self) -> &Arc<RuntimeController> {
        &self.controller
    }

    /// React to one navigation. Returns whether a run was started.
    ///
    /// Any run still going from the previous page is stopped and awaited
    /// first. A page whose URL the root's patterns reject, or on which the
    /// root cannot be found, is skipped.
    pub async fn handle_navigation(&mut self, url: &str) -> Result<bool> {
        let definition = self.catalog.require(&self.root_id)?.clone();
        if let Some(Err(e)) = self.finish_current(true).await {
            tracing::warn!(error = %e, "Previous run ended with an error");
        }

        if !definition.page_patterns.is_empty() && !definition.matches_url(url) {
            tracing::debug!(url = %url, root = %self.root_id, "Page does not match root patterns");
            return Ok(false);
        }

        let detection = self.detector.detect(&definition).await;
        let Some(handle) = detection.handle else {
            tracing::debug!(url = %url, root = %self.root_id, "Root not found, skipping page");
            return Ok(false);
        };

        tracing::info!(url = %url, root = %self.root_id, mode = %self.mode, "Starting run for page");
        let controller = self.controller.clone();
        let root_id = self.root_id.clone();
        let mode = self.mode;
        let root_handle = handle.clone();
        self.current = Some(tokio::spawn(async move {
            controller.start(&root_id, root_handle, mode).await
        }));

        if let Some(sink) = &self.highlight {
            sink.highlight(HighlightTarget::Element(handle), self.highlight_options.clone());
        }
        Ok(true)
    }

    /// Wait for the current run, optionally asking it to stop first.
    pub async fn finish_current(&mut self, stop: bool) -> Option<Result<RunSummary>> {
        let handle = self.current.take()?;
        if stop {
            self.controller.stop();
        }
        Some(match handle.await {
            Ok(result) => result,
            Err(e) => Err(CanopyError::Other(format!("run task failed: {e}"))),
        })
    }

    /// Drive runs from a stream of navigated URLs until the sender closes,
    /// then let the last run finish.
    pub async fn run(mut self, mut navigations: mpsc::Receiver<String>) -> Option<Result<RunSummary>> {
        while let Some(url) = navigations.recv().await {
            if let Err(e) = self.handle_navigation(&url).await {
                tracing::warn!(url = %url, error = %e, "Navigation handling failed");
            }
        }
        self.finish_current(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::discovery::DiscoveryEngine;
    use crate::snapshot::{DomSnapshot, SnapshotElement};
    use canopy_catalog::ContainerDefinition;
    use canopy_types::{ElementHandle, PageContext};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        targets: Mutex<Vec<(HighlightTarget, bool)>>,
    }

    impl HighlightSink for RecordingSink {
        fn highlight(&self, target: HighlightTarget, options: HighlightOptions) {
            self.targets.lock().push((target, options.persistent));
        }
    }

    fn lifecycle(root_classes: &[&str], patterns: &[&str]) -> (PageLifecycle, Arc<RecordingSink>) {
        let mut root = ContainerDefinition::new("app", root_classes).with_children(&["item"]);
        root.page_patterns = patterns.iter().map(|p| p.to_string()).collect();
        let catalog = Arc::new(
            Catalog::from_definitions(vec![root, ContainerDefinition::new("item", &["item"])])
                .unwrap(),
        );
        let page = Arc::new(DomSnapshot::new(
            PageContext::default(),
            vec![SnapshotElement::new("a", &["app"])
                .with_children(vec![SnapshotElement::new("i", &["item"])])],
        ));
        let controller = Arc::new(RuntimeController::new(
            DiscoveryEngine::new(catalog.clone(), page.clone()),
            EngineConfig::immediate(),
        ));
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = PageLifecycle::new(catalog, "app", RootDetector::new(page), controller)
            .with_highlight(sink.clone());
        (lifecycle, sink)
    }

    #[tokio::test]
    async fn found_root_starts_run_and_highlights() {
        let (mut lifecycle, sink) = lifecycle(&["app"], &[]);
        assert!(lifecycle.handle_navigation("https://example.com/").await.unwrap());
        let summary = lifecycle.finish_current(false).await.unwrap().unwrap();
        assert_eq!(summary.node_count, 2);
        assert_eq!(
            *sink.targets.lock(),
            vec![(HighlightTarget::Element(ElementHandle::new("a")), true)]
        );
    }

    #[tokio::test]
    async fn missing_root_skips_page() {
        let (mut lifecycle, sink) = lifecycle(&["not-here"], &[]);
        assert!(!lifecycle.handle_navigation("https://example.com/").await.unwrap());
        assert!(lifecycle.finish_current(false).await.is_none());
        assert!(sink.targets.lock().is_empty());
    }

    #[tokio::test]
    async fn url_outside_patterns_is_skipped() {
        let (mut lifecycle, _) = lifecycle(&["app"], &[r"^https://example\.com/feed"]);
        assert!(!lifecycle.handle_navigation("https://example.com/login").await.unwrap());
        assert!(lifecycle.handle_navigation("https://example.com/feed").await.unwrap());
        assert!(lifecycle.finish_current(false).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn nested_root_follows_its_own_patterns() {
        let mut post = ContainerDefinition::new("post", &["post"]);
        post.page_patterns = vec![r"^https://example\.com/post".to_string()];
        let catalog = Arc::new(
            Catalog::from_definitions(vec![
                ContainerDefinition::new("feed", &["feed"]).with_children(&["post"]),
                post,
            ])
            .unwrap(),
        );
        let page = Arc::new(DomSnapshot::new(
            PageContext::default(),
            vec![SnapshotElement::new("p", &["post"])],
        ));
        let controller = Arc::new(RuntimeController::new(
            DiscoveryEngine::new(catalog.clone(), page.clone()),
            EngineConfig::immediate(),
        ));
        let mut lifecycle = PageLifecycle::new(catalog, "post", RootDetector::new(page), controller);

        assert!(!lifecycle.handle_navigation("https://example.com/feed").await.unwrap());
        assert!(lifecycle.handle_navigation("https://example.com/post/42").await.unwrap());
        let summary = lifecycle.finish_current(false).await.unwrap().unwrap();
        assert_eq!(summary.node_count, 1);
    }

    #[tokio::test]
    async fn run_consumes_navigations() {
        let (lifecycle, _) = lifecycle(&["app"], &[]);
        let (tx, rx) = mpsc::channel(4);
        tx.send("https://example.com/a".to_string()).await.unwrap();
        tx.send("https://example.com/b".to_string()).await.unwrap();
        drop(tx);
        let last = lifecycle.run(rx).await.unwrap().unwrap();
        assert_eq!(last.node_count, 2);
    }
}
