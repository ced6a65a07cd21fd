//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canopy_types::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Pause between operations in sequential mode.
    #[serde(default = "default_inter_operation_delay_ms")]
    pub inter_operation_delay_ms: u64,

    /// Cap on concurrently running siblings in parallel mode.
    #[serde(default = "default_max_parallel_siblings")]
    pub max_parallel_siblings: usize,

    /// Window during which repeat appear events for one container are ignored.
    #[serde(default = "default_auto_click_debounce_ms")]
    pub auto_click_debounce_ms: u64,

    /// Broadcast channel capacity for runtime events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Discovery score for selectors without a score hint.
    #[serde(default = "default_score")]
    pub default_score: f64,

    /// Added to the score of visible candidates.
    #[serde(default = "default_visibility_bonus")]
    pub visibility_bonus: f64,

    #[serde(default)]
    pub highlight: HighlightConfig,
}

/// Style of the root highlight issued when a page run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightConfig {
    #[serde(default = "default_highlight_color")]
    pub color: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub persistent: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

fn default_inter_operation_delay_ms() -> u64 {
    300
}

fn default_max_parallel_siblings() -> usize {
    3
}

fn default_auto_click_debounce_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    256
}

fn default_score() -> f64 {
    0.5
}

fn default_visibility_bonus() -> f64 {
    0.2
}

fn default_highlight_color() -> String {
    "#2e7d32".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            color: default_highlight_color(),
            label: None,
            persistent: true,
            duration_ms: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inter_operation_delay_ms: default_inter_operation_delay_ms(),
            max_parallel_siblings: default_max_parallel_siblings(),
            auto_click_debounce_ms: default_auto_click_debounce_ms(),
            event_capacity: default_event_capacity(),
            default_score: default_score(),
            visibility_bonus: default_visibility_bonus(),
            highlight: HighlightConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn inter_operation_delay(&self) -> Duration {
        Duration::from_millis(self.inter_operation_delay_ms)
    }

    pub fn auto_click_debounce(&self) -> Duration {
        Duration::from_millis(self.auto_click_debounce_ms)
    }

    /// Config with no inter-operation delay, for tests and replays.
    pub fn immediate() -> Self {
        Self {
            inter_operation_delay_ms: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.inter_operation_delay(), Duration::from_millis(300));
        assert_eq!(config.max_parallel_siblings, 3);
        assert_eq!(config.auto_click_debounce(), Duration::from_millis(500));
        assert_eq!(config.default_score, 0.5);
        assert_eq!(config.visibility_bonus, 0.2);
        assert!(config.highlight.persistent);
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_json(
            r#"{"maxParallelSiblings": 5, "highlight": {"color": "red"}}"#,
        )
        .unwrap();
        assert_eq!(config.max_parallel_siblings, 5);
        assert_eq!(config.highlight.color, "red");
        assert!(config.highlight.persistent);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn immediate_has_zero_delay() {
        assert_eq!(EngineConfig::immediate().inter_operation_delay(), Duration::ZERO);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"interOperationDelayMs": 50}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.inter_operation_delay_ms, 50);
    }
}
