use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use canopy_types::{CanopyError, Result};

use crate::definition::ContainerDefinition;

/// On-disk catalog format: `{"containers": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub containers: Vec<ContainerDefinition>,
}

/// Immutable set of container definitions keyed by id.
///
/// Definitions are shared behind `Arc`, so cloning a catalog is a shallow copy:
/// overlays swap out only the entries they override.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    definitions: BTreeMap<String, Arc<ContainerDefinition>>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids. Blank names fall back to the id.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ContainerDefinition>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for mut def in definitions {
            if def.name.is_empty() {
                def.name = def.id.clone();
            }
            let id = def.id.clone();
            if map.insert(id.clone(), Arc::new(def)).is_some() {
                return Err(CanopyError::ValidationError(format!(
                    "duplicate container id '{id}'"
                )));
            }
        }
        Ok(Self { definitions: map })
    }

    pub fn from_json(source: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(source)?;
        Self::from_definitions(file.containers)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&source)?;
        tracing::debug!(path = %path.display(), containers = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ContainerDefinition>> {
        self.definitions.get(id)
    }

    /// Lookup that treats a missing id as a configuration error.
    pub fn require(&self, id: &str) -> Result<&Arc<ContainerDefinition>> {
        self.definitions
            .get(id)
            .ok_or_else(|| CanopyError::UnknownContainer { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ContainerDefinition>> {
        self.definitions.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Copy of this catalog with one definition replaced (or added).
    pub fn with_definition(&self, definition: ContainerDefinition) -> Self {
        let mut definitions = self.definitions.clone();
        definitions.insert(definition.id.clone(), Arc::new(definition));
        Self { definitions }
    }

    /// Definitions no other definition lists as a static child.
    pub fn roots(&self) -> Vec<&Arc<ContainerDefinition>> {
        let referenced: HashSet<&str> = self
            .definitions
            .values()
            .flat_map(|d| d.children.iter().map(String::as_str))
            .collect();
        self.definitions
            .values()
            .filter(|d| !referenced.contains(d.id.as_str()))
            .collect()
    }

    /// Root definitions whose page patterns match `url`.
    pub fn roots_for_url(&self, url: &str) -> Vec<&Arc<ContainerDefinition>> {
        self.roots()
            .into_iter()
            .filter(|def| def.matches_url(url))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "containers": [
            {"id": "page", "selectors": [{"classes": ["app"]}], "children": ["feed"],
             "pagePatterns": ["^https://example\\.com/"]},
            {"id": "feed", "name": "Feed", "selectors": [{"classes": ["feed"]}], "children": ["post"]},
            {"id": "post", "selectors": [{"classes": ["post"]}]},
            {"id": "settings", "selectors": [{"classes": ["settings"]}],
             "pagePatterns": ["^https://example\\.com/settings"]}
        ]
    }"#;

    #[test]
    fn from_json_builds_catalog() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.contains("feed"));
        assert_eq!(catalog.get("feed").unwrap().name, "Feed");
        // Blank name falls back to id
        assert_eq!(catalog.get("post").unwrap().name, "post");
    }

    #[test]
    fn duplicate_ids_rejected() {
        let defs = vec![
            ContainerDefinition::new("a", &["a"]),
            ContainerDefinition::new("a", &["b"]),
        ];
        let err = Catalog::from_definitions(defs).unwrap_err();
        assert!(err.to_string().contains("duplicate container id 'a'"));
        assert!(err.is_config_error());
    }

    #[test]
    fn require_missing_is_config_error() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let err = catalog.require("nope").unwrap_err();
        assert!(matches!(err, CanopyError::UnknownContainer { ref id } if id == "nope"));
    }

    #[test]
    fn roots_are_unreferenced_definitions() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let roots: Vec<&str> = catalog.roots().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(roots, vec!["page", "settings"]);
    }

    #[test]
    fn roots_for_url_matches_page_patterns() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let ids: Vec<&str> = catalog
            .roots_for_url("https://example.com/settings/profile")
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["page", "settings"]);

        let ids: Vec<&str> = catalog
            .roots_for_url("https://example.com/home")
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["page"]);
    }

    #[test]
    fn with_definition_leaves_original_untouched() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let mut post = (**catalog.get("post").unwrap()).clone();
        post.name = "Renamed".into();
        let updated = catalog.with_definition(post);
        assert_eq!(updated.get("post").unwrap().name, "Renamed");
        assert_eq!(catalog.get("post").unwrap().name, "post");
        // Untouched entries are shared, not copied
        assert!(Arc::ptr_eq(
            catalog.get("feed").unwrap(),
            updated.get("feed").unwrap()
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Catalog::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, CanopyError::Io(_)));
    }
}
