//! Read-only catalog of validated scenarios

use super::{load_file, ScenarioDefinition, ScenarioLoadError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Scenarios available to sessions, addressable by id or file stem
#[derive(Debug, Default)]
pub struct ScenarioCatalog {
    scenarios: HashMap<String, Arc<ScenarioDefinition>>,
}

impl ScenarioCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir`. Any invalid file aborts the load.
    pub fn load_dir(dir: &Path) -> Result<Self, ScenarioLoadError> {
        let io_err = |source| ScenarioLoadError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let scenario = load_file(&path)?;
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
            tracing::info!(
                scenario = %scenario.id,
                path = %path.display(),
                events = scenario.len(),
                "Loaded scenario"
            );
            catalog.insert(scenario, stem.as_deref());
        }
        Ok(catalog)
    }

    /// Add a scenario under its id and, optionally, an extra alias
    pub fn insert(&mut self, scenario: ScenarioDefinition, alias: Option<&str>) {
        let scenario = Arc::new(scenario);
        if let Some(alias) = alias.filter(|alias| *alias != scenario.id) {
            self.scenarios.insert(alias.to_string(), scenario.clone());
        }
        self.scenarios.insert(scenario.id.clone(), scenario);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScenarioDefinition>> {
        self.scenarios.get(name).cloned()
    }

    /// Distinct scenario ids, sorted
    pub fn scenario_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .scenarios
            .values()
            .map(|scenario| scenario.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
