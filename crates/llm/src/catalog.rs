//! Model Catalog
//!
//! Static registry of model descriptors loaded once from the models JSON
//! file (`{"Models": [...]}`) and grouped by speed class and role.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use orchestrator_core::{CoreError, CoreResult};

/// Inference speed class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpeedClass {
    Fast,
    Slow,
}

/// Functional role of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelRole {
    General,
    Instruct,
    Thinker,
    Coder,
    Tool,
    Granite,
    Reasoning,
}

/// Static metadata describing one model variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique id
    pub name: String,
    /// Weights file (embedded) or server-side model id
    pub path: String,
    /// Weights size in bytes
    #[serde(default, rename = "size")]
    pub size_bytes: u64,
    #[serde(default)]
    pub fits_in_gpu: bool,
    #[serde(rename = "inference_speed")]
    pub speed: SpeedClass,
    pub role: ModelRole,
    /// Cannot share the runtime with any other resident model
    #[serde(default)]
    pub exclusive_family: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "Models")]
    models: Vec<ModelDescriptor>,
}

/// Immutable set of model descriptors.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    by_name: HashMap<String, usize>,
    by_speed: HashMap<SpeedClass, Vec<usize>>,
    by_role: HashMap<ModelRole, Vec<usize>>,
}

impl ModelCatalog {
    /// Load the catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!(
                "cannot read model config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse the catalog from JSON text.
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let file: CatalogFile = serde_json::from_str(raw)
            .map_err(|e| CoreError::config(format!("malformed model config: {}", e)))?;
        Self::from_descriptors(file.models)
    }

    /// Build from descriptors, rejecting empty and duplicate-name sets.
    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> CoreResult<Self> {
        if models.is_empty() {
            return Err(CoreError::config("model config lists no models"));
        }

        let mut seen = HashSet::new();
        let mut by_name = HashMap::new();
        let mut by_speed: HashMap<SpeedClass, Vec<usize>> = HashMap::new();
        let mut by_role: HashMap<ModelRole, Vec<usize>> = HashMap::new();

        for (idx, model) in models.iter().enumerate() {
            if !seen.insert(model.name.clone()) {
                return Err(CoreError::config(format!(
                    "duplicate model name '{}'",
                    model.name
                )));
            }
            by_name.insert(model.name.clone(), idx);
            by_speed.entry(model.speed).or_default().push(idx);
            by_role.entry(model.role).or_default().push(idx);
        }

        tracing::info!("ModelCatalog: loaded {} model descriptors", models.len());

        Ok(Self {
            models,
            by_name,
            by_speed,
            by_role,
        })
    }

    /// All descriptors in file order.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.by_name.get(name).map(|&idx| &self.models[idx])
    }

    /// Descriptors of a speed class, in file order.
    pub fn by_speed(&self, speed: SpeedClass) -> Vec<&ModelDescriptor> {
        self.collect(self.by_speed.get(&speed))
    }

    /// Descriptors with a role, in file order.
    pub fn by_role(&self, role: ModelRole) -> Vec<&ModelDescriptor> {
        self.collect(self.by_role.get(&role))
    }

    /// Resolve a model: the explicitly named one if given, else the first
    /// descriptor of the first role in `roles` that has any.
    pub fn select(&self, preferred: Option<&str>, roles: &[ModelRole]) -> CoreResult<&ModelDescriptor> {
        if let Some(name) = preferred {
            return self
                .get(name)
                .ok_or_else(|| CoreError::config(format!("unknown model '{}'", name)));
        }
        roles
            .iter()
            .find_map(|role| self.by_role(*role).into_iter().next())
            .ok_or_else(|| CoreError::config(format!("no model with any role in {:?}", roles)))
    }

    fn collect(&self, indices: Option<&Vec<usize>>) -> Vec<&ModelDescriptor> {
        indices
            .map(|ids| ids.iter().map(|&idx| &self.models[idx]).collect())
            .unwrap_or_default()
    }
}
