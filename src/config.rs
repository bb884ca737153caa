//! Orchestrator Configuration
//!
//! JSON configuration file with defaults for every field. The model catalog
//! lives in its own file referenced by `models_config`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use orchestrator_core::{CoreError, CoreResult};
use orchestrator_llm::{PlacementPolicy, ServerEngineConfig, SupervisorConfig};

/// Which inference engine backs the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process model binding
    Embedded,
    /// Supervised external inference server
    Server,
}

/// External inference server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub binary: PathBuf,
    pub models_dir: PathBuf,
    pub preset_file: PathBuf,
    pub models_max: u32,
    pub port: u16,
    pub health_interval_ms: u64,
    pub health_timeout_secs: u64,
    pub load_timeout_secs: u64,
    pub load_poll_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("llama-server"),
            models_dir: PathBuf::from("models"),
            preset_file: PathBuf::from("models/presets.ini"),
            models_max: 1,
            port: 8080,
            health_interval_ms: 500,
            health_timeout_secs: 30,
            load_timeout_secs: 300,
            load_poll_interval_ms: 3_000,
        }
    }
}

impl ServerSettings {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            binary: self.binary.clone(),
            models_dir: self.models_dir.clone(),
            preset_file: self.preset_file.clone(),
            models_max: self.models_max,
            port: self.port,
            health_interval: Duration::from_millis(self.health_interval_ms),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
        }
    }

    pub fn engine_config(&self) -> CoreResult<ServerEngineConfig> {
        let mut config = ServerEngineConfig::local(self.port)?;
        config.load_timeout = Duration::from_secs(self.load_timeout_secs);
        config.load_poll_interval = Duration::from_millis(self.load_poll_interval_ms);
        Ok(config)
    }
}

/// Model names per call site. Unset entries are resolved by role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelAssignments {
    pub planner: Option<String>,
    pub tool: Option<String>,
    pub reader: Option<String>,
    pub synthesis: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Path of the model catalog JSON
    pub models_config: PathBuf,
    pub backend: Backend,
    /// Maximum resident models
    pub capacity: usize,
    pub device_memory_fraction: f64,
    pub partial_device_layers: u32,
    pub server: ServerSettings,
    pub models: ModelAssignments,
    pub tool_timeout_secs: u64,
    pub max_tool_iterations: usize,
    pub max_plan_steps: usize,
    /// Base directory for relative tool paths (current directory when unset)
    pub working_directory: Option<PathBuf>,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            models_config: PathBuf::from("models.json"),
            backend: Backend::Server,
            capacity: 2,
            device_memory_fraction: 0.9,
            partial_device_layers: 25,
            server: ServerSettings::default(),
            models: ModelAssignments::default(),
            tool_timeout_secs: 30,
            max_tool_iterations: 3,
            max_plan_steps: 10,
            working_directory: None,
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Default location: `<config dir>/inference-orchestrator/config.json`.
    pub fn default_path() -> CoreResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("inference-orchestrator").join("config.json"))
            .ok_or_else(|| CoreError::config("could not determine the configuration directory"))
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| CoreError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(CoreError::config("capacity must be at least 1"));
        }
        if !(self.device_memory_fraction > 0.0 && self.device_memory_fraction <= 1.0) {
            return Err(CoreError::config(format!(
                "device_memory_fraction must be in (0, 1], got {}",
                self.device_memory_fraction
            )));
        }
        if self.tool_timeout_secs == 0 {
            return Err(CoreError::config("tool_timeout_secs must be positive"));
        }
        let server = &self.server;
        if server.health_interval_ms == 0
            || server.health_timeout_secs == 0
            || server.load_timeout_secs == 0
            || server.load_poll_interval_ms == 0
        {
            return Err(CoreError::config("server timeouts and intervals must be positive"));
        }
        if self.max_plan_steps == 0 {
            return Err(CoreError::config("max_plan_steps must be at least 1"));
        }
        crate::logging::parse_level(&self.log_level)?;
        Ok(())
    }

    pub fn placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy {
            memory_fraction: self.device_memory_fraction,
            partial_layers: self.partial_device_layers,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
