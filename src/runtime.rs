//! Runtime Assembly
//!
//! Builds the catalog, engine, manager, registry, conversation store and
//! orchestrator from an [`OrchestratorConfig`]. The backend is chosen here
//! and nowhere else; everything downstream sees `Arc<dyn InferenceEngine>`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use orchestrator_core::{CoreError, CoreResult, InMemoryConversationStore, TransportSink};
use orchestrator_llm::{
    BindingLoader, DeviceProbe, EmbeddedEngine, InferenceEngine, ModelCatalog,
    ModelResourceManager, NoDevice, ProcessSupervisor, ServerEngine,
};
use orchestrator_tools::{register_builtin_tools, ToolRegistry};

use crate::config::{Backend, OrchestratorConfig};
use crate::orchestrator::{ModelRoutes, OrchestratorSettings, PlanOrchestrator, RequestOutcome};

/// Running orchestrator and the resources it owns.
pub struct Runtime {
    config: OrchestratorConfig,
    catalog: Arc<ModelCatalog>,
    manager: Arc<ModelResourceManager>,
    conversations: Arc<InMemoryConversationStore>,
    orchestrator: PlanOrchestrator,
    supervisor: Option<Mutex<ProcessSupervisor>>,
}

impl Runtime {
    /// Start with no device probe (CPU placement for embedded models).
    pub async fn start(
        config: OrchestratorConfig,
        binding_loader: Option<Arc<dyn BindingLoader>>,
    ) -> CoreResult<Self> {
        Self::start_with_probe(config, binding_loader, Arc::new(NoDevice)).await
    }

    /// Start the configured backend.
    ///
    /// The embedded backend needs a `binding_loader`; the server backend
    /// launches the supervised server and waits for it to become healthy.
    pub async fn start_with_probe(
        config: OrchestratorConfig,
        binding_loader: Option<Arc<dyn BindingLoader>>,
        probe: Arc<dyn DeviceProbe>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let catalog = ModelCatalog::load(&config.models_config)?;
        tracing::info!(
            "Runtime: {} models in catalog, backend {:?}",
            catalog.len(),
            config.backend
        );

        let (engine, supervisor): (Arc<dyn InferenceEngine>, Option<ProcessSupervisor>) =
            match config.backend {
                Backend::Embedded => {
                    let loader = binding_loader.ok_or_else(|| {
                        CoreError::config("the embedded backend needs a model binding loader")
                    })?;
                    (Arc::new(EmbeddedEngine::new(loader)) as Arc<dyn InferenceEngine>, None)
                }
                Backend::Server => {
                    let mut supervisor = ProcessSupervisor::new(config.server.supervisor_config())?;
                    supervisor.start().await?;
                    let engine = ServerEngine::new(config.server.engine_config()?)?;
                    (Arc::new(engine) as Arc<dyn InferenceEngine>, Some(supervisor))
                }
            };

        let mut runtime = Self::assemble(config, catalog, engine, probe)?;
        runtime.supervisor = supervisor.map(Mutex::new);
        Ok(runtime)
    }

    /// Assemble around an already constructed engine.
    pub fn with_engine(
        config: OrchestratorConfig,
        catalog: ModelCatalog,
        engine: Arc<dyn InferenceEngine>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Self::assemble(config, catalog, engine, Arc::new(NoDevice))
    }

    fn assemble(
        config: OrchestratorConfig,
        catalog: ModelCatalog,
        engine: Arc<dyn InferenceEngine>,
        probe: Arc<dyn DeviceProbe>,
    ) -> CoreResult<Self> {
        let routes = ModelRoutes::resolve(&catalog, &config.models)?;
        let manager = Arc::new(ModelResourceManager::new(
            engine,
            probe,
            config.placement_policy(),
            config.capacity,
        ));

        let mut registry = ToolRegistry::new().with_timeout(config.tool_timeout());
        register_builtin_tools(&mut registry);

        let working_directory = match config.working_directory.clone() {
            Some(dir) => dir,
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let settings = OrchestratorSettings {
            max_tool_iterations: config.max_tool_iterations,
            max_plan_steps: config.max_plan_steps,
            working_directory,
            ..OrchestratorSettings::default()
        };

        let conversations = Arc::new(InMemoryConversationStore::new());
        let orchestrator = PlanOrchestrator::new(
            manager.clone(),
            Arc::new(registry),
            conversations.clone(),
            routes,
            settings,
        );

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            manager,
            conversations,
            orchestrator,
            supervisor: None,
        })
    }

    /// Fresh session id for a new client conversation.
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn manager(&self) -> &Arc<ModelResourceManager> {
        &self.manager
    }

    pub fn conversations(&self) -> &Arc<InMemoryConversationStore> {
        &self.conversations
    }

    pub fn orchestrator(&self) -> &PlanOrchestrator {
        &self.orchestrator
    }

    pub async fn handle_request(
        &self,
        session_id: &str,
        query: &str,
        sink: &dyn TransportSink,
        cancel: &CancellationToken,
    ) -> CoreResult<RequestOutcome> {
        self.orchestrator
            .handle_request(session_id, query, sink, cancel)
            .await
    }

    /// Unload every resident model and stop the server. Safe to call twice.
    pub async fn shutdown(&self) {
        self.manager.unload_all().await;
        if let Some(supervisor) = &self.supervisor {
            supervisor.lock().await.shutdown().await;
        }
        tracing::info!("Runtime: shut down");
    }
}
