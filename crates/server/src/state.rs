use std::sync::Arc;

use scrivener_core::{Config, Orchestrator, PacingGovernor, Registry, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: Arc<dyn Registry>,
    orchestrator: Arc<Orchestrator>,
    governor: Arc<PacingGovernor>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<dyn Registry>,
        orchestrator: Arc<Orchestrator>,
        governor: Arc<PacingGovernor>,
    ) -> Self {
        Self {
            config,
            registry,
            orchestrator,
            governor,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn governor(&self) -> &Arc<PacingGovernor> {
        &self.governor
    }
}
