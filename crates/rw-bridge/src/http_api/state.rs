use std::sync::Arc;
use std::time::Instant;

use rw_agents::Engine;
use rw_providers::ProviderRegistry;

/// Shared application state for all HTTP handlers.
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.engine.context.registry
    }
}
