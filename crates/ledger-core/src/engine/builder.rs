use std::sync::Arc;

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::engine::driver::FlowEngine;
use crate::engine::registry::FlowRegistry;
use crate::flow::{InitiatingFlow, ResponderFlow};
use crate::messaging::MessagingService;

/// Builder de `FlowEngine`. Sin store explícita se usa una en memoria.
pub struct EngineBuilder<S> {
    services: Arc<S>,
    transport: Arc<dyn MessagingService>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<EngineConfig>,
    registry: FlowRegistry<S>,
}

impl<S: Send + Sync + 'static> EngineBuilder<S> {
    pub(crate) fn new(services: Arc<S>, transport: Arc<dyn MessagingService>) -> Self {
        Self { services,
               transport,
               checkpoints: None,
               clock: None,
               config: None,
               registry: FlowRegistry::new() }
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn register_initiator<F: InitiatingFlow<S>>(mut self) -> Self {
        self.registry.register_initiator::<F>();
        self
    }

    pub fn register_responder<F: ResponderFlow<S>>(mut self) -> Self {
        self.registry.register_responder::<F>();
        self
    }

    pub fn build(self) -> FlowEngine<S> {
        log::debug!("engine.build node={} logic_types={:?}",
                    self.transport.identity(),
                    self.registry.logic_types());
        FlowEngine::from_parts(self.transport.identity().clone(),
                               self.services,
                               self.registry,
                               self.checkpoints.unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new())),
                               self.transport,
                               self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                               self.config.unwrap_or_default())
    }
}

impl<S: Send + Sync + 'static> FlowEngine<S> {
    pub fn builder(services: Arc<S>, transport: Arc<dyn MessagingService>) -> EngineBuilder<S> {
        EngineBuilder::new(services, transport)
    }
}
