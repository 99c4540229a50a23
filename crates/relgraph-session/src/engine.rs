//! The engine context shared by every session of one process.

use std::sync::Arc;

use relgraph_core::{BuildErrorKind, EntityId, Error, ModelRegistry, Result, Transport};

use crate::Session;
use crate::config::EngineConfig;
use crate::row_cache::RowCache;
use crate::unique::UniqueLookups;

/// Owns the registry, the row cache and the unique-lookup slots.
///
/// Cloning is cheap; clones share all three. Sessions are created explicitly
/// from an engine and a transport, so there is no ambient "current session".
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<ModelRegistry>,
    cache: Arc<RowCache>,
    unique: Arc<UniqueLookups>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: ModelRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: ModelRegistry, config: EngineConfig) -> Self {
        tracing::debug!(
            entities = registry.len(),
            cache_capacity = config.cache.capacity_per_entity,
            "engine created"
        );
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(RowCache::new(&config.cache)),
            unique: Arc::new(UniqueLookups::default()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<RowCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve an entity by name.
    pub fn entity(&self, name: &str) -> Result<EntityId> {
        self.registry.entity_id(name).ok_or_else(|| {
            Error::build(
                BuildErrorKind::UnknownEntity,
                format!("entity '{}' is not registered", name),
            )
        })
    }

    /// Open a session over `transport`.
    pub fn session<T: Transport>(&self, transport: T) -> Session<T> {
        Session::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.unique),
            &self.config,
            transport,
        )
    }
}
