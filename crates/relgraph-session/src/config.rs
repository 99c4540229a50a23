//! Engine and session configuration.
//!
//! Every struct deserializes from JSON with missing fields taking their
//! defaults, so a config file only needs the keys it changes.

use relgraph_core::Result;
use relgraph_query::CompileOptions;
use serde::{Deserialize, Serialize};

/// Row cache retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowCacheConfig {
    /// Rows kept per entity before the least recently used one is evicted.
    /// Zero disables retention: every load misses.
    pub capacity_per_entity: usize,
}

impl Default for RowCacheConfig {
    fn default() -> Self {
        Self {
            capacity_per_entity: 10_000,
        }
    }
}

impl RowCacheConfig {
    pub fn capacity_per_entity(mut self, capacity: usize) -> Self {
        self.capacity_per_entity = capacity;
        self
    }
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether save/delete open a transaction when none is active.
    /// Without one, changes reach the row cache as soon as they are written.
    pub auto_begin: bool,
    /// Whether instances materialized by a fetch start out locked.
    pub lock_loaded: bool,
    /// Depth at which [`crate::InstanceTree`] stops following relations.
    pub max_tree_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            lock_loaded: false,
            max_tree_depth: 4,
        }
    }
}

impl SessionConfig {
    pub fn auto_begin(mut self, value: bool) -> Self {
        self.auto_begin = value;
        self
    }

    pub fn lock_loaded(mut self, value: bool) -> Self {
        self.lock_loaded = value;
        self
    }

    pub fn max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }
}

/// Everything an [`crate::Engine`] is configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: RowCacheConfig,
    pub session: SessionConfig,
    pub compile: CompileOptions,
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn cache(mut self, cache: RowCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn compile(mut self, compile: CompileOptions) -> Self {
        self.compile = compile;
        self
    }
}
