//! Retriever instantiation and lifecycle.
//!
//! The factory walks the registry in initialization order, applies the
//! engine allow-list and per-engine enabled flags, validates configuration,
//! and wraps each admitted backend in a [`ManagedRetriever`]. A backend
//! that fails admission lands in the failed set with a reason; it never
//! prevents other backends from initializing.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::managed::ManagedRetriever;
use crate::models::SourceType;
use crate::retriever::RetrieverRegistry;

pub struct RetrieverFactory {
    registry: RetrieverRegistry,
    config: Config,
    active: HashMap<SourceType, Arc<ManagedRetriever>>,
    failed: HashMap<SourceType, String>,
}

impl RetrieverFactory {
    /// Instantiate every permitted retriever. Individual failures are
    /// recorded, logged, and isolated.
    pub fn initialize(registry: RetrieverRegistry, config: Config) -> Self {
        let mut factory = Self {
            registry,
            config,
            active: HashMap::new(),
            failed: HashMap::new(),
        };
        for source_type in factory.registry.initialization_order() {
            factory.build_one(&source_type);
        }
        factory
    }

    fn build_one(&mut self, source_type: &SourceType) {
        let Some(descriptor) = self.registry.get(source_type) else {
            return;
        };
        let engine_id = descriptor.engine_id.clone();

        let allow = &self.config.search.enabled_engines;
        if !allow.is_empty() && !allow.iter().any(|e| e == &engine_id) {
            tracing::debug!(engine = %engine_id, "engine not in allow-list, skipping");
            self.active.remove(source_type);
            self.failed.remove(source_type);
            return;
        }

        let engine_config = self.config.engine(&engine_id);
        if !engine_config.enabled {
            tracing::debug!(engine = %engine_id, "engine disabled in config, skipping");
            self.active.remove(source_type);
            self.failed.remove(source_type);
            return;
        }

        let backend = (descriptor.factory)();
        if !backend.check_config_valid(&engine_config) {
            tracing::warn!(
                engine = %engine_id,
                source_type = %source_type,
                "engine configuration invalid, not initializing"
            );
            self.active.remove(source_type);
            self.failed.insert(
                source_type.clone(),
                format!("invalid configuration for engine '{}'", engine_id),
            );
            return;
        }

        tracing::info!(engine = %engine_id, source_type = %source_type, "retriever initialized");
        self.failed.remove(source_type);
        self.active.insert(
            source_type.clone(),
            Arc::new(ManagedRetriever::new(
                backend,
                engine_config,
                self.config.search.clone(),
            )),
        );
    }

    pub fn get(&self, source_type: &SourceType) -> Option<Arc<ManagedRetriever>> {
        self.active.get(source_type).cloned()
    }

    /// Active retrievers in initialization order.
    pub fn available(&self) -> Vec<Arc<ManagedRetriever>> {
        self.registry
            .initialization_order()
            .iter()
            .filter_map(|st| self.active.get(st).cloned())
            .collect()
    }

    /// Source types that failed admission, with reasons.
    pub fn failed(&self) -> &HashMap<SourceType, String> {
        &self.failed
    }

    /// Replace the stored configuration. Takes effect for instances on
    /// their next [`reload`](Self::reload).
    pub fn apply_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Rebuild one retriever from current configuration. The fresh
    /// instance starts with an empty cache and zeroed statistics.
    pub fn reload(&mut self, source_type: &SourceType) -> Result<()> {
        if self.registry.get(source_type).is_none() {
            anyhow::bail!("no retriever registered for source type '{}'", source_type);
        }
        self.build_one(source_type);
        Ok(())
    }

    /// Re-validate every active retriever's configuration. Unhealthy
    /// entries are flagged, never evicted.
    pub fn health_check_all(&self) -> HashMap<SourceType, bool> {
        let mut report = HashMap::new();
        for (source_type, retriever) in &self.active {
            let ok = retriever.config_valid();
            if !ok {
                tracing::warn!(
                    engine = retriever.engine_id(),
                    source_type = %source_type,
                    "health check failed"
                );
            }
            report.insert(source_type.clone(), ok);
        }
        report
    }

    pub fn registry(&self) -> &RetrieverRegistry {
        &self.registry
    }
}
