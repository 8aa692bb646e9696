//! The search backend trait and the retriever registry.
//!
//! A [`SearchBackend`] knows how to talk to one search engine. The
//! [`RetrieverRegistry`] maps each [`SourceType`] to the single backend that
//! will serve it, remembers aliases and priorities, and hands descriptors to
//! the factory in initialization order.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           RetrieverRegistry              │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │   web   │ │  news   │ │  academic  │  │
//! │  │ ddg/..  │ │ newsapi │ │   arxiv    │  │
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        RetrieverFactory → ManagedRetriever
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, EngineConfig};
use crate::models::{RetrievedItem, SourceType};

/// A search engine implementation.
///
/// Backends are intentionally thin: one HTTP call plus response mapping.
/// Caching, rate limiting, retries, and filtering are layered on by the
/// managed retriever, never reimplemented per engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable engine identifier (e.g. `"newsapi"`). Must be non-empty.
    fn engine_id(&self) -> &str;

    /// The source type this engine serves.
    fn source_type(&self) -> SourceType;

    /// One-line description for listings.
    fn description(&self) -> &str;

    /// Config keys whose values affect results, used for cache keying.
    fn required_config_keys(&self) -> &[&str] {
        &[]
    }

    /// Whether the given settings are sufficient to operate. Must be pure:
    /// no network calls, no side effects.
    fn check_config_valid(&self, config: &EngineConfig) -> bool;

    /// Run one search. An empty result list is a normal outcome, not an
    /// error. Errors are transient failures the caller may retry.
    async fn search(
        &self,
        query: &str,
        config: &EngineConfig,
        max_results: usize,
    ) -> Result<Vec<RetrievedItem>>;
}

/// Constructor for a backend, kept so the factory can rebuild instances
/// on reload.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn SearchBackend> + Send + Sync>;

/// Registration record for one source type.
#[derive(Clone)]
pub struct RetrieverDescriptor {
    pub source_type: SourceType,
    pub engine_id: String,
    pub alias: Option<String>,
    pub priority: i32,
    pub factory: BackendFactory,
    seq: usize,
}

impl std::fmt::Debug for RetrieverDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieverDescriptor")
            .field("source_type", &self.source_type)
            .field("engine_id", &self.engine_id)
            .field("alias", &self.alias)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Maps source types to backend registrations. At most one live backend
/// per source type; re-registering replaces the previous entry with a
/// logged warning.
pub struct RetrieverRegistry {
    descriptors: HashMap<SourceType, RetrieverDescriptor>,
    next_seq: usize,
}

impl RetrieverRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a backend for its source type.
    ///
    /// The factory is invoked once to validate the implementation; a
    /// backend reporting an empty engine id is refused. Replacing an
    /// existing registration is allowed and logged.
    pub fn register(
        &mut self,
        factory: BackendFactory,
        alias: Option<String>,
        priority: i32,
    ) -> Result<()> {
        let probe = factory();
        if probe.engine_id().trim().is_empty() {
            anyhow::bail!("refusing to register a backend with an empty engine id");
        }
        let source_type = probe.source_type();
        let engine_id = probe.engine_id().to_string();

        if let Some(existing) = self.descriptors.get(&source_type) {
            tracing::warn!(
                source_type = %source_type,
                old = %existing.engine_id,
                new = %engine_id,
                "replacing registered retriever"
            );
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.descriptors.insert(
            source_type.clone(),
            RetrieverDescriptor {
                source_type,
                engine_id,
                alias,
                priority,
                factory,
                seq,
            },
        );
        Ok(())
    }

    pub fn get(&self, source_type: &SourceType) -> Option<&RetrieverDescriptor> {
        self.descriptors.get(source_type)
    }

    /// All registered source types, unordered.
    pub fn list_available(&self) -> Vec<&RetrieverDescriptor> {
        self.descriptors.values().collect()
    }

    /// Resolve an alias or canonical name to its source type.
    pub fn resolve_alias(&self, name: &str) -> Option<SourceType> {
        self.descriptors
            .values()
            .find(|d| {
                d.source_type.as_str() == name || d.alias.as_deref() == Some(name)
            })
            .map(|d| d.source_type.clone())
    }

    /// Source types in initialization order: descending priority, ties
    /// broken by registration order.
    pub fn initialization_order(&self) -> Vec<SourceType> {
        let mut descriptors: Vec<&RetrieverDescriptor> = self.descriptors.values().collect();
        descriptors.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        descriptors.iter().map(|d| d.source_type.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}

impl Default for RetrieverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the default backend per source type: the configured web engine,
/// NewsAPI for news, and arXiv for academic search.
pub fn register_builtins(registry: &mut RetrieverRegistry, config: &Config) -> Result<()> {
    use crate::engine_arxiv::ArxivBackend;
    use crate::engine_duckduckgo::DuckDuckGoBackend;
    use crate::engine_google::GoogleBackend;
    use crate::engine_newsapi::NewsApiBackend;
    use crate::engine_serper::SerperBackend;

    match config.search.web_engine.as_str() {
        "serper" => registry.register(
            Arc::new(|| Box::new(SerperBackend::new())),
            Some("serper".to_string()),
            8,
        )?,
        "google" => registry.register(
            Arc::new(|| Box::new(GoogleBackend::new())),
            Some("google".to_string()),
            7,
        )?,
        _ => registry.register(
            Arc::new(|| Box::new(DuckDuckGoBackend::new())),
            Some("duckduckgo".to_string()),
            5,
        )?,
    }

    registry.register(
        Arc::new(|| Box::new(NewsApiBackend::new())),
        Some("newsapi".to_string()),
        7,
    )?;
    registry.register(
        Arc::new(|| Box::new(ArxivBackend::new())),
        Some("arxiv".to_string()),
        6,
    )?;

    Ok(())
}
