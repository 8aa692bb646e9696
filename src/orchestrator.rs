//! Concurrent search fan-out.
//!
//! The orchestrator expands a [`QueryAnalysis`] into (source type, query)
//! pairs, runs every pair concurrently through its managed retriever, tags
//! each item with its originating query and engine, and deduplicates by
//! exact URL. A failing pair is logged and contributes nothing; it never
//! sinks the batch.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::factory::RetrieverFactory;
use crate::models::{QueryAnalysis, RetrievedItem};

pub struct RetrievalOrchestrator {
    factory: Arc<RetrieverFactory>,
}

impl RetrievalOrchestrator {
    pub fn new(factory: Arc<RetrieverFactory>) -> Self {
        Self { factory }
    }

    /// Run every planned query against its retriever and return the
    /// deduplicated union, in spawn order.
    pub async fn retrieve(&self, analysis: &QueryAnalysis) -> Vec<RetrievedItem> {
        // Fallback used when a planned query comes back empty.
        let keyword_fallback: Vec<String> = if analysis.keywords.is_empty() {
            Vec::new()
        } else {
            vec![analysis.keywords.join(" ")]
        };

        let mut set = JoinSet::new();
        let mut slots = 0usize;

        for retriever in self.factory.available() {
            let source_type = retriever.source_type();
            for query in analysis.queries_for(&source_type) {
                let retriever = retriever.clone();
                let query = query.clone();
                let fallbacks: Vec<String> = keyword_fallback
                    .iter()
                    .filter(|f| *f != &query)
                    .cloned()
                    .collect();
                let slot = slots;
                slots += 1;
                set.spawn(async move {
                    let result = retriever.search_with_fallbacks(&query, &fallbacks).await;
                    (slot, retriever.engine_id().to_string(), query, result)
                });
            }
        }

        // Reassemble in spawn order so dedup precedence is deterministic.
        let mut gathered: Vec<Vec<RetrievedItem>> = vec![Vec::new(); slots];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, engine, query, Ok(mut items))) => {
                    for item in &mut items {
                        item.metadata
                            .insert("originating_query".to_string(), query.clone());
                        item.metadata
                            .insert("originating_engine".to_string(), engine.clone());
                    }
                    tracing::debug!(engine = %engine, query = %query, count = items.len(), "retrieved");
                    gathered[slot] = items;
                }
                Ok((_, engine, query, Err(e))) => {
                    tracing::warn!(engine = %engine, query = %query, error = %e, "retrieval failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retrieval task panicked");
                }
            }
        }

        dedup_by_url(gathered.into_iter().flatten().collect())
    }
}

/// Keep the first occurrence of each exact URL.
pub fn dedup_by_url(items: Vec<RetrievedItem>) -> Vec<RetrievedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.url.clone()))
        .collect()
}
