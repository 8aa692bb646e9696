//! Google Custom Search web backend. Requires `api_key` and `cx`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::{RetrievedItem, SourceType};
use crate::scoring;

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

pub struct GoogleBackend;

impl GoogleBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoogleBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::retriever::SearchBackend for GoogleBackend {
    fn engine_id(&self) -> &str {
        "google"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    fn description(&self) -> &str {
        "Google Custom Search JSON API"
    }

    fn required_config_keys(&self) -> &[&str] {
        &["api_key", "cx"]
    }

    fn check_config_valid(&self, config: &EngineConfig) -> bool {
        config.api_key.as_deref().is_some_and(|k| !k.is_empty())
            && config.cx.as_deref().is_some_and(|c| !c.is_empty())
    }

    async fn search(
        &self,
        query: &str,
        config: &EngineConfig,
        max_results: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("google: api_key not configured"))?;
        let cx = config
            .cx
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("google: cx not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        // The API caps num at 10.
        let num = max_results.min(10).to_string();
        let json: serde_json::Value = client
            .get(SEARCH_URL)
            .query(&[("key", api_key), ("cx", cx), ("q", query), ("num", &num)])
            .send()
            .await
            .context("Google search request failed")?
            .error_for_status()
            .context("Google search returned an error status")?
            .json()
            .await
            .context("Failed to parse Google search response")?;

        Ok(parse_results(&json, query, max_results))
    }
}

fn parse_results(json: &serde_json::Value, query: &str, max_results: usize) -> Vec<RetrievedItem> {
    let Some(raw_items) = json.get("items").and_then(|i| i.as_array()) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for (rank, raw) in raw_items.iter().take(max_results).enumerate() {
        let Some(url) = raw.get("link").and_then(|l| l.as_str()) else {
            continue;
        };
        let title = raw.get("title").and_then(|t| t.as_str()).unwrap_or("");
        let snippet = raw.get("snippet").and_then(|s| s.as_str()).unwrap_or("");

        let mut item = RetrievedItem::new(url, title, SourceType::Web);
        item.snippet = snippet.to_string();
        item.source_engine = "google".to_string();
        item.relevance_score = scoring::initial_relevance(rank, title, snippet, url, query);
        if let Some(display) = raw.get("displayLink").and_then(|d| d.as_str()) {
            item.metadata
                .insert("display_link".to_string(), display.to_string());
        }
        items.push(item);
    }
    items
}
