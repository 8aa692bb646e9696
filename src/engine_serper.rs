//! Serper.dev web search backend. Requires `api_key`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::{RetrievedItem, SourceType};
use crate::scoring;

const SEARCH_URL: &str = "https://google.serper.dev/search";

pub struct SerperBackend;

impl SerperBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SerperBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::retriever::SearchBackend for SerperBackend {
    fn engine_id(&self) -> &str {
        "serper"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    fn description(&self) -> &str {
        "Serper.dev Google results API"
    }

    fn required_config_keys(&self) -> &[&str] {
        &["api_key"]
    }

    fn check_config_valid(&self, config: &EngineConfig) -> bool {
        config.api_key.as_deref().is_some_and(|k| !k.is_empty())
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
            .ok_or_else(|| anyhow::anyhow!("serper: api_key not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let json: serde_json::Value = client
            .post(SEARCH_URL)
            .header("X-API-KEY", api_key)
            .json(&serde_json::json!({ "q": query, "num": max_results }))
            .send()
            .await
            .context("Serper request failed")?
            .error_for_status()
            .context("Serper returned an error status")?
            .json()
            .await
            .context("Failed to parse Serper response")?;

        Ok(parse_results(&json, query, max_results))
    }
}

fn parse_results(json: &serde_json::Value, query: &str, max_results: usize) -> Vec<RetrievedItem> {
    let Some(organic) = json.get("organic").and_then(|o| o.as_array()) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for (rank, raw) in organic.iter().take(max_results).enumerate() {
        let Some(url) = raw.get("link").and_then(|l| l.as_str()) else {
            continue;
        };
        let title = raw.get("title").and_then(|t| t.as_str()).unwrap_or("");
        let snippet = raw.get("snippet").and_then(|s| s.as_str()).unwrap_or("");

        let mut item = RetrievedItem::new(url, title, SourceType::Web);
        item.snippet = snippet.to_string();
        item.source_engine = "serper".to_string();
        // Serper reports a 1-based position; prefer it over array order.
        let position = raw
            .get("position")
            .and_then(|p| p.as_u64())
            .map(|p| (p as usize).saturating_sub(1))
            .unwrap_or(rank);
        item.relevance_score = scoring::initial_relevance(position, title, snippet, url, query);
        items.push(item);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_uses_position() {
        // Array order is reversed relative to position; with identical
        // title/snippet text, only the reported position can separate
        // the scores.
        let json: serde_json::Value = serde_json::from_str(
            r#"{"organic": [
                {"title": "Rust Language", "link": "https://doc.rust-lang.org/book/", "snippet": "Learn Rust.", "position": 2},
                {"title": "Rust Language", "link": "https://www.rust-lang.org/", "snippet": "Learn Rust.", "position": 1}
            ]}"#,
        )
        .unwrap();
        let items = parse_results(&json, "rust", 10);
        assert_eq!(items.len(), 2);
        assert!(items[1].relevance_score > items[0].relevance_score);
        assert_eq!(items[1].url, "https://www.rust-lang.org/");
    }

    #[test]
    fn test_missing_organic_is_empty() {
        let json: serde_json::Value = serde_json::from_str(r#"{"news": []}"#).unwrap();
        assert!(parse_results(&json, "rust", 10).is_empty());
    }

    #[test]
    fn test_config_validation() {
        use crate::retriever::SearchBackend;
        let backend = SerperBackend::new();
        assert!(!backend.check_config_valid(&EngineConfig::default()));
        let config = EngineConfig {
            api_key: Some("key".to_string()),
            ..EngineConfig::default()
        };
        assert!(backend.check_config_valid(&config));
    }
}
