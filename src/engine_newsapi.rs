//! NewsAPI backend for the news source type. Requires `api_key`;
//! `days_range` bounds the publication window.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::{RetrievedItem, SourceType};
use crate::scoring;

const SEARCH_URL: &str = "https://newsapi.org/v2/everything";

pub struct NewsApiBackend;

impl NewsApiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NewsApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::retriever::SearchBackend for NewsApiBackend {
    fn engine_id(&self) -> &str {
        "newsapi"
    }

    fn source_type(&self) -> SourceType {
        SourceType::News
    }

    fn description(&self) -> &str {
        "NewsAPI.org article search"
    }

    fn required_config_keys(&self) -> &[&str] {
        &["api_key", "days_range"]
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
            .ok_or_else(|| anyhow::anyhow!("newsapi: api_key not configured"))?;

        let from = (Utc::now() - ChronoDuration::days(config.days_range as i64))
            .format("%Y-%m-%d")
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let page_size = max_results.to_string();
        let json: serde_json::Value = client
            .get(SEARCH_URL)
            .query(&[
                ("q", query),
                ("from", &from),
                ("sortBy", "relevancy"),
                ("pageSize", &page_size),
                ("language", "en"),
            ])
            .header("X-Api-Key", api_key)
            .send()
            .await
            .context("NewsAPI request failed")?
            .error_for_status()
            .context("NewsAPI returned an error status")?
            .json()
            .await
            .context("Failed to parse NewsAPI response")?;

        if json.get("status").and_then(|s| s.as_str()) == Some("error") {
            let message = json
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("NewsAPI error: {}", message);
        }

        Ok(parse_results(&json, query, max_results))
    }
}

fn parse_results(json: &serde_json::Value, query: &str, max_results: usize) -> Vec<RetrievedItem> {
    let Some(articles) = json.get("articles").and_then(|a| a.as_array()) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for (rank, raw) in articles.iter().take(max_results).enumerate() {
        let Some(url) = raw.get("url").and_then(|u| u.as_str()) else {
            continue;
        };
        let title = raw.get("title").and_then(|t| t.as_str()).unwrap_or("");
        let snippet = raw
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("");

        let mut item = RetrievedItem::new(url, title, SourceType::News);
        item.snippet = snippet.to_string();
        item.source_engine = "newsapi".to_string();
        item.published_date = raw
            .get("publishedAt")
            .and_then(|p| p.as_str())
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(outlet) = raw
            .get("source")
            .and_then(|s| s.get("name"))
            .and_then(|n| n.as_str())
        {
            item.metadata.insert("outlet".to_string(), outlet.to_string());
        }
        item.relevance_score = scoring::initial_relevance(rank, title, snippet, url, query);
        items.push(item);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_articles_with_dates() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"status": "ok", "articles": [
                {"title": "Rust 2.0 announced", "url": "https://reuters.com/tech/rust",
                 "description": "A major release.", "publishedAt": "2026-08-01T12:30:00Z",
                 "source": {"name": "Reuters"}},
                {"title": "No url article"}
            ]}"#,
        )
        .unwrap();
        let items = parse_results(&json, "rust", 10);
        assert_eq!(items.len(), 1);
        assert!(items[0].published_date.is_some());
        assert_eq!(items[0].metadata.get("outlet").map(|s| s.as_str()), Some("Reuters"));
        assert_eq!(items[0].source_type, SourceType::News);
    }

    #[test]
    fn test_bad_date_tolerated() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"articles": [{"title": "T", "url": "https://a.com", "publishedAt": "yesterday"}]}"#,
        )
        .unwrap();
        let items = parse_results(&json, "rust", 10);
        assert_eq!(items.len(), 1);
        assert!(items[0].published_date.is_none());
    }
}
