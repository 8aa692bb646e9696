//! arXiv backend for the academic source type.
//!
//! Queries the public Atom API (no credentials). Entries are parsed with a
//! streaming XML reader; a malformed entry is skipped, a malformed feed is
//! an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::{RetrievedItem, SourceType};
use crate::scoring;

const API_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivBackend;

impl ArxivBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArxivBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::retriever::SearchBackend for ArxivBackend {
    fn engine_id(&self) -> &str {
        "arxiv"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Academic
    }

    fn description(&self) -> &str {
        "arXiv.org preprint search (no credentials required)"
    }

    fn check_config_valid(&self, _config: &EngineConfig) -> bool {
        true
    }

    async fn search(
        &self,
        query: &str,
        config: &EngineConfig,
        max_results: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let search_query = format!("all:{}", query);
        let max = max_results.to_string();
        let xml = client
            .get(API_URL)
            .query(&[
                ("search_query", search_query.as_str()),
                ("max_results", max.as_str()),
                ("sortBy", "relevance"),
            ])
            .send()
            .await
            .context("arXiv request failed")?
            .error_for_status()
            .context("arXiv returned an error status")?
            .text()
            .await
            .context("Failed to read arXiv response body")?;

        parse_feed(&xml, query, max_results)
    }
}

#[derive(Default)]
struct EntryDraft {
    id: String,
    title: String,
    summary: String,
    published: Option<DateTime<Utc>>,
    authors: Vec<String>,
}

fn parse_feed(xml: &str, query: &str, max_results: usize) -> Result<Vec<RetrievedItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event().context("Malformed arXiv feed")? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "entry" {
                    entry = Some(EntryDraft::default());
                }
                path.push(name);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.pop();
                if name == "entry" {
                    if let Some(draft) = entry.take() {
                        if let Some(item) = finish_entry(draft, items.len(), query) {
                            items.push(item);
                            if items.len() >= max_results {
                                break;
                            }
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some(draft) = entry.as_mut() {
                    let text = t.unescape().unwrap_or_default().into_owned();
                    match path.last().map(|s| s.as_str()) {
                        Some("id") => draft.id = text,
                        Some("title") => draft.title.push_str(&text),
                        Some("summary") => draft.summary.push_str(&text),
                        Some("published") => {
                            draft.published = DateTime::parse_from_rfc3339(&text)
                                .ok()
                                .map(|dt| dt.with_timezone(&Utc));
                        }
                        Some("name") => draft.authors.push(text),
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

fn finish_entry(draft: EntryDraft, rank: usize, query: &str) -> Option<RetrievedItem> {
    if draft.id.is_empty() || draft.title.is_empty() {
        return None;
    }
    let title = collapse_whitespace(&draft.title);
    let snippet = truncate_chars(&collapse_whitespace(&draft.summary), 400);

    let mut item = RetrievedItem::new(draft.id.clone(), title.clone(), SourceType::Academic);
    item.snippet = snippet.clone();
    item.source_engine = "arxiv".to_string();
    item.published_date = draft.published;
    if !draft.authors.is_empty() {
        item.metadata
            .insert("authors".to_string(), draft.authors.join(", "));
    }
    item.relevance_score = scoring::initial_relevance(rank, &title, &snippet, &draft.id, query);
    Some(item)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title>Ownership Types for
      Memory Safety</title>
    <summary>We present a type system for memory safety without garbage collection.</summary>
    <published>2024-01-01T00:00:00Z</published>
    <author><name>A. Researcher</name></author>
    <author><name>B. Scholar</name></author>
  </entry>
  <entry>
    <title>Entry without an id is skipped</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let items = parse_feed(SAMPLE, "memory safety", 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(items[0].title, "Ownership Types for Memory Safety");
        assert!(items[0].published_date.is_some());
        assert_eq!(
            items[0].metadata.get("authors").map(|s| s.as_str()),
            Some("A. Researcher, B. Scholar")
        );
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed("<feed><entry><title>bad</summary></entry></feed>", "q", 10).is_err());
    }

    #[test]
    fn test_empty_feed() {
        let items = parse_feed(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#,
            "q",
            10,
        )
        .unwrap();
        assert!(items.is_empty());
    }
}
