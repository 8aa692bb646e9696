//! DuckDuckGo web search backend.
//!
//! Scrapes the HTML endpoint, which needs no credentials, so this is the
//! default web engine. Result links are indirected through `/l/?uddg=`;
//! those are unwrapped before the URL leaves this module.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::{RetrievedItem, SourceType};
use crate::scoring;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

pub struct DuckDuckGoBackend;

impl DuckDuckGoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DuckDuckGoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::retriever::SearchBackend for DuckDuckGoBackend {
    fn engine_id(&self) -> &str {
        "duckduckgo"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    fn description(&self) -> &str {
        "DuckDuckGo HTML web search (no credentials required)"
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
            .user_agent(USER_AGENT)
            .build()?;

        let html = client
            .get(SEARCH_URL)
            .query(&[("q", query)])
            .send()
            .await
            .context("DuckDuckGo request failed")?
            .error_for_status()
            .context("DuckDuckGo returned an error status")?
            .text()
            .await
            .context("Failed to read DuckDuckGo response body")?;

        Ok(parse_results(&html, query, max_results))
    }
}

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("valid regex")
    })
}

fn snippet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).expect("valid regex")
    })
}

fn parse_results(html: &str, query: &str, max_results: usize) -> Vec<RetrievedItem> {
    // Title anchors first; each snippet is looked up in the span between
    // one anchor and the next.
    let anchors: Vec<regex::Captures> = anchor_regex().captures_iter(html).collect();

    let mut items = Vec::new();
    for (rank, caps) in anchors.iter().enumerate() {
        if items.len() >= max_results {
            break;
        }
        let href = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let url = unwrap_redirect(href);
        if url.is_empty() {
            continue;
        }
        let title = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
        if title.is_empty() {
            continue;
        }

        let span_start = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let span_end = anchors
            .get(rank + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let snippet = snippet_regex()
            .captures(&html[span_start..span_end])
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .unwrap_or_default();

        let mut item = RetrievedItem::new(url.clone(), title.clone(), SourceType::Web);
        item.snippet = snippet.clone();
        item.source_engine = "duckduckgo".to_string();
        item.relevance_score = scoring::initial_relevance(rank, &title, &snippet, &url, query);
        items.push(item);
    }
    items
}

/// Unwrap `/l/?uddg=<encoded>` indirection; pass direct links through.
fn unwrap_redirect(href: &str) -> String {
    if let Some(pos) = href.find("uddg=") {
        let encoded = &href[pos + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        return percent_decode(encoded);
    }
    if href.starts_with("//") {
        return format!("https:{}", href);
    }
    href.to_string()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn strip_tags(html: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"));
    let text = re.replace_all(html, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
    <div class="result">
      <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust%2Dlang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
      <a class="result__snippet" href="#">A language empowering everyone to build reliable software.</a>
    </div>
    <div class="result">
      <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Rust Book</a>
    </div>
    "##;

    #[test]
    fn test_parse_unwraps_redirects_and_strips_tags() {
        let items = parse_results(SAMPLE, "rust", 10);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://www.rust-lang.org/");
        assert_eq!(items[0].title, "The Rust Programming Language");
        assert!(items[0].snippet.contains("reliable software"));
        assert_eq!(items[1].url, "https://doc.rust-lang.org/book/");
    }

    #[test]
    fn test_max_results_respected() {
        let items = parse_results(SAMPLE, "rust", 1);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(
            percent_decode("https%3A%2F%2Fexample.com%2Fa%20b"),
            "https://example.com/a b"
        );
        assert_eq!(percent_decode("plain"), "plain");
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert!(parse_results("<html></html>", "rust", 10).is_empty());
    }
}
