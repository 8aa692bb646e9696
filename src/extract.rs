//! Web page content extraction.
//!
//! [`HttpExtractor`] fetches a URL and reduces the HTML to readable text:
//! script/style/nav blocks dropped, tags stripped, entities unescaped,
//! whitespace collapsed, length capped. Good enough for LLM consumption;
//! this is not a rendering engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ContentConfig;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch a URL and return its readable text. An empty string means the
    /// page had no usable text.
    async fn extract(&self, url: &str) -> Result<String>;
}

pub struct HttpExtractor {
    client: reqwest::Client,
    max_content_length: usize,
}

impl HttpExtractor {
    pub fn new(config: &ContentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_content_length: config.max_content_length,
        })
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Error status fetching {}", url))?;

        let html = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        Ok(html_to_text(&html, self.max_content_length))
    }
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<(script|style|noscript|nav|header|footer|aside)\b.*?</(script|style|noscript|nav|header|footer|aside)>",
        )
        .expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Strip HTML down to collapsed plain text, capped at `max_len` characters.
pub fn html_to_text(html: &str, max_len: usize) -> String {
    let without_blocks = block_regex().replace_all(html, " ");
    let without_tags = tag_regex().replace_all(&without_blocks, " ");
    let unescaped = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'");

    let collapsed = unescaped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_len {
        collapsed.chars().take(max_len).collect()
    } else {
        collapsed
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// Extractor with canned text per URL; unknown URLs error.
    pub struct CannedExtractor {
        pub pages: HashMap<String, String>,
    }

    impl CannedExtractor {
        pub fn new(pages: Vec<(&str, &str)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(u, t)| (u.to_string(), t.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ContentExtractor for CannedExtractor {
        async fn extract(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("fetch failed for {}", url))
        }
    }
}
