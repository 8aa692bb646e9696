//! Content processing: fetch each retrieved URL and judge its relevance.
//!
//! Extraction runs concurrently with a bounded fan-out; each item's failure
//! is recorded on that item alone. Items that yield text get an LLM
//! relevance assessment; items that don't are marked not relevant without
//! wasting a model call. Every processed item is retained for audit, the
//! relevant subset drives synthesis.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::extract::ContentExtractor;
use crate::llm::{self, LlmClient};
use crate::models::{ProcessedContent, RetrievedItem};

pub struct ContentProcessor {
    extractor: Arc<dyn ContentExtractor>,
    llm: Arc<dyn LlmClient>,
    max_concurrent: usize,
}

impl ContentProcessor {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        llm: Arc<dyn LlmClient>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            extractor,
            llm,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Process every item, preserving input order.
    pub async fn process(&self, items: Vec<RetrievedItem>, query: &str) -> Vec<ProcessedContent> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();

        for (slot, item) in items.into_iter().enumerate() {
            let extractor = self.extractor.clone();
            let llm = self.llm.clone();
            let semaphore = semaphore.clone();
            let query = query.to_string();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                (slot, process_one(extractor, llm, item, &query).await)
            });
        }

        let mut ordered: Vec<Option<ProcessedContent>> = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok((slot, processed)) = joined {
                if ordered.len() <= slot {
                    ordered.resize_with(slot + 1, || None);
                }
                ordered[slot] = Some(processed);
            }
        }
        ordered.into_iter().flatten().collect()
    }
}

async fn process_one(
    extractor: Arc<dyn ContentExtractor>,
    llm: Arc<dyn LlmClient>,
    item: RetrievedItem,
    query: &str,
) -> ProcessedContent {
    match extractor.extract(&item.url).await {
        Ok(text) if !text.trim().is_empty() => {
            let (is_relevant, relevance_score) = assess_relevance(&llm, query, &item, &text).await;
            ProcessedContent {
                item,
                extracted_text: Some(text),
                is_relevant,
                relevance_score,
                processing_error: None,
                processed_at: Utc::now(),
            }
        }
        Ok(_) => ProcessedContent {
            item,
            extracted_text: Some(String::new()),
            is_relevant: false,
            relevance_score: 0.0,
            processing_error: None,
            processed_at: Utc::now(),
        },
        Err(e) => {
            tracing::warn!(url = %item.url, error = %e, "content extraction failed");
            ProcessedContent {
                item,
                extracted_text: None,
                is_relevant: false,
                relevance_score: 0.0,
                processing_error: Some(e.to_string()),
                processed_at: Utc::now(),
            }
        }
    }
}

/// Ask the model whether the document answers the research question.
/// Malformed responses degrade to relevant-at-0.5 rather than dropping
/// content on a parsing accident.
async fn assess_relevance(
    llm: &Arc<dyn LlmClient>,
    query: &str,
    item: &RetrievedItem,
    text: &str,
) -> (bool, f64) {
    let excerpt: String = text.chars().take(2000).collect();
    let prompt = format!(
        "Research question: {}\n\nDocument title: {}\nDocument excerpt:\n{}\n\n\
         Is this document relevant to the research question? Respond with JSON only:\n\
         {{\"relevant\": true/false, \"score\": 0.0-1.0}}",
        query, item.title, excerpt
    );

    match llm
        .chat(&prompt, Some("You assess document relevance. Respond with JSON only."))
        .await
    {
        Ok(response) => parse_assessment(&response),
        Err(e) => {
            tracing::warn!(url = %item.url, error = %e, "relevance assessment failed, keeping document");
            (true, 0.5)
        }
    }
}

fn parse_assessment(response: &str) -> (bool, f64) {
    match llm::parse_json_response(response) {
        Ok(value) => {
            let relevant = value
                .get("relevant")
                .and_then(|r| r.as_bool())
                .unwrap_or(true);
            let score = value
                .get("score")
                .and_then(|s| s.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            (relevant, score)
        }
        Err(_) => {
            tracing::warn!("unparseable relevance assessment, keeping document");
            (true, 0.5)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::CannedExtractor;
    use crate::llm::test_support::QueuedLlm;
    use crate::models::SourceType;

    fn item(url: &str) -> RetrievedItem {
        RetrievedItem::new(url, "Some page title", SourceType::Web)
    }

    #[tokio::test]
    async fn test_extraction_and_assessment() {
        let extractor = Arc::new(CannedExtractor::new(vec![
            ("https://a.com", "Plenty of useful text about the topic."),
        ]));
        let llm = Arc::new(QueuedLlm::new(vec![r#"{"relevant": true, "score": 0.9}"#]));
        let processor = ContentProcessor::new(extractor, llm, 4);

        let out = processor.process(vec![item("https://a.com")], "topic").await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_relevant);
        assert!((out[0].relevance_score - 0.9).abs() < 1e-9);
        assert!(out[0].processing_error.is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated_and_recorded() {
        let extractor = Arc::new(CannedExtractor::new(vec![
            ("https://ok.com", "Good text about the subject matter."),
        ]));
        let llm = Arc::new(QueuedLlm::new(vec![r#"{"relevant": true, "score": 0.8}"#]));
        let processor = ContentProcessor::new(extractor, llm, 4);

        let out = processor
            .process(vec![item("https://ok.com"), item("https://broken.com")], "subject")
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_relevant);
        assert!(out[1].processing_error.is_some());
        assert!(!out[1].is_relevant);
    }

    #[tokio::test]
    async fn test_empty_text_skips_llm() {
        let extractor = Arc::new(CannedExtractor::new(vec![("https://empty.com", "   ")]));
        // No responses queued: a model call would error the test path.
        let llm = Arc::new(QueuedLlm::new(vec![]));
        let processor = ContentProcessor::new(extractor, llm, 4);

        let out = processor.process(vec![item("https://empty.com")], "q").await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_relevant);
        assert_eq!(out[0].extracted_text.as_deref(), Some(""));
        assert!(out[0].processing_error.is_none());
    }

    #[tokio::test]
    async fn test_garbage_assessment_degrades_to_kept() {
        let extractor = Arc::new(CannedExtractor::new(vec![
            ("https://a.com", "Detailed text on the research topic."),
        ]));
        let llm = Arc::new(QueuedLlm::new(vec!["I think it's probably relevant?"]));
        let processor = ContentProcessor::new(extractor, llm, 4);

        let out = processor.process(vec![item("https://a.com")], "topic").await;
        assert!(out[0].is_relevant);
        assert!((out[0].relevance_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_assessment_variants() {
        assert_eq!(parse_assessment(r#"{"relevant": false, "score": 0.2}"#), (false, 0.2));
        assert_eq!(parse_assessment(r#"{"score": 2.5}"#), (true, 1.0));
        assert_eq!(parse_assessment("nonsense"), (true, 0.5));
    }
}
