//! Insight extraction and cross-source synthesis.
//!
//! Stage one walks each relevant document and asks the model what it
//! contributes to each sub-topic, chunking long documents on sentence
//! boundaries first. Stage two merges insights per sub-topic and asks the
//! model for a synthesis, naming agreements and contradictions.
//!
//! Degradation rules: a chunk whose answer fails to parse is skipped; a
//! sub-topic with no insights, or whose synthesis call fails, gets a
//! deterministic placeholder. Neither ever fails the task.

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{self, LlmClient};
use crate::models::{ProcessedContent, SourceInsight, SubTopicSynthesis};

pub struct SynthesisEngine {
    llm: Arc<dyn LlmClient>,
    chunk_threshold: usize,
    chunk_size: usize,
}

impl SynthesisEngine {
    pub fn new(llm: Arc<dyn LlmClient>, chunk_threshold: usize, chunk_size: usize) -> Self {
        Self {
            llm,
            chunk_threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Extract per-document, per-sub-topic insights from every relevant
    /// document that has text.
    pub async fn extract_insights(
        &self,
        documents: &[ProcessedContent],
        sub_topics: &[String],
    ) -> Vec<SourceInsight> {
        let mut merged: HashMap<(String, String), SourceInsight> = HashMap::new();

        for doc in documents {
            if !doc.is_relevant {
                continue;
            }
            let Some(text) = doc.extracted_text.as_deref().filter(|t| !t.trim().is_empty())
            else {
                continue;
            };

            let chunks = if text.chars().count() > self.chunk_threshold {
                split_text(text, self.chunk_size)
            } else {
                vec![text.to_string()]
            };

            for chunk in &chunks {
                match self.insights_for_chunk(&doc.item.url, chunk, sub_topics).await {
                    Some(insights) => {
                        for insight in insights {
                            let key = (insight.url.clone(), insight.sub_topic.clone());
                            match merged.get_mut(&key) {
                                Some(existing) => {
                                    existing.key_points.extend(insight.key_points);
                                    existing.quotes.extend(insight.quotes);
                                }
                                None => {
                                    merged.insert(key, insight);
                                }
                            }
                        }
                    }
                    None => {
                        tracing::warn!(url = %doc.item.url, "skipping unparseable insight chunk");
                    }
                }
            }
        }

        let mut insights: Vec<SourceInsight> = merged.into_values().collect();
        insights.sort_by(|a, b| a.url.cmp(&b.url).then(a.sub_topic.cmp(&b.sub_topic)));
        insights
    }

    async fn insights_for_chunk(
        &self,
        url: &str,
        chunk: &str,
        sub_topics: &[String],
    ) -> Option<Vec<SourceInsight>> {
        let prompt = format!(
            "Sub-topics under research:\n{}\n\nDocument text:\n{}\n\n\
             For each sub-topic this text actually informs, extract key points\n\
             and short supporting quotes. Respond with JSON only:\n\
             {{\"insights\": [{{\"sub_topic\": \"...\", \"key_points\": [\"...\"], \"quotes\": [\"...\"]}}]}}",
            sub_topics.join("\n"),
            chunk
        );

        let response = self
            .llm
            .chat(&prompt, Some("You extract research insights. Respond with JSON only."))
            .await
            .ok()?;
        let value = llm::parse_json_response(&response).ok()?;
        Some(parse_insights(&value, url))
    }

    /// Synthesize each sub-topic from its insights.
    pub async fn synthesize(
        &self,
        insights: &[SourceInsight],
        sub_topics: &[String],
    ) -> Vec<SubTopicSynthesis> {
        let mut result = Vec::with_capacity(sub_topics.len());
        for sub_topic in sub_topics {
            let relevant: Vec<&SourceInsight> = insights
                .iter()
                .filter(|i| &i.sub_topic == sub_topic)
                .collect();
            result.push(self.synthesize_one(sub_topic, &relevant).await);
        }
        result
    }

    async fn synthesize_one(
        &self,
        sub_topic: &str,
        insights: &[&SourceInsight],
    ) -> SubTopicSynthesis {
        let source_urls: Vec<String> = insights.iter().map(|i| i.url.clone()).collect();

        if insights.is_empty() {
            return SubTopicSynthesis {
                sub_topic: sub_topic.to_string(),
                summary: "No sources addressed this sub-topic.".to_string(),
                consistent_findings: Vec::new(),
                conflicting_findings: Vec::new(),
                source_urls,
            };
        }

        let material: String = insights
            .iter()
            .map(|i| format!("Source {}:\n- {}", i.url, i.key_points.join("\n- ")))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Sub-topic: {}\n\nInsights gathered from sources:\n{}\n\n\
             Synthesize these into a short summary, listing findings the sources\n\
             agree on and findings where they conflict. Respond with JSON only:\n\
             {{\"summary\": \"...\", \"consistent_findings\": [\"...\"], \"conflicting_findings\": [\"...\"]}}",
            sub_topic, material
        );

        let parsed = match self
            .llm
            .chat(&prompt, Some("You synthesize research findings. Respond with JSON only."))
            .await
        {
            Ok(response) => llm::parse_json_response(&response).ok(),
            Err(e) => {
                tracing::warn!(sub_topic = %sub_topic, error = %e, "synthesis call failed");
                None
            }
        };

        match parsed {
            Some(value) => SubTopicSynthesis {
                sub_topic: sub_topic.to_string(),
                summary: value
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .unwrap_or("")
                    .to_string(),
                consistent_findings: llm::string_list(&value, "consistent_findings"),
                conflicting_findings: llm::string_list(&value, "conflicting_findings"),
                source_urls,
            },
            None => {
                // Degraded placeholder assembled from the raw key points.
                let points: Vec<String> = insights
                    .iter()
                    .flat_map(|i| i.key_points.iter().cloned())
                    .take(5)
                    .collect();
                SubTopicSynthesis {
                    sub_topic: sub_topic.to_string(),
                    summary: points.join(" "),
                    consistent_findings: Vec::new(),
                    conflicting_findings: Vec::new(),
                    source_urls,
                }
            }
        }
    }
}

fn parse_insights(value: &serde_json::Value, url: &str) -> Vec<SourceInsight> {
    value
        .get("insights")
        .and_then(|i| i.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|raw| {
                    let sub_topic = raw.get("sub_topic")?.as_str()?.to_string();
                    Some(SourceInsight {
                        url: url.to_string(),
                        sub_topic,
                        key_points: llm::string_list(raw, "key_points"),
                        quotes: llm::string_list(raw, "quotes"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split text into chunks of at most `max_chars`, breaking after sentence
/// punctuation. A single sentence longer than the limit becomes its own
/// oversized chunk rather than being cut mid-sentence.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in text.split_inclusive(['.', '!', '?']) {
        let sentence_len = sentence.chars().count();
        if current_len > 0 && current_len + sentence_len > max_chars {
            chunks.push(current.trim().to_string());
            current = String::new();
            current_len = 0;
        }
        current.push_str(sentence);
        current_len += sentence_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::QueuedLlm;
    use crate::models::{RetrievedItem, SourceType};
    use chrono::Utc;

    fn doc(url: &str, text: &str) -> ProcessedContent {
        ProcessedContent {
            item: RetrievedItem::new(url, "Title", SourceType::Web),
            extracted_text: Some(text.to_string()),
            is_relevant: true,
            relevance_score: 0.8,
            processing_error: None,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_split_text_respects_sentences() {
        let text = "One sentence here. Another one follows! A third? And a fourth.";
        let chunks = split_text(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.ends_with(['.', '!', '?']));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_split_text_oversized_sentence() {
        let long = "x".repeat(100);
        let chunks = split_text(&long, 10);
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_insights_extracted_and_merged() {
        let llm = Arc::new(QueuedLlm::new(vec![
            r#"{"insights": [{"sub_topic": "costs", "key_points": ["Costs are falling"], "quotes": ["down 40%"]}]}"#,
        ]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let docs = vec![doc("https://a.com", "Short document about costs.")];
        let insights = engine
            .extract_insights(&docs, &["costs".to_string()])
            .await;
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].url, "https://a.com");
        assert_eq!(insights[0].key_points, vec!["Costs are falling"]);
    }

    #[tokio::test]
    async fn test_unparseable_chunk_skipped() {
        let llm = Arc::new(QueuedLlm::new(vec!["not json at all"]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let docs = vec![doc("https://a.com", "Some document body.")];
        let insights = engine.extract_insights(&docs, &["t".to_string()]).await;
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn test_irrelevant_documents_ignored() {
        let llm = Arc::new(QueuedLlm::new(vec![]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let mut d = doc("https://a.com", "text");
        d.is_relevant = false;
        let insights = engine.extract_insights(&[d], &["t".to_string()]).await;
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_with_findings() {
        let llm = Arc::new(QueuedLlm::new(vec![
            r#"{"summary": "Costs are dropping.", "consistent_findings": ["40% decline"], "conflicting_findings": []}"#,
        ]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let insights = vec![SourceInsight {
            url: "https://a.com".to_string(),
            sub_topic: "costs".to_string(),
            key_points: vec!["Costs are falling".to_string()],
            quotes: vec![],
        }];
        let syntheses = engine.synthesize(&insights, &["costs".to_string()]).await;
        assert_eq!(syntheses.len(), 1);
        assert_eq!(syntheses[0].summary, "Costs are dropping.");
        assert_eq!(syntheses[0].source_urls, vec!["https://a.com"]);
    }

    #[tokio::test]
    async fn test_sub_topic_without_insights_gets_placeholder() {
        let llm = Arc::new(QueuedLlm::new(vec![]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let syntheses = engine.synthesize(&[], &["orphan".to_string()]).await;
        assert_eq!(syntheses.len(), 1);
        assert!(syntheses[0].summary.contains("No sources"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_degrades_to_key_points() {
        let llm = Arc::new(QueuedLlm::new(vec!["completely unstructured reply"]));
        let engine = SynthesisEngine::new(llm, 6000, 4000);
        let insights = vec![SourceInsight {
            url: "https://a.com".to_string(),
            sub_topic: "costs".to_string(),
            key_points: vec!["Point one.".to_string(), "Point two.".to_string()],
            quotes: vec![],
        }];
        let syntheses = engine.synthesize(&insights, &["costs".to_string()]).await;
        assert!(syntheses[0].summary.contains("Point one."));
    }
}
