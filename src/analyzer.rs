//! Query analysis: turn a research question into keywords, sub-topics, and
//! planned per-source search queries.
//!
//! One model call, one JSON answer. A malformed answer never fails the
//! task: the analyzer degrades to a heuristic built from the raw query,
//! which keeps the pipeline moving with sensible defaults.

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{self, LlmClient};
use crate::models::{QueryAnalysis, SourceType};

const PLANNED_TYPES: [SourceType; 3] = [SourceType::Web, SourceType::News, SourceType::Academic];

pub struct QueryAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, query: &str) -> QueryAnalysis {
        let prompt = format!(
            "Analyze this research question and plan searches for it.\n\n\
             Question: {}\n\n\
             Respond with JSON only, in exactly this shape:\n\
             {{\n\
               \"keywords\": [\"...\"],\n\
               \"expanded_terms\": [\"...\"],\n\
               \"sub_topics\": [\"...\"],\n\
               \"search_queries\": {{\n\
                 \"web\": [\"...\"],\n\
                 \"news\": [\"...\"],\n\
                 \"academic\": [\"...\"]\n\
               }}\n\
             }}\n\n\
             Plan 2-3 focused queries per source type. Sub-topics should\n\
             partition the question into researchable angles.",
            query
        );

        match self
            .llm
            .chat(&prompt, Some("You are a research planning assistant. Respond with JSON only."))
            .await
        {
            Ok(response) => match llm::parse_json_response(&response) {
                Ok(value) => build_analysis(query, &value),
                Err(e) => {
                    tracing::warn!(error = %e, "query analysis response unparseable, using heuristic");
                    heuristic_analysis(query)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "query analysis call failed, using heuristic");
                heuristic_analysis(query)
            }
        }
    }
}

fn build_analysis(query: &str, value: &serde_json::Value) -> QueryAnalysis {
    let mut search_queries: HashMap<SourceType, Vec<String>> = HashMap::new();
    let planned = value.get("search_queries");
    for source_type in PLANNED_TYPES {
        let queries = planned
            .map(|p| llm::string_list(p, source_type.as_str()))
            .unwrap_or_default();
        search_queries.insert(source_type, queries);
    }

    // A plan with nothing to run is useless; fall back to the raw query
    // on the web.
    if search_queries.values().all(|q| q.is_empty()) {
        search_queries.insert(SourceType::Web, vec![query.to_string()]);
    }

    let mut analysis = QueryAnalysis {
        original_query: query.to_string(),
        keywords: llm::string_list(value, "keywords"),
        expanded_terms: llm::string_list(value, "expanded_terms"),
        sub_topics: llm::string_list(value, "sub_topics"),
        search_queries,
    };
    if analysis.keywords.is_empty() {
        analysis.keywords = extract_keywords(query);
    }
    if analysis.sub_topics.is_empty() {
        analysis.sub_topics = vec![query.to_string()];
    }
    analysis
}

/// Analysis built from the query text alone.
fn heuristic_analysis(query: &str) -> QueryAnalysis {
    let mut search_queries = HashMap::new();
    for source_type in PLANNED_TYPES {
        search_queries.insert(source_type, vec![query.to_string()]);
    }
    QueryAnalysis {
        original_query: query.to_string(),
        keywords: extract_keywords(query),
        expanded_terms: Vec::new(),
        sub_topics: vec![query.to_string()],
        search_queries,
    }
}

fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 3)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}
