//! Core data types shared across the research pipeline.
//!
//! The flow is: a query is analyzed into a [`QueryAnalysis`], search engines
//! produce [`RetrievedItem`]s, content extraction wraps them into
//! [`ProcessedContent`], synthesis distills [`SourceInsight`]s and
//! [`SubTopicSynthesis`]s, and report generation emits a [`ResearchReport`].
//! Task lifecycle is tracked with [`TaskStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category of search source. The registry holds one live engine per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Web,
    News,
    Academic,
    Custom(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Web => "web",
            SourceType::News => "news",
            SourceType::Academic => "academic",
            SourceType::Custom(name) => name,
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "web" => SourceType::Web,
            "news" => SourceType::News,
            "academic" => SourceType::Academic,
            _ => SourceType::Custom(s),
        }
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> String {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search result as produced by an engine and enriched by the
/// orchestrator. Immutable once it has passed quality filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source_type: SourceType,
    /// Engine id that produced this item (e.g. `"newsapi"`).
    pub source_engine: String,
    pub published_date: Option<DateTime<Utc>>,
    /// Estimated relevance in `[0.0, 1.0]`.
    pub relevance_score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub retrieved_at: DateTime<Utc>,
}

impl RetrievedItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            source_type,
            source_engine: String::new(),
            published_date: None,
            relevance_score: 0.5,
            metadata: HashMap::new(),
            retrieved_at: Utc::now(),
        }
    }
}

/// Output of the query analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub keywords: Vec<String>,
    pub expanded_terms: Vec<String>,
    pub sub_topics: Vec<String>,
    /// Planned search queries per source type. Types the analyzer did not
    /// plan for map to an empty list, never a missing key.
    pub search_queries: HashMap<SourceType, Vec<String>>,
}

impl QueryAnalysis {
    /// Queries planned for a source type (empty when none were planned).
    pub fn queries_for(&self, source_type: &SourceType) -> &[String] {
        self.search_queries
            .get(source_type)
            .map(|q| q.as_slice())
            .unwrap_or(&[])
    }
}

/// A retrieved item after content extraction and relevance assessment.
/// All processed items are retained, relevant or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub item: RetrievedItem,
    pub extracted_text: Option<String>,
    pub is_relevant: bool,
    pub relevance_score: f64,
    pub processing_error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Key points one document contributes to one sub-topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInsight {
    pub url: String,
    pub sub_topic: String,
    pub key_points: Vec<String>,
    pub quotes: Vec<String>,
}

/// Synthesized findings for one sub-topic across all sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTopicSynthesis {
    pub sub_topic: String,
    pub summary: String,
    pub consistent_findings: Vec<String>,
    pub conflicting_findings: Vec<String>,
    pub source_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Introduction,
    Body,
    Conclusion,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub section_type: SectionType,
    pub content: String,
}

/// The final product. Ordered sections; immutable once generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub title: String,
    pub query: String,
    pub sections: Vec<ReportSection>,
    pub analysis: QueryAnalysis,
    pub generated_at: DateTime<Utc>,
}

/// Task lifecycle states. Each working stage has a pending counterpart;
/// `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    PendingAnalysis,
    AnalyzingQuery,
    PendingRetrieval,
    RetrievingSources,
    PendingProcessing,
    ProcessingContent,
    PendingSynthesis,
    SynthesizingInsights,
    PendingReportGeneration,
    GeneratingReport,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The single legal forward successor, if any.
    pub fn successor(self) -> Option<TaskStatus> {
        use TaskStatus::*;
        match self {
            PendingAnalysis => Some(AnalyzingQuery),
            AnalyzingQuery => Some(PendingRetrieval),
            PendingRetrieval => Some(RetrievingSources),
            RetrievingSources => Some(PendingProcessing),
            PendingProcessing => Some(ProcessingContent),
            ProcessingContent => Some(PendingSynthesis),
            PendingSynthesis => Some(SynthesizingInsights),
            SynthesizingInsights => Some(PendingReportGeneration),
            PendingReportGeneration => Some(GeneratingReport),
            GeneratingReport => Some(Completed),
            Completed | Failed | Cancelled => None,
        }
    }

    /// Whether a transition from `self` to `to` is legal. Forward motion
    /// follows the successor chain; failure and cancellation are legal from
    /// any non-terminal state; terminal states accept nothing.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == TaskStatus::Failed || to == TaskStatus::Cancelled {
            return true;
        }
        self.successor() == Some(to)
    }

    pub fn as_str(self) -> &'static str {
        use TaskStatus::*;
        match self {
            PendingAnalysis => "pending_analysis",
            AnalyzingQuery => "analyzing_query",
            PendingRetrieval => "pending_retrieval",
            RetrievingSources => "retrieving_sources",
            PendingProcessing => "pending_processing",
            ProcessingContent => "processing_content",
            PendingSynthesis => "pending_synthesis",
            SynthesizingInsights => "synthesizing_insights",
            PendingReportGeneration => "pending_report_generation",
            GeneratingReport => "generating_report",
            Completed => "completed",
            Failed => "failed",
            Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a task's current state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub query: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub retrieved_count: Option<usize>,
    pub relevant_count: Option<usize>,
    pub report_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_string_roundtrip() {
        for (t, s) in [
            (SourceType::Web, "web"),
            (SourceType::News, "news"),
            (SourceType::Academic, "academic"),
            (SourceType::Custom("patents".to_string()), "patents"),
        ] {
            assert_eq!(t.as_str(), s);
            assert_eq!(SourceType::from(s.to_string()), t);
        }
    }

    #[test]
    fn test_status_chain_reaches_completed() {
        let mut status = TaskStatus::PendingAnalysis;
        let mut hops = 0;
        while let Some(next) = status.successor() {
            assert!(status.can_transition_to(next));
            status = next;
            hops += 1;
        }
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(hops, 10);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(!terminal.can_transition_to(TaskStatus::PendingAnalysis));
            assert!(!terminal.can_transition_to(TaskStatus::Failed));
        }
    }

    #[test]
    fn test_failed_reachable_from_any_working_state() {
        for status in [
            TaskStatus::PendingAnalysis,
            TaskStatus::RetrievingSources,
            TaskStatus::GeneratingReport,
        ] {
            assert!(status.can_transition_to(TaskStatus::Failed));
        }
    }

    #[test]
    fn test_no_stage_skipping() {
        assert!(!TaskStatus::PendingAnalysis.can_transition_to(TaskStatus::PendingRetrieval));
        assert!(!TaskStatus::RetrievingSources.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_queries_for_missing_type_is_empty() {
        let analysis = QueryAnalysis {
            original_query: "q".to_string(),
            keywords: vec![],
            expanded_terms: vec![],
            sub_topics: vec![],
            search_queries: HashMap::new(),
        };
        assert!(analysis.queries_for(&SourceType::News).is_empty());
    }
}
