//! Research task lifecycle.
//!
//! The [`TaskManager`] owns every task record and is the single writer of
//! status transitions: the pipeline worker requests transitions, the
//! manager validates them against the state machine in
//! [`TaskStatus`](crate::models::TaskStatus). `start_task` is
//! fire-and-forget; callers poll with `get_status` or block on `wait`.
//! Failure of one task never touches another, and a failed task keeps
//! every intermediate output it produced.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::analyzer::QueryAnalyzer;
use crate::config::Config;
use crate::extract::ContentExtractor;
use crate::factory::RetrieverFactory;
use crate::llm::LlmClient;
use crate::models::{
    ProcessedContent, QueryAnalysis, ResearchReport, RetrievedItem, SourceInsight,
    SubTopicSynthesis, TaskSnapshot, TaskStatus,
};
use crate::orchestrator::RetrievalOrchestrator;
use crate::processor::ContentProcessor;
use crate::report::ReportBuilder;
use crate::synthesis::SynthesisEngine;

/// Full state of one research task, including intermediate outputs.
struct TaskRecord {
    id: String,
    query: String,
    status: TaskStatus,
    error: Option<String>,
    analysis: Option<QueryAnalysis>,
    retrieved: Option<Vec<RetrievedItem>>,
    processed: Option<Vec<ProcessedContent>>,
    insights: Option<Vec<SourceInsight>>,
    syntheses: Option<Vec<SubTopicSynthesis>>,
    report: Option<ResearchReport>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            query: self.query.clone(),
            status: self.status,
            error: self.error.clone(),
            retrieved_count: self.retrieved.as_ref().map(|r| r.len()),
            relevant_count: self
                .processed
                .as_ref()
                .map(|p| p.iter().filter(|c| c.is_relevant).count()),
            report_title: self.report.as_ref().map(|r| r.title.clone()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<String, TaskRecord>>>;

/// Collaborators the pipeline worker needs, shared across tasks.
struct PipelineParts {
    analyzer: QueryAnalyzer,
    orchestrator: RetrievalOrchestrator,
    processor: ContentProcessor,
    synthesis: SynthesisEngine,
    builder: ReportBuilder,
    factory: Arc<RetrieverFactory>,
}

pub struct TaskManager {
    tasks: TaskMap,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    parts: Arc<PipelineParts>,
}

impl TaskManager {
    pub fn new(
        factory: Arc<RetrieverFactory>,
        llm: Arc<dyn LlmClient>,
        extractor: Arc<dyn ContentExtractor>,
        config: &Config,
    ) -> Self {
        let parts = PipelineParts {
            analyzer: QueryAnalyzer::new(llm.clone()),
            orchestrator: RetrievalOrchestrator::new(factory.clone()),
            processor: ContentProcessor::new(
                extractor,
                llm.clone(),
                config.content.max_concurrent_fetches,
            ),
            synthesis: SynthesisEngine::new(
                llm.clone(),
                config.llm.chunk_threshold,
                config.llm.chunk_size,
            ),
            builder: ReportBuilder::new(llm),
            factory,
        };
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
            parts: Arc::new(parts),
        }
    }

    /// Create a task and start its pipeline in the background.
    pub fn start_task(&self, query: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            tasks.insert(
                id.clone(),
                TaskRecord {
                    id: id.clone(),
                    query: query.to_string(),
                    status: TaskStatus::PendingAnalysis,
                    error: None,
                    analysis: None,
                    retrieved: None,
                    processed: None,
                    insights: None,
                    syntheses: None,
                    report: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        tracing::info!(task_id = %id, query = %query, "task started");

        let parts = self.parts.clone();
        let tasks = self.tasks.clone();
        let task_id = id.clone();
        let query = query.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_pipeline(parts, tasks.clone(), &task_id, &query).await {
                tracing::error!(task_id = %task_id, error = %e, "task failed");
                fail_task(&tasks, &task_id, &e.to_string());
            }
        });
        self.handles
            .lock()
            .expect("handle lock poisoned")
            .insert(id.clone(), handle);
        id
    }

    pub fn get_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().expect("task lock poisoned");
        tasks.get(task_id).map(|t| t.snapshot())
    }

    pub fn report(&self, task_id: &str) -> Option<ResearchReport> {
        let tasks = self.tasks.lock().expect("task lock poisoned");
        tasks.get(task_id).and_then(|t| t.report.clone())
    }

    /// Block until the task's pipeline worker has finished.
    pub async fn wait(&self, task_id: &str) -> Option<TaskSnapshot> {
        let handle = self
            .handles
            .lock()
            .expect("handle lock poisoned")
            .remove(task_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.get_status(task_id)
    }

    /// Cancel a running task. Task data is kept for inspection unless
    /// `remove_data` is set. Returns false for unknown ids.
    pub fn cleanup(&self, task_id: &str, remove_data: bool) -> bool {
        let handle = self
            .handles
            .lock()
            .expect("handle lock poisoned")
            .remove(task_id);
        if let Some(handle) = handle {
            handle.abort();
        }

        let mut tasks = self.tasks.lock().expect("task lock poisoned");
        let Some(record) = tasks.get_mut(task_id) else {
            return false;
        };
        if !record.status.is_terminal() {
            record.status = TaskStatus::Cancelled;
            record.updated_at = Utc::now();
            tracing::info!(task_id = %task_id, "task cancelled");
        }
        if remove_data {
            tasks.remove(task_id);
        }
        true
    }

    pub fn task_ids(&self) -> Vec<String> {
        let tasks = self.tasks.lock().expect("task lock poisoned");
        tasks.keys().cloned().collect()
    }
}

/// Apply a validated transition. Illegal transitions (including any move
/// out of a terminal state) are errors.
fn transition(tasks: &TaskMap, task_id: &str, to: TaskStatus) -> Result<()> {
    let mut tasks = tasks.lock().expect("task lock poisoned");
    let record = tasks
        .get_mut(task_id)
        .ok_or_else(|| anyhow::anyhow!("unknown task {}", task_id))?;
    if !record.status.can_transition_to(to) {
        anyhow::bail!(
            "illegal transition {} -> {} for task {}",
            record.status,
            to,
            task_id
        );
    }
    tracing::debug!(task_id = %task_id, from = %record.status, to = %to, "transition");
    record.status = to;
    record.updated_at = Utc::now();
    Ok(())
}

fn fail_task(tasks: &TaskMap, task_id: &str, message: &str) {
    let mut tasks = tasks.lock().expect("task lock poisoned");
    if let Some(record) = tasks.get_mut(task_id) {
        // A cancelled task stays cancelled; intermediate outputs stay put.
        if record.status.can_transition_to(TaskStatus::Failed) {
            record.status = TaskStatus::Failed;
            record.error = Some(message.to_string());
            record.updated_at = Utc::now();
        }
    }
}

fn store<F: FnOnce(&mut TaskRecord)>(tasks: &TaskMap, task_id: &str, f: F) {
    let mut tasks = tasks.lock().expect("task lock poisoned");
    if let Some(record) = tasks.get_mut(task_id) {
        record.updated_at = Utc::now();
        f(record);
    }
}

async fn run_pipeline(
    parts: Arc<PipelineParts>,
    tasks: TaskMap,
    task_id: &str,
    query: &str,
) -> Result<()> {
    transition(&tasks, task_id, TaskStatus::AnalyzingQuery)?;
    let analysis = parts.analyzer.analyze(query).await;
    store(&tasks, task_id, |r| r.analysis = Some(analysis.clone()));

    transition(&tasks, task_id, TaskStatus::PendingRetrieval)?;
    if parts.factory.available().is_empty() {
        anyhow::bail!("no retrievers available");
    }
    transition(&tasks, task_id, TaskStatus::RetrievingSources)?;
    let retrieved = parts.orchestrator.retrieve(&analysis).await;
    tracing::info!(task_id = %task_id, count = retrieved.len(), "retrieval complete");
    store(&tasks, task_id, |r| r.retrieved = Some(retrieved.clone()));

    transition(&tasks, task_id, TaskStatus::PendingProcessing)?;
    transition(&tasks, task_id, TaskStatus::ProcessingContent)?;
    let processed = parts.processor.process(retrieved, query).await;
    let relevant = processed.iter().filter(|p| p.is_relevant).count();
    tracing::info!(task_id = %task_id, total = processed.len(), relevant, "processing complete");
    store(&tasks, task_id, |r| r.processed = Some(processed.clone()));

    transition(&tasks, task_id, TaskStatus::PendingSynthesis)?;
    transition(&tasks, task_id, TaskStatus::SynthesizingInsights)?;
    let insights = parts
        .synthesis
        .extract_insights(&processed, &analysis.sub_topics)
        .await;
    let syntheses = parts
        .synthesis
        .synthesize(&insights, &analysis.sub_topics)
        .await;
    store(&tasks, task_id, |r| {
        r.insights = Some(insights.clone());
        r.syntheses = Some(syntheses.clone());
    });

    transition(&tasks, task_id, TaskStatus::PendingReportGeneration)?;
    transition(&tasks, task_id, TaskStatus::GeneratingReport)?;
    let report = parts.builder.build(&analysis, &syntheses).await;
    store(&tasks, task_id, |r| r.report = Some(report.clone()));

    transition(&tasks, task_id, TaskStatus::Completed)?;
    tracing::info!(task_id = %task_id, "task completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EngineConfig};
    use crate::extract::test_support::CannedExtractor;
    use crate::models::SourceType;
    use crate::retriever::{BackendFactory, RetrieverRegistry, SearchBackend};
    use async_trait::async_trait;

    /// Routes prompts to canned responses by stage marker.
    struct RoutedLlm;

    #[async_trait]
    impl LlmClient for RoutedLlm {
        async fn chat(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
            if prompt.contains("plan searches") || prompt.contains("Analyze this research") {
                return Ok(r#"{"keywords": ["solar"], "expanded_terms": [], "sub_topics": ["adoption"],
                    "search_queries": {"web": ["solar adoption"], "news": [], "academic": []}}"#
                    .to_string());
            }
            if prompt.contains("Is this document relevant") {
                return Ok(r#"{"relevant": true, "score": 0.8}"#.to_string());
            }
            if prompt.contains("extract key points") {
                return Ok(r#"{"insights": [{"sub_topic": "adoption", "key_points": ["Adoption is rising"], "quotes": []}]}"#.to_string());
            }
            if prompt.contains("Synthesize these") {
                return Ok(r#"{"summary": "Adoption keeps rising.", "consistent_findings": [], "conflicting_findings": []}"#.to_string());
            }
            if prompt.contains("Write a structured research report") {
                return Ok(r#"{"title": "Solar Adoption", "sections": [{"title": "Intro", "type": "introduction", "content": "Overview."}]}"#.to_string());
            }
            anyhow::bail!("unexpected prompt")
        }
    }

    struct OneHitBackend;

    #[async_trait]
    impl SearchBackend for OneHitBackend {
        fn engine_id(&self) -> &str {
            "onehit"
        }
        fn source_type(&self) -> SourceType {
            SourceType::Web
        }
        fn description(&self) -> &str {
            "one canned result"
        }
        fn check_config_valid(&self, _config: &EngineConfig) -> bool {
            true
        }
        async fn search(
            &self,
            _query: &str,
            _config: &EngineConfig,
            _max_results: usize,
        ) -> Result<Vec<RetrievedItem>> {
            let mut item = RetrievedItem::new(
                "https://solar.example/report",
                "Annual solar adoption report",
                SourceType::Web,
            );
            item.snippet =
                "Detailed figures on residential and utility solar adoption rates.".to_string();
            item.source_engine = "onehit".to_string();
            item.relevance_score = 0.8;
            Ok(vec![item])
        }
    }

    struct StuckBackend;

    #[async_trait]
    impl SearchBackend for StuckBackend {
        fn engine_id(&self) -> &str {
            "stuck"
        }
        fn source_type(&self) -> SourceType {
            SourceType::Web
        }
        fn description(&self) -> &str {
            "never returns"
        }
        fn check_config_valid(&self, _config: &EngineConfig) -> bool {
            true
        }
        async fn search(
            &self,
            _query: &str,
            _config: &EngineConfig,
            _max_results: usize,
        ) -> Result<Vec<RetrievedItem>> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    fn manager_with(backend_factory: Option<BackendFactory>) -> TaskManager {
        let mut registry = RetrieverRegistry::new();
        if let Some(f) = backend_factory {
            registry.register(f, None, 5).unwrap();
        }
        let factory = Arc::new(RetrieverFactory::initialize(registry, Config::minimal()));
        let extractor = Arc::new(CannedExtractor::new(vec![(
            "https://solar.example/report",
            "Solar adoption grew again this year across all segments.",
        )]));
        TaskManager::new(factory, Arc::new(RoutedLlm), extractor, &Config::minimal())
    }

    #[tokio::test]
    async fn test_pipeline_runs_to_completion() {
        let manager = manager_with(Some(Arc::new(|| Box::new(OneHitBackend))));
        let id = manager.start_task("solar adoption trends");
        let snapshot = manager.wait(&id).await.unwrap();

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.retrieved_count, Some(1));
        assert_eq!(snapshot.relevant_count, Some(1));
        let report = manager.report(&id).unwrap();
        assert_eq!(report.title, "Solar Adoption");
        // References rebuilt from pipeline data.
        assert!(report
            .sections
            .last()
            .unwrap()
            .content
            .contains("https://solar.example/report"));
    }

    #[tokio::test]
    async fn test_no_retrievers_fails_task() {
        let manager = manager_with(None);
        let id = manager.start_task("anything");
        let snapshot = manager.wait(&id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error.unwrap().contains("no retrievers"));
    }

    #[tokio::test]
    async fn test_cleanup_cancels_running_task() {
        let manager = manager_with(Some(Arc::new(|| Box::new(StuckBackend))));
        let id = manager.start_task("never finishes");
        // Let the pipeline reach the retrieval stage.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(manager.cleanup(&id, false));
        let snapshot = manager.get_status(&id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cleanup_can_remove_data() {
        let manager = manager_with(Some(Arc::new(|| Box::new(OneHitBackend))));
        let id = manager.start_task("solar");
        manager.wait(&id).await.unwrap();
        assert!(manager.cleanup(&id, true));
        assert!(manager.get_status(&id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_id() {
        let manager = manager_with(None);
        assert!(manager.get_status("nope").is_none());
        assert!(!manager.cleanup("nope", false));
    }

    #[tokio::test]
    async fn test_completed_task_not_recancelled() {
        let manager = manager_with(Some(Arc::new(|| Box::new(OneHitBackend))));
        let id = manager.start_task("solar");
        manager.wait(&id).await.unwrap();
        assert!(manager.cleanup(&id, false));
        assert_eq!(
            manager.get_status(&id).unwrap().status,
            TaskStatus::Completed
        );
    }
}
