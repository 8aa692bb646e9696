//! # DeepScout CLI (`scout`)
//!
//! The `scout` binary drives the research pipeline from the command line.
//! One invocation runs one research task to completion and writes the
//! report artifact; task state lives in memory for the lifetime of the
//! process.
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout engines` | List configured search engines and their health |
//! | `scout research "<question>"` | Run a research task and write the report |
//! | `scout status <task-id>` | Show the snapshot of a task in this process |
//! | `scout cleanup <task-id>` | Cancel a task and discard its data |
//!
//! ## Examples
//!
//! ```bash
//! # Verify engine configuration
//! scout engines --config ./config/scout.toml
//!
//! # Run a research task and write a Markdown report
//! scout research "state of grid-scale battery storage"
//!
//! # Write HTML instead
//! scout research "state of grid-scale battery storage" --format html
//! ```

mod analyzer;
mod config;
mod engine_arxiv;
mod engine_duckduckgo;
mod engine_google;
mod engine_newsapi;
mod engine_serper;
mod extract;
mod factory;
mod llm;
mod managed;
mod models;
mod orchestrator;
mod processor;
mod report;
mod retriever;
mod scoring;
mod synthesis;
mod task;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::factory::RetrieverFactory;
use crate::models::TaskSnapshot;
use crate::report::ReportFormat;
use crate::task::TaskManager;

/// DeepScout CLI — an automated deep-research engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scout.example.toml` for a full example. A missing
/// file falls back to built-in defaults (DuckDuckGo only, no LLM key).
#[derive(Parser)]
#[command(
    name = "scout",
    about = "DeepScout — an automated deep-research engine",
    version,
    long_about = "DeepScout plans searches for a research question with an LLM, fans them out \
    across configured search engines (web, news, academic), filters and deduplicates the \
    results, extracts and synthesizes insights, and writes a structured report."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/scout.toml`. All engine, LLM, content, and
    /// output settings are read from this file.
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List configured search engines and their status.
    ///
    /// Shows which engines initialized, which failed configuration
    /// validation and why, and which were skipped. Useful for verifying
    /// credentials before running a research task.
    Engines,

    /// Run a research task to completion.
    ///
    /// Analyzes the question, retrieves and processes sources, synthesizes
    /// findings, and writes the report to the configured output directory.
    /// Progress is printed as the task moves through its stages.
    Research {
        /// The research question.
        query: String,

        /// Report format: `markdown` (default from config) or `html`.
        #[arg(long)]
        format: Option<String>,
    },

    /// Show the status snapshot of a task.
    ///
    /// Tasks are held in memory by the process that started them, so this
    /// resolves ids only within a long-running embedding of the library.
    Status {
        /// Task UUID.
        id: String,
    },

    /// Cancel a task and discard its data.
    ///
    /// Aborts the pipeline worker if it is still running. Tasks are held
    /// in memory by the process that started them.
    Cleanup {
        /// Task UUID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deepscout=info,scout=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::info!(path = %cli.config.display(), "config file not found, using defaults");
        config::Config::minimal()
    };

    match cli.command {
        Commands::Engines => {
            let factory = build_factory(&cfg)?;
            print_engines(&factory);
        }
        Commands::Research { query, format } => {
            let format = ReportFormat::parse(
                format.as_deref().unwrap_or(&cfg.output.default_format),
            )?;
            let factory = build_factory(&cfg)?;
            if factory.available().is_empty() {
                print_engines(&factory);
                anyhow::bail!("no search engines available");
            }

            let llm = Arc::new(llm::OpenAiChatClient::new(&cfg.llm)?);
            let extractor = Arc::new(extract::HttpExtractor::new(&cfg.content)?);
            let manager = TaskManager::new(factory, llm, extractor, &cfg);

            let id = manager.start_task(&query);
            println!("Task {} started.", id);

            let mut last_status = None;
            loop {
                let Some(snapshot) = manager.get_status(&id) else {
                    anyhow::bail!("task {} vanished", id);
                };
                if last_status != Some(snapshot.status) {
                    print_stage(&snapshot);
                    last_status = Some(snapshot.status);
                }
                if snapshot.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            let snapshot = manager.wait(&id).await.expect("task record present");
            match snapshot.status {
                models::TaskStatus::Completed => {
                    let report = manager.report(&id).expect("completed task has report");
                    let path = report::save_report(&report, format, &cfg.output.dir)?;
                    println!("Report written to {}", path.display());
                }
                models::TaskStatus::Failed => {
                    anyhow::bail!(
                        "task failed: {}",
                        snapshot.error.as_deref().unwrap_or("unknown error")
                    );
                }
                other => anyhow::bail!("task ended in unexpected state {}", other),
            }
        }
        Commands::Status { id } => {
            println!(
                "No task {} in this process. Tasks are held in memory by the \
                 process that started them; use `scout research` to run one here.",
                id
            );
        }
        Commands::Cleanup { id } => {
            println!(
                "No task {} in this process. Tasks are held in memory by the \
                 process that started them.",
                id
            );
        }
    }

    Ok(())
}

fn build_factory(cfg: &config::Config) -> anyhow::Result<Arc<RetrieverFactory>> {
    let mut registry = retriever::RetrieverRegistry::new();
    retriever::register_builtins(&mut registry, cfg)?;
    Ok(Arc::new(RetrieverFactory::initialize(registry, cfg.clone())))
}

fn print_engines(factory: &RetrieverFactory) {
    let available = factory.available();
    if available.is_empty() {
        println!("No engines available.");
    } else {
        println!("{:<12} {:<10} {:<10} DESCRIPTION", "ENGINE", "SOURCE", "HEALTH");
        for retriever in &available {
            let stats = retriever.stats();
            println!(
                "{:<12} {:<10} {:<10} {}",
                retriever.engine_id(),
                retriever.source_type(),
                stats.health().as_str(),
                retriever.description()
            );
        }
    }
    let failed = factory.failed();
    if !failed.is_empty() {
        println!();
        for (source_type, reason) in failed {
            println!("FAILED {:<10} {}", source_type, reason);
        }
    }
}

fn print_stage(snapshot: &TaskSnapshot) {
    let mut line = format!("  [{}]", snapshot.status);
    if let Some(count) = snapshot.retrieved_count {
        line.push_str(&format!(" retrieved={}", count));
    }
    if let Some(count) = snapshot.relevant_count {
        line.push_str(&format!(" relevant={}", count));
    }
    println!("{}", line);
}
