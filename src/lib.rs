//! # DeepScout
//!
//! An automated deep-research engine.
//!
//! DeepScout turns a research question into a structured report: it plans
//! searches with an LLM, fans them out across pluggable search engines
//! (web, news, academic), fetches and filters the results, extracts
//! per-source insights, synthesizes them per sub-topic, and writes a
//! Markdown or HTML report with verified references.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │ Analyzer │──▶│ Orchestrator   │──▶│ Processor   │
//! │ plan     │   │ fan-out+dedup │   │ fetch+judge │
//! └──────────┘   └──────┬────────┘   └──────┬──────┘
//!                       │                   │
//!               ┌───────▼────────┐   ┌──────▼──────┐
//!               │ Factory        │   │ Synthesis   │
//!               │ Managed        │   │ insights +  │
//!               │ retrievers     │   │ sub-topics  │
//!               │ cache/rate/    │   └──────┬──────┘
//!               │ retry/filter   │          ▼
//!               └───────┬────────┘   ┌─────────────┐
//!                       │            │ Report      │
//!               ┌───────▼────────┐   │ md / html   │
//!               │ Engines        │   └─────────────┘
//!               │ ddg google     │
//!               │ serper newsapi │
//!               │ arxiv          │
//!               └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scout engines                          # list configured engines
//! scout research "state of fusion energy"
//! scout status <task-id>                 # inspect a task
//! scout cleanup <task-id>                # cancel / discard a task
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the task state machine |
//! | [`retriever`] | Backend trait and registry |
//! | [`managed`] | Cache, rate limiting, retries, quality filtering |
//! | [`factory`] | Builds managed retrievers from config |
//! | [`orchestrator`] | Concurrent multi-engine retrieval |
//! | [`extract`] | Web content extraction |
//! | [`processor`] | Relevance assessment |
//! | [`analyzer`] | Query analysis and search planning |
//! | [`synthesis`] | Insight extraction and sub-topic synthesis |
//! | [`report`] | Report generation and rendering |
//! | [`task`] | Task lifecycle management |

pub mod analyzer;
pub mod config;
pub mod engine_arxiv;
pub mod engine_duckduckgo;
pub mod engine_google;
pub mod engine_newsapi;
pub mod engine_serper;
pub mod extract;
pub mod factory;
pub mod llm;
pub mod managed;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod report;
pub mod retriever;
pub mod scoring;
pub mod synthesis;
pub mod task;
