use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Documents longer than this are split before insight extraction.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_chunk_threshold() -> usize {
    6000
}
fn default_chunk_size() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Allow-list of engine ids. Empty means every registered engine is permitted.
    #[serde(default)]
    pub enabled_engines: Vec<String>,
    /// Which web engine the default registration installs.
    #[serde(default = "default_web_engine")]
    pub web_engine: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_search_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,
    /// Per-engine settings, keyed by engine id (`[search.engines.newsapi]` etc.).
    #[serde(default)]
    pub engines: HashMap<String, EngineConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled_engines: Vec::new(),
            web_engine: default_web_engine(),
            max_results: default_max_results(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_retries: default_search_max_retries(),
            min_quality_score: default_min_quality_score(),
            engines: HashMap::new(),
        }
    }
}

fn default_web_engine() -> String {
    "duckduckgo".to_string()
}
fn default_max_results() -> usize {
    8
}
fn default_cache_ttl_secs() -> u64 {
    600
}
fn default_search_max_retries() -> u32 {
    2
}
fn default_min_quality_score() -> f64 {
    0.3
}

/// Settings for one search engine. Fields not used by a given engine are
/// simply ignored by it; each engine declares which keys it requires.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Google Custom Search engine id.
    #[serde(default)]
    pub cx: Option<String>,
    /// News lookback window in days.
    #[serde(default = "default_days_range")]
    pub days_range: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            cx: None,
            days_range: default_days_range(),
            rate_limit_per_minute: default_rate_limit(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_days_range() -> u32 {
    30
}
fn default_rate_limit() -> usize {
    60
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl EngineConfig {
    /// Look up a named setting as a string. Used to build cache keys from
    /// the subset of settings an engine declares as relevant.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "api_key" => self.api_key.clone(),
            "cx" => self.cx.clone(),
            "days_range" => Some(self.days_range.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_content_length: default_max_content_length(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_max_content_length() -> usize {
    6000
}
fn default_max_concurrent_fetches() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// `markdown` or `html`.
    #[serde(default = "default_output_format")]
    pub default_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            default_format: default_output_format(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}
fn default_output_format() -> String {
    "markdown".to_string()
}

impl Config {
    /// A default configuration for tests and credential-free usage.
    pub fn minimal() -> Self {
        Self {
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            content: ContentConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Settings for one engine, falling back to defaults when the config
    /// file has no section for it.
    pub fn engine(&self, id: &str) -> EngineConfig {
        self.search.engines.get(id).cloned().unwrap_or_default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate search
    if !(0.0..=1.0).contains(&config.search.min_quality_score) {
        anyhow::bail!("search.min_quality_score must be in [0.0, 1.0]");
    }

    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be > 0");
    }

    match config.search.web_engine.as_str() {
        "duckduckgo" | "google" | "serper" => {}
        other => anyhow::bail!(
            "Unknown web engine: '{}'. Must be duckduckgo, google, or serper.",
            other
        ),
    }

    for (id, engine) in &config.search.engines {
        if engine.rate_limit_per_minute == 0 {
            anyhow::bail!("search.engines.{}.rate_limit_per_minute must be > 0", id);
        }
    }

    // Validate output
    match config.output.default_format.as_str() {
        "markdown" | "html" => {}
        other => anyhow::bail!(
            "Unknown output format: '{}'. Must be markdown or html.",
            other
        ),
    }

    // Validate llm
    if config.llm.chunk_size == 0 {
        anyhow::bail!("llm.chunk_size must be > 0");
    }

    Ok(config)
}
