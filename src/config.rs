//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::fetcher::RetryPolicy;
use crate::normalizer::CleanOptions;
use crate::pipeline::AssistantSettings;

/// Command-line interface for the knowledge-base assistant.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "confqa",
    about = "Ask questions against a Confluence knowledge base"
)]
pub struct Cli {
    /// Question to ask; omit to only manage embeddings
    pub question: Option<String>,

    /// Force regeneration of embeddings regardless of staleness
    #[arg(long, default_value_t = false)]
    pub force_refresh: bool,

    /// Re-embed every space in the wiki, ignoring the configured space list
    #[arg(long, default_value_t = false)]
    pub full_rebuild: bool,

    /// Confluence REST API base URL
    #[arg(long, env = "CONFQA_BASE_URL")]
    pub base_url: String,

    /// Confluence account used for basic auth
    #[arg(long, env = "CONFLUENCE_USER")]
    pub confluence_user: String,

    /// Confluence API token used for basic auth
    #[arg(long, env = "CONFLUENCE_API_TOKEN", hide_env_values = true)]
    pub confluence_api_token: String,

    /// Space keys to index, comma separated (empty = every visible space)
    #[arg(long, env = "CONFQA_SPACES", default_value = "")]
    pub spaces: String,

    /// Retries after the initial attempt on transient wiki failures
    #[arg(long, env = "CONFQA_MAX_RETRIES", default_value_t = 4)]
    pub max_retries: usize,

    /// Seed backoff delay in milliseconds
    #[arg(long, env = "CONFQA_RETRY_DELAY_MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    /// Backoff delay ceiling in milliseconds
    #[arg(long, env = "CONFQA_MAX_RETRY_DELAY_MS", default_value_t = 30000)]
    pub max_retry_delay_ms: u64,

    /// Jitter multiplier range applied to backoff sleeps, as "low,high"
    #[arg(long, env = "CONFQA_JITTER_RANGE", default_value = "0.7,1.3")]
    pub jitter_range: String,

    /// Results requested per wiki listing page
    #[arg(long, env = "CONFQA_PAGE_LIMIT", default_value_t = 50)]
    pub page_limit: usize,

    /// Seconds before an individual wiki request times out
    #[arg(long, env = "CONFQA_FETCH_TIMEOUT_SECS", default_value_t = 60)]
    pub fetch_timeout_secs: u64,

    /// Concurrent page-content fetches
    #[arg(long, env = "CONFQA_FETCH_CONCURRENCY", default_value_t = 5)]
    pub fetch_concurrency: usize,

    /// Candidates returned per retrieval query
    #[arg(long, env = "CONFQA_TOP_K", default_value_t = 8)]
    pub top_k: usize,

    /// Days before the embeddings snapshot counts as stale
    #[arg(long, env = "CONFQA_STALE_AFTER_DAYS", default_value_t = 7)]
    pub stale_after_days: u64,

    /// Embeddings snapshot path
    #[arg(long, env = "CONFQA_EMBEDDINGS_FILE", default_value = "embeddings.json")]
    pub embeddings_file: PathBuf,

    /// Last-refresh timestamp path
    #[arg(long, env = "CONFQA_TIMESTAMP_FILE", default_value = "last_update.txt")]
    pub timestamp_file: PathBuf,

    /// Embedding backend
    #[arg(long, env = "CONFQA_EMBEDDER", default_value = "openai")]
    pub embedder: EmbedderArg,

    /// API key for the OpenAI-compatible embedding and chat endpoints
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Embedding model identifier
    #[arg(
        long,
        env = "CONFQA_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embed_model: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "CONFQA_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Max texts per embedding request
    #[arg(long, env = "CONFQA_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Seconds before an embedding request times out
    #[arg(long, env = "CONFQA_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Retries for rate-limited or transient embedding errors
    #[arg(long, env = "CONFQA_EMBED_MAX_RETRIES", default_value_t = 5)]
    pub embed_max_retries: usize,

    /// Optional dimension override when the embedding model supports one
    #[arg(long, env = "CONFQA_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Vector dimension for the hashing embedder
    #[arg(long, env = "CONFQA_HASH_DIMENSIONS", default_value_t = 384)]
    pub hash_dimensions: usize,

    /// Chat model used to synthesize answers
    #[arg(long, env = "CONFQA_CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    pub chat_model: String,

    /// Sampling temperature for the answer model
    #[arg(long, env = "CONFQA_CHAT_TEMPERATURE", default_value_t = 0.5)]
    pub chat_temperature: f32,

    /// Seconds before a chat request times out
    #[arg(long, env = "CONFQA_CHAT_TIMEOUT_SECS", default_value_t = 60)]
    pub chat_timeout_secs: u64,

    /// Keep table text when cleaning pages instead of dropping it
    #[arg(long, env = "CONFQA_KEEP_TABLES", default_value_t = false)]
    pub keep_tables: bool,
}

/// Embedding backend selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedderArg {
    /// OpenAI-compatible hosted embeddings endpoint (default).
    Openai,
    /// Deterministic local feature-hashing embedder; no network required.
    Hashing,
}

impl Cli {
    /// Converts the retry flags into a `RetryPolicy`.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let (low, high) = self
            .jitter_range
            .split_once(',')
            .context("jitter range must look like \"0.7,1.3\"")?;
        let low: f64 = low.trim().parse().context("invalid jitter lower bound")?;
        let high: f64 = high.trim().parse().context("invalid jitter upper bound")?;
        anyhow::ensure!(
            low > 0.0 && high >= low,
            "jitter range must satisfy 0 < low <= high"
        );
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            jitter: (low, high),
        })
    }

    /// Parsed space allowlist; empty means every visible space.
    pub fn spaces_vec(&self) -> Vec<String> {
        self.spaces
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Staleness TTL for the embeddings snapshot.
    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_after_days * 24 * 60 * 60)
    }

    /// Per-request wiki fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Assembles the workflow settings.
    pub fn assistant_settings(&self) -> AssistantSettings {
        AssistantSettings {
            spaces: self.spaces_vec(),
            top_k: self.top_k.max(1),
            fetch_concurrency: self.fetch_concurrency.max(1),
            clean: CleanOptions {
                keep_tables: self.keep_tables,
            },
        }
    }
}
