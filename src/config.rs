use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::parse_iso_date;

/// Run configuration, loaded from `sentisim.toml` with env-var fallbacks.
/// Every field has a default so a partial file is fine; credentials are
/// validated lazily at the call sites that need them (fail fast at startup,
/// not mid-run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    // LLM configuration (OpenAI-compatible: OpenAI, vLLM, LM Studio, etc.)
    #[serde(default = "default_api_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub llm_temperature: f32,

    // Embedding provider
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    // Product under simulation
    #[serde(default = "default_product_name")]
    pub product_name: String,

    // Paths
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_steam_ground_truth")]
    pub steam_ground_truth: String,
    #[serde(default = "default_stock_ground_truth")]
    pub stock_ground_truth: String,

    // Ingestion
    #[serde(default = "default_batch_size")]
    pub ingest_batch_size: usize,
    #[serde(default = "default_ingest_workers")]
    pub ingest_workers: usize,
    #[serde(default = "default_language")]
    pub review_language: String,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    // Simulation
    #[serde(default = "default_n_per_type")]
    pub n_per_type: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_sim_start")]
    pub sim_start_date: String,
    #[serde(default = "default_sim_end")]
    pub sim_end_date: String,
    #[serde(default = "default_sim_step_days")]
    pub sim_step_days: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_product_name() -> String {
    "Cyberpunk 2077".to_string()
}

fn default_store_path() -> String {
    "datasets/reviews.db".to_string()
}

fn default_cache_path() -> String {
    "datasets/query_cache.json".to_string()
}

fn default_output_dir() -> String {
    "results".to_string()
}

fn default_steam_ground_truth() -> String {
    "datasets/ground_truth_steam.csv".to_string()
}

fn default_stock_ground_truth() -> String {
    "datasets/ground_truth_stock.csv".to_string()
}

fn default_batch_size() -> usize {
    512
}

fn default_ingest_workers() -> usize {
    3
}

fn default_language() -> String {
    "english".to_string()
}

fn default_source_tag() -> String {
    "steam_reviews".to_string()
}

fn default_n_per_type() -> usize {
    13
}

fn default_max_concurrent() -> usize {
    100
}

fn default_top_k() -> usize {
    5
}

fn default_sim_start() -> String {
    "2020-12-10".to_string()
}

fn default_sim_end() -> String {
    "2021-12-09".to_string()
}

fn default_sim_step_days() -> u32 {
    7
}

impl Default for SimConfig {
    fn default() -> Self {
        // serde fills every field from its default fn
        toml::from_str("").expect("empty config parses with defaults")
    }
}

impl SimConfig {
    pub fn config_path() -> PathBuf {
        env::var("SENTISIM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("sentisim.toml"))
    }

    /// Load from the config file when present, falling back to defaults plus
    /// env vars. A file that exists but fails to parse is a configuration
    /// error: fail fast rather than simulate with silently wrong settings.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading config {:?}", path))?;
            let config: SimConfig = toml::from_str(&contents)
                .with_context(|| format!("parsing config {:?}", path))?;
            tracing::info!("loaded config from {:?}", path);
            config
        } else {
            tracing::warn!("no config file at {:?}, using defaults + env vars", path);
            SimConfig::default()
        };

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var("SENTISIM_LLM_API_URL") {
            config.llm_api_url = url;
        }
        if let Ok(model) = env::var("SENTISIM_LLM_MODEL") {
            config.llm_model = model;
        }

        Ok(config)
    }

    /// Credential check for commands that call external providers.
    pub fn require_api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(key) if !key.trim().is_empty() => Ok(key.clone()),
            _ => anyhow::bail!(
                "no API key configured: set OPENAI_API_KEY or api_key in {:?}",
                Self::config_path()
            ),
        }
    }

    /// Store existence check for commands that only read the collection.
    pub fn require_store(&self) -> Result<PathBuf> {
        let path = Path::new(&self.store_path);
        if !path.exists() {
            anyhow::bail!(
                "review store {:?} not found; run the ingest command first",
                path
            );
        }
        Ok(path.to_path_buf())
    }

    pub fn simulation_dates(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = parse_iso_date(&self.sim_start_date).context("sim_start_date")?;
        let end = parse_iso_date(&self.sim_end_date).context("sim_end_date")?;
        if end < start {
            anyhow::bail!(
                "sim_end_date {} precedes sim_start_date {}",
                self.sim_end_date,
                self.sim_start_date
            );
        }
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SimConfig::default();
        assert_eq!(config.ingest_batch_size, 512);
        assert_eq!(config.ingest_workers, 3);
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.top_k, 5);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: SimConfig =
            toml::from_str("llm_model = \"local-llama\"\nmax_concurrent = 8\n").unwrap();
        assert_eq!(config.llm_model, "local-llama");
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn missing_api_key_is_a_startup_error() {
        let config = SimConfig::default();
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let mut config = SimConfig::default();
        config.sim_start_date = "2021-06-01".to_string();
        config.sim_end_date = "2021-01-01".to_string();
        assert!(config.simulation_dates().is_err());
    }
}
