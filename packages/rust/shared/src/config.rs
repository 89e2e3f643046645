//! Application configuration for Leadflow.
//!
//! User config lives at `~/.leadflow/leadflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadflow";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "leadflow.db";

// ---------------------------------------------------------------------------
// Config structs (matching leadflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline tunables.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Rotation lists.
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Search API settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Page fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum leads selected per run.
    #[serde(default = "default_daily_lead_target")]
    pub daily_lead_target: usize,

    /// Desired size of the scored candidate pool.
    #[serde(default = "default_candidate_target")]
    pub candidate_target: usize,

    /// Search recency window in days.
    #[serde(default = "default_recency_days")]
    pub recency_days: u32,

    /// Days a selected lead is excluded from re-selection.
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: u32,

    /// Outreach tones, cycled round-robin.
    #[serde(default = "default_tones")]
    pub tones: Vec<String>,

    /// Maximum search queries per run.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Results requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    /// Maximum unique URLs fetched per run.
    #[serde(default = "default_max_fetch_urls")]
    pub max_fetch_urls: usize,

    /// Pages with less extracted text than this are treated as non-articles.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// How many top selected leads seed colleague discovery.
    #[serde(default = "default_colleague_seed_count")]
    pub colleague_seed_count: usize,

    /// Delay between consecutive third-party calls.
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,

    /// Database path. Defaults to `~/.leadflow/leadflow.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            daily_lead_target: default_daily_lead_target(),
            candidate_target: default_candidate_target(),
            recency_days: default_recency_days(),
            cooldown_days: default_cooldown_days(),
            tones: default_tones(),
            max_queries: default_max_queries(),
            results_per_query: default_results_per_query(),
            max_fetch_urls: default_max_fetch_urls(),
            min_text_len: default_min_text_len(),
            colleague_seed_count: default_colleague_seed_count(),
            call_delay_ms: default_call_delay_ms(),
            database_path: None,
        }
    }
}

fn default_daily_lead_target() -> usize {
    10
}
fn default_candidate_target() -> usize {
    30
}
fn default_recency_days() -> u32 {
    7
}
fn default_cooldown_days() -> u32 {
    90
}
fn default_tones() -> Vec<String> {
    vec![
        "congratulatory".into(),
        "value_first".into(),
        "peer_credibility".into(),
        "direct_curious".into(),
    ]
}
fn default_max_queries() -> usize {
    15
}
fn default_results_per_query() -> usize {
    10
}
fn default_max_fetch_urls() -> usize {
    30
}
fn default_min_text_len() -> usize {
    500
}
fn default_colleague_seed_count() -> usize {
    3
}
fn default_call_delay_ms() -> u64 {
    300
}

/// A geography and the spellings used to search for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// `[rotation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub geos: Vec<GeoEntry>,

    #[serde(default)]
    pub triggers: Vec<String>,

    /// Optional; when empty, runs have no industry focus.
    #[serde(default)]
    pub industries: Vec<String>,

    /// Manual (random) runs disable the cooldown window so previously
    /// contacted leads can be re-evaluated.
    #[serde(default = "default_true")]
    pub manual_ignores_cooldown: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            geos: Vec::new(),
            triggers: Vec::new(),
            industries: Vec::new(),
            manual_ignores_cooldown: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-credentials auth for gateways that issue short-lived tokens.
    /// Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            timeout_secs: default_llm_timeout_secs(),
            oauth: None,
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// `[llm.oauth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    /// Name of the env var holding the client secret.
    pub client_secret_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Responses larger than this are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_body_bytes() -> u64 {
    5 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadflow/leadflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path: configured value or `~/.leadflow/leadflow.db`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.pipeline.database_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadflowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        LeadflowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var, failing if unset or empty.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(LeadflowError::config(format!(
            "{var_name} is not set. Export it before running the pipeline."
        ))),
    }
}

/// Check that every secret the pipeline needs is present.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    read_secret(&config.search.api_key_env)?;
    match &config.llm.oauth {
        Some(oauth) => read_secret(&oauth.client_secret_env)?,
        None => read_secret(&config.llm.api_key_env)?,
    };
    Ok(())
}
