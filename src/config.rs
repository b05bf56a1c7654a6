use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::Mode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            max_retries: 0,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub default_model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            default_model: default_completion_model(),
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    120
}

/// Mode-specific retrieval profiles.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "RetrievalProfile::memory")]
    pub memory: RetrievalProfile,
    #[serde(default = "RetrievalProfile::knowledge")]
    pub knowledge: RetrievalProfile,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            memory: RetrievalProfile::memory(),
            knowledge: RetrievalProfile::knowledge(),
        }
    }
}

impl RetrievalConfig {
    pub fn profile(&self, mode: Mode) -> &RetrievalProfile {
        match mode {
            Mode::Memory => &self.memory,
            Mode::Knowledge => &self.knowledge,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrievalProfile {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    pub match_count: usize,
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
}

impl RetrievalProfile {
    pub fn memory() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: 10,
            min_content_length: default_min_content_length(),
        }
    }

    pub fn knowledge() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: 3,
            min_content_length: default_min_content_length(),
        }
    }
}

fn default_match_threshold() -> f32 {
    0.78
}
fn default_min_content_length() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// `"combined"` (single user message) or `"separated"` (system + user).
    #[serde(default = "default_layout")]
    pub layout: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
        }
    }
}

fn default_layout() -> String {
    "combined".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokensConfig {
    /// `"estimate"` or `"fixed"`.
    #[serde(default = "default_accounting")]
    pub accounting: String,
    #[serde(default = "default_fixed_count")]
    pub fixed_count: i64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            accounting: default_accounting(),
            fixed_count: default_fixed_count(),
        }
    }
}

fn default_accounting() -> String {
    "estimate".to_string()
}
fn default_fixed_count() -> i64 {
    123
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// `"hmac"` or `"static"`.
    #[serde(default = "default_auth_mode")]
    pub mode: String,
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Static bearer token → subject id map.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            secret_env: default_secret_env(),
            tokens: HashMap::new(),
        }
    }
}

fn default_auth_mode() -> String {
    "hmac".to_string()
}
fn default_secret_env() -> String {
    "CHX_AUTH_SECRET".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_max_words() -> usize {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    for (name, profile) in [
        ("memory", &config.retrieval.memory),
        ("knowledge", &config.retrieval.knowledge),
    ] {
        if !(0.0..=1.0).contains(&profile.match_threshold) {
            anyhow::bail!("retrieval.{}.match_threshold must be in [0.0, 1.0]", name);
        }
        if profile.match_count < 1 {
            anyhow::bail!("retrieval.{}.match_count must be >= 1", name);
        }
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.completion.default_model.trim().is_empty() {
        anyhow::bail!("completion.default_model must not be empty");
    }

    match config.prompt.layout.as_str() {
        "combined" | "separated" => {}
        other => anyhow::bail!(
            "Unknown prompt layout: '{}'. Must be combined or separated.",
            other
        ),
    }

    match config.tokens.accounting.as_str() {
        "estimate" | "fixed" => {}
        other => anyhow::bail!(
            "Unknown token accounting: '{}'. Must be estimate or fixed.",
            other
        ),
    }

    match config.auth.mode.as_str() {
        "hmac" | "static" => {}
        other => anyhow::bail!("Unknown auth mode: '{}'. Must be hmac or static.", other),
    }

    if let Some(ingest) = &config.ingest {
        if ingest.max_words == 0 {
            anyhow::bail!("ingest.max_words must be > 0");
        }
    }

    Ok(())
}
