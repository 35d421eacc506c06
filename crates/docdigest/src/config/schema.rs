use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub output_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_queue_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_queue_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_queue_backoff_base_ms() -> u64 {
    1000
}

fn default_queue_backoff_max_ms() -> u64 {
    60_000
}

fn default_lease_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_queue_backoff_base_ms(),
            backoff_max_ms: default_queue_backoff_max_ms(),
            lease_timeout_secs: default_lease_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Native text shorter than this (after trimming) is treated as image-only.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

fn default_min_text_chars() -> usize {
    20
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            dpi: default_dpi(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_max_chunk_chars() -> usize {
    4000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// `{model}` is substituted with [`SummarizationConfig::model`].
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_summarize_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_summarize_backoff_base_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    4
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    5500
}

impl SummarizationConfig {
    /// The endpoint with the model name filled in.
    pub fn resolved_endpoint(&self) -> String {
        self.endpoint.replace("{model}", &self.model)
    }
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_file: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_summarize_backoff_base_ms(),
            concurrency: default_concurrency(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// How long terminal progress records stay queryable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}
