use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.output_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "output_directory must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than 0".to_string(),
        });
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "queue.max_attempts must be at least 1".to_string(),
        });
    }
    if queue.backoff_base_ms > queue.backoff_max_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "queue.backoff_base_ms ({}) exceeds queue.backoff_max_ms ({})",
                queue.backoff_base_ms, queue.backoff_max_ms
            ),
        });
    }
    if queue.lease_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "queue.lease_timeout_secs must be greater than 0".to_string(),
        });
    }

    if config.chunking.max_chunk_chars == 0 {
        return Err(ConfigError::Validation {
            message: "chunking.max_chunk_chars must be greater than 0".to_string(),
        });
    }

    if config.ocr.languages.is_empty() {
        return Err(ConfigError::Validation {
            message: "ocr.languages must list at least one language".to_string(),
        });
    }

    let summarization = &config.summarization;
    if summarization.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "summarization.concurrency must be greater than 0".to_string(),
        });
    }
    if summarization.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "summarization.max_attempts must be at least 1".to_string(),
        });
    }
    if !summarization.endpoint.starts_with("http://")
        && !summarization.endpoint.starts_with("https://")
    {
        return Err(ConfigError::Validation {
            message: format!(
                "summarization.endpoint must be an http(s) URL, got '{}'",
                crate::sanitize::redact_endpoint(&summarization.endpoint)
            ),
        });
    }

    Ok(())
}
