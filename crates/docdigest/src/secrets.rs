//! Secret resolution for provider credentials.
//!
//! A secret may be configured three ways, checked in this order:
//!
//! 1. **Direct value** - for quick local runs (`"api_key": "..."`)
//! 2. **File reference** - Docker secrets style (`"api_key_file": "/run/secrets/gemini"`)
//! 3. **Env var reference** - (`"api_key_env": "GEMINI_API_KEY"`)

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first configured, non-empty source.
///
/// File contents and env values are trimmed; a source that resolves to an
/// empty string is an error rather than a silent fallthrough.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(content.trim(), || format!("file '{}'", expanded));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => non_empty(value.trim(), || format!("env var '{}'", name)),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

fn non_empty(value: &str, origin: impl FnOnce() -> String) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty { origin: origin() });
    }
    Ok(SecretString::from(value.to_string()))
}

/// Like [`resolve_secret`], but `Ok(None)` when nothing is configured.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
