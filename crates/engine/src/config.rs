use std::path::{Path, PathBuf};

use devdocs_common::config::SystemConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Load and validate system.toml. The engine refuses to start on a
/// configuration that fails validation.
pub fn load_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    tracing::info!(path = %path.display(), "Loading configuration");

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    validate(&config)?;

    tracing::info!("Configuration loaded successfully");
    Ok(config)
}

/// Check sane ranges on numeric parameters.
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.safety.max_workflow_iterations == 0 {
        errors.push("safety.max_workflow_iterations must be > 0".into());
    }
    if config.safety.max_prompt_chars == 0 {
        errors.push("safety.max_prompt_chars must be > 0".into());
    }
    if config.safety.request_timeout_seconds == 0 {
        errors.push("safety.request_timeout_seconds must be > 0".into());
    }

    if config.embeddings.dimensions == 0 {
        errors.push("embeddings.dimensions must be > 0".into());
    }
    if config.embeddings.batch_size == 0 {
        errors.push("embeddings.batch_size must be > 0".into());
    }

    if !(0.0..=1.0).contains(&config.search.min_score) {
        errors.push("search.min_score must be between 0.0 and 1.0".into());
    }
    if !(0.0..=1.0).contains(&config.search.self_correction_threshold) {
        errors.push("search.self_correction_threshold must be between 0.0 and 1.0".into());
    }
    if config.search.top_k == 0 {
        errors.push("search.top_k must be > 0".into());
    }

    if !(0.0..=1.0).contains(&config.cache.similarity_threshold) {
        errors.push("cache.similarity_threshold must be between 0.0 and 1.0".into());
    }
    if config.cache.semantic_ttl_seconds == 0 {
        errors.push("cache.semantic_ttl_seconds must be > 0".into());
    }
    if config.cache.tool_ttl_seconds == 0 {
        errors.push("cache.tool_ttl_seconds must be > 0".into());
    }

    if config.store.max_connections == 0 {
        errors.push("store.max_connections must be > 0".into());
    }
    if config.store.min_connections > config.store.max_connections {
        errors.push("store.min_connections must be <= store.max_connections".into());
    }

    for (name, retry) in [
        ("llm_api", &config.retry.llm_api),
        ("databases", &config.retry.databases),
        ("http_tools", &config.retry.http_tools),
    ] {
        if retry.max_attempts == 0 {
            errors.push(format!("retry.{}.max_attempts must be > 0", name));
        }
        if retry.min_wait_ms > retry.max_wait_ms {
            errors.push(format!("retry.{}.min_wait_ms must be <= max_wait_ms", name));
        }
    }

    for (name, breaker) in [
        ("postgres", &config.breakers.postgres),
        ("redis", &config.breakers.redis),
        ("llm_api", &config.breakers.llm_api),
    ] {
        if breaker.failure_threshold == 0 {
            errors.push(format!("breakers.{}.failure_threshold must be > 0", name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}
