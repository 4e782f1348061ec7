use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineSettings;

/// Application-level constants
pub const APP_NAME: &str = "chartcode";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "CHARTCODE_";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "medgemma:latest";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_RETRIES: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: \"{value}\"")]
    InvalidValue { key: String, value: String },
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "chartcode=info,warn"
}

/// Get the application data directory (~/.chartcode/).
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chartcode")
}

/// Get the models directory (for ONNX embeddings and cross-encoder)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

/// Get the cross-encoder model directory (ms-marco-MiniLM-L-6-v2)
pub fn cross_encoder_model_dir() -> PathBuf {
    models_dir().join("ms-marco-MiniLM-L-6-v2")
}

/// Runtime configuration: defaults, then `CHARTCODE_*` environment
/// overrides, then command-line flags (applied by the binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub request_timeout_secs: u64,
    pub top_k: usize,
    pub max_retries: usize,
    pub use_cross_encoder: bool,
    pub embedding_model_dir: PathBuf,
    pub cross_encoder_model_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            top_k: DEFAULT_TOP_K,
            max_retries: DEFAULT_MAX_RETRIES,
            use_cross_encoder: false,
            embedding_model_dir: embedding_model_dir(),
            cross_encoder_model_dir: cross_encoder_model_dir(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `CHARTCODE_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        let mut config = Self::default();

        if let Some((_, url)) = get("OLLAMA_URL") {
            config.ollama_url = url;
        }
        if let Some((_, model)) = get("MODEL") {
            config.model_name = model;
        }
        if let Some((key, value)) = get("TIMEOUT_SECS") {
            config.request_timeout_secs = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("TOP_K") {
            config.top_k = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("MAX_RETRIES") {
            config.max_retries = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("CROSS_ENCODER") {
            config.use_cross_encoder = parse_flag(&key, &value)?;
        }
        if let Some((_, dir)) = get("EMBEDDING_MODEL_DIR") {
            config.embedding_model_dir = PathBuf::from(dir);
        }
        if let Some((_, dir)) = get("CROSS_ENCODER_DIR") {
            config.cross_encoder_model_dir = PathBuf::from(dir);
        }

        if config.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}TOP_K"),
                value: "0".into(),
            });
        }

        Ok(config)
    }

    /// Settings handed to the pipeline context.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            model_name: self.model_name.clone(),
            top_k: self.top_k,
            max_retries: self.max_retries,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
