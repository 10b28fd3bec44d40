use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub batch: BatchConfig,
}

/// Object store backend selection.
///
/// Exactly one backend is active: a local root directory, or an S3 bucket
/// when `[store.s3]` is present.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root directory for the filesystem backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub s3: Option<S3StoreConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Base URL of the OpenAI-compatible service.
    pub endpoint: String,
    /// Model / deployment name placed in each request body.
    pub model: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Provider completion window in hours. Fixed per deployment, not
    /// per call.
    #[serde(default = "default_completion_window_hours")]
    pub completion_window_hours: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2025-04-01-preview".to_string()
}
fn default_max_completion_tokens() -> u32 {
    1000
}
fn default_temperature() -> f64 {
    0.3
}
fn default_completion_window_hours() -> u32 {
    24
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

impl BatchConfig {
    /// Completion window in the provider's string form (e.g. `"24h"`).
    pub fn completion_window(&self) -> String {
        format!("{}h", self.completion_window_hours)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!(
            "chunking.overlap_tokens ({}) must be strictly less than chunking.max_tokens ({})",
            config.chunking.overlap_tokens,
            config.chunking.max_tokens
        );
    }

    // Validate store backend selection
    match (&config.store.root, &config.store.s3) {
        (None, None) => anyhow::bail!("store requires either 'root' or an [store.s3] section"),
        (Some(_), Some(_)) => {
            anyhow::bail!("store.root and store.s3 are mutually exclusive")
        }
        _ => {}
    }

    // Validate batch settings
    if config.batch.endpoint.trim().is_empty() {
        anyhow::bail!("batch.endpoint must not be empty");
    }
    if config.batch.model.trim().is_empty() {
        anyhow::bail!("batch.model must not be empty");
    }
    if config.batch.completion_window_hours == 0 {
        anyhow::bail!("batch.completion_window_hours must be > 0");
    }
    if !(0.0..=2.0).contains(&config.batch.temperature) {
        anyhow::bail!("batch.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const VALID: &str = r#"
[store]
root = "/tmp/docbatch-test"

[chunking]
max_tokens = 100000
overlap_tokens = 5000

[batch]
endpoint = "https://example.openai.azure.com"
model = "gpt-4o-2"
"#;

    #[test]
    fn test_valid_config_loads_with_defaults() {
        let f = write_config(VALID);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.max_tokens, 100000);
        assert_eq!(config.batch.completion_window(), "24h");
        assert_eq!(config.batch.max_completion_tokens, 1000);
        assert!((config.batch.temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overlap_must_be_less_than_max() {
        let f = write_config(&VALID.replace("overlap_tokens = 5000", "overlap_tokens = 100000"));
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("strictly less"));
    }

    #[test]
    fn test_store_backend_required() {
        let f = write_config(&VALID.replace("root = \"/tmp/docbatch-test\"", ""));
        assert!(load_config(f.path()).is_err());
    }
}
