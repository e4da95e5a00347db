//! Configuration loader and validator for the PIM synchronizer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub ingest: Ingest,
    pub provider: Provider,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Downstream ingestion service settings and data source mappings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingest {
    pub base_url: String,
    pub token: String,
    pub data_sources: DataSources,
}

/// Data source ids the ingestion service routes entities by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSources {
    pub categories: String,
    pub products: String,
    pub media: String,
}

/// Data-provider identity used to derive the per-tenant instance id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.ingest.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("ingest.base_url must be non-empty"));
    }
    if cfg.ingest.token.trim().is_empty() {
        return Err(ConfigError::Invalid("ingest.token must be non-empty"));
    }

    let ds = &cfg.ingest.data_sources;
    if ds.categories.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "ingest.data_sources.categories must be non-empty",
        ));
    }
    if ds.products.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "ingest.data_sources.products must be non-empty",
        ));
    }
    if ds.media.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "ingest.data_sources.media must be non-empty",
        ));
    }

    if cfg.provider.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("provider.client_id must be non-empty"));
    }
    if cfg.provider.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "provider.client_secret must be non-empty",
        ));
    }

    Ok(())
}

/// Example YAML document, also used as a fixture in tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

ingest:
  base_url: "https://ingest.example.com"
  token: "YOUR_INGEST_SERVICE_TOKEN"
  data_sources:
    categories: "pimcategories"
    products: "pimproducts"
    media: "pimmedia"

provider:
  client_id: "1f0a3c2e-7d44-4b7a-9b3e-5f6a8c9d0e1b"
  client_secret: "YOUR_DATA_PROVIDER_SECRET"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_ingest_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ingest.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("ingest.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ingest.token = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_data_source_ids() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ingest.data_sources.categories = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ingest.data_sources.products = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ingest.data_sources.media = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_provider_identity() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.provider.client_id = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("provider.client_id")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.ingest.data_sources.products, "pimproducts");
    }
}
