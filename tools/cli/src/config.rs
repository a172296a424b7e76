//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use spanstore_chunking::DEFAULT_CHUNK_SIZE;
use spanstore_storage::AdapterConfig;

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

/// Contents of `config.json`.
///
/// ```json
/// {
///   "default_backend": "archive",
///   "chunk_size": 104857600,
///   "backends": {
///     "archive": { "provider_type": "local", "options": { "root": "/srv/spanstore" } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend used when `--backend` is not given.
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Preferred chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Check the aggregate checksum of chunked reads.
    #[serde(default = "default_true")]
    pub verify_total: bool,
    /// Named backend configurations.
    #[serde(default)]
    pub backends: BTreeMap<String, AdapterConfig>,
}

impl StoreConfig {
    /// `<config dir>/spanstore/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spanstore")
            .join("config.json")
    }

    /// Configuration used when no file exists: one `local` backend under
    /// the user data directory.
    pub fn fallback() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spanstore");
        let local = AdapterConfig::new("local").with_option("root", root.to_string_lossy().to_string());
        Self {
            default_backend: Some("local".to_string()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_total: true,
            backends: BTreeMap::from([("local".to_string(), local)]),
        }
    }

    /// Load from `path`, or fall back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::fallback());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a configuration document.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(raw)?;
        if config.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        Ok(config)
    }

    /// Configuration of backend `name`, or of the default backend.
    pub fn backend(&self, name: Option<&str>) -> Result<AdapterConfig> {
        let name = match name.or(self.default_backend.as_deref()) {
            Some(name) => name,
            None => match self.backends.keys().next() {
                Some(only) if self.backends.len() == 1 => only.as_str(),
                _ => anyhow::bail!("No backend selected; pass --backend or set default_backend"),
            },
        };
        self.backends
            .get(name)
            .cloned()
            .with_context(|| format!("Backend '{}' is not configured", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "default_backend": "archive",
        "chunk_size": 1048576,
        "backends": {
            "archive": { "provider_type": "local", "options": { "root": "/srv/spanstore" } },
            "scratch": { "provider_type": "memory", "max_object_size": 4096 }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = StoreConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.chunk_size, 1_048_576);
        assert!(config.verify_total);

        let archive = config.backend(None).unwrap();
        assert_eq!(archive.provider_type, "local");
        assert_eq!(archive.option_str("root"), Some("/srv/spanstore"));

        let scratch = config.backend(Some("scratch")).unwrap();
        assert_eq!(scratch.max_object_size, 4096);
    }

    #[test]
    fn test_unknown_backend() {
        let config = StoreConfig::parse(SAMPLE).unwrap();
        assert!(config.backend(Some("gdrive")).is_err());
    }

    #[test]
    fn test_single_backend_is_implicit_default() {
        let config = StoreConfig::parse(r#"{"backends":{"only":{"provider_type":"memory"}}}"#).unwrap();
        assert_eq!(config.backend(None).unwrap().provider_type, "memory");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(StoreConfig::parse(r#"{"chunk_size":0}"#).is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(config.backend(None).unwrap().provider_type, "local");
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap().backends.len(), 2);
    }
}
