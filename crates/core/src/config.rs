//! Configuration management for ZK GPS.
//!
//! Every section has serde defaults, so a config file only needs to name
//! the values it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub circuits: CircuitConfig,
    pub pipeline: PipelineConfig,
    pub requests: RequestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file (ignored by the memory backend)
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitBackendKind {
    /// External `snarkjs` binary over compiled circuit artifacts
    Snarkjs,
    /// In-process circuit emulation (testing and local development only)
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub backend: CircuitBackendKind,
    /// Directory holding `<circuit>.wasm`, `<circuit>_final.zkey`, `<circuit>_vkey.json`
    pub artifacts_dir: PathBuf,
    pub snarkjs_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on a single proving call before it is marked failed
    pub proving_timeout_ms: u64,
    /// Bypass the per-request proof cache (debugging only)
    pub force_regenerate: bool,
    /// Attach the circuit input to proving failures for trusted callers
    pub expose_debug_input: bool,
    /// Allow at most one concurrent proving call per (user, request, proof type)
    pub serialize_per_request: bool,
    /// Age threshold enforced by the age circuit
    pub min_age: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub default_radius_km: f64,
    pub list_limit: usize,
    pub max_duration_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("data/zkgps.db"),
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            backend: CircuitBackendKind::Snarkjs,
            artifacts_dir: PathBuf::from("public/circuits"),
            snarkjs_bin: "snarkjs".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proving_timeout_ms: 60_000,
            force_regenerate: false,
            expose_debug_input: false,
            serialize_per_request: true,
            min_age: 18,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_radius_km: 10.0,
            list_limit: 50,
            max_duration_seconds: 86_400,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CoreError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject settings no component can operate with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.proving_timeout_ms == 0 {
            return Err(CoreError::Config(
                "pipeline.proving_timeout_ms must be positive".to_string(),
            ));
        }
        if !self.requests.default_radius_km.is_finite() || self.requests.default_radius_km <= 0.0
        {
            return Err(CoreError::Config(format!(
                "requests.default_radius_km must be positive, got {}",
                self.requests.default_radius_km
            )));
        }
        if self.requests.max_duration_seconds <= 0 {
            return Err(CoreError::Config(
                "requests.max_duration_seconds must be positive".to_string(),
            ));
        }
        if self.circuits.backend == CircuitBackendKind::Snarkjs
            && self.circuits.artifacts_dir.as_os_str().is_empty()
        {
            return Err(CoreError::Config(
                "circuits.artifacts_dir is required for the snarkjs backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.min_age, 18);
        assert_eq!(config.requests.default_radius_km, 10.0);
        assert!(config.pipeline.serialize_per_request);
        assert!(!config.pipeline.force_regenerate);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "sqlite"
            path = "/tmp/zkgps.db"

            [pipeline]
            proving_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.pipeline.proving_timeout_ms, 5000);
        assert_eq!(config.pipeline.min_age, 18);
        assert_eq!(config.circuits.backend, CircuitBackendKind::Snarkjs);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default_config();
        config.pipeline.proving_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_radius() {
        let mut config = Config::default_config();
        config.requests.default_radius_km = 0.0;
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/zkgps.toml");
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}
