//! Configuration Management
//!
//! Handles persistent configuration storage for resgraph. Values given on
//! the command line win over the file, the file wins over built-in
//! defaults.

use crate::error::ConfigError;
use crate::loader::{LoaderEndpoint, DEFAULT_POLL_INTERVAL};
use crate::pipeline::DEFAULT_STAGE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on waiting for a bulk load.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Local directory acting as the staging bucket
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// URI under which the graph database sees the staging directory
    /// (e.g. `s3://co-resource-ingestion-bucket-dev`)
    #[serde(default)]
    pub staging_uri_prefix: Option<String>,
    /// Stage prefix for raw snapshots
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Base URL of the resource description service
    #[serde(default)]
    pub describer_url: Option<String>,
    /// Loader endpoints, writer first
    #[serde(default)]
    pub loader_endpoints: Vec<String>,
    /// Role the graph database assumes to read staged files
    #[serde(default)]
    pub loader_role_arn: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
    /// Extra mapping definition files
    #[serde(default)]
    pub mapping_files: Vec<PathBuf>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("resgraph").join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from disk, falling back to defaults when the file
    /// is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)?;

        Ok(())
    }

    /// Get effective staging directory (CLI > config > ./staging)
    pub fn effective_staging_dir(&self, cli: Option<&Path>) -> PathBuf {
        cli.map(Path::to_path_buf)
            .or_else(|| self.staging_dir.clone())
            .unwrap_or_else(|| PathBuf::from("staging"))
    }

    /// Get effective snapshot stage (CLI > config > "raw")
    pub fn effective_stage(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.stage.clone())
            .unwrap_or_else(|| DEFAULT_STAGE.to_string())
    }

    /// Get effective region (CLI > config > us-east-1)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Get effective describer URL (CLI > config)
    pub fn effective_describer_url(&self, cli: Option<&str>) -> Result<String, ConfigError> {
        cli.map(str::to_string)
            .or_else(|| self.describer_url.clone())
            .ok_or_else(|| missing("describer_url"))
    }

    /// Get effective loader role (CLI > config)
    pub fn effective_loader_role(&self, cli: Option<&str>) -> Result<String, ConfigError> {
        cli.map(str::to_string)
            .or_else(|| self.loader_role_arn.clone())
            .ok_or_else(|| missing("loader_role_arn"))
    }

    /// Get effective loader endpoints (CLI, if any, else config)
    pub fn effective_endpoints(&self, cli: &[String]) -> Result<Vec<LoaderEndpoint>, ConfigError> {
        let raw = if cli.is_empty() {
            &self.loader_endpoints
        } else {
            cli
        };
        if raw.is_empty() {
            return Err(missing("loader_endpoints"));
        }
        raw.iter().map(|e| LoaderEndpoint::parse(e)).collect()
    }

    /// Get effective poll interval, never below one second
    pub fn effective_poll_interval(&self, cli: Option<u64>) -> Duration {
        cli.or(self.poll_interval_secs)
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn effective_load_timeout(&self, cli: Option<u64>) -> Duration {
        cli.or(self.load_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOAD_TIMEOUT)
    }
}

fn missing(field: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: "not set on the command line or in the config file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            region: Some("eu-west-1".to_string()),
            loader_endpoints: vec!["cluster.example:8182".to_string()],
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_precedence() {
        let config = Config {
            region: Some("eu-west-1".to_string()),
            poll_interval_secs: Some(5),
            ..Config::default()
        };
        assert_eq!(config.effective_region(Some("ap-south-1")), "ap-south-1");
        assert_eq!(config.effective_region(None), "eu-west-1");
        assert_eq!(Config::default().effective_region(None), DEFAULT_REGION);
        assert_eq!(config.effective_poll_interval(None), Duration::from_secs(5));
        assert_eq!(
            Config::default().effective_load_timeout(None),
            DEFAULT_LOAD_TIMEOUT
        );
        assert_eq!(config.effective_stage(None), "raw");
    }

    #[test]
    fn test_endpoints_required() {
        let config = Config::default();
        assert!(config.effective_endpoints(&[]).is_err());

        let endpoints = config
            .effective_endpoints(&["cluster.example:8182".to_string()])
            .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert!(config.effective_loader_role(None).is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = Config {
            poll_interval_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.effective_poll_interval(None), Duration::from_secs(1));
        assert_eq!(
            Config::default().effective_poll_interval(Some(0)),
            Duration::from_secs(1)
        );
        assert_eq!(config.effective_poll_interval(Some(7)), Duration::from_secs(7));
    }
}
