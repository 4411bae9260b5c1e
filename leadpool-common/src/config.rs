//! Configuration loading
//!
//! Configuration comes from a TOML file resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `LEADPOOL_CONFIG` environment variable
//! 3. `./leadpool.toml` in the working directory
//! 4. Compiled defaults (fallback)
//!
//! Every field has a default so a missing or partial file still yields a
//! usable configuration.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub normalizer: NormalizerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// How source files are discovered and attributed to providers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory scanned for tabular source files
    pub directory: PathBuf,
    /// Where the provider identity comes from
    pub provider_from: ProviderSource,
    /// Column holding the provider name when `provider_from = "column"`
    pub provider_column: String,
    /// Filename stem is split at the first occurrence of this delimiter;
    /// the part before it becomes the provider slug
    pub filename_delimiter: String,
    /// Text encoding of the source files (any encoding_rs label)
    pub encoding: String,
    /// File extensions treated as tabular input
    pub extensions: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./leads"),
            provider_from: ProviderSource::Filename,
            provider_column: "provider".to_string(),
            filename_delimiter: "_".to_string(),
            encoding: "utf-8".to_string(),
            extensions: vec![
                "csv".to_string(),
                "tsv".to_string(),
                "txt".to_string(),
                "psv".to_string(),
            ],
        }
    }
}

/// Provider identity convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSource {
    /// Slug derived from the filename stem
    Filename,
    /// Value of a named column in each row
    Column,
}

impl Default for ProviderSource {
    fn default() -> Self {
        ProviderSource::Filename
    }
}

/// Field canonicalization rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Digit counts accepted for a canonical phone
    pub valid_phone_lengths: Vec<usize>,
    /// Leading country prefix stripped when present (digits only)
    pub country_prefix: String,
    /// Reject rows whose non-empty area is not in the known set.
    /// When false (default), unknown areas are kept and flagged.
    pub reject_unknown_areas: bool,
    /// Canonical area names. Empty set means every non-empty area is
    /// accepted as recognized (open world).
    pub known_areas: Vec<String>,
    /// Misspellings/abbreviations mapped to canonical area names
    pub area_aliases: BTreeMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            valid_phone_lengths: vec![10],
            country_prefix: "1".to_string(),
            reject_unknown_areas: false,
            known_areas: Vec::new(),
            area_aliases: BTreeMap::new(),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub db_path: PathBuf,
    /// Rows per ingest transaction
    pub batch_size: usize,
    /// What happens to leads left with zero submissions after a
    /// cascading provider delete
    pub orphan_leads: OrphanPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("leadpool.db"),
            batch_size: 500,
            orphan_leads: OrphanPolicy::Retain,
        }
    }
}

/// Policy for zero-submission leads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Keep the lead as a historical record (default)
    Retain,
    /// Delete the lead once its last submission is gone
    Purge,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        OrphanPolicy::Retain
    }
}

/// Worker pool and refresh behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum source files parsed concurrently
    pub max_parse_workers: usize,
    /// Bounded capacity of the parse-to-writer channel (rows)
    pub channel_capacity: usize,
    /// Refresh the aggregated projection automatically after ingest
    pub refresh_after_ingest: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parse_workers: 4,
            channel_capacity: 1024,
            refresh_after_ingest: true,
        }
    }
}

impl Config {
    /// Load configuration following the priority order in the module docs.
    ///
    /// An explicitly named file that is missing or malformed is an error;
    /// the implicit `./leadpool.toml` fallback is skipped silently when
    /// absent.
    pub fn load(cli_path: Option<&Path>) -> Result<Config> {
        // Priority 1: command-line argument
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        // Priority 2: environment variable
        if let Ok(path) = std::env::var("LEADPOOL_CONFIG") {
            return Self::from_file(Path::new(&path));
        }

        // Priority 3: config file in the working directory
        let local = Path::new("leadpool.toml");
        if local.exists() {
            return Self::from_file(local);
        }

        // Priority 4: compiled defaults
        info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Parse a specific TOML config file
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.normalizer.valid_phone_lengths.is_empty() {
            return Err(Error::Config(
                "normalizer.valid_phone_lengths must not be empty".to_string(),
            ));
        }
        if self.storage.batch_size == 0 {
            return Err(Error::Config("storage.batch_size must be > 0".to_string()));
        }
        if self.pipeline.max_parse_workers == 0 {
            return Err(Error::Config(
                "pipeline.max_parse_workers must be > 0".to_string(),
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(Error::Config(
                "pipeline.channel_capacity must be > 0".to_string(),
            ));
        }
        if !self.country_prefix_is_digits() {
            return Err(Error::Config(
                "normalizer.country_prefix must contain only digits".to_string(),
            ));
        }
        Ok(())
    }

    fn country_prefix_is_digits(&self) -> bool {
        self.normalizer
            .country_prefix
            .chars()
            .all(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.normalizer.valid_phone_lengths, vec![10]);
        assert_eq!(config.storage.batch_size, 500);
        assert_eq!(config.storage.orphan_leads, OrphanPolicy::Retain);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[storage]
batch_size = 100

[normalizer]
reject_unknown_areas = true

[normalizer.area_aliases]
"N.Y." = "NEW YORK"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.storage.batch_size, 100);
        assert!(config.normalizer.reject_unknown_areas);
        assert_eq!(
            config.normalizer.area_aliases.get("N.Y.").unwrap(),
            "NEW YORK"
        );
        // Untouched sections keep their defaults
        assert_eq!(config.pipeline.max_parse_workers, 4);
        assert_eq!(config.input.provider_from, ProviderSource::Filename);
    }

    #[test]
    fn test_invalid_batch_size_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[storage]\nbatch_size = 0\n").unwrap();
        file.flush().unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::from_file(Path::new("/nonexistent/leadpool.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
