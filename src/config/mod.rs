//! Configuration management.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config <path>` or `<config dir>/bulkport/config.toml`)
//! 3. `BULKPORT_*` environment variables

use crate::io::budget::{ResourceBudget, SysinfoGauge};
use crate::io::mapper::DuplicateColumnPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Bytes per configured megabyte.
const MB: u64 = 1024 * 1024;

/// Main configuration for bulkport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkportConfig {
    /// Directory holding the database and export output.
    pub data_dir: PathBuf,
    /// Import batching.
    pub import: ImportSettings,
    /// Export paging.
    pub export: ExportSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Import batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSettings {
    /// Rows per batch.
    pub batch_size: usize,
    /// Wall-clock budget per batch in seconds; 0 disables it.
    pub time_limit_secs: u64,
    /// Memory ceiling in megabytes; 0 derives 90% of system memory.
    pub memory_limit_mb: u64,
    /// Field delimiter.
    pub delimiter: u8,
    /// How headers mapping to the same field are resolved.
    pub duplicate_columns: DuplicateColumnPolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 30,
            time_limit_secs: 20,
            memory_limit_mb: 0,
            delimiter: b',',
            duplicate_columns: DuplicateColumnPolicy::LastWins,
        }
    }
}

impl ImportSettings {
    /// Builds the per-batch budget these settings describe.
    #[must_use]
    pub fn budget(&self) -> ResourceBudget {
        ResourceBudget::unlimited()
            .with_time_limit(Duration::from_secs(self.time_limit_secs))
            .with_memory_limit(
                self.memory_limit_mb.saturating_mul(MB),
                Arc::new(SysinfoGauge::new()),
            )
    }
}

/// Export paging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSettings {
    /// Entities per page.
    pub page_size: usize,
    /// Whether metadata columns are exported by default.
    pub include_meta: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            include_meta: false,
        }
    }
}

/// Logging settings; see [`crate::observability::LoggingConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoggingSettings {
    /// Filter directive (`info`, `bulkport=debug`).
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Import section.
    pub import: Option<ConfigFileImport>,
    /// Export section.
    pub export: Option<ConfigFileExport>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Import section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileImport {
    /// Rows per batch.
    pub batch_size: Option<usize>,
    /// Seconds per batch.
    pub time_limit_secs: Option<u64>,
    /// Megabytes.
    pub memory_limit_mb: Option<u64>,
    /// Single-character delimiter.
    pub delimiter: Option<String>,
    /// `last_wins`, `first_wins` or `reject`.
    pub duplicate_columns: Option<String>,
}

/// Export section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileExport {
    /// Entities per page.
    pub page_size: Option<usize>,
    /// Export metadata columns.
    pub include_meta: Option<bool>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub level: Option<String>,
    /// Output format.
    pub format: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for BulkportConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".bulkport"),
            import: ImportSettings::default(),
            export: ExportSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BulkportConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", format!("{}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the platform config directory.
    ///
    /// Returns the defaults if no file exists there. A file that exists but
    /// fails to parse is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config file is invalid.
    pub fn load_default() -> Result<Self> {
        let Some(dirs) = directories::ProjectDirs::from("", "", "bulkport") else {
            return Ok(Self::default());
        };
        let path = dirs.config_dir().join("config.toml");
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads `path` if given, otherwise the default location, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file or environment value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `BULKPORT_*` overrides read through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a value that does not parse.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("BULKPORT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = var("BULKPORT_BATCH_SIZE") {
            self.import.batch_size = parse_env("BULKPORT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("BULKPORT_TIME_LIMIT_SECS") {
            self.import.time_limit_secs = parse_env("BULKPORT_TIME_LIMIT_SECS", &v)?;
        }
        if let Some(v) = var("BULKPORT_MEMORY_LIMIT_MB") {
            self.import.memory_limit_mb = parse_env("BULKPORT_MEMORY_LIMIT_MB", &v)?;
        }
        if let Some(v) = var("BULKPORT_PAGE_SIZE") {
            self.export.page_size = parse_env("BULKPORT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = var("BULKPORT_LOG_LEVEL") {
            self.logging.level = Some(v);
        }
        if let Some(v) = var("BULKPORT_LOG_FORMAT") {
            self.logging.format = Some(v);
        }
        if let Some(v) = var("BULKPORT_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Path of the `SQLite` database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("bulkport.db")
    }

    /// Directory receiving export files.
    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(import) = file.import {
            if let Some(v) = import.batch_size {
                config.import.batch_size = v;
            }
            if let Some(v) = import.time_limit_secs {
                config.import.time_limit_secs = v;
            }
            if let Some(v) = import.memory_limit_mb {
                config.import.memory_limit_mb = v;
            }
            if let Some(v) = import.delimiter {
                config.import.delimiter = parse_delimiter(&v)?;
            }
            if let Some(v) = import.duplicate_columns {
                config.import.duplicate_columns = v.parse()?;
            }
        }
        if let Some(export) = file.export {
            if let Some(v) = export.page_size {
                config.export.page_size = v;
            }
            if let Some(v) = export.include_meta {
                config.export.include_meta = v;
            }
        }
        if let Some(logging) = file.logging {
            config.logging.level = logging.level;
            config.logging.format = logging.format;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        Ok(config)
    }
}

/// Parses a one-byte delimiter; `\t` and `tab` mean a tab.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for anything but a single ASCII
/// character.
pub fn parse_delimiter(s: &str) -> Result<u8> {
    match s {
        "\\t" | "tab" => Ok(b'\t'),
        _ => match s.as_bytes() {
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(Error::Configuration(format!(
                "delimiter must be one ASCII character, got '{s}'"
            ))),
        },
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{key}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BulkportConfig::default();
        assert_eq!(config.import.batch_size, 30);
        assert_eq!(config.import.time_limit_secs, 20);
        assert_eq!(config.import.delimiter, b',');
        assert_eq!(config.export.page_size, 50);
        assert_eq!(config.database_path(), PathBuf::from(".bulkport/bulkport.db"));
    }

    #[test]
    fn test_from_toml() {
        let config = BulkportConfig::from_toml(
            r#"
            data_dir = "/tmp/bp"

            [import]
            batch_size = 100
            delimiter = ";"
            duplicate_columns = "first_wins"

            [export]
            include_meta = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/bp"));
        assert_eq!(config.import.batch_size, 100);
        assert_eq!(config.import.delimiter, b';');
        assert_eq!(config.import.duplicate_columns, DuplicateColumnPolicy::FirstWins);
        assert_eq!(config.import.time_limit_secs, 20);
        assert!(config.export.include_meta);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(BulkportConfig::from_toml("[import]\ndelimiter = \"ab\"").is_err());
        assert!(BulkportConfig::from_toml("[import]\nduplicate_columns = \"random\"").is_err());
        assert!(BulkportConfig::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("BULKPORT_BATCH_SIZE", "5"),
            ("BULKPORT_PAGE_SIZE", "7"),
            ("BULKPORT_LOG_LEVEL", "debug"),
        ]);
        let mut config = BulkportConfig::default();
        config
            .apply_env(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.import.batch_size, 5);
        assert_eq!(config.export.page_size, 7);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        let bad = HashMap::from([("BULKPORT_BATCH_SIZE", "many")]);
        let result = BulkportConfig::default().apply_env(|key| bad.get(key).map(ToString::to_string));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn test_budget_from_settings() {
        let settings = ImportSettings {
            memory_limit_mb: 64,
            ..ImportSettings::default()
        };
        assert_eq!(settings.budget().memory_limit(), Some(64 * MB));
    }
}
