//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: the browser starts on defaults and
//! logs a warning. A config file that exists but cannot be read or parsed is.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable overriding the root path
pub const ENV_ROOT: &str = "SWEEPER_ROOT";

/// Environment variable overriding the metric kind
pub const ENV_METRIC: &str = "SWEEPER_METRIC";

/// Environment variable overriding the resolution pool width
pub const ENV_WORKERS: &str = "SWEEPER_WORKERS";

/// Default resolution pool width
pub const DEFAULT_WORKERS: usize = 5;

/// Which aggregate a container reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Cumulative bytes used by every leaf below the node
    #[default]
    #[serde(alias = "space_used")]
    BytesUsed,

    /// Number of leaves below the node
    #[serde(alias = "number_of_files")]
    FileCount,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::BytesUsed => "bytes_used",
            MetricKind::FileCount => "file_count",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bytes_used" | "bytes" | "space" | "space_used" => Ok(MetricKind::BytesUsed),
            "file_count" | "files" | "number_of_files" => Ok(MetricKind::FileCount),
            other => Err(Error::InvalidInput(format!(
                "unknown metric kind '{}' (expected bytes_used or file_count)",
                other
            ))),
        }
    }
}

/// Configuration as read from the TOML file
///
/// Every field is optional; absent fields fall through to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Path of the container the browser opens on
    #[serde(default)]
    pub root_path: Option<PathBuf>,

    /// Metric shown for every node
    #[serde(default)]
    pub metric: Option<MetricKind>,

    /// Width of the metric resolution pool
    #[serde(default)]
    pub workers: Option<usize>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }
}

/// Log filter used when RUST_LOG is unset; covers every sweeper crate
pub fn log_directives(level: &str) -> String {
    format!("sweeper={level},sweeper_common={level}", level = level)
}

/// Platform location of the user's config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sweeper").join("config.toml"))
}

/// Load the TOML layer
///
/// An explicitly requested file must exist. The platform default file is
/// optional: when it is missing the compiled defaults apply.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        debug!("Loading config file {}", path.display());
        return TomlConfig::load(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Loading config file {}", path.display());
            TomlConfig::load(&path)
        }
        Some(path) => {
            warn!(
                "No config file at {}, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_path: Option<PathBuf>,
    pub metric: Option<MetricKind>,
    pub workers: Option<usize>,
    pub log_level: Option<String>,
}

/// Fully resolved startup configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    pub root_path: PathBuf,
    pub metric: MetricKind,
    pub workers: usize,
    pub log_level: String,
}

impl SweeperConfig {
    /// Merge command line, environment, file and defaults
    pub fn resolve(cli: &CliOverrides, file: &TomlConfig) -> Result<Self> {
        let root_path = match &cli.root_path {
            Some(path) => path.clone(),
            None => match env_value(ENV_ROOT) {
                Some(path) => PathBuf::from(path),
                None => file
                    .root_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("/")),
            },
        };

        let metric = match cli.metric {
            Some(metric) => metric,
            None => match env_value(ENV_METRIC) {
                Some(value) => value
                    .parse()
                    .map_err(|e| Error::Config(format!("{}: {}", ENV_METRIC, e)))?,
                None => file.metric.unwrap_or_default(),
            },
        };

        let workers = match cli.workers {
            Some(workers) => workers,
            None => match env_value(ENV_WORKERS) {
                Some(value) => value.trim().parse::<usize>().map_err(|e| {
                    Error::Config(format!("{}='{}': {}", ENV_WORKERS, value, e))
                })?,
                None => file.workers.unwrap_or(DEFAULT_WORKERS),
            },
        };

        if workers == 0 {
            return Err(Error::Config(
                "resolution pool needs at least one worker".to_string(),
            ));
        }

        let log_level = cli
            .log_level
            .clone()
            .unwrap_or_else(|| file.logging.level.clone());

        Ok(Self {
            root_path,
            metric,
            workers,
            log_level,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_from_str() {
        assert_eq!("bytes_used".parse::<MetricKind>().unwrap(), MetricKind::BytesUsed);
        assert_eq!("FILES".parse::<MetricKind>().unwrap(), MetricKind::FileCount);
        assert_eq!(
            "number_of_files".parse::<MetricKind>().unwrap(),
            MetricKind::FileCount
        );
        assert!("inodes".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_metric_kind_display_round_trips() {
        for kind in [MetricKind::BytesUsed, MetricKind::FileCount] {
            assert_eq!(kind.to_string().parse::<MetricKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_full_file() {
        let config = TomlConfig::parse(
            r#"
            root_path = "/data/warehouse"
            metric = "file_count"
            workers = 8

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.root_path, Some(PathBuf::from("/data/warehouse")));
        assert_eq!(config.metric, Some(MetricKind::FileCount));
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_log_directives_cover_common_crate() {
        let directives = log_directives("warn");
        assert!(directives.contains("sweeper=warn"));
        assert!(directives.contains("sweeper_common=warn"));
    }

    #[test]
    fn test_parse_legacy_metric_names() {
        let config = TomlConfig::parse(r#"metric = "space_used""#).unwrap();
        assert_eq!(config.metric, Some(MetricKind::BytesUsed));
    }

    #[test]
    fn test_parse_empty_file_uses_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert!(config.root_path.is_none());
        assert!(config.metric.is_none());
        assert!(config.workers.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_rejects_unknown_metric() {
        assert!(matches!(
            TomlConfig::parse(r#"metric = "inodes""#),
            Err(Error::TomlParse(_))
        ));
    }
}
