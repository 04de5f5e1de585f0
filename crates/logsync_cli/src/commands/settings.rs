//! Configuration layering for the CLI.
//!
//! Defaults, then an optional JSON file, then command-line flags.

use clap::Args;
use logsync_engine::{SyncConfig, SyncError};
use logsync_protocol::{Encoding, Order, ProtocolError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Reading the config file failed.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// The cause.
        source: std::io::Error,
    },

    /// The config file is not valid JSON.
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    /// A query option could not be parsed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The engine reported an error.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Options accepted in the JSON config file.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    /// Base URL of the remote API.
    pub base_url: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// `asc` or `desc`. Either way the first page holds the newest messages.
    pub order: Option<String>,
    /// Payload transfer encoding.
    pub encoding: Option<String>,
    /// Time between smart-refresh ticks.
    pub poll_interval_ms: Option<u64>,
    /// How long a cache entry is trusted without a network call.
    pub cache_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Loads a config file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Query options shared by `fetch` and `watch`.
#[derive(Debug, Default, Clone, Args)]
pub struct QueryArgs {
    /// Page size (1-100)
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Order: asc or desc
    #[arg(short, long)]
    pub order: Option<String>,

    /// Payload encoding: base64 or utf-8
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Milliseconds between refresh ticks
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Milliseconds a cached page is trusted
    #[arg(long)]
    pub cache_timeout_ms: Option<u64>,
}

/// Builds the engine configuration from every source, flags winning.
pub fn build_config(
    base_url: Option<&str>,
    file: Option<&FileConfig>,
    args: &QueryArgs,
) -> Result<SyncConfig, CliError> {
    let mut config = SyncConfig::default();

    if let Some(file) = file {
        config = apply(
            config,
            file.base_url.as_deref(),
            file.limit,
            file.order.as_deref(),
            file.encoding.as_deref(),
            file.poll_interval_ms,
            file.cache_timeout_ms,
        )?;
    }
    config = apply(
        config,
        base_url,
        args.limit,
        args.order.as_deref(),
        args.encoding.as_deref(),
        args.poll_interval_ms,
        args.cache_timeout_ms,
    )?;

    config.validate()?;
    Ok(config)
}

fn apply(
    mut config: SyncConfig,
    base_url: Option<&str>,
    limit: Option<u32>,
    order: Option<&str>,
    encoding: Option<&str>,
    poll_interval_ms: Option<u64>,
    cache_timeout_ms: Option<u64>,
) -> Result<SyncConfig, CliError> {
    if let Some(url) = base_url {
        config.base_url = url.to_string();
    }
    if let Some(limit) = limit {
        config = config.with_limit(limit);
    }
    if let Some(order) = order {
        config = config.with_order(order.parse::<Order>()?);
    }
    if let Some(encoding) = encoding {
        config = config.with_encoding(encoding.parse::<Encoding>()?);
    }
    if let Some(ms) = poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = cache_timeout_ms {
        config = config.with_cache_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_sources() {
        let config = build_config(None, None, &QueryArgs::default()).unwrap();
        assert_eq!(config.limit, 25);
        assert_eq!(config.order, Order::Desc);
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig {
            limit: Some(10),
            order: Some("asc".into()),
            poll_interval_ms: Some(2_000),
            ..FileConfig::default()
        };
        let args = QueryArgs {
            limit: Some(50),
            ..QueryArgs::default()
        };
        let config = build_config(Some("http://mirror:5551"), Some(&file), &args).unwrap();
        assert_eq!(config.limit, 50);
        assert_eq!(config.order, Order::Asc);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.base_url, "http://mirror:5551");
    }

    #[test]
    fn bad_values_are_rejected() {
        let args = QueryArgs {
            order: Some("sideways".into()),
            ..QueryArgs::default()
        };
        assert!(matches!(
            build_config(None, None, &args),
            Err(CliError::Protocol(_))
        ));

        let args = QueryArgs {
            limit: Some(0),
            ..QueryArgs::default()
        };
        assert!(matches!(
            build_config(None, None, &args),
            Err(CliError::Sync(SyncError::Config(_)))
        ));
    }

    #[test]
    fn loads_camel_case_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"limit": 5, "encoding": "utf-8", "cacheTimeoutMs": 250}}"#
        )
        .unwrap();

        let loaded = FileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.limit, Some(5));
        assert_eq!(loaded.cache_timeout_ms, Some(250));

        let config = build_config(None, Some(&loaded), &QueryArgs::default()).unwrap();
        assert_eq!(config.encoding, Encoding::Utf8);
        assert_eq!(config.cache_timeout, Duration::from_millis(250));
    }

    #[test]
    fn unknown_file_keys_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pageSize": 5}}"#).unwrap();
        assert!(matches!(
            FileConfig::load(file.path()),
            Err(CliError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = FileConfig::load(Path::new("/nonexistent/logsync.json")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
