//! Ingestion configuration.
//!
//! Defaults come from [`fmtlib_core::defaults`]; every value can be
//! overridden through `FMTLIB_*` environment variables.
//!
//! ```rust,no_run
//! use fmtlib_ingest::config::IngestConfig;
//!
//! let config = IngestConfig::from_env().expect("invalid ingest configuration");
//! config.validate().expect("invalid ingest configuration");
//! ```

use std::env;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fmtlib_core::defaults;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid pattern {0}: {1}")]
    Pattern(String, #[source] regex::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for fmtlib_core::Error {
    fn from(e: ConfigError) -> Self {
        fmtlib_core::Error::Config(e.to_string())
    }
}

/// Where the catalogs are published and how to fetch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Page listing the DROID signature files.
    pub pronom_index_url: String,
    /// Links on the index page matching this are signature files.
    pub pronom_link_pattern: String,
    /// The FDD zip archive, used as is when `loc_index_url` is unset.
    pub loc_archive_url: String,
    /// Optional page listing versioned FDD archives; the latest link wins.
    #[serde(default)]
    pub loc_index_url: Option<String>,
    /// Links on the LOC index page matching this are FDD archives.
    pub loc_link_pattern: String,
    /// Archive members matching this are parsed.
    pub loc_member_pattern: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pronom_index_url: defaults::PRONOM_INDEX_URL.to_string(),
            pronom_link_pattern: defaults::PRONOM_LINK_PATTERN.to_string(),
            loc_archive_url: defaults::LOC_ARCHIVE_URL.to_string(),
            loc_index_url: None,
            loc_link_pattern: defaults::LOC_LINK_PATTERN.to_string(),
            loc_member_pattern: defaults::LOC_MEMBER_PATTERN.to_string(),
            connect_timeout_secs: defaults::HTTP_CONNECT_TIMEOUT_SECS,
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl IngestConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `FMTLIB_PRONOM_INDEX_URL` | `pronom_index_url` |
    /// | `FMTLIB_PRONOM_LINK_PATTERN` | `pronom_link_pattern` |
    /// | `FMTLIB_LOC_ARCHIVE_URL` | `loc_archive_url` |
    /// | `FMTLIB_LOC_INDEX_URL` | `loc_index_url` |
    /// | `FMTLIB_LOC_LINK_PATTERN` | `loc_link_pattern` |
    /// | `FMTLIB_LOC_MEMBER_PATTERN` | `loc_member_pattern` |
    /// | `FMTLIB_HTTP_CONNECT_TIMEOUT_SECS` | `connect_timeout_secs` |
    /// | `FMTLIB_HTTP_TIMEOUT_SECS` | `timeout_secs` |
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("FMTLIB_PRONOM_INDEX_URL") {
            config.pronom_index_url = v;
        }
        if let Ok(v) = env::var("FMTLIB_PRONOM_LINK_PATTERN") {
            config.pronom_link_pattern = v;
        }
        if let Ok(v) = env::var("FMTLIB_LOC_ARCHIVE_URL") {
            config.loc_archive_url = v;
        }
        if let Ok(v) = env::var("FMTLIB_LOC_INDEX_URL") {
            config.loc_index_url = Some(v).filter(|v| !v.trim().is_empty());
        }
        if let Ok(v) = env::var("FMTLIB_LOC_LINK_PATTERN") {
            config.loc_link_pattern = v;
        }
        if let Ok(v) = env::var("FMTLIB_LOC_MEMBER_PATTERN") {
            config.loc_member_pattern = v;
        }
        if let Some(secs) = secs_from_env("FMTLIB_HTTP_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = secs_from_env("FMTLIB_HTTP_TIMEOUT_SECS")? {
            config.timeout_secs = secs;
        }

        debug!(
            subsystem = "ingest",
            component = "config",
            pronom_index_url = %config.pronom_index_url,
            loc_archive_url = %config.loc_archive_url,
            "Loaded ingest configuration"
        );
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let urls = [
            ("pronom_index_url", Some(&self.pronom_index_url)),
            ("loc_archive_url", Some(&self.loc_archive_url)),
            ("loc_index_url", self.loc_index_url.as_ref()),
        ];
        for (name, url) in urls.into_iter().filter_map(|(n, u)| u.map(|u| (n, u))) {
            if url.is_empty() {
                return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{} must start with http:// or https://, got: {}",
                    name, url
                )));
            }
        }

        if self.connect_timeout_secs == 0 || self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "HTTP timeouts must be at least one second".to_string(),
            ));
        }

        self.pronom_link_regex()?;
        self.loc_link_regex()?;
        self.loc_member_regex()?;
        Ok(())
    }

    pub fn pronom_link_regex(&self) -> ConfigResult<Regex> {
        compile("pronom_link_pattern", &self.pronom_link_pattern)
    }

    pub fn loc_link_regex(&self) -> ConfigResult<Regex> {
        compile("loc_link_pattern", &self.loc_link_pattern)
    }

    pub fn loc_member_regex(&self) -> ConfigResult<Regex> {
        compile("loc_member_pattern", &self.loc_member_pattern)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn compile(name: &str, pattern: &str) -> ConfigResult<Regex> {
    Regex::new(pattern).map_err(|e| ConfigError::Pattern(name.to_string(), e))
}

fn secs_from_env(var: &'static str) -> ConfigResult<Option<u64>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var,
                message: format!("'{}': {}", raw, e),
            }),
        Err(_) => Ok(None),
    }
}
