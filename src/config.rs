// src/config.rs
//! Process-wide configuration
//!
//! Supports a TOML configuration file with the following sections:
//! - [fetch] - Download concurrency and request timeout
//! - [process] - Subprocess timeout and retry budget
//! - [gomod] - Go module proxy settings
//! - [pip] - Default package index
//!
//! The configuration is installed once per process with [`set_config`] and
//! read everywhere through [`get_config`]. When nothing was installed the
//! defaults apply.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Download settings
    #[serde(default)]
    pub fetch: FetchSection,

    /// External process settings
    #[serde(default)]
    pub process: ProcessSection,

    /// Go module settings
    #[serde(default)]
    pub gomod: GomodSection,

    /// pip settings
    #[serde(default)]
    pub pip: PipSection,
}

/// Download configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    /// Maximum number of simultaneous transfers
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Timeout for a single HTTP request (e.g. "300s", "5m")
    #[serde(default = "default_requests_timeout")]
    pub requests_timeout: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            requests_timeout: default_requests_timeout(),
        }
    }
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_requests_timeout() -> String {
    "300s".to_string()
}

/// External process configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    /// Timeout for a single subprocess invocation
    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout: String,

    /// Attempts made for network-dependent commands before giving up
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Base delay between attempts; the n-th retry waits n times this long
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            subprocess_timeout: default_subprocess_timeout(),
            max_tries: default_max_tries(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_subprocess_timeout() -> String {
    "1h".to_string()
}

fn default_max_tries() -> u32 {
    5
}

fn default_retry_delay() -> String {
    "1s".to_string()
}

/// Go module configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct GomodSection {
    /// Value passed to the go tool as GOPROXY
    #[serde(default = "default_goproxy_url")]
    pub proxy_url: String,
}

impl Default for GomodSection {
    fn default() -> Self {
        Self {
            proxy_url: default_goproxy_url(),
        }
    }
}

fn default_goproxy_url() -> String {
    "https://proxy.golang.org,direct".to_string()
}

/// pip configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct PipSection {
    /// Index used when a requirements file does not override it
    #[serde(default = "default_pypi_index_url")]
    pub index_url: String,
}

impl Default for PipSection {
    fn default() -> Self {
        Self {
            index_url: default_pypi_index_url(),
        }
    }
}

pub(crate) fn default_pypi_index_url() -> String {
    "https://pypi.org/simple/".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Default location of the user configuration file, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("depfetch").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency_limit == 0 {
            anyhow::bail!("fetch.concurrency_limit must be at least 1");
        }
        if self.process.max_tries == 0 {
            anyhow::bail!("process.max_tries must be at least 1");
        }

        parse_duration(&self.fetch.requests_timeout).with_context(|| {
            format!("Invalid fetch.requests_timeout: {}", self.fetch.requests_timeout)
        })?;
        parse_duration(&self.process.subprocess_timeout).with_context(|| {
            format!(
                "Invalid process.subprocess_timeout: {}",
                self.process.subprocess_timeout
            )
        })?;
        parse_duration(&self.process.retry_delay).with_context(|| {
            format!("Invalid process.retry_delay: {}", self.process.retry_delay)
        })?;

        if !self.pip.index_url.starts_with("http://") && !self.pip.index_url.starts_with("https://")
        {
            anyhow::bail!("pip.index_url must be an http(s) URL, got '{}'", self.pip.index_url);
        }

        Ok(())
    }

    pub fn requests_timeout(&self) -> Duration {
        parse_duration(&self.fetch.requests_timeout).unwrap_or(Duration::from_secs(300))
    }

    pub fn subprocess_timeout(&self) -> Duration {
        parse_duration(&self.process.subprocess_timeout).unwrap_or(Duration::from_secs(3600))
    }

    pub fn retry_delay(&self) -> Duration {
        parse_duration(&self.process.retry_delay).unwrap_or(Duration::from_secs(1))
    }
}

/// Install the process-wide configuration
///
/// Fails if a configuration was already installed or read.
pub fn set_config(config: Config) -> crate::Result<()> {
    CONFIG
        .set(config)
        .map_err(|_| crate::Error::ConfigError("configuration was already initialized".to_string()))
}

/// Read the process-wide configuration, falling back to defaults
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

/// Parse a human-readable duration string (e.g., "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .with_context(|| format!("Invalid duration number: {}", num))?;
        return Ok(Duration::from_millis(millis));
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    Ok(Duration::from_secs(num * multiplier))
}
