//! File configuration for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use exdownloader_core::session::{Credentials, ProxyConfig};
use serde::Deserialize;

/// TOML-backed defaults, overridden by CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory for gallery folders.
    pub output_dir: Option<PathBuf>,
    /// Simultaneous page downloads (1..=5).
    pub concurrency: Option<usize>,
    /// Proxy for `http://` requests; empty means none.
    pub http_proxy: Option<String>,
    /// Proxy for `https://` requests; empty means none.
    pub https_proxy: Option<String>,
    /// Name files by page number.
    pub rename_by_index: Option<bool>,
    /// Replace existing files.
    pub overwrite: Option<bool>,
    /// Save each gallery's cover next to its pages.
    pub thumbnails: Option<bool>,
    /// Per-request network timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Base pause between retry waves in milliseconds.
    pub wave_delay_ms: Option<u64>,
    /// `SQLite` file for the gallery metadata cache. In memory when absent.
    pub cache_path: Option<PathBuf>,
    /// Login cookies.
    pub credentials: Option<Credentials>,
}

impl FileConfig {
    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("config file is not valid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=5).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=5");
        }
        if let Some(timeout) = self.request_timeout_secs
            && !(1..=60).contains(&timeout)
        {
            bail!(
                "Invalid config value for `request_timeout_secs`: {timeout}. Expected range: 1..=60"
            );
        }
        if let Some(delay) = self.wave_delay_ms
            && delay > 60_000
        {
            bail!("Invalid config value for `wave_delay_ms`: {delay}. Expected range: 0..=60000");
        }
        if let Some(credentials) = &self.credentials
            && (is_blank(credentials.ipb_member_id.as_deref())
                || is_blank(credentials.ipb_pass_hash.as_deref()))
        {
            bail!("Invalid config value for `credentials`: ipb_member_id and ipb_pass_hash are required");
        }
        Ok(())
    }

    /// Proxy settings from the file, empty when unset.
    #[must_use]
    pub fn proxy(&self) -> ProxyConfig {
        ProxyConfig::new(
            self.http_proxy.clone().unwrap_or_default(),
            self.https_proxy.clone().unwrap_or_default(),
        )
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/exdownloader/config.toml`
/// 2. `$HOME/.config/exdownloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("exdownloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("exdownloader")
            .join("config.toml"),
    )
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional; defaults are
/// used when it is missing.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match resolve_default_config_path() {
            Some(path) => (path, false),
            None => return Ok(FileConfig::default()),
        },
    };
    if !required && !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    FileConfig::from_toml(&text).with_context(|| format!("in config file {}", path.display()))
}
