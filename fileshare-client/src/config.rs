use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use fileshare_core::{ApiBase, CoreError, DEFAULT_API_PORT, DEFAULT_ORIGIN, DEFAULT_WEB_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// `config.json` is expected to be tiny; anything bigger is refused.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const CONFIG_DIR_ENV: &str = "FILESHARE_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.json";
const MAX_ORIGIN_LEN: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedClientConfig {
    /// Where the web client would be served from; the API host is taken from it.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Explicit API base. Overrides `origin` + `api_port` when set.
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Port advertised in the share link.
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_owned()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

impl Default for SavedClientConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            server_url: None,
            api_port: DEFAULT_API_PORT,
            web_port: DEFAULT_WEB_PORT,
            download_dir: None,
            request_timeout_secs: None,
        }
    }
}

impl SavedClientConfig {
    pub fn api_base(&self) -> Result<ApiBase, CoreError> {
        match self.server_url.as_deref() {
            Some(server_url) => ApiBase::from_server_url(server_url),
            None => ApiBase::from_origin(&self.origin, self.api_port),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems: Vec<String> = Vec::new();

        let origin = self.origin.trim();
        if origin.is_empty() {
            problems.push("origin is required".to_owned());
        } else if origin.len() > MAX_ORIGIN_LEN {
            problems.push(format!(
                "origin is too long ({} > {} chars)",
                origin.len(),
                MAX_ORIGIN_LEN
            ));
        } else {
            check_http_url("origin", origin, &mut problems);
        }

        if let Some(server_url) = self.server_url.as_deref() {
            check_http_url("server_url", server_url.trim(), &mut problems);
        }

        if self.api_port == 0 {
            problems.push("api_port must be non-zero".to_owned());
        }
        if self.web_port == 0 {
            problems.push("web_port must be non-zero".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(problems))
        }
    }
}

fn check_http_url(field: &str, raw: &str, problems: &mut Vec<String>) {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => problems.push(format!(
            "{field} must be an http:// or https:// URL (got {}://)",
            url.scheme()
        )),
        Err(err) => problems.push(format!("{field} is invalid: {err}")),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("metadata read failed: {0}")]
    Metadata(#[source] io::Error),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigSaveError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error("create dir failed: {0}")]
    CreateDir(#[source] io::Error),
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("tmp write failed: {0}")]
    WriteTmp(#[source] io::Error),
    #[error("rename failed: {0}")]
    Rename(#[source] io::Error),
}

pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(override_dir);
    }

    dirs::config_dir()
        .map(|dir| dir.join("fileshare"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// `Ok(None)` when no config has been saved yet.
pub fn load_config_from_path(path: &Path) -> Result<Option<SavedClientConfig>, ConfigLoadError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ConfigLoadError::Metadata(err)),
    };
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    let cfg: SavedClientConfig = serde_json::from_str(&data).map_err(ConfigLoadError::Parse)?;
    cfg.validate()?;
    Ok(Some(cfg))
}

pub fn save_config_to_path(path: &Path, cfg: &SavedClientConfig) -> Result<(), ConfigSaveError> {
    cfg.validate()?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(ConfigSaveError::CreateDir)?;
    }

    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg).map_err(ConfigSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(ConfigSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(ConfigSaveError::Rename)?;
    Ok(())
}

pub fn save_config_with_retry(path: &Path, cfg: &SavedClientConfig) -> Result<(), ConfigSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt: u32 = 1;
    loop {
        match save_config_to_path(path, cfg) {
            Ok(()) => return Ok(()),
            // Retrying will not fix a bad value.
            Err(err @ ConfigSaveError::Invalid(_)) => return Err(err),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(_) => {
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}
