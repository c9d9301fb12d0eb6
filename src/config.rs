use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::detect::{BorderStrips, DEFAULT_SENSITIVITY};
use crate::ingest::DecodeSettings;
use crate::site::SiteDefaults;
use crate::supervisor::SupervisorSettings;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_CONNECTIONS: usize = 32;
const DEFAULT_RECORDINGS_DIR: &str = "recordings";
const DEFAULT_DEBOUNCE_SECS: u64 = 20;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_STOP_GRACE_SECS: u64 = 5;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 15;
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_DECODE_WIDTH: u32 = 320;
const DEFAULT_DECODE_HEIGHT: u32 = 240;
const DEFAULT_DECODE_FPS: u32 = 5;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    api: Option<ApiConfigFile>,
    recordings_dir: Option<PathBuf>,
    debounce_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    stop_grace_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
    ffmpeg_path: Option<PathBuf>,
    decode: Option<DecodeConfigFile>,
    detection: Option<DetectionConfigFile>,
    sites: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DecodeConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    reconnect_backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    sensitivity: Option<u32>,
    border_bottom_px: Option<u32>,
    border_side_px: Option<u32>,
}

/// Daemon settings: optional JSON file, then `MONITOR_*` environment overrides.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api_addr: String,
    pub api_max_connections: usize,
    pub recordings_dir: PathBuf,
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub shutdown_grace: Duration,
    pub decode: DecodeSettings,
    pub defaults: SiteDefaults,
    /// Configure requests applied at start-up.
    pub sites: Vec<Value>,
}

impl MonitorConfig {
    /// Reads the file named by `MONITOR_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MONITOR_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let api_max_connections = file
            .api
            .as_ref()
            .and_then(|api| api.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let decode = DecodeSettings {
            ffmpeg_path: file
                .ffmpeg_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_PATH)),
            width: file
                .decode
                .as_ref()
                .and_then(|decode| decode.width)
                .unwrap_or(DEFAULT_DECODE_WIDTH),
            height: file
                .decode
                .as_ref()
                .and_then(|decode| decode.height)
                .unwrap_or(DEFAULT_DECODE_HEIGHT),
            target_fps: file
                .decode
                .as_ref()
                .and_then(|decode| decode.target_fps)
                .unwrap_or(DEFAULT_DECODE_FPS),
            reconnect_backoff: Duration::from_secs(
                file.decode
                    .and_then(|decode| decode.reconnect_backoff_secs)
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_SECS),
            ),
        };
        let border = BorderStrips::default();
        let defaults = SiteDefaults {
            sensitivity: file
                .detection
                .as_ref()
                .and_then(|d| d.sensitivity)
                .unwrap_or(DEFAULT_SENSITIVITY),
            border: BorderStrips {
                bottom: file
                    .detection
                    .as_ref()
                    .and_then(|d| d.border_bottom_px)
                    .unwrap_or(border.bottom),
                sides: file
                    .detection
                    .and_then(|d| d.border_side_px)
                    .unwrap_or(border.sides),
            },
        };
        Self {
            api_addr,
            api_max_connections,
            recordings_dir: file
                .recordings_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR)),
            debounce: Duration::from_secs(file.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS)),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            stop_grace: Duration::from_secs(
                file.stop_grace_secs.unwrap_or(DEFAULT_STOP_GRACE_SECS),
            ),
            shutdown_grace: Duration::from_secs(
                file.shutdown_grace_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
            decode,
            defaults,
            sites: file.sites.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_value("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
            let host = self
                .api_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.api_addr = format!("{}:{}", host, port);
        }
        if let Some(addr) = env_value("MONITOR_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = env_value("MONITOR_RECORDINGS_DIR") {
            self.recordings_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_value("MONITOR_DEBOUNCE_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("MONITOR_DEBOUNCE_SECS must be an integer number of seconds")
            })?;
            self.debounce = Duration::from_secs(secs);
        }
        if let Some(ms) = env_value("MONITOR_POLL_INTERVAL_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                anyhow!("MONITOR_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(path) = env_value("MONITOR_FFMPEG_PATH") {
            self.decode.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(sensitivity) = env_value("MONITOR_DEFAULT_SENSITIVITY") {
            self.defaults.sensitivity = sensitivity
                .parse()
                .map_err(|_| anyhow!("MONITOR_DEFAULT_SENSITIVITY must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.api_addr, e))?;
        if self.api_max_connections == 0 {
            return Err(anyhow!("api.max_connections must be greater than zero"));
        }
        if self.debounce.is_zero() {
            return Err(anyhow!("debounce must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.shutdown_grace.is_zero() {
            return Err(anyhow!("shutdown grace must be greater than zero"));
        }
        if self.decode.width == 0 || self.decode.height == 0 || self.decode.target_fps == 0 {
            return Err(anyhow!("decode width, height and target_fps must be non-zero"));
        }
        if self.defaults.sensitivity == 0 {
            return Err(anyhow!("default sensitivity must be greater than zero"));
        }
        if self.recordings_dir.as_os_str().is_empty() {
            return Err(anyhow!("recordings_dir must not be empty"));
        }
        Ok(())
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api_addr.clone(),
            max_connections: self.api_max_connections,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            debounce: self.debounce,
            poll_interval: self.poll_interval,
            recordings_root: self.recordings_dir.clone(),
            stop_grace: self.stop_grace,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
