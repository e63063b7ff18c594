use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::feed_api;
use crate::session::Pagination;
use crate::window::WindowLimits;

const DEFAULT_ENV_PREFIX: &str = "GROOVI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_request_batch")]
    pub request_batch: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_skip_ahead")]
    pub skip_ahead: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            request_batch: default_request_batch(),
            max_attempts: default_max_attempts(),
            skip_ahead: default_skip_ahead(),
        }
    }
}

impl FeedConfig {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            request_batch: self.request_batch,
            max_attempts: self.max_attempts,
            skip_ahead: self.skip_ahead,
        }
    }
}

fn default_endpoint() -> String {
    feed_api::DEFAULT_FEED_URL.to_string()
}

fn default_user_agent() -> String {
    format!("groovi-feed/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_request_batch() -> usize {
    Pagination::default().request_batch
}

fn default_max_attempts() -> usize {
    Pagination::default().max_attempts
}

fn default_skip_ahead() -> u64 {
    Pagination::default().skip_ahead
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    #[serde(default = "default_initial_batch")]
    pub initial_batch: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_load_threshold")]
    pub load_threshold: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
    #[serde(default = "default_min_load_interval", with = "humantime_serde")]
    pub min_load_interval: Duration,
    #[serde(default = "default_item_height")]
    pub item_height: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_batch: default_initial_batch(),
            batch_size: default_batch_size(),
            load_threshold: default_load_threshold(),
            max_size: default_max_size(),
            keep_count: default_keep_count(),
            min_load_interval: default_min_load_interval(),
            item_height: default_item_height(),
        }
    }
}

impl WindowConfig {
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            initial_batch: self.initial_batch,
            batch_size: self.batch_size,
            load_threshold: self.load_threshold,
            limits: WindowLimits {
                max_size: self.max_size,
                keep_count: self.keep_count,
            },
            min_load_interval: self.min_load_interval,
        }
    }
}

fn default_initial_batch() -> usize {
    ControllerConfig::default().initial_batch
}

fn default_batch_size() -> usize {
    ControllerConfig::default().batch_size
}

fn default_load_threshold() -> usize {
    ControllerConfig::default().load_threshold
}

fn default_max_size() -> usize {
    WindowLimits::default().max_size
}

fn default_keep_count() -> usize {
    WindowLimits::default().keep_count
}

fn default_min_load_interval() -> Duration {
    ControllerConfig::default().min_load_interval
}

fn default_item_height() -> f64 {
    800.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_snapshot_len")]
    pub snapshot_len: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            snapshot_len: default_snapshot_len(),
        }
    }
}

fn default_snapshot_len() -> usize {
    5
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.feed.endpoint.trim().is_empty(),
            "config: feed.endpoint is required"
        );
        ensure!(
            self.feed.request_batch > 0,
            "config: feed.request_batch must be positive"
        );
        ensure!(
            self.feed.max_attempts > 0,
            "config: feed.max_attempts must be positive"
        );
        ensure!(
            self.window.initial_batch > 0 && self.window.batch_size > 0,
            "config: window batch sizes must be positive"
        );
        ensure!(
            self.window.item_height > 0.0,
            "config: window.item_height must be positive"
        );
        WindowLimits {
            max_size: self.window.max_size,
            keep_count: self.window.keep_count,
        }
        .validate()
        .context("config: invalid window limits")
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feed.endpoint" => cfg.feed.endpoint = value,
        "feed.user_agent" => cfg.feed.user_agent = value,
        "feed.timeout" => set_duration(&mut cfg.feed.timeout, &value),
        "feed.request_batch" => set_parsed(&mut cfg.feed.request_batch, &value),
        "feed.max_attempts" => set_parsed(&mut cfg.feed.max_attempts, &value),
        "feed.skip_ahead" => set_parsed(&mut cfg.feed.skip_ahead, &value),
        "window.initial_batch" => set_parsed(&mut cfg.window.initial_batch, &value),
        "window.batch_size" => set_parsed(&mut cfg.window.batch_size, &value),
        "window.load_threshold" => set_parsed(&mut cfg.window.load_threshold, &value),
        "window.max_size" => set_parsed(&mut cfg.window.max_size, &value),
        "window.keep_count" => set_parsed(&mut cfg.window.keep_count, &value),
        "window.min_load_interval" => set_duration(&mut cfg.window.min_load_interval, &value),
        "window.item_height" => set_parsed(&mut cfg.window.item_height, &value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "storage.snapshot_len" => set_parsed(&mut cfg.storage.snapshot_len, &value),
        _ => {}
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *slot = parsed;
    }
}

fn set_duration(slot: &mut Duration, value: &str) {
    if let Ok(duration) = humantime::parse_duration(value.trim()) {
        *slot = duration;
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("groovi").join("config.yaml"))
}
