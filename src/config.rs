//! Configuration management for postharvest using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::fetchers::{
    load_cookie_file, ApiFetcherConfig, FetchError, WebFetcherConfig, DEFAULT_API_BASE_URL,
    DEFAULT_WEB_BASE_URL, DEFAULT_WEB_PAGE_SIZE, MAX_ITEMS_PER_REQUEST,
};
use crate::models::{BackendKind, ExportFormat};
use crate::policy::BreakPolicy;
use crate::rate_limiter::RateLimitConfig;
use crate::session::{ControllerConfig, DEFAULT_CHECKPOINT_EVERY, DEFAULT_MAX_EMPTY_PAGES};

/// Session records subdirectory name.
const SESSIONS_SUBDIR: &str = "sessions";

/// Export files subdirectory name.
const EXPORTS_SUBDIR: &str = "exports";

pub const ENV_API_KEY: &str = "POSTHARVEST_API_KEY";
pub const ENV_DATA_DIR: &str = "POSTHARVEST_DATA_DIR";
pub const ENV_COOKIE_FILE: &str = "POSTHARVEST_COOKIE_FILE";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Directory holding one record per session.
    pub sessions_dir: PathBuf,
    /// Directory export files are created in.
    pub exports_dir: PathBuf,
    /// User agent: unset for the default, "impersonate", or a literal string.
    pub user_agent: Option<String>,
    /// Upper bound on one remote request in seconds. Request budget waits
    /// are not counted.
    pub request_timeout: u64,
    /// Spacing between requests to one backend in milliseconds.
    pub request_delay_ms: u64,
    /// Items between periodic checkpoints.
    pub checkpoint_interval: u64,
    pub default_backend: BackendKind,
    pub default_format: ExportFormat,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub api_page_size: u32,
    pub web_base_url: String,
    pub cookie_file: Option<PathBuf>,
    pub web_page_size: u32,
    /// Scheduled breaks, when enabled.
    pub breaks: Option<BreakPolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.local/share/postharvest, falling back to the home or current directory
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("postharvest");

        Self {
            sessions_dir: data_dir.join(SESSIONS_SUBDIR),
            exports_dir: data_dir.join(EXPORTS_SUBDIR),
            data_dir,
            user_agent: None,
            request_timeout: 60,
            request_delay_ms: 2000,
            checkpoint_interval: DEFAULT_CHECKPOINT_EVERY,
            default_backend: BackendKind::default(),
            default_format: ExportFormat::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            api_page_size: MAX_ITEMS_PER_REQUEST,
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            cookie_file: None,
            web_page_size: DEFAULT_WEB_PAGE_SIZE,
            breaks: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            sessions_dir: data_dir.join(SESSIONS_SUBDIR),
            exports_dir: data_dir.join(EXPORTS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.sessions_dir = data_dir.join(SESSIONS_SUBDIR);
        self.exports_dir = data_dir.join(EXPORTS_SUBDIR);
        self.data_dir = data_dir;
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (dir, label) in [
            (&self.data_dir, "data"),
            (&self.sessions_dir, "sessions"),
            (&self.exports_dir, "exports"),
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", label, dir.display(), e),
                )
            })?;
        }
        Ok(())
    }

    pub fn api_fetcher_config(&self) -> ApiFetcherConfig {
        ApiFetcherConfig {
            base_url: self.api_base_url.clone(),
            api_key: self.api_key.clone(),
            page_size: self.api_page_size,
            timeout: Duration::from_secs(self.request_timeout),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Web backend settings, with cookies read from the configured cookie file.
    ///
    /// Without a cookie file the fetcher starts unauthenticated and the first
    /// request asks for a credential.
    pub fn web_fetcher_config(&self) -> Result<WebFetcherConfig, FetchError> {
        let cookies = match &self.cookie_file {
            Some(path) => load_cookie_file(path)?,
            None => Default::default(),
        };
        Ok(WebFetcherConfig {
            base_url: self.web_base_url.clone(),
            cookies,
            page_size: self.web_page_size,
            timeout: Duration::from_secs(self.request_timeout),
            user_agent: self.user_agent.clone(),
        })
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::with_base_delay(Duration::from_millis(self.request_delay_ms))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            checkpoint_every: self.checkpoint_interval.max(1),
            max_empty_pages: DEFAULT_MAX_EMPTY_PAGES,
            breaks: self.breaks.clone(),
        }
    }
}

/// Paid API section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}

/// Web backend section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct WebConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// JSON cookie file (name to value).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}

/// Scheduled break section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct BreakConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Items between breaks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<u64>,
}

impl BreakConfig {
    pub const DEFAULT_EVERY: u64 = 100;
    pub const DEFAULT_MIN_MINUTES: u64 = 5;
    pub const DEFAULT_MAX_MINUTES: u64 = 10;

    /// The policy this section describes, or `None` when breaks are off.
    pub fn policy(&self) -> Option<BreakPolicy> {
        if !self.enabled {
            return None;
        }
        Some(BreakPolicy::new(
            self.every.unwrap_or(Self::DEFAULT_EVERY),
            Duration::from_secs(60 * self.min_minutes.unwrap_or(Self::DEFAULT_MIN_MINUTES)),
            Duration::from_secs(60 * self.max_minutes.unwrap_or(Self::DEFAULT_MAX_MINUTES)),
        ))
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// User agent string, or "impersonate".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Remote request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    /// Items between periodic checkpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<u64>,
    /// Default backend ("web" or "api").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Default export format ("csv" or "jsonl").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    #[prefer(default)]
    pub api: ApiConfig,
    #[serde(default)]
    #[prefer(default)]
    pub web: WebConfig,
    #[serde(default)]
    #[prefer(default)]
    pub breaks: BreakConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer's file discovery.
    /// Falls back to defaults when no file is found or it cannot be parsed.
    pub async fn load() -> Self {
        // Use prefer for file discovery, then parse with serde
        match prefer::load("postharvest").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        resolve_path(path_str, base_dir)
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(interval) = self.checkpoint_interval {
            settings.checkpoint_interval = interval;
        }
        if let Some(ref backend) = self.backend {
            match BackendKind::from_str(backend, true) {
                Ok(kind) => settings.default_backend = kind,
                Err(_) => tracing::warn!("Ignoring unknown backend '{}' in config", backend),
            }
        }
        if let Some(ref format) = self.format {
            match ExportFormat::from_str(format, true) {
                Ok(format) => settings.default_format = format,
                Err(_) => tracing::warn!("Ignoring unknown export format '{}' in config", format),
            }
        }

        if let Some(ref url) = self.api.base_url {
            settings.api_base_url = url.clone();
        }
        if let Some(ref key) = self.api.api_key {
            settings.api_key = Some(key.clone());
        }
        if let Some(size) = self.api.page_size {
            settings.api_page_size = size.clamp(1, MAX_ITEMS_PER_REQUEST as u64) as u32;
        }
        if let Some(ref url) = self.web.base_url {
            settings.web_base_url = url.clone();
        }
        if let Some(ref cookie_file) = self.web.cookie_file {
            settings.cookie_file = Some(self.resolve_path(cookie_file, base_dir));
        }
        if let Some(size) = self.web.page_size {
            settings.web_page_size = size.clamp(1, 100) as u32;
        }
        if let Some(policy) = self.breaks.policy() {
            settings.breaks = Some(policy);
        }
    }
}

fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory (--data-dir flag).
    pub data_dir: Option<PathBuf>,
}

/// Load config from file sources.
async fn load_file_config(options: &LoadOptions) -> Config {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return match Config::load_from_path(config_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}", e);
                Config::default()
            }
        };
    }

    // Priority 2: Auto-discover via prefer
    Config::load().await
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = load_file_config(&options).await;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut settings = Settings::default();

    // Determine base directory for resolving relative paths
    let base_dir = if options.use_cwd {
        cwd.clone()
    } else {
        config.base_dir().unwrap_or_else(|| cwd.clone())
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // POSTHARVEST_DATA_DIR overrides the config file, --data-dir overrides both
    if let Some(dir) = env_value(ENV_DATA_DIR) {
        tracing::debug!("Using {} from environment: {}", ENV_DATA_DIR, dir);
        settings.set_data_dir(resolve_path(&dir, &cwd));
    }
    if let Some(ref dir) = options.data_dir {
        settings.set_data_dir(resolve_path(&dir.to_string_lossy(), &cwd));
    }

    if let Some(key) = env_value(ENV_API_KEY) {
        tracing::debug!("Using {} from environment", ENV_API_KEY);
        settings.api_key = Some(key);
    }
    if let Some(path) = env_value(ENV_COOKIE_FILE) {
        tracing::debug!("Using {} from environment: {}", ENV_COOKIE_FILE, path);
        settings.cookie_file = Some(resolve_path(&path, &cwd));
    }

    (settings, config)
}

/// Load settings with auto-discovered config.
pub async fn load_settings() -> Settings {
    load_settings_with_options(LoadOptions::default()).await.0
}
