//! Конфигурация бота: TOML-файл плюс переопределения из окружения.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Не удалось прочитать конфиг {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Некорректный TOML в конфиге: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Некорректное значение {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Не задан параметр {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub trusted: TrustedConfig,
}

/// Доступ к REST API панели x-ui.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_inbounds_path")]
    pub inbounds_path: String,
    /// Префикс ссылок подписки, например `https://host:2096/sub`.
    #[serde(default)]
    pub sub_url_prefix: Option<String>,
    /// Панели обычно работают с самоподписанным сертификатом.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,
    #[serde(default = "default_retry_max_wait_secs")]
    pub retry_max_wait_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustedConfig {
    #[serde(default = "default_max_accounts")]
    pub max_accounts: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/xui-admin/data.json")
}

fn default_inbounds_path() -> String {
    "/xui/API/inbounds".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_wait_secs() -> u64 {
    5
}

fn default_retry_max_wait_secs() -> u64 {
    20
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_max_accounts() -> usize {
    3
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            inbounds_path: default_inbounds_path(),
            sub_url_prefix: None,
            accept_invalid_certs: true,
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_wait_secs: default_retry_wait_secs(),
            retry_max_wait_secs: default_retry_max_wait_secs(),
            session_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for TrustedConfig {
    fn default() -> Self {
        Self {
            max_accounts: default_max_accounts(),
        }
    }
}

impl PanelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    pub fn retry_max_wait(&self) -> Duration {
        Duration::from_secs(self.retry_max_wait_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl ConversationConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Читает файл (если он есть), применяет переменные окружения и проверяет
    /// обязательные параметры.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, relying on environment variables"
            );
            Self::from_toml_str("")?
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(token) = lookup("TG_TOKEN") {
            self.bot_token = Some(token);
        }
        if let Some(raw) = lookup("TG_ADMIN_IDS") {
            self.admin_ids = parse_admin_ids(&raw)?;
        }
        if let Some(value) = lookup("XRAY_USER") {
            self.panel.username = value;
        }
        if let Some(value) = lookup("XRAY_PASSWORD") {
            self.panel.password = value;
        }
        if let Some(value) = lookup("XRAY_API_URL") {
            self.panel.base_url = value;
        }
        if let Some(value) = lookup("XRAY_SUB_URL_PREFIX") {
            self.panel.sub_url_prefix = Some(value);
        }
        if let Some(value) = lookup("XUI_ADMIN_STORE_PATH") {
            self.store_path = PathBuf::from(value);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_ids.is_empty() {
            return Err(ConfigError::Missing("admin_ids / TG_ADMIN_IDS"));
        }
        if self.panel.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("panel.base_url / XRAY_API_URL"));
        }
        if self.panel.username.is_empty() {
            return Err(ConfigError::Missing("panel.username / XRAY_USER"));
        }
        if self.panel.password.is_empty() {
            return Err(ConfigError::Missing("panel.password / XRAY_PASSWORD"));
        }
        self.bot_token().map(|_| ())
    }

    pub fn bot_token(&self) -> Result<String, ConfigError> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::Missing("bot_token / TG_TOKEN"))
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| ConfigError::InvalidEnv {
                name: "TG_ADMIN_IDS",
                value: part.to_string(),
            })
        })
        .collect()
}
