//! Configuration loader and validator for the brand synchronizer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::marketplace::backoff::BackoffPolicy;
use crate::marketplace::executor::RetryPolicy;
use crate::marketplace::rate_limit::RateLimitSettings;
use crate::marketplace::Endpoints;
use crate::sync::SyncSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub marketplace: Marketplace,
    #[serde(default)]
    pub telegram: Option<Telegram>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Offset used to decide "today" for weekday/rest-day mode.
    pub utc_offset_hours: i32,
    pub repair_cooldown_seconds: u64,
}

/// Marketplace endpoints, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marketplace {
    pub content_api_url: String,
    pub catalog_url: String,
    pub mirror_catalog_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub block_status: u16,
    pub jitter_ms: u64,
    pub backoff_step_seconds: u64,
    pub page_pause_ms: u64,
    pub card_pause_ms: u64,
    pub batch_pause_seconds: u64,
    pub batch_limit: usize,
    pub card_page_size: u32,
    pub update_fields: Vec<String>,
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub max_concurrent: usize,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
}

/// Telegram report delivery. Absent means reports only go to the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    pub report_chats: Vec<i64>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            content_api: self.marketplace.content_api_url.clone(),
            catalog: self.marketplace.catalog_url.clone(),
            mirror_catalog: self.marketplace.mirror_catalog_url.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let m = &self.marketplace;
        RetryPolicy {
            max_attempts: m.max_attempts,
            block_status: m.block_status,
            jitter: Duration::from_millis(m.jitter_ms),
            backoff: BackoffPolicy {
                step: Duration::from_secs(m.backoff_step_seconds),
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn rate_limit(&self) -> RateLimitSettings {
        let r = &self.marketplace.rate_limit;
        RateLimitSettings {
            max_concurrent: r.max_concurrent,
            base_interval: Duration::from_millis(r.base_interval_ms),
            max_interval: Duration::from_millis(r.max_interval_ms),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        let m = &self.marketplace;
        SyncSettings {
            page_pause: Duration::from_millis(m.page_pause_ms),
            card_pause: Duration::from_millis(m.card_pause_ms),
            batch_pause: Duration::from_secs(m.batch_pause_seconds),
            batch_limit: m.batch_limit,
            card_page_size: m.card_page_size,
            update_fields: m.update_fields.clone(),
            repair_cooldown: Duration::from_secs(self.app.repair_cooldown_seconds),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if !(-12..=14).contains(&cfg.app.utc_offset_hours) {
        return Err(ConfigError::Invalid("app.utc_offset_hours must be within -12..=14"));
    }

    let m = &cfg.marketplace;
    for (url, msg) in [
        (&m.content_api_url, "marketplace.content_api_url must be an absolute URL"),
        (&m.catalog_url, "marketplace.catalog_url must be an absolute URL"),
        (&m.mirror_catalog_url, "marketplace.mirror_catalog_url must be an absolute URL"),
    ] {
        if reqwest::Url::parse(url).is_err() {
            return Err(ConfigError::Invalid(msg));
        }
    }
    if m.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.user_agent must be non-empty"));
    }
    if m.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("marketplace.timeout_seconds must be > 0"));
    }
    if m.max_attempts == 0 {
        return Err(ConfigError::Invalid("marketplace.max_attempts must be > 0"));
    }
    if m.batch_limit == 0 {
        return Err(ConfigError::Invalid("marketplace.batch_limit must be > 0"));
    }
    if m.card_page_size == 0 {
        return Err(ConfigError::Invalid("marketplace.card_page_size must be > 0"));
    }
    if !m.update_fields.iter().any(|f| f == "brand") {
        return Err(ConfigError::Invalid("marketplace.update_fields must include brand"));
    }
    if !m.update_fields.iter().any(|f| f == "nmID") {
        return Err(ConfigError::Invalid("marketplace.update_fields must include nmID"));
    }

    let r = &m.rate_limit;
    if r.max_concurrent == 0 {
        return Err(ConfigError::Invalid("marketplace.rate_limit.max_concurrent must be > 0"));
    }
    if r.max_interval_ms < r.base_interval_ms {
        return Err(ConfigError::Invalid(
            "marketplace.rate_limit.max_interval_ms must be >= base_interval_ms",
        ));
    }

    if let Some(tg) = &cfg.telegram {
        if tg.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
        }
        if tg.report_chats.is_empty() {
            return Err(ConfigError::Invalid("telegram.report_chats must list at least one chat"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  utc_offset_hours: 3
  repair_cooldown_seconds: 600

marketplace:
  content_api_url: "https://content-api.wildberries.ru/"
  catalog_url: "https://catalog.wb.ru/sellers/v4/catalog?ab_testing=false&appType=1&curr=rub&dest=-1257786&hide_dtype=13;14&lang=ru&sort=popular&spp=30"
  mirror_catalog_url: "https://catalog.wb.ru/sellers/v2/catalog?appType=1&curr=rub&dest=-1257786&lang=ru&sort=newly&spp=30"
  user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
  timeout_seconds: 30
  max_attempts: 15
  block_status: 498
  jitter_ms: 750
  backoff_step_seconds: 2
  page_pause_ms: 400
  card_pause_ms: 1000
  batch_pause_seconds: 6
  batch_limit: 3000
  card_page_size: 100
  update_fields:
    - nmID
    - vendorCode
    - brand
    - title
    - description
    - dimensions
    - characteristics
    - sizes
  rate_limit:
    max_concurrent: 2
    base_interval_ms: 400
    max_interval_ms: 3000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  report_chats:
    - 123456789
"#
}
