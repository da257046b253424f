//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

use crate::error::{Errors, Result};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
    pub broom: BroomConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Upper bound for every store call, in seconds
    pub timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Prayer-time provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// HTML page holding the country `<select>`
    pub countries_url: String,
    /// JSON city list; must contain `{countryId}`
    pub cities_url: String,
    /// JSON district list; must contain `{cityId}`
    pub districts_url: String,
    /// HTML prayer-time table; must contain `{districtId}`
    pub prayer_times_url: String,
    /// Optional JSON table of English/native country names
    pub names_path: Option<PathBuf>,
    /// Maximum number of scope fetches in flight
    pub concurrency: usize,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Reconciliation job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    pub initial_delay_seconds: u64,
    pub interval_seconds: u64,
    /// Countries whose cities and districts are tracked; empty tracks all
    #[serde(default)]
    pub country_ids: Vec<i64>,
    /// Districts whose prayer times are fetched besides those already stored;
    /// empty tracks every district of the tracked cities
    #[serde(default)]
    pub district_ids: Vec<i64>,
    /// Calendar months of prayer times fetched per district
    pub months: u32,
}

impl SyncConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Sweep ("broom") job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BroomConfig {
    pub enabled: bool,
    pub initial_delay_seconds: u64,
    pub interval_seconds: u64,
    /// Prayer-time rows older than this many days are removed
    pub effect_days: u32,
}

impl BroomConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entry age in seconds after which a snapshot is reloaded (default: 3600)
    pub timeout_seconds: u64,
    /// Maximum cached scopes per entity type (default: 10000)
    pub max_entries: u64,
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub fn directive(&self) -> String {
        format!("vakit={}", self.level.trim().to_ascii_lowercase())
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (VAKIT__SECTION__KEY)
    ///
    /// # Errors
    /// Returns `InvalidInput` if configuration is invalid
    pub fn load() -> Result<Self> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("database.path", "data/vakit.db")?
            .set_default("database.timeout_seconds", 10)?
            .set_default("provider.user_agent", concat!("vakit/", env!("CARGO_PKG_VERSION")))?
            .set_default("provider.timeout_seconds", 15)?
            .set_default(
                "provider.countries_url",
                "https://namazvakitleri.diyanet.gov.tr/tr-TR",
            )?
            .set_default(
                "provider.cities_url",
                "https://namazvakitleri.diyanet.gov.tr/tr-TR/home/GetRegList?ChangeType=country&CountryId={countryId}&Culture=tr-TR",
            )?
            .set_default(
                "provider.districts_url",
                "https://namazvakitleri.diyanet.gov.tr/tr-TR/home/GetRegList?ChangeType=state&StateId={cityId}&Culture=tr-TR",
            )?
            .set_default(
                "provider.prayer_times_url",
                "https://namazvakitleri.diyanet.gov.tr/tr-TR/{districtId}",
            )?
            .set_default("provider.concurrency", 4)?
            .set_default("sync.enabled", true)?
            .set_default("sync.initial_delay_seconds", 5)?
            .set_default("sync.interval_seconds", 21_600)?
            .set_default("sync.country_ids", vec![2_i64])?
            .set_default("sync.months", 2)?
            .set_default("broom.enabled", true)?
            .set_default("broom.initial_delay_seconds", 60)?
            .set_default("broom.interval_seconds", 86_400)?
            .set_default("broom.effect_days", 7)?
            .set_default("cache.timeout_seconds", 3600)?
            .set_default("cache.max_entries", 10_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (VAKIT__*)
            .add_source(
                Environment::with_prefix("VAKIT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sync.country_ids")
                    .with_list_parse_key("sync.district_ids")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("database.timeout_seconds", self.database.timeout_seconds),
            ("provider.timeout_seconds", self.provider.timeout_seconds),
            ("sync.interval_seconds", self.sync.interval_seconds),
            ("broom.interval_seconds", self.broom.interval_seconds),
            ("cache.timeout_seconds", self.cache.timeout_seconds),
            ("cache.max_entries", self.cache.max_entries),
            ("provider.concurrency", self.provider.concurrency as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Errors::invalid_input(format!(
                    "{key} must be greater than 0"
                )));
            }
        }

        if self.sync.months == 0 {
            return Err(Errors::invalid_input(
                "sync.months must be greater than 0",
            ));
        }

        let templates = [
            ("provider.countries_url", &self.provider.countries_url, None),
            ("provider.cities_url", &self.provider.cities_url, Some("{countryId}")),
            ("provider.districts_url", &self.provider.districts_url, Some("{cityId}")),
            (
                "provider.prayer_times_url",
                &self.provider.prayer_times_url,
                Some("{districtId}"),
            ),
        ];
        for (key, template, placeholder) in templates {
            let concrete = match placeholder {
                Some(placeholder) if !template.contains(placeholder) => {
                    return Err(Errors::invalid_input(format!(
                        "{key} must contain the {placeholder} placeholder"
                    )));
                }
                Some(placeholder) => template.replace(placeholder, "1"),
                None => template.clone(),
            };
            if let Err(e) = url::Url::parse(&concrete) {
                return Err(Errors::invalid_input(format!("{key} is not a valid URL: {e}")));
            }
        }

        if self.sync.enabled && self.sync.country_ids.iter().any(|id| *id <= 0) {
            return Err(Errors::invalid_input(
                "sync.country_ids must only contain positive ids",
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(Errors::invalid_input(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }
}
