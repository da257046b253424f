//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tempfile::TempDir;
use tokio::sync::Notify;
use vakit::data::{City, Country, District, MonthWindow, PrayerTimeDay};
use vakit::error::{Errors, Result};
use vakit::provider::Provider;
use vakit::{App, config};

/// Date every scripted cycle runs at
pub fn today() -> NaiveDate {
    date(2026, 10, 16)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// What the stub provider answers; a missing entry fails with `RequestFailed`
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub countries: Option<Vec<Country>>,
    pub cities: HashMap<i64, Vec<City>>,
    pub districts: HashMap<i64, Vec<District>>,
    pub prayer_times: HashMap<i64, Vec<PrayerTimeDay>>,
}

impl Script {
    /// Turkey with Istanbul and Ankara, one district each, three days of times
    pub fn turkey() -> Self {
        let days = |district_id| {
            (15..=17)
                .map(|d| prayer_day(district_id, date(2026, 10, d)))
                .collect::<Vec<_>>()
        };

        Self {
            countries: Some(vec![
                Country::new(2, "Turkey", "TÜRKİYE", "Türkiye"),
                Country::new(13, "Germany", "ALMANYA", "Deutschland"),
            ]),
            cities: HashMap::from([(
                2,
                vec![
                    City::new(506, 2, "Ankara", "ANKARA"),
                    City::new(539, 2, "Istanbul", "İSTANBUL"),
                ],
            )]),
            districts: HashMap::from([
                (506, vec![District::new(9206, 506, "Ankara", "ANKARA")]),
                (539, vec![District::new(9541, 539, "Istanbul", "İSTANBUL")]),
            ]),
            prayer_times: HashMap::from([(9206, days(9206)), (9541, days(9541))]),
        }
    }
}

pub fn prayer_day(district_id: i64, on: NaiveDate) -> PrayerTimeDay {
    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    PrayerTimeDay {
        district_id,
        date: on,
        fajr: t(5, 48),
        sunrise: t(7, 12),
        dhuhr: t(12, 52),
        asr: t(15, 58),
        maghrib: t(18, 22),
        isha: t(19, 41),
    }
}

/// Scripted provider that records every call
#[derive(Default)]
pub struct StubProvider {
    script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl StubProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    /// Block every country fetch until `gate` is notified
    pub fn gated(script: Script, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn update(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.script.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn answer<T: Clone>(rows: Option<&Vec<T>>, what: String) -> Result<Vec<T>> {
    rows.cloned()
        .ok_or_else(|| Errors::request_failed(format!("scripted failure for {what}")))
}

#[async_trait]
impl Provider for StubProvider {
    async fn fetch_countries(&self) -> Result<Vec<Country>> {
        self.record("countries".to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let script = self.script.lock().unwrap();
        answer(script.countries.as_ref(), "countries".to_string())
    }

    async fn fetch_cities(&self, country_id: i64) -> Result<Vec<City>> {
        self.record(format!("cities:{country_id}"));
        let script = self.script.lock().unwrap();
        answer(script.cities.get(&country_id), format!("cities of {country_id}"))
    }

    async fn fetch_districts(&self, city_id: i64) -> Result<Vec<District>> {
        self.record(format!("districts:{city_id}"));
        let script = self.script.lock().unwrap();
        answer(script.districts.get(&city_id), format!("districts of {city_id}"))
    }

    async fn fetch_prayer_times(
        &self,
        district_id: i64,
        window: MonthWindow,
    ) -> Result<Vec<PrayerTimeDay>> {
        self.record(format!("prayer_times:{district_id}"));
        let script = self.script.lock().unwrap();
        answer(
            script.prayer_times.get(&district_id),
            format!("prayer times of {district_id}"),
        )
        .map(|days| days.into_iter().filter(|d| window.contains(d.date)).collect())
    }
}

/// Test configuration around a database path
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        database: config::DatabaseConfig {
            path: db_path,
            timeout_seconds: 5,
        },
        provider: config::ProviderConfig {
            user_agent: "vakit-test".to_string(),
            timeout_seconds: 5,
            countries_url: "http://provider.test/countries".to_string(),
            cities_url: "http://provider.test/cities/{countryId}".to_string(),
            districts_url: "http://provider.test/districts/{cityId}".to_string(),
            prayer_times_url: "http://provider.test/times/{districtId}".to_string(),
            names_path: None,
            concurrency: 4,
        },
        sync: config::SyncConfig {
            enabled: false,
            initial_delay_seconds: 0,
            interval_seconds: 3600,
            country_ids: vec![2],
            district_ids: Vec::new(),
            months: 2,
        },
        broom: config::BroomConfig {
            enabled: false,
            initial_delay_seconds: 0,
            interval_seconds: 86400,
            effect_days: 7,
        },
        cache: config::CacheConfig {
            timeout_seconds: 3600,
            max_entries: 1000,
        },
        logging: config::LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Application wired to a temporary database and a stub provider
pub struct TestContext {
    pub app: App,
    pub provider: Arc<StubProvider>,
    pub _temp_dir: TempDir,
}

impl TestContext {
    pub async fn new(script: Script) -> Self {
        Self::with_provider(StubProvider::new(script)).await
    }

    pub async fn with_provider(provider: StubProvider) -> Self {
        Self::build(provider, |_| {}).await
    }

    /// Build with a config tweak applied before the app is assembled
    pub async fn build(provider: StubProvider, tweak: impl FnOnce(&mut config::AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        tweak(&mut config);

        let db = vakit::data::Database::connect(&config.database.path, config.database.timeout())
            .await
            .unwrap();
        let provider = Arc::new(provider);
        let app = App::with_provider(config, db, provider.clone());

        Self {
            app,
            provider,
            _temp_dir: temp_dir,
        }
    }

    pub async fn sync(&self) -> vakit::service::CycleReport {
        self.sync_at(today()).await
    }

    pub async fn sync_at(&self, on: NaiveDate) -> vakit::service::CycleReport {
        self.app.reconciler.reconcile_at(on).await
    }
}
