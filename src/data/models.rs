//! Data models
//!
//! Rust structs representing the administrative regions and daily prayer
//! times served by this crate. Ids are the provider's own identifiers and are
//! never generated locally.

use std::fmt;
use std::hash::Hash;

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Errors, Result};

// =============================================================================
// Entity capability
// =============================================================================

/// The closed set of persisted record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Country,
    City,
    District,
    PrayerTime,
}

impl EntityKind {
    /// Parent-before-child order
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Country,
        EntityKind::City,
        EntityKind::District,
        EntityKind::PrayerTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Country => "country",
            EntityKind::City => "city",
            EntityKind::District => "district",
            EntityKind::PrayerTime => "prayer_time",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared capability of every record type
///
/// `Key` is the identity used for diffing; `scope` is the id of the parent
/// record whose fetch produced this one (`None` for countries).
pub trait Entity: Clone + PartialEq + Serialize + Send + Sync + 'static {
    const KIND: EntityKind;
    type Key: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn scope(&self) -> Option<i64>;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Regions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: i64,
    pub name: String,
    pub tr_name: String,
    pub native_name: String,
}

impl Country {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        tr_name: impl Into<String>,
        native_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            tr_name: tr_name.into(),
            native_name: native_name.into(),
        }
    }
}

impl Entity for Country {
    const KIND: EntityKind = EntityKind::Country;
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn scope(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
    pub tr_name: String,
}

impl City {
    pub fn new(
        id: i64,
        country_id: i64,
        name: impl Into<String>,
        tr_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            country_id,
            name: name.into(),
            tr_name: tr_name.into(),
        }
    }
}

impl Entity for City {
    const KIND: EntityKind = EntityKind::City;
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn scope(&self) -> Option<i64> {
        Some(self.country_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct District {
    pub id: i64,
    pub city_id: i64,
    pub name: String,
    pub tr_name: String,
}

impl District {
    pub fn new(id: i64, city_id: i64, name: impl Into<String>, tr_name: impl Into<String>) -> Self {
        Self {
            id,
            city_id,
            name: name.into(),
            tr_name: tr_name.into(),
        }
    }
}

impl Entity for District {
    const KIND: EntityKind = EntityKind::District;
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn scope(&self) -> Option<i64> {
        Some(self.city_id)
    }
}

// =============================================================================
// Prayer times
// =============================================================================

/// Prayer times of one district on one day, keyed by `(district_id, date)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrayerTimeDay {
    pub district_id: i64,
    pub date: NaiveDate,
    #[serde(with = "hour_minute")]
    pub fajr: NaiveTime,
    #[serde(with = "hour_minute")]
    pub sunrise: NaiveTime,
    #[serde(with = "hour_minute")]
    pub dhuhr: NaiveTime,
    #[serde(with = "hour_minute")]
    pub asr: NaiveTime,
    #[serde(with = "hour_minute")]
    pub maghrib: NaiveTime,
    #[serde(with = "hour_minute")]
    pub isha: NaiveTime,
}

impl Entity for PrayerTimeDay {
    const KIND: EntityKind = EntityKind::PrayerTime;
    type Key = (i64, NaiveDate);

    fn key(&self) -> (i64, NaiveDate) {
        (self.district_id, self.date)
    }

    fn scope(&self) -> Option<i64> {
        Some(self.district_id)
    }
}

mod hour_minute {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Date windows
// =============================================================================

/// Inclusive range of days requested at the query boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Longest span accepted by the query surface
    pub const MAX_DAYS: i64 = 366;

    /// Build a validated range
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(Errors::invalid_input(format!(
                "date range starts after it ends: {from} > {to}"
            )));
        }
        if (to - from).num_days() >= Self::MAX_DAYS {
            return Err(Errors::invalid_input(format!(
                "date range {from}..{to} is longer than {} days",
                Self::MAX_DAYS
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Calendar months of prayer times requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl MonthWindow {
    /// Window from the first day of `date`'s month through the last day of
    /// the `months`-th month (at least one month is always covered)
    pub fn starting(date: NaiveDate, months: u32) -> Self {
        let from = date.with_day(1).unwrap_or(date);
        let end = from
            .checked_add_months(Months::new(months.max(1)))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX);
        Self { from, to: end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}
