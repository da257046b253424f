//! Prayer-time provider client
//!
//! All knowledge of the provider's endpoints and payload formats lives here.
//! The rest of the crate only sees the [`Provider`] trait and typed entities.
//!
//! # Endpoints
//! - countries: HTML page with a country `<select>`
//! - cities / districts: JSON region lists
//! - prayer times: HTML table, one row per day

mod client;
mod names;
pub mod parse;
pub mod text;

use async_trait::async_trait;

use crate::data::{City, Country, District, MonthWindow, PrayerTimeDay};
use crate::error::Result;

pub use client::HttpProvider;
pub use names::NameTable;

/// Source of freshly fetched region and prayer-time snapshots
///
/// Every call is one round trip. A failure is reported as `RequestFailed`,
/// `Timeout` or `ParsingFailed`; a partial list is never returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    async fn fetch_countries(&self) -> Result<Vec<Country>>;

    async fn fetch_cities(&self, country_id: i64) -> Result<Vec<City>>;

    async fn fetch_districts(&self, city_id: i64) -> Result<Vec<District>>;

    /// Prayer times of one district, restricted to `window`
    async fn fetch_prayer_times(
        &self,
        district_id: i64,
        window: MonthWindow,
    ) -> Result<Vec<PrayerTimeDay>>;
}
