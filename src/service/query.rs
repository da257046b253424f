//! Read-only query surface
//!
//! Every read goes through the snapshot cache. Identifiers and date ranges are
//! validated here; an empty answer is reported as `NotFound`.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::data::{City, Country, DateRange, Database, District, PrayerTimeDay, QueryCache};
use crate::error::{Errors, Result};

/// Query service
#[derive(Clone)]
pub struct QueryService {
    db: Arc<Database>,
    cache: Arc<QueryCache>,
}

fn positive_id(name: &str, id: i64) -> Result<i64> {
    if id <= 0 {
        return Err(Errors::invalid_input(format!("{name} must be positive, got {id}")));
    }
    Ok(id)
}

impl QueryService {
    pub fn new(db: Arc<Database>, cache: Arc<QueryCache>) -> Self {
        Self { db, cache }
    }

    /// All countries, ordered by id
    pub async fn countries(&self) -> Result<Arc<Vec<Country>>> {
        let countries = self
            .cache
            .countries
            .get_or_load(None, || self.db.load_all::<Country>())
            .await?;

        if countries.is_empty() {
            return Err(Errors::not_found("no countries have been synced"));
        }
        Ok(countries)
    }

    /// Cities of one country, ordered by id
    pub async fn cities(&self, country_id: i64) -> Result<Arc<Vec<City>>> {
        let country_id = positive_id("countryId", country_id)?;
        let cities = self
            .cache
            .cities
            .get_or_load(Some(country_id), || self.db.load_scope::<City>(country_id))
            .await?;

        if cities.is_empty() {
            return Err(
                Errors::not_found(format!("no cities for country {country_id}"))
                    .with_context("countryId", country_id),
            );
        }
        Ok(cities)
    }

    /// Districts of one city, ordered by id
    pub async fn districts(&self, city_id: i64) -> Result<Arc<Vec<District>>> {
        let city_id = positive_id("cityId", city_id)?;
        let districts = self
            .cache
            .districts
            .get_or_load(Some(city_id), || self.db.load_scope::<District>(city_id))
            .await?;

        if districts.is_empty() {
            return Err(
                Errors::not_found(format!("no districts for city {city_id}"))
                    .with_context("cityId", city_id),
            );
        }
        Ok(districts)
    }

    /// Prayer times of one district for every day in `from..=to`
    ///
    /// # Errors
    /// `InvalidInput` for a non-positive id, a reversed range or a range
    /// longer than [`DateRange::MAX_DAYS`]; `NotFound` when no day is stored.
    pub async fn prayer_times(
        &self,
        district_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PrayerTimeDay>> {
        let district_id = positive_id("districtId", district_id)?;
        let range = DateRange::new(from, to)?;

        let snapshot = self
            .cache
            .prayer_times
            .get_or_load(Some(district_id), || {
                self.db.load_scope::<PrayerTimeDay>(district_id)
            })
            .await?;

        let days: Vec<PrayerTimeDay> = snapshot
            .iter()
            .filter(|day| range.contains(day.date))
            .cloned()
            .collect();

        if days.is_empty() {
            return Err(Errors::not_found(format!(
                "no prayer times for district {district_id} between {from} and {to}"
            ))
            .with_context("districtId", district_id));
        }
        Ok(days)
    }
}
