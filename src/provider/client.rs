//! HTTP implementation of the provider

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;

use super::names::NameTable;
use super::{Provider, parse};
use crate::config::ProviderConfig;
use crate::data::{City, Country, District, MonthWindow, PrayerTimeDay};
use crate::error::{Errors, Result};
use crate::metrics;

/// Provider backed by the configured URL templates
pub struct HttpProvider {
    client: Client,
    config: ProviderConfig,
    names: Arc<NameTable>,
}

impl HttpProvider {
    /// Build the client from configuration
    ///
    /// # Errors
    /// `RequestFailed` if the underlying HTTP client cannot be built
    pub fn new(config: &ProviderConfig, names: Arc<NameTable>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            names,
        })
    }

    /// GET `url` and return the body of a 2xx response
    async fn get(&self, endpoint: &'static str, url: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.send(url).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.has_kind(crate::error::ErrorKind::Timeout) => "timeout",
            Err(_) => "error",
        };
        metrics::observe_provider_request(endpoint, status, started.elapsed());

        result.map_err(|e| {
            tracing::warn!(endpoint, url, error = %e, "Provider request failed");
            e.with_context("endpoint", endpoint).with_context("url", url)
        })
    }

    async fn send(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Errors::request_failed(format!(
                "provider answered {status}"
            ))
            .with_context("status", status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

fn expand(template: &str, placeholder: &str, id: i64) -> String {
    template.replace(placeholder, &id.to_string())
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_countries(&self) -> Result<Vec<Country>> {
        let body = self.get("countries", &self.config.countries_url).await?;
        let countries = parse::parse_countries(&body, &self.names)?;
        tracing::debug!(count = countries.len(), "Fetched countries");
        Ok(countries)
    }

    async fn fetch_cities(&self, country_id: i64) -> Result<Vec<City>> {
        let url = expand(&self.config.cities_url, "{countryId}", country_id);
        let body = self.get("cities", &url).await?;
        let cities = parse::parse_cities(country_id, &body)
            .map_err(|e| e.with_context("countryId", country_id))?;
        tracing::debug!(country_id, count = cities.len(), "Fetched cities");
        Ok(cities)
    }

    async fn fetch_districts(&self, city_id: i64) -> Result<Vec<District>> {
        let url = expand(&self.config.districts_url, "{cityId}", city_id);
        let body = self.get("districts", &url).await?;
        let districts = parse::parse_districts(city_id, &body)
            .map_err(|e| e.with_context("cityId", city_id))?;
        tracing::debug!(city_id, count = districts.len(), "Fetched districts");
        Ok(districts)
    }

    async fn fetch_prayer_times(
        &self,
        district_id: i64,
        window: MonthWindow,
    ) -> Result<Vec<PrayerTimeDay>> {
        let url = expand(&self.config.prayer_times_url, "{districtId}", district_id);
        let body = self.get("prayer_times", &url).await?;
        let days = parse::parse_prayer_times(district_id, &body, window)?;
        tracing::debug!(district_id, count = days.len(), "Fetched prayer times");
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_fills_placeholder() {
        assert_eq!(
            expand("https://p.example/{districtId}?x={districtId}", "{districtId}", 9541),
            "https://p.example/9541?x=9541"
        );
    }

    #[tokio::test]
    async fn unreachable_provider_is_request_failed() {
        let config = ProviderConfig {
            user_agent: "vakit-test".to_string(),
            timeout_seconds: 2,
            // reserved port on loopback; connection is refused
            countries_url: "http://127.0.0.1:9/countries".to_string(),
            cities_url: "http://127.0.0.1:9/{countryId}".to_string(),
            districts_url: "http://127.0.0.1:9/{cityId}".to_string(),
            prayer_times_url: "http://127.0.0.1:9/{districtId}".to_string(),
            names_path: None,
            concurrency: 1,
        };
        let provider = HttpProvider::new(&config, Arc::new(NameTable::default())).unwrap();

        let error = provider.fetch_cities(2).await.unwrap_err();
        assert!(
            error.has_kind(crate::error::ErrorKind::RequestFailed)
                || error.has_kind(crate::error::ErrorKind::Timeout)
        );
        assert!(error.iter().all(|e| e.context.get("endpoint").map(String::as_str) == Some("cities")));
    }
}
