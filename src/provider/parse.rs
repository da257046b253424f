//! Provider payload parsers
//!
//! Pure functions from a response body to typed entities. A body that does
//! not have the expected shape is a `ParsingFailed` error carrying the
//! offending fragment; a partially parsed list is never returned.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use super::names::NameTable;
use super::text::{self, Casing};
use crate::data::{City, Country, District, MonthWindow, PrayerTimeDay};
use crate::error::{Errors, Result};

const FRAGMENT_CHARS: usize = 160;

/// Shorten a payload piece for error details
fn fragment(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(FRAGMENT_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn looks_like_json(body: &str) -> bool {
    matches!(body.trim_start().chars().next(), Some('{') | Some('['))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Errors::parsing_failed(format!("invalid selector {css}: {e}")))
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    text::clean(&cell.text().collect::<String>())
}

fn expect_html(body: &str, what: &str) -> Result<Html> {
    if body.trim().is_empty() || looks_like_json(body) {
        return Err(Errors::parsing_failed(format!(
            "expected an HTML {what} page, got: {}",
            fragment(body)
        )));
    }
    Ok(Html::parse_document(body))
}

// =============================================================================
// Countries (HTML <select>)
// =============================================================================

/// Parse the country `<select>` of the provider's landing page
pub fn parse_countries(body: &str, names: &NameTable) -> Result<Vec<Country>> {
    let document = expect_html(body, "country")?;
    let select_sel = selector("select")?;
    let option_sel = selector("option")?;

    let selects: Vec<ElementRef<'_>> = document.select(&select_sel).collect();
    let is_country_select = |el: &ElementRef<'_>| {
        ["id", "name"].iter().any(|attr| {
            el.value()
                .attr(attr)
                .is_some_and(|v| v.eq_ignore_ascii_case("country"))
        })
    };
    let select = match selects.iter().find(|el| is_country_select(*el)) {
        Some(el) => *el,
        None if selects.len() == 1 => selects[0],
        None => {
            return Err(Errors::parsing_failed(format!(
                "no country <select> in page: {}",
                fragment(body)
            )));
        }
    };

    let mut seen = HashSet::new();
    let mut countries = Vec::new();
    for option in select.select(&option_sel) {
        let value = option.value().attr("value").unwrap_or("").trim();
        if value.is_empty() || value == "0" {
            continue;
        }
        let id: i64 = value.parse().map_err(|_| {
            Errors::parsing_failed(format!("non-numeric country id: {}", fragment(&option.html())))
        })?;

        let tr_name = text::display_name(&option.text().collect::<String>(), Casing::Turkish);
        if tr_name.is_empty() {
            return Err(Errors::parsing_failed(format!(
                "country without a name: {}",
                fragment(&option.html())
            )));
        }

        if seen.insert(id) {
            let (name, native_name) = names.country_names(id, &tr_name);
            countries.push(Country {
                id,
                name,
                tr_name,
                native_name,
            });
        }
    }

    if countries.is_empty() {
        return Err(Errors::parsing_failed("country list is empty"));
    }
    Ok(countries)
}

// =============================================================================
// Cities and districts (JSON)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

impl IdRepr {
    fn value(&self) -> Option<i64> {
        match self {
            IdRepr::Number(n) => Some(*n),
            IdRepr::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateListResponse {
    #[serde(rename = "StateList")]
    state_list: Vec<StateEntry>,
}

#[derive(Debug, Deserialize)]
struct StateEntry {
    #[serde(rename = "SehirID")]
    id: IdRepr,
    #[serde(rename = "SehirAdi")]
    tr_name: String,
    #[serde(rename = "SehirAdiEn", default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateRegionListResponse {
    #[serde(rename = "StateRegionList")]
    region_list: Vec<RegionEntry>,
}

#[derive(Debug, Deserialize)]
struct RegionEntry {
    #[serde(rename = "IlceID")]
    id: IdRepr,
    #[serde(rename = "IlceAdi")]
    tr_name: String,
    #[serde(rename = "IlceAdiEn", default)]
    name: Option<String>,
}

fn expect_json<'a, T: Deserialize<'a>>(body: &'a str, what: &str) -> Result<T> {
    if !looks_like_json(body) {
        return Err(Errors::parsing_failed(format!(
            "expected a JSON {what} list, got: {}",
            fragment(body)
        )));
    }
    serde_json::from_str(body).map_err(|e| {
        Errors::parsing_failed(format!("malformed {what} list ({e}): {}", fragment(body)))
    })
}

/// Turkish and English display names of one region entry
fn region_names(tr_raw: &str, en_raw: Option<&str>) -> (String, String) {
    let tr_name = text::display_name(tr_raw, Casing::Turkish);
    let name = en_raw
        .map(|en| text::display_name(en, Casing::Unicode))
        .filter(|en| !en.is_empty())
        .unwrap_or_else(|| tr_name.clone());
    (name, tr_name)
}

fn region_id(id: &IdRepr, what: &str, raw: &str) -> Result<i64> {
    id.value().filter(|id| *id > 0).ok_or_else(|| {
        Errors::parsing_failed(format!("invalid {what} id near: {}", fragment(raw)))
    })
}

/// Parse the city list of one country
pub fn parse_cities(country_id: i64, body: &str) -> Result<Vec<City>> {
    let response: StateListResponse = expect_json(body, "city")?;

    let mut seen = HashSet::new();
    let mut cities = Vec::new();
    for entry in &response.state_list {
        let id = region_id(&entry.id, "city", body)?;
        let (name, tr_name) = region_names(&entry.tr_name, entry.name.as_deref());
        if tr_name.is_empty() {
            return Err(Errors::parsing_failed(format!("city {id} has no name")));
        }
        if seen.insert(id) {
            cities.push(City {
                id,
                country_id,
                name,
                tr_name,
            });
        }
    }

    if cities.is_empty() {
        return Err(Errors::parsing_failed("city list is empty").with_context("countryId", country_id));
    }
    Ok(cities)
}

/// Parse the district list of one city
pub fn parse_districts(city_id: i64, body: &str) -> Result<Vec<District>> {
    let response: StateRegionListResponse = expect_json(body, "district")?;

    let mut seen = HashSet::new();
    let mut districts = Vec::new();
    for entry in &response.region_list {
        let id = region_id(&entry.id, "district", body)?;
        let (name, tr_name) = region_names(&entry.tr_name, entry.name.as_deref());
        if tr_name.is_empty() {
            return Err(Errors::parsing_failed(format!("district {id} has no name")));
        }
        if seen.insert(id) {
            districts.push(District {
                id,
                city_id,
                name,
                tr_name,
            });
        }
    }

    if districts.is_empty() {
        return Err(Errors::parsing_failed("district list is empty").with_context("cityId", city_id));
    }
    Ok(districts)
}

// =============================================================================
// Prayer times (HTML table)
// =============================================================================

const TURKISH_MONTHS: [&str; 12] = [
    "ocak", "şubat", "mart", "nisan", "mayıs", "haziran", "temmuz", "ağustos", "eylül", "ekim",
    "kasım", "aralık",
];

/// Parse `DD.MM.YYYY` or the long Turkish form `16 Ekim 2026 Cuma`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d.%m.%Y") {
        return Some(date);
    }

    let mut parts = raw.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let month_name = text::title_case(parts.next()?, Casing::Turkish);
    let month = TURKISH_MONTHS
        .iter()
        .position(|m| text::title_case(m, Casing::Turkish) == month_name)?;
    let year: i32 = parts.next()?.parse().ok()?;

    NaiveDate::from_ymd_opt(year, month as u32 + 1, day)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Parse the prayer-time table of one district, keeping rows inside `window`
pub fn parse_prayer_times(
    district_id: i64,
    body: &str,
    window: MonthWindow,
) -> Result<Vec<PrayerTimeDay>> {
    let document = expect_html(body, "prayer time")?;
    let row_sel = selector("table tbody tr")?;
    let cell_sel = selector("td")?;

    let mut seen = HashSet::new();
    let mut days = Vec::new();
    let mut rows = 0usize;

    for row in document.select(&row_sel) {
        let cells: Vec<String> = row.select(&cell_sel).map(|td| cell_text(&td)).collect();
        if cells.is_empty() {
            // header rows rendered with <th> inside <tbody>
            continue;
        }
        rows += 1;

        let bad_row = || {
            Errors::parsing_failed(format!("malformed prayer time row: {}", fragment(&row.html())))
                .with_context("districtId", district_id)
        };
        if cells.len() < 7 {
            return Err(bad_row());
        }

        let date = parse_date(&cells[0]).ok_or_else(bad_row)?;
        let mut times = [NaiveTime::MIN; 6];
        for (slot, raw) in times.iter_mut().zip(&cells[1..7]) {
            *slot = parse_time(raw).ok_or_else(bad_row)?;
        }

        if !window.contains(date) || !seen.insert(date) {
            continue;
        }
        let [fajr, sunrise, dhuhr, asr, maghrib, isha] = times;
        days.push(PrayerTimeDay {
            district_id,
            date,
            fajr,
            sunrise,
            dhuhr,
            asr,
            maghrib,
            isha,
        });
    }

    if rows == 0 {
        return Err(Errors::parsing_failed(format!(
            "prayer time table is empty: {}",
            fragment(body)
        ))
        .with_context("districtId", district_id));
    }
    if days.is_empty() {
        return Err(Errors::parsing_failed(format!(
            "no prayer times between {} and {}",
            window.from, window.to
        ))
        .with_context("districtId", district_id));
    }

    days.sort_by_key(|d| d.date);
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const COUNTRY_PAGE: &str = r#"
        <html><body>
          <select id="Language"><option value="tr">Türkçe</option></select>
          <select id="Country" name="Country">
            <option value="0">Seçiniz</option>
            <option value="2">T&#220;RKİYE</option>
            <option value="33">  ALMANYA </option>
            <option value="2">TÜRKİYE</option>
          </select>
        </body></html>
    "#;

    #[test]
    fn countries_skip_placeholder_and_duplicates() {
        let names = NameTable::from_json(
            r#"{"countries": {"2": {"name": "Turkey", "nativeName": "Türkiye"}}}"#,
        )
        .unwrap();

        let countries = parse_countries(COUNTRY_PAGE, &names).unwrap();
        assert_eq!(
            countries,
            vec![
                Country::new(2, "Turkey", "Türkiye", "Türkiye"),
                Country::new(33, "Almanya", "Almanya", "Almanya"),
            ]
        );
    }

    #[test]
    fn countries_reject_json_and_empty_lists() {
        let names = NameTable::default();

        let error = parse_countries(r#"{"StateList": []}"#, &names).unwrap_err();
        assert!(error.has_kind(ErrorKind::ParsingFailed));

        let empty = r#"<select id="Country"><option value="0">Seçiniz</option></select>"#;
        assert!(parse_countries(empty, &names).is_err());
    }

    #[test]
    fn countries_reject_non_numeric_ids() {
        let page = r#"<select id="Country"><option value="tr">TÜRKİYE</option></select>"#;
        let error = parse_countries(page, &NameTable::default()).unwrap_err();
        assert!(error.iter().any(|e| e.details.contains("TÜRKİYE")));
    }

    #[test]
    fn cities_parse_string_and_numeric_ids() {
        let body = r#"{
            "StateList": [
                {"SehirID": "539", "SehirAdi": "İSTANBUL", "SehirAdiEn": "ISTANBUL"},
                {"SehirID": 506, "SehirAdi": "ANKARA", "SehirAdiEn": "ANKARA"},
                {"SehirID": "520", "SehirAdi": "&#350;ANLIURFA"}
            ]
        }"#;

        let cities = parse_cities(2, body).unwrap();
        assert_eq!(
            cities,
            vec![
                City::new(539, 2, "Istanbul", "İstanbul"),
                City::new(506, 2, "Ankara", "Ankara"),
                City::new(520, 2, "Şanlıurfa", "Şanlıurfa"),
            ]
        );
    }

    #[test]
    fn cities_reject_html_and_bad_ids() {
        let error = parse_cities(2, "<html><body>Bakımdayız</body></html>").unwrap_err();
        assert!(error.has_kind(ErrorKind::ParsingFailed));
        assert!(error.iter().any(|e| e.details.contains("Bakımdayız")));

        let bad = r#"{"StateList": [{"SehirID": "x", "SehirAdi": "A"}]}"#;
        assert!(parse_cities(2, bad).is_err());

        let empty = r#"{"StateList": []}"#;
        assert!(parse_cities(2, empty).is_err());
    }

    #[test]
    fn districts_parse_region_list() {
        let body = r#"{"StateRegionList": [
            {"IlceID": "9541", "IlceAdi": "İSTANBUL", "IlceAdiEn": "ISTANBUL"},
            {"IlceID": "9542", "IlceAdi": "ADALAR", "IlceAdiEn": "ADALAR"}
        ]}"#;

        let districts = parse_districts(539, body).unwrap();
        assert_eq!(districts.len(), 2);
        assert_eq!(districts[1], District::new(9542, 539, "Adalar", "Adalar"));
    }

    #[test]
    fn districts_reject_wrong_shape() {
        let error = parse_districts(539, r#"{"StateList": []}"#).unwrap_err();
        assert!(error.has_kind(ErrorKind::ParsingFailed));
    }

    #[test]
    fn dates_in_both_formats() {
        assert_eq!(parse_date("16.10.2026"), Some(date(2026, 10, 16)));
        assert_eq!(parse_date("16 Ekim 2026 Cuma"), Some(date(2026, 10, 16)));
        assert_eq!(parse_date("1 ŞUBAT 2027 Pazartesi"), Some(date(2027, 2, 1)));
        assert_eq!(parse_date("3 Ağustos 2026"), Some(date(2026, 8, 3)));
        assert_eq!(parse_date("31 Şubat 2026"), None);
        assert_eq!(parse_date("yarın"), None);
    }

    const TIMES_PAGE: &str = r#"
        <table>
          <thead><tr><th>Tarih</th><th>İmsak</th></tr></thead>
          <tbody>
            <tr><th>Ekim 2026</th></tr>
            <tr><td>30 Eylül 2026 Çarşamba</td><td>05:30</td><td>06:53</td><td>12:59</td><td>16:17</td><td>18:55</td><td>20:12</td></tr>
            <tr><td>16 Ekim 2026 Cuma</td><td>05:48</td><td>07:12</td><td>12:52</td><td>15:58</td><td>18:22</td><td>19:41</td></tr>
            <tr><td>17.10.2026</td><td>05:49</td><td>07:13</td><td>12:52</td><td>15:57</td><td>18:21</td><td>19:40</td></tr>
          </tbody>
        </table>
    "#;

    #[test]
    fn prayer_times_keep_rows_inside_window() {
        let window = MonthWindow::starting(date(2026, 10, 16), 1);
        let days = parse_prayer_times(9541, TIMES_PAGE, window).unwrap();

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, date(2026, 10, 16));
        assert_eq!(days[0].fajr, NaiveTime::from_hms_opt(5, 48, 0).unwrap());
        assert_eq!(days[1].isha, NaiveTime::from_hms_opt(19, 40, 0).unwrap());
        assert!(days.iter().all(|d| d.district_id == 9541));
    }

    #[test]
    fn prayer_times_abort_on_malformed_row() {
        let page = r#"<table><tbody>
            <tr><td>16.10.2026</td><td>05:48</td><td>07:12</td><td>öğle</td><td>15:58</td><td>18:22</td><td>19:41</td></tr>
        </tbody></table>"#;
        let window = MonthWindow::starting(date(2026, 10, 16), 1);

        let error = parse_prayer_times(9541, page, window).unwrap_err();
        assert!(error.has_kind(ErrorKind::ParsingFailed));
        assert!(error.iter().any(|e| e.details.contains("öğle")));
    }

    #[test]
    fn prayer_times_reject_empty_table_and_short_rows() {
        let window = MonthWindow::starting(date(2026, 10, 16), 1);
        assert!(parse_prayer_times(9541, "<table><tbody></tbody></table>", window).is_err());

        let short = "<table><tbody><tr><td>16.10.2026</td><td>05:48</td></tr></tbody></table>";
        assert!(parse_prayer_times(9541, short, window).is_err());
    }

    #[test]
    fn fragments_are_truncated() {
        let long = "x".repeat(500);
        assert_eq!(fragment(&long).chars().count(), FRAGMENT_CHARS + 1);
    }
}
