//! Database tests

use std::time::Duration;

use super::*;
use crate::error::ErrorKind;
use chrono::{NaiveDate, NaiveTime};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path, Duration::from_secs(5))
        .await
        .unwrap();
    (db, temp_dir)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn day(district_id: i64, on: NaiveDate, fajr_minute: u32) -> PrayerTimeDay {
    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    PrayerTimeDay {
        district_id,
        date: on,
        fajr: t(5, fajr_minute),
        sunrise: t(7, 10),
        dhuhr: t(12, 50),
        asr: t(15, 55),
        maghrib: t(18, 20),
        isha: t(19, 40),
    }
}

async fn seed_regions(db: &Database) {
    db.upsert_batch(&[Country::new(2, "Turkey", "Türkiye", "Türkiye")])
        .await
        .unwrap();
    db.upsert_batch(&[City::new(539, 2, "Istanbul", "İstanbul")])
        .await
        .unwrap();
    db.upsert_batch(&[
        District::new(9541, 539, "Istanbul", "İstanbul"),
        District::new(9542, 539, "Adalar", "Adalar"),
    ])
    .await
    .unwrap();
}

#[tokio::test]
async fn test_database_connection() {
    let (db, _temp_dir) = create_test_db().await;
    let countries: Vec<Country> = db.load_all().await.unwrap();
    assert!(countries.is_empty());
}

#[tokio::test]
async fn test_upsert_inserts_then_replaces() {
    let (db, _temp_dir) = create_test_db().await;

    let written = db
        .upsert_batch(&[
            Country::new(33, "Germany", "Almanya", "Deutschland"),
            Country::new(2, "Turkey", "Türkiye", "Türkiye"),
        ])
        .await
        .unwrap();
    assert_eq!(written, 2);

    let replaced = db
        .upsert_batch(&[Country::new(2, "Türkiye", "Türkiye", "Türkiye")])
        .await
        .unwrap();
    assert_eq!(replaced, 1);

    let countries: Vec<Country> = db.load_all().await.unwrap();
    assert_eq!(countries.len(), 2);
    assert_eq!(countries[0].id, 2, "snapshot is ordered by id");
    assert_eq!(countries[0].name, "Türkiye");
    assert_eq!(countries[1].native_name, "Deutschland");
}

#[tokio::test]
async fn test_orphan_rolls_back_whole_batch() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;

    let error = db
        .upsert_batch(&[
            City::new(540, 2, "Ankara", "Ankara"),
            City::new(900, 77, "Nowhere", "Nowhere"),
        ])
        .await
        .unwrap_err();
    assert!(error.has_kind(ErrorKind::Database));

    let cities: Vec<City> = db.load_all().await.unwrap();
    assert_eq!(cities.len(), 1, "valid row from the failed batch is not kept");
    assert_eq!(cities[0].id, 539);
}

#[tokio::test]
async fn test_delete_batch_counts_rows() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;

    let removed = db.delete_batch::<District>(&[9542]).await.unwrap();
    assert_eq!(removed, 1);

    let error = db
        .delete_batch::<District>(&[9541, 123456])
        .await
        .unwrap_err();
    assert!(error.has_kind(ErrorKind::Database));
    assert!(error.iter().any(|e| e.details.contains("expected 2")));

    let districts: Vec<District> = db.load_all().await.unwrap();
    assert_eq!(districts.len(), 1, "mismatched delete is rolled back");
}

#[tokio::test]
async fn test_deleting_parent_cascades() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;
    db.upsert_batch(&[day(9541, date(2026, 10, 16), 48)])
        .await
        .unwrap();

    db.delete_batch::<Country>(&[2]).await.unwrap();

    assert!(db.load_all::<City>().await.unwrap().is_empty());
    assert!(db.load_all::<District>().await.unwrap().is_empty());
    assert!(db.load_all::<PrayerTimeDay>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_load_scope_filters_by_parent() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;

    let districts: Vec<District> = db.load_scope(539).await.unwrap();
    assert_eq!(districts.len(), 2);
    let none: Vec<District> = db.load_scope(540).await.unwrap();
    assert!(none.is_empty());

    let countries: Vec<Country> = db.load_scope(0).await.unwrap();
    assert_eq!(countries.len(), 1, "top-level scope loads everything");
}

#[tokio::test]
async fn test_prayer_time_upsert_keeps_one_row_per_day() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;

    db.upsert_batch(&[day(9541, date(2026, 10, 16), 48)])
        .await
        .unwrap();
    db.upsert_batch(&[day(9541, date(2026, 10, 16), 49)])
        .await
        .unwrap();

    let rows: Vec<PrayerTimeDay> = db.load_scope(9541).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].fajr, NaiveTime::from_hms_opt(5, 49, 0).unwrap());
}

#[tokio::test]
async fn test_prayer_times_between_and_tracked_districts() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;
    db.upsert_batch(&[
        day(9541, date(2026, 10, 15), 47),
        day(9541, date(2026, 10, 16), 48),
        day(9541, date(2026, 10, 17), 49),
        day(9542, date(2026, 10, 16), 48),
    ])
    .await
    .unwrap();

    let range = DateRange::new(date(2026, 10, 16), date(2026, 10, 17)).unwrap();
    let rows = db.prayer_times_between(9541, range).await.unwrap();
    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![date(2026, 10, 16), date(2026, 10, 17)]);

    assert_eq!(db.tracked_districts().await.unwrap(), vec![9541, 9542]);
}

#[tokio::test]
async fn test_sweep_removes_rows_before_cutoff_only() {
    let (db, _temp_dir) = create_test_db().await;
    seed_regions(&db).await;
    db.upsert_batch(&[
        day(9541, date(2026, 10, 1), 40),
        day(9541, date(2026, 10, 9), 41),
        day(9541, date(2026, 10, 10), 42),
        day(9541, date(2026, 10, 11), 43),
    ])
    .await
    .unwrap();

    let removed = db
        .delete_prayer_times_before(date(2026, 10, 10))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let kept: Vec<NaiveDate> = db
        .load_all::<PrayerTimeDay>()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.date)
        .collect();
    assert_eq!(kept, vec![date(2026, 10, 10), date(2026, 10, 11)]);
}

#[tokio::test]
async fn test_empty_batches_are_noops() {
    let (db, _temp_dir) = create_test_db().await;
    assert_eq!(db.upsert_batch::<Country>(&[]).await.unwrap(), 0);
    assert_eq!(db.delete_batch::<Country>(&[]).await.unwrap(), 0);
}
