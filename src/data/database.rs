//! SQLite store gateway
//!
//! All database access goes through this module. Reads return whole
//! snapshots; writes are batches, each batch running inside its own
//! transaction so it is applied completely or not at all.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Pool, Sqlite};

use super::models::*;
use crate::error::{Errors, Result};

/// A bound statement ready for execution
pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQL mapping of one entity table
pub trait Stored: Entity + for<'r> FromRow<'r, SqliteRow> + Unpin {
    /// Every row ordered by key
    const SELECT_ALL: &'static str;
    /// Rows of one parent scope, ordered by key; `None` for top-level tables
    const SELECT_SCOPE: Option<&'static str>;
    const UPSERT: &'static str;
    const DELETE: &'static str;

    fn upsert_query(&self) -> SqliteQuery<'_>;

    fn delete_query(key: &Self::Key) -> SqliteQuery<'_>;
}

impl Stored for Country {
    const SELECT_ALL: &'static str =
        "SELECT id, name, tr_name, native_name FROM country ORDER BY id";
    const SELECT_SCOPE: Option<&'static str> = None;
    const UPSERT: &'static str = r#"
        INSERT INTO country (id, name, tr_name, native_name) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            tr_name = excluded.tr_name,
            native_name = excluded.native_name
    "#;
    const DELETE: &'static str = "DELETE FROM country WHERE id = ?";

    fn upsert_query(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::UPSERT)
            .bind(self.id)
            .bind(&self.name)
            .bind(&self.tr_name)
            .bind(&self.native_name)
    }

    fn delete_query(key: &i64) -> SqliteQuery<'_> {
        sqlx::query(Self::DELETE).bind(*key)
    }
}

impl Stored for City {
    const SELECT_ALL: &'static str =
        "SELECT id, country_id, name, tr_name FROM city ORDER BY id";
    const SELECT_SCOPE: Option<&'static str> =
        Some("SELECT id, country_id, name, tr_name FROM city WHERE country_id = ? ORDER BY id");
    const UPSERT: &'static str = r#"
        INSERT INTO city (id, country_id, name, tr_name) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            country_id = excluded.country_id,
            name = excluded.name,
            tr_name = excluded.tr_name
    "#;
    const DELETE: &'static str = "DELETE FROM city WHERE id = ?";

    fn upsert_query(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::UPSERT)
            .bind(self.id)
            .bind(self.country_id)
            .bind(&self.name)
            .bind(&self.tr_name)
    }

    fn delete_query(key: &i64) -> SqliteQuery<'_> {
        sqlx::query(Self::DELETE).bind(*key)
    }
}

impl Stored for District {
    const SELECT_ALL: &'static str =
        "SELECT id, city_id, name, tr_name FROM district ORDER BY id";
    const SELECT_SCOPE: Option<&'static str> =
        Some("SELECT id, city_id, name, tr_name FROM district WHERE city_id = ? ORDER BY id");
    const UPSERT: &'static str = r#"
        INSERT INTO district (id, city_id, name, tr_name) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            city_id = excluded.city_id,
            name = excluded.name,
            tr_name = excluded.tr_name
    "#;
    const DELETE: &'static str = "DELETE FROM district WHERE id = ?";

    fn upsert_query(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::UPSERT)
            .bind(self.id)
            .bind(self.city_id)
            .bind(&self.name)
            .bind(&self.tr_name)
    }

    fn delete_query(key: &i64) -> SqliteQuery<'_> {
        sqlx::query(Self::DELETE).bind(*key)
    }
}

impl Stored for PrayerTimeDay {
    const SELECT_ALL: &'static str = r#"
        SELECT district_id, date, fajr, sunrise, dhuhr, asr, maghrib, isha
        FROM prayer_time ORDER BY district_id, date
    "#;
    const SELECT_SCOPE: Option<&'static str> = Some(
        r#"
        SELECT district_id, date, fajr, sunrise, dhuhr, asr, maghrib, isha
        FROM prayer_time WHERE district_id = ? ORDER BY date
    "#,
    );
    const UPSERT: &'static str = r#"
        INSERT INTO prayer_time (district_id, date, fajr, sunrise, dhuhr, asr, maghrib, isha)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(district_id, date) DO UPDATE SET
            fajr = excluded.fajr,
            sunrise = excluded.sunrise,
            dhuhr = excluded.dhuhr,
            asr = excluded.asr,
            maghrib = excluded.maghrib,
            isha = excluded.isha
    "#;
    const DELETE: &'static str = "DELETE FROM prayer_time WHERE district_id = ? AND date = ?";

    fn upsert_query(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::UPSERT)
            .bind(self.district_id)
            .bind(self.date)
            .bind(self.fajr)
            .bind(self.sunrise)
            .bind(self.dhuhr)
            .bind(self.asr)
            .bind(self.maghrib)
            .bind(self.isha)
    }

    fn delete_query(key: &(i64, NaiveDate)) -> SqliteQuery<'_> {
        sqlx::query(Self::DELETE).bind(key.0).bind(key.1)
    }
}

/// Database connection pool wrapper.
///
/// Every call is bounded by the configured timeout; exceeding it yields a
/// `Timeout` error and drops the in-flight transaction, which rolls it back.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    timeout: Duration,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    /// * `timeout` - Upper bound for every store call
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Errors::database(format!("cannot create database directory: {e}"))
                    .with_context("path", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            Errors::from(e)
        })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool, timeout })
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Errors::timeout(format!(
                "{operation} exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Load every row of one table, ordered by key
    pub async fn load_all<T: Stored>(&self) -> Result<Vec<T>> {
        self.bounded(&format!("load {}", T::KIND), async {
            let rows = sqlx::query_as::<_, T>(T::SELECT_ALL)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
        .map_err(|e| e.with_context("entity", T::KIND))
    }

    /// Load the rows belonging to one parent scope, ordered by key
    pub async fn load_scope<T: Stored>(&self, scope: i64) -> Result<Vec<T>> {
        let Some(sql) = T::SELECT_SCOPE else {
            return self.load_all().await;
        };

        self.bounded(&format!("load {} scope", T::KIND), async {
            let rows = sqlx::query_as::<_, T>(sql)
                .bind(scope)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
        .map_err(|e| e.with_context("entity", T::KIND).with_context("scope", scope))
    }

    /// Prayer times of one district within an inclusive date range
    pub async fn prayer_times_between(
        &self,
        district_id: i64,
        range: DateRange,
    ) -> Result<Vec<PrayerTimeDay>> {
        self.bounded("load prayer_time range", async {
            let rows = sqlx::query_as::<_, PrayerTimeDay>(
                r#"
                SELECT district_id, date, fajr, sunrise, dhuhr, asr, maghrib, isha
                FROM prayer_time
                WHERE district_id = ? AND date >= ? AND date <= ?
                ORDER BY date
                "#,
            )
            .bind(district_id)
            .bind(range.from)
            .bind(range.to)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    /// Districts that currently have at least one prayer-time row
    pub async fn tracked_districts(&self) -> Result<Vec<i64>> {
        self.bounded("load tracked districts", async {
            let ids = sqlx::query_scalar::<_, i64>(
                "SELECT DISTINCT district_id FROM prayer_time ORDER BY district_id",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        })
        .await
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Insert or fully replace every item in one transaction
    ///
    /// # Returns
    /// Number of rows written, always equal to `items.len()`
    ///
    /// # Errors
    /// `Database` when any statement fails or the affected row count does not
    /// match; nothing from the batch is kept in that case.
    pub async fn upsert_batch<T: Stored>(&self, items: &[T]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let expected = items.len() as u64;
        let result = self
            .bounded(&format!("upsert {}", T::KIND), async {
                let mut tx = self.pool.begin().await?;
                let mut affected = 0;
                for item in items {
                    affected += item.upsert_query().execute(&mut *tx).await?.rows_affected();
                }

                if affected != expected {
                    tx.rollback().await?;
                    return Err(Errors::database(format!(
                        "upsert affected {affected} rows, expected {expected}"
                    )));
                }

                tx.commit().await?;
                Ok(affected)
            })
            .await;

        Self::finish_batch::<T>("upsert", started, result)
    }

    /// Delete every key in one transaction
    ///
    /// A key that matches no row is a row-count mismatch and rolls the whole
    /// batch back.
    pub async fn delete_batch<T: Stored>(&self, keys: &[T::Key]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let expected = keys.len() as u64;
        let result = self
            .bounded(&format!("delete {}", T::KIND), async {
                let mut tx = self.pool.begin().await?;
                let mut affected = 0;
                for key in keys {
                    affected += T::delete_query(key).execute(&mut *tx).await?.rows_affected();
                }

                if affected != expected {
                    tx.rollback().await?;
                    return Err(Errors::database(format!(
                        "delete affected {affected} rows, expected {expected}"
                    )));
                }

                tx.commit().await?;
                Ok(affected)
            })
            .await;

        Self::finish_batch::<T>("delete", started, result)
    }

    fn finish_batch<T: Stored>(
        operation: &str,
        started: Instant,
        result: Result<u64>,
    ) -> Result<u64> {
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::observe_db_batch(T::KIND.as_str(), operation, status, started.elapsed());

        result.map_err(|e| {
            tracing::warn!(entity = %T::KIND, operation, error = %e, "Store batch rolled back");
            e.with_context("entity", T::KIND)
                .with_context("operation", operation)
        })
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Delete prayer-time rows dated strictly before `cutoff`
    ///
    /// # Returns
    /// Number of rows removed
    pub async fn delete_prayer_times_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let started = Instant::now();
        let result = self
            .bounded("sweep prayer_time", async {
                let result = sqlx::query("DELETE FROM prayer_time WHERE date < ?")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await;

        Self::finish_batch::<PrayerTimeDay>("sweep", started, result)
    }
}
