//! Persistence gateway for listings and price history
//!
//! All writes are single-row atomic statements keyed by VIN. The upsert applies
//! only populated fields via `COALESCE`, so a partial record (a price-only
//! update, a verification status flip) never clobbers data written by a fuller
//! scrape. Batches are funneled through one call path so interleaved partial
//! upserts cannot occur.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::domain::{ListingRecord, StaleListing};

/// Repository over the listings + price_history schema.
#[derive(Clone)]
pub struct ListingRepository {
    pool: SqlitePool,
}

/// One listing row as read back from the database.
#[derive(Debug, Clone)]
pub struct ListingSnapshot {
    pub vin: String,
    pub listing_id: Option<String>,
    pub price: Option<i64>,
    pub mileage: Option<i64>,
    pub dealer: Option<String>,
    pub status: String,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
}

impl ListingRepository {
    /// Open (creating if missing) the SQLite database at `database_url`.
    ///
    /// Failure here is the one fatal startup error in the system.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()
            .with_context(|| format!("invalid database url {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("failed to open listings database")?;
        Ok(Self { pool })
    }

    /// In-memory database for tests and dry runs.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                vin TEXT PRIMARY KEY,
                listing_id TEXT,
                title TEXT,
                price INTEGER,
                msrp INTEGER,
                mileage INTEGER,
                dealer TEXT,
                location TEXT,
                distance INTEGER,
                shipping_cost REAL,
                search_scope TEXT,
                url TEXT,
                image_url TEXT,
                days_on_market INTEGER,
                date_added TEXT,
                first_seen TEXT,
                last_seen TEXT,
                status TEXT NOT NULL DEFAULT 'active'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vin TEXT NOT NULL,
                date TEXT NOT NULL,
                price INTEGER NOT NULL,
                FOREIGN KEY (vin) REFERENCES listings(vin)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_vin_date ON price_history(vin, date)",
        )
        .execute(&self.pool)
        .await?;

        info!("listings schema ready");
        Ok(())
    }

    /// Insert-or-update a batch of partial records by VIN.
    ///
    /// On conflict each mutable field takes the incoming value only when
    /// populated; `first_seen` is immutable after insert. Status follows the
    /// same rule, so only verification records (which carry one) can flip it.
    pub async fn upsert_listings(&self, batch: &[ListingRecord]) -> Result<()> {
        for rec in batch {
            sqlx::query(
                r#"
                INSERT INTO listings (
                    vin, listing_id, title, price, msrp, mileage, dealer, location,
                    distance, shipping_cost, search_scope, url, image_url,
                    days_on_market, date_added, first_seen, last_seen, status
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, 'active'))
                ON CONFLICT(vin) DO UPDATE SET
                    listing_id     = COALESCE(excluded.listing_id, listing_id),
                    title          = COALESCE(excluded.title, title),
                    price          = COALESCE(excluded.price, price),
                    msrp           = COALESCE(excluded.msrp, msrp),
                    mileage        = COALESCE(excluded.mileage, mileage),
                    dealer         = COALESCE(excluded.dealer, dealer),
                    location       = COALESCE(excluded.location, location),
                    distance       = COALESCE(excluded.distance, distance),
                    shipping_cost  = COALESCE(excluded.shipping_cost, shipping_cost),
                    search_scope   = COALESCE(excluded.search_scope, search_scope),
                    url            = COALESCE(excluded.url, url),
                    image_url      = COALESCE(excluded.image_url, image_url),
                    days_on_market = COALESCE(excluded.days_on_market, days_on_market),
                    date_added     = COALESCE(excluded.date_added, date_added),
                    last_seen      = COALESCE(excluded.last_seen, last_seen),
                    status         = COALESCE(?, status)
                "#,
            )
            .bind(&rec.vin)
            .bind(&rec.listing_id)
            .bind(&rec.title)
            .bind(rec.price)
            .bind(rec.msrp)
            .bind(rec.mileage)
            .bind(&rec.dealer)
            .bind(&rec.location)
            .bind(rec.distance)
            .bind(rec.shipping_cost)
            .bind(rec.scope.map(|s| s.as_str()))
            .bind(&rec.url)
            .bind(&rec.image_url)
            .bind(rec.days_on_market)
            .bind(rec.date_added)
            .bind(rec.first_seen)
            .bind(rec.last_seen)
            .bind(rec.status.map(|s| s.as_str()))
            .bind(rec.status.map(|s| s.as_str()))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to upsert listing {}", rec.vin))?;
        }
        debug!(count = batch.len(), "listing batch upserted");
        Ok(())
    }

    /// Batched listing_id -> vin lookup for the resolution step.
    pub async fn lookup_vins_by_listing_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT listing_id, vin FROM listings WHERE listing_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("listing_id"), row.get("vin")))
            .collect())
    }

    /// Active listings not re-observed since before `as_of`, with the detail
    /// URL needed to verify them.
    pub async fn get_stale_active_listings(&self, as_of: NaiveDate) -> Result<Vec<StaleListing>> {
        let rows = sqlx::query(
            r#"
            SELECT vin, url FROM listings
            WHERE status = 'active'
              AND url IS NOT NULL
              AND (last_seen IS NULL OR last_seen < ?)
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| StaleListing {
                vin: row.get("vin"),
                url: row.get("url"),
            })
            .collect())
    }

    /// Append one price observation unless the (vin, date) pair already has
    /// one. The check and insert are separate statements; a concurrent same-day
    /// flush for the same vin can race, which is tolerated.
    pub async fn append_price_if_absent(
        &self,
        vin: &str,
        date: NaiveDate,
        price: i64,
    ) -> Result<()> {
        let exists = sqlx::query("SELECT 1 FROM price_history WHERE vin = ? AND date = ?")
            .bind(vin)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            return Ok(());
        }
        sqlx::query("INSERT INTO price_history (vin, date, price) VALUES (?, ?, ?)")
            .bind(vin)
            .bind(date)
            .bind(price)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point read of one listing row.
    pub async fn get_listing(&self, vin: &str) -> Result<Option<ListingSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT vin, listing_id, price, mileage, dealer, status, first_seen, last_seen
            FROM listings WHERE vin = ?
            "#,
        )
        .bind(vin)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| ListingSnapshot {
            vin: row.get("vin"),
            listing_id: row.get("listing_id"),
            price: row.get("price"),
            mileage: row.get("mileage"),
            dealer: row.get("dealer"),
            status: row.get("status"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
        }))
    }

    /// Price observations for one vin, oldest first. Used by reporting and by
    /// tests asserting idempotency.
    pub async fn price_history(&self, vin: &str) -> Result<Vec<(NaiveDate, i64)>> {
        let rows = sqlx::query("SELECT date, price FROM price_history WHERE vin = ? ORDER BY date")
            .bind(vin)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("date"), row.get("price")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ListingStatus, Scope};

    async fn repo() -> ListingRepository {
        let repo = ListingRepository::connect_in_memory().await.unwrap();
        repo.init_schema().await.unwrap();
        repo
    }

    fn full_record(vin: &str, today: NaiveDate) -> ListingRecord {
        ListingRecord {
            vin: vin.to_string(),
            listing_id: Some(format!("L-{vin}")),
            title: Some("2025 Honda CR-V Hybrid".to_string()),
            price: Some(34_000),
            msrp: Some(36_000),
            mileage: Some(10),
            dealer: Some("Example Motors".to_string()),
            url: Some(format!("https://example.com/{vin}")),
            scope: Some(Scope::Local),
            first_seen: Some(today),
            last_seen: Some(today),
            status: Some(ListingStatus::Active),
            ..ListingRecord::default()
        }
    }

    #[tokio::test]
    async fn upsert_applies_only_populated_fields() {
        let repo = repo().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        repo.upsert_listings(&[full_record("VIN1", today)]).await.unwrap();

        // Price-only update: every other field must survive.
        let update = ListingRecord {
            vin: "VIN1".to_string(),
            price: Some(33_000),
            last_seen: Some(today),
            ..ListingRecord::default()
        };
        repo.upsert_listings(&[update]).await.unwrap();

        let row = sqlx::query("SELECT price, title, dealer, status FROM listings WHERE vin = 'VIN1'")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("price"), 33_000);
        assert_eq!(row.get::<String, _>("title"), "2025 Honda CR-V Hybrid");
        assert_eq!(row.get::<String, _>("dealer"), "Example Motors");
        assert_eq!(row.get::<String, _>("status"), "active");
    }

    #[tokio::test]
    async fn last_write_wins_per_field_not_per_record() {
        let repo = repo().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        repo.upsert_listings(&[full_record("VIN2", today)]).await.unwrap();

        // Second writer updates mileage only, third updates price only. Final
        // row must hold the latest non-null value of each field.
        repo.upsert_listings(&[ListingRecord {
            vin: "VIN2".to_string(),
            mileage: Some(25),
            ..ListingRecord::default()
        }])
        .await
        .unwrap();
        repo.upsert_listings(&[ListingRecord {
            vin: "VIN2".to_string(),
            price: Some(32_500),
            ..ListingRecord::default()
        }])
        .await
        .unwrap();

        let row = sqlx::query("SELECT price, mileage FROM listings WHERE vin = 'VIN2'")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("price"), 32_500);
        assert_eq!(row.get::<i64, _>("mileage"), 25);
    }

    #[tokio::test]
    async fn status_flip_preserves_last_seen() {
        let repo = repo().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        repo.upsert_listings(&[full_record("VIN3", today)]).await.unwrap();

        repo.upsert_listings(&[ListingRecord::verified_inactive("VIN3")])
            .await
            .unwrap();

        let row = sqlx::query("SELECT status, last_seen FROM listings WHERE vin = 'VIN3'")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("status"), "inactive");
        assert_eq!(row.get::<NaiveDate, _>("last_seen"), today);
    }

    #[tokio::test]
    async fn price_append_is_idempotent_per_day() {
        let repo = repo().await;
        let day = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        repo.append_price_if_absent("VIN4", day, 34_000).await.unwrap();
        repo.append_price_if_absent("VIN4", day, 35_000).await.unwrap();

        let history = repo.price_history("VIN4").await.unwrap();
        assert_eq!(history, vec![(day, 34_000)]);

        // A different day appends normally.
        let next = day.succ_opt().unwrap();
        repo.append_price_if_absent("VIN4", next, 33_000).await.unwrap();
        assert_eq!(repo.price_history("VIN4").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_query_excludes_fresh_and_inactive() {
        let repo = repo().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let yesterday = today.pred_opt().unwrap();

        let mut fresh = full_record("VINF", today);
        fresh.last_seen = Some(today);
        let mut stale = full_record("VINS", yesterday);
        stale.last_seen = Some(yesterday);
        let mut inactive = full_record("VINI", yesterday);
        inactive.last_seen = Some(yesterday);
        inactive.status = Some(ListingStatus::Inactive);
        repo.upsert_listings(&[fresh, stale, inactive]).await.unwrap();

        let result = repo.get_stale_active_listings(today).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].vin, "VINS");
    }

    #[tokio::test]
    async fn lookup_maps_only_known_ids() {
        let repo = repo().await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        repo.upsert_listings(&[full_record("VIN5", today)]).await.unwrap();

        let map = repo
            .lookup_vins_by_listing_ids(&["L-VIN5".to_string(), "L-unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("L-VIN5").map(String::as_str), Some("VIN5"));
    }
}
