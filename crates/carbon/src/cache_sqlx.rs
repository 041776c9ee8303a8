//! `sqlx`-backed `IntensityCache` — the durable cache (spec.md §4.2, §6 `carbon_cache`).
//!
//! Grounded on `cloud-component-service/src/db.rs`'s dual-pool (Postgres for
//! production, SQLite for tests/dev) and `repo/component.rs`'s row-struct-plus-`From`
//! conversion pattern. Unlike a migrations framework, `ensure_schema` is a single
//! idempotent `CREATE TABLE IF NOT EXISTS` run at startup; schema migrations as a
//! product feature are out of scope, not schema creation itself.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::IntensitySample;

use crate::cache::IntensityCache;
use crate::error::CarbonError;

/// The two backends this cache can run against: Postgres for production, SQLite for
/// tests and local development.
pub enum DbPool {
    Postgres(sqlx::PgPool),
    Sqlite(sqlx::SqlitePool),
}

#[derive(sqlx::FromRow)]
struct IntensityRow {
    region: String,
    instant: DateTime<Utc>,
    value: f64,
    provenance: String,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<IntensityRow> for IntensitySample {
    fn from(row: IntensityRow) -> Self {
        IntensitySample {
            region: row.region,
            instant: row.instant,
            value: row.value,
            unit: IntensitySample::UNIT,
            provenance: row.provenance,
            fetched_at: row.fetched_at,
            expires_at: row.expires_at,
        }
    }
}

/// Durable `IntensityCache` backed by the logical `carbon_cache` table of §6.
pub struct SqlxIntensityCache {
    pool: DbPool,
}

impl SqlxIntensityCache {
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            pool: DbPool::Postgres(pool),
        }
    }

    #[must_use]
    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool: DbPool::Sqlite(pool),
        }
    }

    /// Create the `carbon_cache` table if it does not already exist.
    pub async fn ensure_schema(&self) -> Result<(), CarbonError> {
        const DDL: &str = "CREATE TABLE IF NOT EXISTS carbon_cache (
            region TEXT NOT NULL,
            instant TIMESTAMPTZ NOT NULL,
            value DOUBLE PRECISION NOT NULL,
            provenance TEXT NOT NULL,
            fetched_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (region, instant)
        )";
        const DDL_SQLITE: &str = "CREATE TABLE IF NOT EXISTS carbon_cache (
            region TEXT NOT NULL,
            instant TEXT NOT NULL,
            value REAL NOT NULL,
            provenance TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (region, instant)
        )";

        match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query(DDL).execute(pool).await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query(DDL_SQLITE).execute(pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IntensityCache for SqlxIntensityCache {
    async fn lookup_nearest(
        &self,
        region: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<IntensitySample>, CarbonError> {
        let now = Utc::now();
        let window_start = instant - chrono::Duration::minutes(15);
        let window_end = instant + chrono::Duration::minutes(15);
        let rows = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query_as::<_, IntensityRow>(
                    "SELECT region, instant, value, provenance, fetched_at, expires_at
                     FROM carbon_cache
                     WHERE region = $1 AND instant BETWEEN $2 AND $3 AND expires_at > $4",
                )
                .bind(region)
                .bind(window_start)
                .bind(window_end)
                .bind(now)
                .fetch_all(pool)
                .await?
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, IntensityRow>(
                    "SELECT region, instant, value, provenance, fetched_at, expires_at
                     FROM carbon_cache
                     WHERE region = ?1 AND instant BETWEEN ?2 AND ?3 AND expires_at > ?4",
                )
                .bind(region)
                .bind(window_start)
                .bind(window_end)
                .bind(now)
                .fetch_all(pool)
                .await?
            }
        };

        // Nearest instant wins; ties broken by the most-recently-fetched row, mirroring
        // the in-memory cache's lookup_nearest (§4.2's bounded-window rule).
        let best = rows
            .into_iter()
            .min_by(|a, b| {
                let delta_a = (a.instant - instant).num_seconds().abs();
                let delta_b = (b.instant - instant).num_seconds().abs();
                delta_a
                    .cmp(&delta_b)
                    .then(b.fetched_at.cmp(&a.fetched_at))
            });

        Ok(best.map(Into::into))
    }

    async fn lookup_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, CarbonError> {
        let now = Utc::now();
        let rows = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query_as::<_, IntensityRow>(
                    "SELECT region, instant, value, provenance, fetched_at, expires_at
                     FROM carbon_cache
                     WHERE region = $1 AND instant BETWEEN $2 AND $3 AND expires_at > $4
                     ORDER BY instant ASC",
                )
                .bind(region)
                .bind(start)
                .bind(end)
                .bind(now)
                .fetch_all(pool)
                .await?
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, IntensityRow>(
                    "SELECT region, instant, value, provenance, fetched_at, expires_at
                     FROM carbon_cache
                     WHERE region = ?1 AND instant BETWEEN ?2 AND ?3 AND expires_at > ?4
                     ORDER BY instant ASC",
                )
                .bind(region)
                .bind(start)
                .bind(end)
                .bind(now)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, sample: &IntensitySample, ttl: Duration) -> Result<(), CarbonError> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_default();
        let expires_at = sample.fetched_at + ttl;
        match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO carbon_cache (region, instant, value, provenance, fetched_at, expires_at)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (region, instant) DO UPDATE
                     SET value = EXCLUDED.value,
                         provenance = EXCLUDED.provenance,
                         fetched_at = EXCLUDED.fetched_at,
                         expires_at = EXCLUDED.expires_at",
                )
                .bind(&sample.region)
                .bind(sample.instant)
                .bind(sample.value)
                .bind(&sample.provenance)
                .bind(sample.fetched_at)
                .bind(expires_at)
                .execute(pool)
                .await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO carbon_cache (region, instant, value, provenance, fetched_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (region, instant) DO UPDATE
                     SET value = excluded.value,
                         provenance = excluded.provenance,
                         fetched_at = excluded.fetched_at,
                         expires_at = excluded.expires_at",
                )
                .bind(&sample.region)
                .bind(sample.instant)
                .bind(sample.value)
                .bind(&sample.provenance)
                .bind(sample.fetched_at)
                .bind(expires_at)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        samples: &[IntensitySample],
        ttl: Duration,
    ) -> Result<(), CarbonError> {
        // One transaction per batch so a forecast write is all-or-nothing (spec.md §4.2).
        match &self.pool {
            DbPool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let ttl = chrono::Duration::from_std(ttl).unwrap_or_default();
                for sample in samples {
                    let expires_at = sample.fetched_at + ttl;
                    sqlx::query(
                        "INSERT INTO carbon_cache (region, instant, value, provenance, fetched_at, expires_at)
                         VALUES ($1, $2, $3, $4, $5, $6)
                         ON CONFLICT (region, instant) DO UPDATE
                         SET value = EXCLUDED.value,
                             provenance = EXCLUDED.provenance,
                             fetched_at = EXCLUDED.fetched_at,
                             expires_at = EXCLUDED.expires_at",
                    )
                    .bind(&sample.region)
                    .bind(sample.instant)
                    .bind(sample.value)
                    .bind(&sample.provenance)
                    .bind(sample.fetched_at)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
            }
            DbPool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let ttl = chrono::Duration::from_std(ttl).unwrap_or_default();
                for sample in samples {
                    let expires_at = sample.fetched_at + ttl;
                    sqlx::query(
                        "INSERT INTO carbon_cache (region, instant, value, provenance, fetched_at, expires_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT (region, instant) DO UPDATE
                         SET value = excluded.value,
                             provenance = excluded.provenance,
                             fetched_at = excluded.fetched_at,
                             expires_at = excluded.expires_at",
                    )
                    .bind(&sample.region)
                    .bind(sample.instant)
                    .bind(sample.value)
                    .bind(&sample.provenance)
                    .bind(sample.fetched_at)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn purge(&self, max_age: Duration) -> Result<u64, CarbonError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| CarbonError::CacheUnavailable(e.to_string()))?;

        let affected = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query("DELETE FROM carbon_cache WHERE fetched_at < $1 OR expires_at <= $2")
                    .bind(cutoff)
                    .bind(Utc::now())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DbPool::Sqlite(pool) => {
                sqlx::query("DELETE FROM carbon_cache WHERE fetched_at < ?1 OR expires_at <= ?2")
                    .bind(cutoff)
                    .bind(Utc::now())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        Ok(affected)
    }
}
