//! TimescaleDB sink
//!
//! Bulk inserts into the `ticks` hypertable; rows already present for the
//! same `(time, symbol)` are skipped.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, QueryBuilder};
use std::time::{Duration, Instant};
use tick_common::Tick;
use tracing::{debug, info, warn};

use super::sink::{SinkError, SinkResult, TickSink};
use crate::config::DatabaseSettings;
use crate::metrics;

/// Rows per INSERT statement
pub const MAX_BATCH_SIZE: usize = 1000;

const INSERT_PREFIX: &str = "INSERT INTO ticks (time, symbol, price, size) ";
const CONFLICT_CLAUSE: &str = " ON CONFLICT (time, symbol) DO NOTHING";

pub struct TimescaleSink {
    pool: PgPool,
}

impl TimescaleSink {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> SinkResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&settings.url)
            .await?;

        info!(
            "Connected to database (max_connections={})",
            settings.max_connections
        );
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_chunk(&self, ticks: &[Tick]) -> SinkResult<usize> {
        let mut query_builder = build_insert(ticks);
        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Multi-row INSERT for one chunk of ticks
pub(crate) fn build_insert(ticks: &[Tick]) -> QueryBuilder<'_, Postgres> {
    let mut query_builder = QueryBuilder::new(INSERT_PREFIX);

    query_builder.push_values(ticks, |mut b, tick| {
        b.push_bind(tick.timestamp)
            .push_bind(&tick.symbol)
            .push_bind(tick.price)
            .push_bind(tick.size);
    });

    query_builder.push(CONFLICT_CLAUSE);
    query_builder
}

#[async_trait]
impl TickSink for TimescaleSink {
    async fn bulk_insert(&self, ticks: &[Tick]) -> SinkResult<usize> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut total_inserted = 0;

        for chunk in ticks.chunks(MAX_BATCH_SIZE) {
            total_inserted += self.insert_chunk(chunk).await?;
        }

        metrics::BATCH_INSERT_DURATION.observe(start.elapsed().as_secs_f64());
        debug!(
            "Inserted {} of {} ticks in {:?}",
            total_inserted,
            ticks.len(),
            start.elapsed()
        );
        Ok(total_inserted)
    }

    async fn ensure_schema(&self) -> SinkResult<()> {
        info!("Ensuring ticks schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticks (
                time TIMESTAMPTZ NOT NULL,
                symbol TEXT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                size DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (time, symbol)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Schema(e.to_string()))?;

        let has_timescale: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb')",
        )
        .fetch_one(&self.pool)
        .await?;

        if has_timescale {
            // Fails gracefully if already a hypertable
            let result = sqlx::query(
                r#"
                SELECT create_hypertable(
                    'ticks',
                    'time',
                    chunk_time_interval => INTERVAL '1 day',
                    if_not_exists => TRUE
                )
                "#,
            )
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => info!("ticks hypertable ready"),
                Err(e) => {
                    if e.to_string().contains("already a hypertable") {
                        debug!("ticks is already a hypertable");
                    } else {
                        warn!("Failed to create hypertable: {}", e);
                    }
                }
            }
        } else {
            warn!("TimescaleDB extension not installed, ticks stays a plain table");
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ticks_symbol_time ON ticks (symbol, time DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| SinkError::Schema(e.to_string()))?;

        info!("ticks schema ready");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "timescale"
    }
}
