//! PostgreSQL price repository.

use crate::adapters::symbol_locks::SymbolLocks;
use crate::domain::error::PriceVaultError;
use crate::ports::config_port::ConfigPort;
use crate::ports::storage_port::{
    DatabaseStats, NewPriceRecord, PricePatch, PriceRepository, StoredPrice, UpsertCounts,
};
use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{GenericClient, NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use std::collections::BTreeSet;
use tracing::{debug, info};

type Manager = PostgresConnectionManager<NoTls>;

const COLUMNS: &str = "id, symbol, date, open, high, low, close, volume, quality_score, \
                       is_outlier, sma_20, rsi_14, volatility_20, source, created_at, updated_at";

pub struct PostgresRepository {
    pool: Pool<Manager>,
    locks: SymbolLocks,
}

fn query_err(e: postgres::Error) -> PriceVaultError {
    PriceVaultError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn row_to_price(row: &Row) -> StoredPrice {
    StoredPrice {
        id: row.get(0),
        symbol: row.get(1),
        date: row.get(2),
        open: row.get(3),
        high: row.get(4),
        low: row.get(5),
        close: row.get(6),
        volume: row.get(7),
        quality_score: row.get(8),
        is_outlier: row.get(9),
        sma_20: row.get(10),
        rsi_14: row.get(11),
        volatility_20: row.get(12),
        source: row.get(13),
        created_at: row.get(14),
        updated_at: row.get(15),
    }
}

fn insert_row<C: GenericClient>(
    client: &mut C,
    r: &NewPriceRecord,
    now: DateTime<Utc>,
) -> Result<StoredPrice, PriceVaultError> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO prices (symbol, date, open, high, low, close, volume, quality_score,
                                     is_outlier, source, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
                 RETURNING {COLUMNS}"
            ),
            &[
                &r.symbol,
                &r.date,
                &r.open,
                &r.high,
                &r.low,
                &r.close,
                &r.volume,
                &r.quality_score,
                &r.is_outlier,
                &r.source,
                &now,
            ],
        )
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                PriceVaultError::DuplicateRecord {
                    symbol: r.symbol.clone(),
                    date: r.date,
                }
            } else {
                query_err(e)
            }
        })?;
    Ok(row_to_price(&row))
}

fn select_by_id<C: GenericClient>(
    client: &mut C,
    id: i64,
) -> Result<Option<StoredPrice>, PriceVaultError> {
    let row = client
        .query_opt(&format!("SELECT {COLUMNS} FROM prices WHERE id = $1"), &[&id])
        .map_err(query_err)?;
    Ok(row.as_ref().map(row_to_price))
}

fn select_by_key<C: GenericClient>(
    client: &mut C,
    symbol: &str,
    date: DateTime<Utc>,
) -> Result<Option<StoredPrice>, PriceVaultError> {
    let row = client
        .query_opt(
            &format!("SELECT {COLUMNS} FROM prices WHERE symbol = $1 AND date = $2"),
            &[&symbol, &date],
        )
        .map_err(query_err)?;
    Ok(row.as_ref().map(row_to_price))
}

fn write_row<C: GenericClient>(client: &mut C, row: &StoredPrice) -> Result<(), PriceVaultError> {
    client
        .execute(
            "UPDATE prices SET open = $2, high = $3, low = $4, close = $5, volume = $6,
                    quality_score = $7, is_outlier = $8, sma_20 = $9, rsi_14 = $10,
                    volatility_20 = $11, updated_at = $12
             WHERE id = $1",
            &[
                &row.id,
                &row.open,
                &row.high,
                &row.low,
                &row.close,
                &row.volume,
                &row.quality_score,
                &row.is_outlier,
                &row.sma_20,
                &row.rsi_14,
                &row.volatility_20,
                &row.updated_at,
            ],
        )
        .map_err(query_err)?;
    Ok(())
}

impl PostgresRepository {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PriceVaultError> {
        let connection_string = config
            .get_string("postgres", "connection_string")
            .ok_or_else(|| PriceVaultError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;

        let pg_config: postgres::Config =
            connection_string
                .parse()
                .map_err(|e: postgres::Error| PriceVaultError::ConfigInvalid {
                    section: "postgres".into(),
                    key: "connection_string".into(),
                    reason: e.to_string(),
                })?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| PriceVaultError::Database {
                reason: e.to_string(),
            })?;
        info!(pool_size, "connected to PostgreSQL store");

        Ok(Self {
            pool,
            locks: SymbolLocks::default(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), PriceVaultError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS prices (
                id BIGSERIAL PRIMARY KEY,
                symbol TEXT NOT NULL,
                date TIMESTAMPTZ NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume BIGINT NOT NULL,
                quality_score DOUBLE PRECISION,
                is_outlier BOOLEAN,
                sma_20 DOUBLE PRECISION,
                rsi_14 DOUBLE PRECISION,
                volatility_20 DOUBLE PRECISION,
                source TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (symbol, date)
            );
            CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);",
        )
        .map_err(query_err)
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, PriceVaultError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| PriceVaultError::Database {
                reason: e.to_string(),
            })
    }
}

impl PriceRepository for PostgresRepository {
    fn insert(&self, record: &NewPriceRecord) -> Result<StoredPrice, PriceVaultError> {
        let handles = self.locks.handles([record.symbol.as_str()]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        insert_row(&mut *conn, record, Utc::now())
    }

    fn insert_batch(&self, records: &[NewPriceRecord]) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles(records.iter().map(|r| r.symbol.as_str()));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let now = Utc::now();
        for record in records {
            insert_row(&mut tx, record, now)?;
        }
        tx.commit().map_err(query_err)?;
        debug!(rows = records.len(), "inserted batch");
        Ok(records.len())
    }

    fn update(&self, id: i64, patch: &PricePatch) -> Result<StoredPrice, PriceVaultError> {
        let symbol = {
            let mut conn = self.conn()?;
            select_by_id(&mut *conn, id)?
                .ok_or(PriceVaultError::RecordNotFound { id })?
                .symbol
        };
        let handles = self.locks.handles([symbol.as_str()]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let mut row = select_by_id(&mut tx, id)?.ok_or(PriceVaultError::RecordNotFound { id })?;
        patch.apply(&mut row);
        row.updated_at = Utc::now();
        write_row(&mut tx, &row)?;
        tx.commit().map_err(query_err)?;
        Ok(row)
    }

    fn update_batch(&self, patches: &[(i64, PricePatch)]) -> Result<usize, PriceVaultError> {
        let ids: Vec<i64> = patches.iter().map(|(id, _)| *id).collect();
        let symbols: BTreeSet<String> = {
            let mut conn = self.conn()?;
            conn.query("SELECT DISTINCT symbol FROM prices WHERE id = ANY($1)", &[&ids])
                .map_err(query_err)?
                .iter()
                .map(|row| row.get(0))
                .collect()
        };
        let handles = self.locks.handles(symbols.iter().map(String::as_str));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let now = Utc::now();
        for (id, patch) in patches {
            let mut row =
                select_by_id(&mut tx, *id)?.ok_or(PriceVaultError::RecordNotFound { id: *id })?;
            patch.apply(&mut row);
            row.updated_at = now;
            write_row(&mut tx, &row)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(patches.len())
    }

    fn upsert_batch(&self, records: &[NewPriceRecord]) -> Result<UpsertCounts, PriceVaultError> {
        let handles = self.locks.handles(records.iter().map(|r| r.symbol.as_str()));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let now = Utc::now();
        let mut counts = UpsertCounts::default();
        for record in records {
            match select_by_key(&mut tx, &record.symbol, record.date)? {
                Some(mut row) => {
                    record.as_patch().apply(&mut row);
                    row.updated_at = now;
                    write_row(&mut tx, &row)?;
                    counts.updated += 1;
                }
                None => {
                    insert_row(&mut tx, record, now)?;
                    counts.inserted += 1;
                }
            }
        }
        tx.commit().map_err(query_err)?;
        Ok(counts)
    }

    fn get(
        &self,
        symbol: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<StoredPrice>, PriceVaultError> {
        let mut conn = self.conn()?;
        select_by_key(&mut *conn, symbol, date)
    }

    fn get_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError> {
        let mut conn = self.conn()?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM prices
                     WHERE symbol = $1 AND date >= $2 AND date <= $3
                     ORDER BY date ASC"
                ),
                &[&symbol, &start, &end],
            )
            .map_err(query_err)?;
        Ok(rows.iter().map(row_to_price).collect())
    }

    fn get_all(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError> {
        let mut conn = self.conn()?;
        let limit: Option<i64> = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = conn
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM prices WHERE symbol = $1 ORDER BY date DESC LIMIT $2"
                ),
                &[&symbol, &limit],
            )
            .map_err(query_err)?;
        Ok(rows.iter().map(row_to_price).collect())
    }

    fn count(&self, symbol: &str) -> Result<u64, PriceVaultError> {
        let mut conn = self.conn()?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM prices WHERE symbol = $1", &[&symbol])
            .map_err(query_err)?;
        let n: i64 = row.get(0);
        Ok(n as u64)
    }

    fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles([symbol]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM prices WHERE symbol = $1 AND date = $2",
                &[&symbol, &date],
            )
            .map_err(query_err)?;
        Ok(n as usize)
    }

    fn delete_all(&self, symbol: &str) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles([symbol]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM prices WHERE symbol = $1", &[&symbol])
            .map_err(query_err)?;
        info!(symbol, deleted = n, "deleted symbol");
        Ok(n as usize)
    }

    fn date_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, PriceVaultError> {
        let mut conn = self.conn()?;
        let row = conn
            .query_one(
                "SELECT MIN(date), MAX(date) FROM prices WHERE symbol = $1",
                &[&symbol],
            )
            .map_err(query_err)?;
        let min: Option<DateTime<Utc>> = row.get(0);
        let max: Option<DateTime<Utc>> = row.get(1);
        Ok(min.zip(max))
    }

    fn all_symbols(&self) -> Result<BTreeSet<String>, PriceVaultError> {
        let mut conn = self.conn()?;
        let rows = conn
            .query("SELECT DISTINCT symbol FROM prices", &[])
            .map_err(query_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn ping(&self) -> Result<(), PriceVaultError> {
        let mut conn = self.conn()?;
        conn.simple_query("SELECT 1").map_err(query_err)?;
        Ok(())
    }

    fn stats(&self) -> Result<DatabaseStats, PriceVaultError> {
        let mut conn = self.conn()?;
        let row = conn
            .query_one(
                "SELECT COUNT(*), COUNT(DISTINCT symbol), MIN(date), MAX(date),
                        COUNT(quality_score), AVG(quality_score),
                        COUNT(*) FILTER (WHERE is_outlier)
                 FROM prices",
                &[],
            )
            .map_err(query_err)?;
        let total: i64 = row.get(0);
        let symbols: i64 = row.get(1);
        let scored: i64 = row.get(4);
        let outliers: i64 = row.get(6);

        Ok(DatabaseStats {
            backend: "postgres".to_string(),
            total_records: total as u64,
            symbol_count: symbols as u64,
            earliest: row.get(2),
            latest: row.get(3),
            scored_records: scored as u64,
            average_quality: row.get(5),
            outlier_count: outliers as u64,
        })
    }
}
