//! SQLite price repository.

use crate::adapters::symbol_locks::SymbolLocks;
use crate::domain::error::PriceVaultError;
use crate::ports::config_port::ConfigPort;
use crate::ports::storage_port::{
    DatabaseStats, NewPriceRecord, PricePatch, PriceRepository, StoredPrice, UpsertCounts,
};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

const COLUMNS: &str = "id, symbol, date, open, high, low, close, volume, quality_score, \
                       is_outlier, sma_20, rsi_14, volatility_20, source, created_at, updated_at";

pub struct SqliteRepository {
    pool: Pool<SqliteConnectionManager>,
    locks: SymbolLocks,
}

fn query_err(e: rusqlite::Error) -> PriceVaultError {
    PriceVaultError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width nanosecond RFC3339 in UTC, so text order is time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_price(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredPrice> {
    Ok(StoredPrice {
        id: row.get(0)?,
        symbol: row.get(1)?,
        date: parse_ts(2, row.get(2)?)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        quality_score: row.get(8)?,
        is_outlier: row.get(9)?,
        sma_20: row.get(10)?,
        rsi_14: row.get(11)?,
        volatility_20: row.get(12)?,
        source: row.get(13)?,
        created_at: parse_ts(14, row.get(14)?)?,
        updated_at: parse_ts(15, row.get(15)?)?,
    })
}

fn insert_row(conn: &Connection, r: &NewPriceRecord, now: &str) -> Result<i64, PriceVaultError> {
    conn.execute(
        "INSERT INTO prices (symbol, date, open, high, low, close, volume, quality_score,
                             is_outlier, source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            r.symbol,
            ts(r.date),
            r.open,
            r.high,
            r.low,
            r.close,
            r.volume,
            r.quality_score,
            r.is_outlier,
            r.source,
            now
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            PriceVaultError::DuplicateRecord {
                symbol: r.symbol.clone(),
                date: r.date,
            }
        }
        other => query_err(other),
    })?;
    Ok(conn.last_insert_rowid())
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Option<StoredPrice>, PriceVaultError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM prices WHERE id = ?1"),
        params![id],
        row_to_price,
    )
    .optional()
    .map_err(query_err)
}

fn select_by_key(
    conn: &Connection,
    symbol: &str,
    date: DateTime<Utc>,
) -> Result<Option<StoredPrice>, PriceVaultError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM prices WHERE symbol = ?1 AND date = ?2"),
        params![symbol, ts(date)],
        row_to_price,
    )
    .optional()
    .map_err(query_err)
}

/// Writes every mutable column of `row` back by id.
fn write_row(conn: &Connection, row: &StoredPrice) -> Result<(), PriceVaultError> {
    conn.execute(
        "UPDATE prices SET open = ?2, high = ?3, low = ?4, close = ?5, volume = ?6,
                quality_score = ?7, is_outlier = ?8, sma_20 = ?9, rsi_14 = ?10,
                volatility_20 = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            row.id,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume,
            row.quality_score,
            row.is_outlier,
            row.sma_20,
            row.rsi_14,
            row.volatility_20,
            ts(row.updated_at)
        ],
    )
    .map_err(query_err)?;
    Ok(())
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<StoredPrice>, PriceVaultError> {
    let mut stmt = conn.prepare(sql).map_err(query_err)?;
    let rows = stmt.query_map(params, row_to_price).map_err(query_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
}

impl SqliteRepository {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PriceVaultError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| PriceVaultError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        if db_path == ":memory:" {
            return Self::in_memory();
        }

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        Self::open(&db_path, pool_size)
    }

    pub fn open(path: &str, pool_size: u32) -> Result<Self, PriceVaultError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| PriceVaultError::Database {
                reason: e.to_string(),
            })?;
        info!(path, pool_size, "opened SQLite store");

        Ok(Self {
            pool,
            locks: SymbolLocks::default(),
        })
    }

    /// Single-connection pool so every checkout sees the same database.
    pub fn in_memory() -> Result<Self, PriceVaultError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| PriceVaultError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            locks: SymbolLocks::default(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), PriceVaultError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                quality_score REAL,
                is_outlier INTEGER,
                sma_20 REAL,
                rsi_14 REAL,
                volatility_20 REAL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (symbol, date)
            );
            CREATE INDEX IF NOT EXISTS idx_prices_symbol_date ON prices(symbol, date);
            CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);",
        )
        .map_err(query_err)?;

        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, PriceVaultError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| PriceVaultError::Database {
                reason: e.to_string(),
            })
    }
}

impl PriceRepository for SqliteRepository {
    fn insert(&self, record: &NewPriceRecord) -> Result<StoredPrice, PriceVaultError> {
        let handles = self.locks.handles([record.symbol.as_str()]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let conn = self.conn()?;
        let id = insert_row(&conn, record, &ts(Utc::now()))?;
        select_by_id(&conn, id)?.ok_or(PriceVaultError::RecordNotFound { id })
    }

    fn insert_batch(&self, records: &[NewPriceRecord]) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles(records.iter().map(|r| r.symbol.as_str()));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let now = ts(Utc::now());
        for record in records {
            insert_row(&tx, record, &now)?;
        }
        tx.commit().map_err(query_err)?;

        debug!(rows = records.len(), "inserted batch");
        Ok(records.len())
    }

    fn update(&self, id: i64, patch: &PricePatch) -> Result<StoredPrice, PriceVaultError> {
        let symbol = {
            let conn = self.conn()?;
            select_by_id(&conn, id)?
                .ok_or(PriceVaultError::RecordNotFound { id })?
                .symbol
        };
        let handles = self.locks.handles([symbol.as_str()]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut row = select_by_id(&tx, id)?.ok_or(PriceVaultError::RecordNotFound { id })?;
        patch.apply(&mut row);
        row.updated_at = Utc::now();
        write_row(&tx, &row)?;
        tx.commit().map_err(query_err)?;
        Ok(row)
    }

    fn update_batch(&self, patches: &[(i64, PricePatch)]) -> Result<usize, PriceVaultError> {
        let symbols: BTreeSet<String> = {
            let conn = self.conn()?;
            let mut symbols = BTreeSet::new();
            for (id, _) in patches {
                let row = select_by_id(&conn, *id)?
                    .ok_or(PriceVaultError::RecordNotFound { id: *id })?;
                symbols.insert(row.symbol);
            }
            symbols
        };
        let handles = self.locks.handles(symbols.iter().map(String::as_str));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let now = Utc::now();
        for (id, patch) in patches {
            let mut row =
                select_by_id(&tx, *id)?.ok_or(PriceVaultError::RecordNotFound { id: *id })?;
            patch.apply(&mut row);
            row.updated_at = now;
            write_row(&tx, &row)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(patches.len())
    }

    fn upsert_batch(&self, records: &[NewPriceRecord]) -> Result<UpsertCounts, PriceVaultError> {
        let handles = self.locks.handles(records.iter().map(|r| r.symbol.as_str()));
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let now = Utc::now();
        let now_str = ts(now);
        let mut counts = UpsertCounts::default();
        for record in records {
            match select_by_key(&tx, &record.symbol, record.date)? {
                Some(mut row) => {
                    record.as_patch().apply(&mut row);
                    row.updated_at = now;
                    write_row(&tx, &row)?;
                    counts.updated += 1;
                }
                None => {
                    insert_row(&tx, record, &now_str)?;
                    counts.inserted += 1;
                }
            }
        }
        tx.commit().map_err(query_err)?;

        debug!(
            inserted = counts.inserted,
            updated = counts.updated,
            "upserted batch"
        );
        Ok(counts)
    }

    fn get(
        &self,
        symbol: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<StoredPrice>, PriceVaultError> {
        let conn = self.conn()?;
        select_by_key(&conn, symbol, date)
    }

    fn get_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError> {
        let conn = self.conn()?;
        collect_rows(
            &conn,
            &format!(
                "SELECT {COLUMNS} FROM prices
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC"
            ),
            params![symbol, ts(start), ts(end)],
        )
    }

    fn get_all(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError> {
        let conn = self.conn()?;
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        collect_rows(
            &conn,
            &format!(
                "SELECT {COLUMNS} FROM prices WHERE symbol = ?1 ORDER BY date DESC LIMIT ?2"
            ),
            params![symbol, limit],
        )
    }

    fn count(&self, symbol: &str) -> Result<u64, PriceVaultError> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM prices WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(n as u64)
    }

    fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles([symbol]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM prices WHERE symbol = ?1 AND date = ?2",
            params![symbol, ts(date)],
        )
        .map_err(query_err)
    }

    fn delete_all(&self, symbol: &str) -> Result<usize, PriceVaultError> {
        let handles = self.locks.handles([symbol]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM prices WHERE symbol = ?1", params![symbol])
            .map_err(query_err)?;
        info!(symbol, deleted, "deleted symbol");
        Ok(deleted)
    }

    fn date_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, PriceVaultError> {
        let conn = self.conn()?;
        let (min, max): (Option<String>, Option<String>) = conn
            .query_row(
                "SELECT MIN(date), MAX(date) FROM prices WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(query_err)?;

        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((
                parse_ts(0, min).map_err(query_err)?,
                parse_ts(1, max).map_err(query_err)?,
            ))),
            _ => Ok(None),
        }
    }

    fn all_symbols(&self) -> Result<BTreeSet<String>, PriceVaultError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM prices")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_err)?;
        rows.collect::<Result<BTreeSet<_>, _>>().map_err(query_err)
    }

    fn ping(&self) -> Result<(), PriceVaultError> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(query_err)?;
        Ok(())
    }

    fn stats(&self) -> Result<DatabaseStats, PriceVaultError> {
        let conn = self.conn()?;
        let (total, symbols, min, max, scored, avg, outliers): (
            i64,
            i64,
            Option<String>,
            Option<String>,
            i64,
            Option<f64>,
            i64,
        ) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT symbol), MIN(date), MAX(date),
                        COUNT(quality_score), AVG(quality_score),
                        COALESCE(SUM(CASE WHEN is_outlier = 1 THEN 1 ELSE 0 END), 0)
                 FROM prices",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .map_err(query_err)?;

        Ok(DatabaseStats {
            backend: "sqlite".to_string(),
            total_records: total as u64,
            symbol_count: symbols as u64,
            earliest: min.map(|s| parse_ts(2, s)).transpose().map_err(query_err)?,
            latest: max.map(|s| parse_ts(3, s)).transpose().map_err(query_err)?,
            scored_records: scored as u64,
            average_quality: avg,
            outlier_count: outliers as u64,
        })
    }
}
