//! Façade over storage, the range cache and the pipeline.
//!
//! Reads go cache first, then storage. Every write to storage clears the
//! cache; `save_data` then re-caches the range it just wrote.

use crate::domain::asset_profile::AssetRegistry;
use crate::domain::cache::{CacheStats, RangeCache, RangeKey};
use crate::domain::error::{PriceVaultError, ValidationError};
use crate::domain::indicators::compute_indicator_rows;
use crate::domain::ohlcv::ScoredBar;
use crate::domain::pipeline::{PipelineOrchestrator, PipelineReport};
use crate::domain::quality::QualityScorer;
use crate::domain::records::RawPriceData;
use crate::domain::settings::Settings;
use crate::domain::validator::{DEFAULT_OUTLIER_THRESHOLD, detect_outliers};
use crate::ports::storage_port::{
    DatabaseStats, NewPriceRecord, PricePatch, PriceRepository, StoredPrice, UpsertCounts,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Storage answers but could not be fully queried.
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub enabled: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub pipeline: ComponentHealth,
    pub symbol_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub symbol: String,
    pub pipeline: PipelineReport,
    pub inserted: usize,
    pub updated: usize,
    /// Pipeline output that still failed the canonical bar check.
    pub rejected: usize,
}

pub struct DataManager {
    repo: Arc<dyn PriceRepository>,
    cache: Option<RangeCache>,
    pipeline: Option<PipelineOrchestrator>,
}

impl DataManager {
    pub fn new(
        repo: Arc<dyn PriceRepository>,
        cache: Option<RangeCache>,
        pipeline: Option<PipelineOrchestrator>,
    ) -> Self {
        Self {
            repo,
            cache,
            pipeline,
        }
    }

    pub fn from_settings(
        repo: Arc<dyn PriceRepository>,
        settings: &Settings,
        registry: Arc<AssetRegistry>,
    ) -> Self {
        let pipeline = settings.pipeline.enabled.then(|| {
            PipelineOrchestrator::with_engine(
                registry,
                settings.calendar.clone(),
                settings.pipeline.engine,
            )
        });
        Self::new(repo, settings.cache.build(), pipeline)
    }

    pub fn repository(&self) -> &dyn PriceRepository {
        self.repo.as_ref()
    }

    pub fn pipeline(&self) -> Option<&PipelineOrchestrator> {
        self.pipeline.as_ref()
    }

    /// Bars for `[start, end]`, oldest first. `None` when storage has no rows
    /// in range. With `apply_pipeline` the stored rows are re-cleaned and
    /// re-scored before being returned (a no-op without a pipeline). Stored
    /// and re-processed snapshots of a range are cached separately.
    pub fn load_data(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        apply_pipeline: bool,
    ) -> Result<Option<Arc<[ScoredBar]>>, PriceVaultError> {
        let pipeline = self.pipeline.as_ref().filter(|_| apply_pipeline);
        let key = if pipeline.is_some() {
            RangeKey::processed(symbol, start, end)
        } else {
            RangeKey::new(symbol, start, end)
        };
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(Some(hit));
        }

        let rows = self.repo.get_range(symbol, start, end)?;
        if rows.is_empty() {
            debug!(symbol, %start, %end, "no stored rows in range");
            return Ok(None);
        }

        let bars: Vec<ScoredBar> = match pipeline {
            Some(pipeline) => {
                let raw: Vec<RawPriceData> = rows.iter().map(StoredPrice::to_raw).collect();
                let outcome = pipeline.process(&raw, symbol);
                outcome
                    .records
                    .iter()
                    .filter_map(|r| canonical(r.to_scored(), symbol))
                    .collect()
            }
            None => rows
                .iter()
                .filter_map(|r| canonical(r.to_scored(), symbol))
                .collect(),
        };

        let bars: Arc<[ScoredBar]> = bars.into();
        if let Some(cache) = &self.cache {
            cache.put(key, Arc::clone(&bars));
        }
        Ok(Some(bars))
    }

    /// Inserts the batch under `symbol`. Any existing `(symbol, date)` fails
    /// the whole batch with `DuplicateRecord`.
    pub fn save_data(
        &self,
        symbol: &str,
        batch: &[ScoredBar],
        source: &str,
    ) -> Result<usize, PriceVaultError> {
        for bar in batch {
            bar.bar.check_invariants()?;
        }
        let inserted = self.repo.insert_table(batch, symbol, source)?;
        self.clear_cache();

        let span = batch
            .iter()
            .map(|b| b.bar.date)
            .fold(None, |acc: Option<(DateTime<Utc>, DateTime<Utc>)>, d| {
                Some(acc.map_or((d, d), |(lo, hi)| (lo.min(d), hi.max(d))))
            });
        // Rows are committed by now; a failed re-read only skips caching.
        if let (Some(cache), Some((start, end))) = (&self.cache, span) {
            match self.repo.get_range(symbol, start, end) {
                Ok(rows) => {
                    let bars: Arc<[ScoredBar]> = rows
                        .iter()
                        .filter_map(|r| canonical(r.to_scored(), symbol))
                        .collect();
                    cache.put(RangeKey::new(symbol, start, end), bars);
                }
                Err(e) => warn!(symbol, error = %e, "saved batch not cached"),
            }
        }

        info!(symbol, source, inserted, "saved batch");
        Ok(inserted)
    }

    /// Patches rows that exist and inserts the rest.
    pub fn update_data(
        &self,
        symbol: &str,
        batch: &[ScoredBar],
        source: &str,
    ) -> Result<UpsertCounts, PriceVaultError> {
        for bar in batch {
            bar.bar.check_invariants()?;
        }
        let records: Vec<NewPriceRecord> = batch
            .iter()
            .map(|bar| NewPriceRecord {
                symbol: symbol.to_string(),
                ..NewPriceRecord::from_scored(bar, source)
            })
            .collect();
        let counts = self.repo.upsert_batch(&records)?;
        self.clear_cache();
        info!(
            symbol,
            inserted = counts.inserted,
            updated = counts.updated,
            "updated batch"
        );
        Ok(counts)
    }

    /// Runs raw observations through the pipeline and upserts the result.
    /// Requires the pipeline to be enabled.
    pub fn ingest(
        &self,
        symbol: &str,
        raw: &[RawPriceData],
        source: &str,
    ) -> Result<IngestReport, PriceVaultError> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| PriceVaultError::ConfigInvalid {
                section: "pipeline".into(),
                key: "enabled".into(),
                reason: "ingesting raw data needs the pipeline".into(),
            })?;

        let outcome = pipeline.process(raw, symbol);
        let mut rejected = 0;
        let records: Vec<NewPriceRecord> = outcome
            .records
            .iter()
            .filter(|r| match r.to_bar() {
                Ok(_) => true,
                Err(e) => {
                    warn!(symbol, date = %r.date, error = %e, "rejecting record");
                    rejected += 1;
                    false
                }
            })
            .map(|r| NewPriceRecord {
                symbol: symbol.to_string(),
                source: source.to_string(),
                ..NewPriceRecord::from(r)
            })
            .collect();

        let counts = self.repo.upsert_batch(&records)?;
        self.clear_cache();
        info!(
            symbol,
            inserted = counts.inserted,
            updated = counts.updated,
            rejected,
            "ingested"
        );

        Ok(IngestReport {
            symbol: symbol.to_string(),
            pipeline: outcome.report,
            inserted: counts.inserted,
            updated: counts.updated,
            rejected,
        })
    }

    /// Re-scores every stored row of `symbol` and refreshes its outlier
    /// flags. Returns the number of rows written.
    pub fn recompute_quality(&self, symbol: &str) -> Result<usize, PriceVaultError> {
        let rows = self.ascending(symbol)?;
        if rows.is_empty() {
            return Err(PriceVaultError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let scorer = self
            .pipeline
            .as_ref()
            .map_or_else(QualityScorer::default, |p| *p.engine().scorer());
        let threshold = self
            .pipeline
            .as_ref()
            .map_or(DEFAULT_OUTLIER_THRESHOLD, |p| p.engine().outlier_threshold);

        let raw: Vec<RawPriceData> = rows.iter().map(StoredPrice::to_raw).collect();
        let scores = scorer.score_batch(&raw);
        let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
        let flags = detect_outliers(&closes, threshold);

        let patches: Vec<(i64, PricePatch)> = rows
            .iter()
            .zip(scores.into_iter().zip(flags))
            .map(|(row, (score, flag))| {
                (
                    row.id,
                    PricePatch {
                        quality_score: Some(score),
                        is_outlier: Some(flag),
                        ..PricePatch::default()
                    },
                )
            })
            .collect();

        let written = self.repo.update_batch(&patches)?;
        self.clear_cache();
        info!(symbol, rows = written, "recomputed quality");
        Ok(written)
    }

    /// Writes SMA(20), RSI(14) and 20-day volatility for every stored row of
    /// `symbol`. Rows inside every warm-up window are left untouched.
    pub fn enrich_indicators(&self, symbol: &str) -> Result<usize, PriceVaultError> {
        let rows = self.ascending(symbol)?;
        if rows.is_empty() {
            return Err(PriceVaultError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
        let patches: Vec<(i64, PricePatch)> = rows
            .iter()
            .zip(compute_indicator_rows(&closes))
            .map(|(row, ind)| {
                (
                    row.id,
                    PricePatch {
                        sma_20: ind.sma_20,
                        rsi_14: ind.rsi_14,
                        volatility_20: ind.volatility_20,
                        ..PricePatch::default()
                    },
                )
            })
            .filter(|(_, patch)| !patch.is_empty())
            .collect();

        let written = self.repo.update_batch(&patches)?;
        self.clear_cache();
        info!(symbol, rows = written, "enriched indicators");
        Ok(written)
    }

    pub fn delete_data(&self, symbol: &str, date: DateTime<Utc>) -> Result<usize, PriceVaultError> {
        let n = self.repo.delete(symbol, date)?;
        self.clear_cache();
        Ok(n)
    }

    pub fn delete_symbol(&self, symbol: &str) -> Result<usize, PriceVaultError> {
        let n = self.repo.delete_all(symbol)?;
        self.clear_cache();
        Ok(n)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Never fails; an unreachable store marks the report unhealthy.
    pub fn health_check(&self) -> HealthReport {
        let (database, symbol_count, status) = match self.repo.ping() {
            Ok(()) => match self.repo.all_symbols() {
                Ok(symbols) => (
                    ComponentHealth {
                        enabled: true,
                        active: true,
                        detail: None,
                    },
                    Some(symbols.len()),
                    HealthStatus::Healthy,
                ),
                Err(e) => (
                    ComponentHealth {
                        enabled: true,
                        active: true,
                        detail: Some(e.to_string()),
                    },
                    None,
                    HealthStatus::Degraded,
                ),
            },
            Err(e) => {
                warn!(error = %e, "storage unreachable");
                (
                    ComponentHealth {
                        enabled: true,
                        active: false,
                        detail: Some(e.to_string()),
                    },
                    None,
                    HealthStatus::Unhealthy,
                )
            }
        };

        let cache = ComponentHealth {
            enabled: self.cache.is_some(),
            active: self.cache.as_ref().is_some_and(|c| !c.is_empty()),
            detail: None,
        };
        let pipeline = ComponentHealth {
            enabled: self.pipeline.is_some(),
            active: self.pipeline.is_some(),
            detail: self
                .pipeline
                .as_ref()
                .map(|p| format!("calendar {}", p.calendar().market())),
        };

        HealthReport {
            status,
            database,
            cache,
            pipeline,
            symbol_count,
        }
    }

    pub fn get_cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(RangeCache::stats)
    }

    pub fn get_database_stats(&self) -> Result<DatabaseStats, PriceVaultError> {
        self.repo.stats()
    }

    fn ascending(&self, symbol: &str) -> Result<Vec<StoredPrice>, PriceVaultError> {
        let mut rows = self.repo.get_all(symbol, None)?;
        rows.reverse();
        Ok(rows)
    }
}

fn canonical(bar: Result<ScoredBar, ValidationError>, symbol: &str) -> Option<ScoredBar> {
    match bar {
        Ok(bar) => Some(bar),
        Err(e) => {
            warn!(symbol, error = %e, "skipping non-canonical row");
            None
        }
    }
}
