//! CLI definition and dispatch.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvRawSource;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::asset_profile::AssetRegistry;
use crate::domain::data_manager::{DataManager, HealthStatus, IngestReport};
use crate::domain::error::{PriceVaultError, ValidationError};
use crate::domain::settings::Settings;
use crate::logging::ensure_logging;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::RawDataSource;
use crate::ports::storage_port::PriceRepository;

#[derive(Parser, Debug)]
#[command(
    name = "pricevault",
    about = "Validated, cleaned and quality-scored OHLCV storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import CSV files through the cleaning pipeline
    Import {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding one `<SYMBOL>.csv` per symbol
        #[arg(long, conflicts_with = "file")]
        dir: Option<PathBuf>,
        /// A single CSV file; needs exactly one --symbol
        #[arg(long)]
        file: Option<PathBuf>,
        /// Symbols to import; defaults to every CSV in --dir
        #[arg(long = "symbol")]
        symbols: Vec<String>,
        /// Source tag stored with the rows
        #[arg(long, default_value = "csv")]
        source: String,
    },
    /// Print stored bars as JSON
    Load {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        /// YYYY-MM-DD (market timezone) or RFC 3339
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Re-run the pipeline over the stored rows
        #[arg(long)]
        clean: bool,
    },
    /// Show stored ranges and database statistics
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long = "symbol")]
        symbols: Vec<String>,
    },
    /// Report storage, cache and pipeline health
    Health {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Re-score stored rows
    Recompute {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
    },
    /// Write SMA, RSI and volatility columns for stored rows
    Enrich {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
    },
    /// Show the trading profile of a symbol
    Profile {
        #[arg(long)]
        symbol: String,
        /// Check an order quantity against the profile
        #[arg(long)]
        qty: Option<u64>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Import {
            config,
            dir,
            file,
            symbols,
            source,
        } => run_import(&config, dir.as_deref(), file.as_deref(), &symbols, &source),
        Command::Load {
            config,
            symbol,
            start,
            end,
            clean,
        } => run_load(&config, &symbol, start.as_deref(), end.as_deref(), clean),
        Command::Info { config, symbols } => run_info(&config, &symbols),
        Command::Health { config } => run_health(&config),
        Command::Recompute { config, symbol } => run_recompute(&config, &symbol),
        Command::Enrich { config, symbol } => run_enrich(&config, &symbol),
        Command::Profile { symbol, qty } => run_profile(&symbol, qty),
    }
}

fn fail(err: &PriceVaultError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to encode output: {e}");
            ExitCode::from(1)
        }
    }
}

/// Everything a storage-backed command needs.
pub struct Context {
    pub settings: Settings,
    pub manager: DataManager,
}

pub fn load_context(config_path: &Path) -> Result<Context, PriceVaultError> {
    let config = FileConfigAdapter::from_file(config_path)?;
    let settings = Settings::from_config(&config)?;
    if let Err(e) = ensure_logging(&settings.logging) {
        eprintln!("logging unavailable: {e}");
    }

    let repo = open_repository(&config)?;
    let registry = Arc::new(AssetRegistry::with_defaults());
    let manager = DataManager::from_settings(repo, &settings, registry);
    Ok(Context { settings, manager })
}

/// PostgreSQL when built with it and configured, SQLite otherwise.
pub fn open_repository(config: &dyn ConfigPort) -> Result<Arc<dyn PriceRepository>, PriceVaultError> {
    #[cfg(feature = "postgres")]
    {
        if config.get_string("postgres", "connection_string").is_some() {
            use crate::adapters::postgres_adapter::PostgresRepository;
            let repo = PostgresRepository::from_config(config)?;
            repo.initialize_schema()?;
            return Ok(Arc::new(repo));
        }
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteRepository;
        let repo = SqliteRepository::from_config(config)?;
        repo.initialize_schema()?;
        Ok(Arc::new(repo))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = config;
        Err(PriceVaultError::ConfigMissing {
            section: "postgres".into(),
            key: "connection_string".into(),
        })
    }
}

/// A date means the market-local day: midnight for a start bound, the last
/// second of the day for an end bound.
pub fn parse_bound(
    value: &str,
    tz: Tz,
    end_of_day: bool,
    field: &str,
) -> Result<DateTime<Utc>, PriceVaultError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ValidationError::new(field, format!("'{value}' is neither YYYY-MM-DD nor RFC 3339"))
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
    } else {
        NaiveTime::MIN
    };
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            ValidationError::new(field, format!("{value} does not exist in {}", tz.name())).into()
        })
}

pub fn run_import(
    config_path: &Path,
    dir: Option<&Path>,
    file: Option<&Path>,
    symbols: &[String],
    source: &str,
) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    let (reader, symbols) = match (dir, file) {
        (_, Some(file)) => {
            if symbols.len() != 1 {
                eprintln!("error: --file needs exactly one --symbol");
                return ExitCode::from(1);
            }
            (
                CsvRawSource::from_file(file.to_path_buf()).with_source_name(source),
                symbols.to_vec(),
            )
        }
        (Some(dir), None) => {
            let reader = CsvRawSource::new(dir.to_path_buf()).with_source_name(source);
            let symbols = if symbols.is_empty() {
                match reader.list_symbols() {
                    Ok(s) => s,
                    Err(e) => return fail(&e),
                }
            } else {
                symbols.to_vec()
            };
            (reader, symbols)
        }
        (None, None) => {
            eprintln!("error: one of --dir or --file is required");
            return ExitCode::from(1);
        }
    };

    if symbols.is_empty() {
        eprintln!("error: no symbols to import");
        return ExitCode::from(5);
    }

    let mut reports: Vec<IngestReport> = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let raw = match reader.fetch(symbol) {
            Ok(r) => r,
            Err(e) => return fail(&e),
        };
        match ctx.manager.ingest(symbol, &raw, reader.source_name()) {
            Ok(report) => {
                eprintln!(
                    "{}: {} rows read, {} inserted, {} updated, {} rejected",
                    symbol,
                    raw.len(),
                    report.inserted,
                    report.updated,
                    report.rejected
                );
                reports.push(report);
            }
            Err(e) => return fail(&e),
        }
    }

    print_json(&reports)
}

pub fn run_load(
    config_path: &Path,
    symbol: &str,
    start: Option<&str>,
    end: Option<&str>,
    clean: bool,
) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let tz = ctx.settings.calendar.timezone();

    let stored = match ctx.manager.repository().date_range(symbol) {
        Ok(Some(range)) => range,
        Ok(None) => {
            return fail(&PriceVaultError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Err(e) => return fail(&e),
    };

    let start = match start.map(|s| parse_bound(s, tz, false, "start")).transpose() {
        Ok(s) => s.unwrap_or(stored.0),
        Err(e) => return fail(&e),
    };
    let end = match end.map(|s| parse_bound(s, tz, true, "end")).transpose() {
        Ok(e) => e.unwrap_or(stored.1),
        Err(e) => return fail(&e),
    };

    match ctx.manager.load_data(symbol, start, end, clean) {
        Ok(Some(bars)) => {
            eprintln!("{symbol}: {} bars, {start} to {end}", bars.len());
            print_json(&*bars)
        }
        Ok(None) => fail(&PriceVaultError::NoData {
            symbol: symbol.to_string(),
        }),
        Err(e) => fail(&e),
    }
}

#[derive(Debug, Serialize)]
struct SymbolInfo {
    symbol: String,
    count: u64,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

pub fn run_info(config_path: &Path, symbols: &[String]) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let repo = ctx.manager.repository();

    let symbols: Vec<String> = if symbols.is_empty() {
        match repo.all_symbols() {
            Ok(s) => s.into_iter().collect(),
            Err(e) => return fail(&e),
        }
    } else {
        symbols.to_vec()
    };

    let mut infos = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let count = match repo.count(&symbol) {
            Ok(c) => c,
            Err(e) => return fail(&e),
        };
        let range = match repo.date_range(&symbol) {
            Ok(r) => r,
            Err(e) => return fail(&e),
        };
        if count == 0 {
            eprintln!("{symbol}: no data found");
        }
        infos.push(SymbolInfo {
            symbol,
            count,
            first: range.map(|r| r.0),
            last: range.map(|r| r.1),
        });
    }

    let database = match ctx.manager.get_database_stats() {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    print_json(&serde_json::json!({
        "symbols": infos,
        "database": database,
        "cache": ctx.manager.get_cache_stats(),
    }))
}

pub fn run_health(config_path: &Path) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let report = ctx.manager.health_check();
    let code = print_json(&report);
    match report.status {
        HealthStatus::Healthy => code,
        HealthStatus::Degraded | HealthStatus::Unhealthy => ExitCode::from(3),
    }
}

pub fn run_recompute(config_path: &Path, symbol: &str) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    match ctx.manager.recompute_quality(symbol) {
        Ok(n) => {
            eprintln!("{symbol}: re-scored {n} rows");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

pub fn run_enrich(config_path: &Path, symbol: &str) -> ExitCode {
    let ctx = match load_context(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    match ctx.manager.enrich_indicators(symbol) {
        Ok(n) => {
            eprintln!("{symbol}: wrote indicators for {n} rows");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

pub fn run_profile(symbol: &str, qty: Option<u64>) -> ExitCode {
    let registry = AssetRegistry::with_defaults();
    let Some(profile) = registry.get(symbol) else {
        eprintln!("{symbol}: no profile registered");
        eprintln!(
            "known symbols: {}",
            registry.symbols().into_iter().collect::<Vec<_>>().join(", ")
        );
        return ExitCode::from(5);
    };

    let code = print_json(profile);
    eprintln!("total cost: {:.1} bps", profile.total_cost_bps());

    if let Some(qty) = qty {
        let check = profile.validate_order_size(qty);
        match check.reason {
            None => eprintln!("order of {qty}: ok"),
            Some(reason) => {
                eprintln!("order of {qty}: rejected ({reason})");
                return ExitCode::from(4);
            }
        }
    }
    code
}
