use crate::config::DataConfig;
use crate::errors::{ResearchError, ResearchResult};
use crate::models::PriceTable;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const DATE_COLUMN: &str = "date";

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbols: Vec<String>,
    tables: BTreeMap<String, SnapshotTable>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotTable {
    dates: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl SnapshotTable {
    fn from_price_table(table: &PriceTable) -> Self {
        Self {
            dates: table.dates().to_vec(),
            columns: table
                .column_names()
                .filter_map(|name| table.column(name).map(|values| (name.to_string(), values.to_vec())))
                .collect(),
        }
    }

    fn into_price_table(self) -> ResearchResult<PriceTable> {
        PriceTable::new(self.dates, self.columns)
    }
}

/// Price tables for a symbol universe, keyed and iterated in symbol order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketData {
    tables: BTreeMap<String, PriceTable>,
}

impl MarketData {
    pub fn from_tables(tables: BTreeMap<String, PriceTable>) -> Self {
        Self { tables }
    }

    /// Loads the configured source, keeps the configured symbols and applies
    /// the inclusive date range.
    pub fn load(config: &DataConfig) -> Result<Self> {
        let source = config.source.as_path();
        let market_data = if source.is_dir() {
            Self::load_csv_dir(source, &config.symbols)?
        } else if source.is_file() {
            Self::load_from_file(source)?.select_symbols(&config.symbols)?
        } else {
            return Err(anyhow!(
                "Market data source {} does not exist",
                source.display()
            ));
        };
        let filtered = market_data.filter_dates(config.start, config.end)?;
        info!(
            "Loaded {} symbols with {} total rows from {}",
            filtered.tables.len(),
            filtered.tables.values().map(PriceTable::len).sum::<usize>(),
            source.display()
        );
        Ok(filtered)
    }

    /// Reads `<dir>/<SYMBOL>.csv` for every requested symbol.
    pub fn load_csv_dir(dir: &Path, symbols: &[String]) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for symbol in symbols {
            let symbol = symbol.trim();
            let path = dir.join(format!("{}.csv", symbol));
            let table = read_price_csv(&path)
                .with_context(|| format!("Failed to load market data for {}", symbol))?;
            tables.insert(symbol.to_string(), table);
        }
        Ok(Self { tables })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        let tables = snapshot
            .tables
            .into_iter()
            .map(|(symbol, table)| {
                table
                    .into_price_table()
                    .map(|t| (symbol.clone(), t))
                    .with_context(|| format!("Invalid snapshot table for {}", symbol))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { tables })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbols: self.symbols(),
            tables: self
                .tables
                .iter()
                .map(|(symbol, table)| (symbol.clone(), SnapshotTable::from_price_table(table)))
                .collect(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    /// Keeps `symbols` only; every requested symbol must be present.
    pub fn select_symbols(&self, symbols: &[String]) -> ResearchResult<Self> {
        let mut tables = BTreeMap::new();
        for symbol in symbols {
            let symbol = symbol.trim();
            let table = self.tables.get(symbol).ok_or_else(|| {
                ResearchError::data(format!("No market data for symbol {}", symbol))
            })?;
            tables.insert(symbol.to_string(), table.clone());
        }
        Ok(Self { tables })
    }

    /// Inclusive calendar-date filter; a symbol left without rows is an error.
    pub fn filter_dates(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> ResearchResult<Self> {
        if start.is_none() && end.is_none() {
            return Ok(self.clone());
        }
        let start_bound = start
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt));
        let end_bound = end
            .and_then(|date| date.and_hms_nano_opt(23, 59, 59, 999_999_999))
            .map(|dt| Utc.from_utc_datetime(&dt));

        let mut tables = BTreeMap::new();
        for (symbol, table) in &self.tables {
            let filtered = table.filter_range(start_bound, end_bound);
            if filtered.is_empty() {
                return Err(ResearchError::data(format!(
                    "No rows for {} between {} and {}",
                    symbol,
                    start.map_or("-".to_string(), |d| d.to_string()),
                    end.map_or("-".to_string(), |d| d.to_string())
                )));
            }
            tables.insert(symbol.clone(), filtered);
        }
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &BTreeMap<String, PriceTable> {
        &self.tables
    }

    pub fn symbols(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// `YYYY-MM-DD` or RFC 3339, truncated to the UTC calendar day.
pub fn parse_market_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => DateTime::parse_from_rfc3339(raw)
            .ok()?
            .with_timezone(&Utc)
            .date_naive(),
    };
    date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt))
}

/// Reads one symbol's CSV: a `date` column plus numeric columns.
///
/// Empty cells become NaN. Rows are returned sorted by date.
pub fn read_price_csv(path: &Path) -> Result<PriceTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|header| header.to_ascii_lowercase())
        .collect();
    let date_idx = headers
        .iter()
        .position(|header| header == DATE_COLUMN)
        .ok_or_else(|| ResearchError::data(format!("{} has no date column", path.display())))?;

    let mut dates = Vec::new();
    let mut columns: BTreeMap<String, Vec<f64>> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != date_idx)
        .map(|(_, header)| (header.clone(), Vec::new()))
        .collect();

    for (row_idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        let line = row_idx + 2;
        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = parse_market_date(raw_date).ok_or_else(|| {
            ResearchError::data(format!(
                "{} line {}: invalid date '{}'",
                path.display(),
                line,
                raw_date
            ))
        })?;
        dates.push(date);

        for (idx, header) in headers.iter().enumerate() {
            if idx == date_idx {
                continue;
            }
            let cell = record.get(idx).unwrap_or_default();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse::<f64>().map_err(|_| {
                    ResearchError::data(format!(
                        "{} line {}: column {} is not numeric ('{}')",
                        path.display(),
                        line,
                        header,
                        cell
                    ))
                })?
            };
            if let Some(values) = columns.get_mut(header) {
                values.push(value);
            }
        }
    }

    let table = PriceTable::new(dates, columns)?.sorted_by_date();
    if let Some(duplicate) = table.first_duplicate_date() {
        return Err(ResearchError::data(format!(
            "{} has duplicate date {}",
            path.display(),
            duplicate.format("%Y-%m-%d")
        ))
        .into());
    }
    Ok(table)
}
