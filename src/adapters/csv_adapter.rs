//! CSV file market data adapter.
//!
//! One file per symbol, `DIR/SYMBOL.csv`, with the header
//! `timestamp,open,high,low,close,volume`.

use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::domain::error::SamscriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeline::DateRange;
use crate::ports::data_port::DataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` (also with a `T`) or integer
/// epoch milliseconds. Dates are taken as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn field(record: &csv::StringRecord, index: usize, name: &str, line: u64) -> Result<f64, SamscriptError> {
    let raw = record.get(index).ok_or_else(|| SamscriptError::Data {
        reason: format!("line {}: missing {} column", line, name),
    })?;
    raw.trim().parse().map_err(|e| SamscriptError::Data {
        reason: format!("line {}: invalid {} value '{}': {}", line, name, raw, e),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, SamscriptError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| SamscriptError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| SamscriptError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let raw_ts = record.get(0).ok_or_else(|| SamscriptError::Data {
                reason: format!("line {}: missing timestamp column", line),
            })?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| SamscriptError::Data {
                reason: format!("line {}: invalid timestamp '{}'", line, raw_ts),
            })?;

            if !range.contains(timestamp) {
                continue;
            }

            bars.push(Bar::new(
                symbol,
                timestamp,
                field(&record, 1, "open", line)?,
                field(&record, 2, "high", line)?,
                field(&record, 3, "low", line)?,
                field(&record, 4, "close", line)?,
                field(&record, 5, "volume", line)?,
            ));
        }

        bars.sort_by_key(|b| b.timestamp);
        tracing::debug!(symbol, bars = bars.len(), "loaded csv");
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, SamscriptError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| SamscriptError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    symbols.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
