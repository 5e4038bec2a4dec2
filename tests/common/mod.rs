#![allow(dead_code)]

use chrono::{NaiveDate, NaiveTime};
use samscript::domain::error::SamscriptError;
pub use samscript::domain::ohlcv::Bar;
use samscript::domain::timeline::DateRange;
use samscript::ports::data_port::DataPort;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

pub const DAY_MS: i64 = 86_400_000;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    /// Fetch every known symbol, the way the backtest front end does.
    pub fn load_all(&self, range: &DateRange) -> Result<BTreeMap<String, Vec<Bar>>, SamscriptError> {
        let mut out = BTreeMap::new();
        for symbol in self.list_symbols()? {
            out.insert(symbol.clone(), self.fetch_bars(&symbol, range)?);
        }
        Ok(out)
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, SamscriptError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(SamscriptError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| bars.iter().filter(|b| range.contains(b.timestamp)).cloned().collect())
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, SamscriptError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn make_bar(symbol: &str, date: &str, close: f64) -> Bar {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
    Bar::new(symbol, millis(day), close - 1.0, close + 1.0, close - 2.0, close, 1000.0)
}

/// One bar per consecutive day starting at `start_date`, each with the given close.
pub fn bars_from_closes(symbol: &str, start_date: &str, closes: &[f64]) -> Vec<Bar> {
    let start = millis(NaiveDate::parse_from_str(start_date, "%Y-%m-%d").unwrap());
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(symbol, start + i as i64 * DAY_MS, c, c, c, c, 1000.0))
        .collect()
}

pub fn generate_bars(symbol: &str, start_date: &str, count: usize, start_price: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..count).map(|i| start_price + i as f64).collect();
    bars_from_closes(symbol, start_date, &closes)
}

/// Write `bars` as `DIR/SYMBOL.csv`.
pub fn write_csv(dir: &Path, symbol: &str, bars: &[Bar]) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            samscript::domain::ohlcv::format_timestamp(b.timestamp),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(dir.join(format!("{symbol}.csv")), content).unwrap();
}

/// `ExitCode` has no `PartialEq`; compare through its debug form.
pub fn exit_is(code: ExitCode, expected: u8) -> bool {
    format!("{code:?}") == format!("{:?}", ExitCode::from(expected))
}
