//! Market data access port.

use crate::domain::error::SamscriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeline::DateRange;

pub trait DataPort {
    /// Bars of `symbol` within `range`, sorted by timestamp.
    fn fetch_bars(&self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, SamscriptError>;

    fn list_symbols(&self) -> Result<Vec<String>, SamscriptError>;
}
