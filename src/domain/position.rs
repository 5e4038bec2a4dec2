//! Open positions and closed round trips.

use serde::Serialize;

/// A net position in one symbol. `quantity` is signed: positive long,
/// negative short.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    /// Volume-weighted average entry price.
    pub avg_price: f64,
    pub opened_at: i64,
    /// Entry commissions not yet charged to a closed trade.
    pub entry_commission: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Signed value of the position at `price`; negative for shorts.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.avg_price)
    }
}

/// A realized round trip (or the closed part of one).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub symbol: String,
    /// Signed quantity closed: positive for a long, negative for a short.
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: i64,
    pub exit_time: i64,
    /// Entry and exit commissions attributed to this trade.
    pub commission: f64,
    /// Net of `commission`.
    pub pnl: f64,
}

impl ClosedTrade {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    /// Return on the entry notional.
    pub fn return_pct(&self) -> f64 {
        let notional = self.quantity.abs() * self.entry_price;
        if notional > 0.0 {
            self.pnl / notional * 100.0
        } else {
            0.0
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.exit_time - self.entry_time
    }
}
