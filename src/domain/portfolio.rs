//! Cash, positions and realized trades.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::execution::Fill;
use super::position::{ClosedTrade, Position};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub closed_trades: Vec<ClosedTrade>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
        }
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Signed quantity held in `symbol`, zero when flat.
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Apply a fill: move cash, update the average-price position and
    /// realize whatever part of an opposite position it closes. Returns the
    /// trade realized by this fill, if any.
    pub fn apply_fill(&mut self, fill: &Fill) -> Option<ClosedTrade> {
        let delta = fill.signed_quantity();
        if delta == 0.0 {
            return None;
        }
        self.cash -= delta * fill.price + fill.commission;

        let Some(mut position) = self.positions.remove(&fill.symbol) else {
            self.positions.insert(fill.symbol.clone(), opened(fill, delta, fill.commission));
            return None;
        };

        if position.quantity.signum() == delta.signum() {
            let quantity = position.quantity + delta;
            position.avg_price = (position.quantity * position.avg_price + delta * fill.price) / quantity;
            position.quantity = quantity;
            position.entry_commission += fill.commission;
            self.positions.insert(fill.symbol.clone(), position);
            return None;
        }

        let held = position.quantity.abs();
        let closing = held.min(delta.abs());
        let entry_share = position.entry_commission * closing / held;
        let exit_share = fill.commission * closing / delta.abs();
        let closed_quantity = position.quantity.signum() * closing;
        let trade = ClosedTrade {
            symbol: fill.symbol.clone(),
            quantity: closed_quantity,
            entry_price: position.avg_price,
            exit_price: fill.price,
            entry_time: position.opened_at,
            exit_time: fill.timestamp,
            commission: entry_share + exit_share,
            pnl: closed_quantity * (fill.price - position.avg_price) - entry_share - exit_share,
        };
        self.closed_trades.push(trade.clone());

        let remaining = position.quantity + delta;
        if closing < held {
            position.quantity = remaining;
            position.entry_commission -= entry_share;
            self.positions.insert(fill.symbol.clone(), position);
        } else if closing < delta.abs() {
            // flipped through zero: the excess opens a new position
            self.positions.insert(
                fill.symbol.clone(),
                opened(fill, remaining, fill.commission - exit_share),
            );
        }
        Some(trade)
    }

    /// cash + Σ quantity·price. Symbols without a price are valued at their
    /// average entry price.
    pub fn equity(&self, prices: &HashMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = prices.get(&pos.symbol).copied().unwrap_or(pos.avg_price);
                pos.market_value(price)
            })
            .sum();
        self.cash + position_value
    }
}

fn opened(fill: &Fill, quantity: f64, commission: f64) -> Position {
    Position {
        symbol: fill.symbol.clone(),
        quantity,
        avg_price: fill.price,
        opened_at: fill.timestamp,
        entry_commission: commission,
    }
}
