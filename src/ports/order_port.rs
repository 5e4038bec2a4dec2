//! Order execution port.
//!
//! The backtest submits orders and feeds every bar it sees back to the
//! engine, which decides when and at what price they fill.

use crate::domain::execution::{Fill, Order, OrderRequest};
use crate::domain::ohlcv::Bar;

pub trait OrderEngine {
    /// Accept an order and return its id.
    fn submit(&mut self, request: OrderRequest) -> u64;

    /// Offer one bar to the book; returns the fills it triggered.
    fn on_market_data(&mut self, bar: &Bar) -> Vec<Fill>;

    fn open_orders(&self) -> Vec<Order>;

    fn cancel_all(&mut self);
}
