//! Order types and the simulated fill engine.
//!
//! Market orders fill at the close of the next bar seen for their symbol,
//! adjusted by slippage against the trader. Limit orders rest until a close
//! reaches the limit and then fill at the limit price.

use serde::Serialize;

use crate::domain::ohlcv::Bar;
use crate::domain::output::OrderType;
use crate::ports::order_port::OrderEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// What a caller asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub timestamp: i64,
}

/// An accepted order, identified by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub timestamp: i64,
}

impl Fill {
    /// Position change caused by this fill.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }
}

/// Cost parameters of simulated execution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Buys pay `slippage_pct` above the market price, sells receive that much below it.
pub fn apply_slippage(market_price: f64, side: Side, slippage_pct: f64) -> f64 {
    market_price * (1.0 + side.sign() * slippage_pct / 100.0)
}

/// Whole units affordable with `budget` once slippage and commission are paid.
pub fn affordable_quantity(budget: f64, market_price: f64, config: &ExecutionConfig) -> f64 {
    let price = apply_slippage(market_price, Side::Buy, config.slippage_pct);
    let spendable = budget - config.commission_per_trade;
    if !(price > 0.0) || spendable <= 0.0 {
        return 0.0;
    }
    (spendable / (price * (1.0 + config.commission_pct / 100.0))).floor()
}

#[derive(Debug, Default)]
pub struct SimulatedOrderEngine {
    config: ExecutionConfig,
    next_id: u64,
    open: Vec<Order>,
}

impl SimulatedOrderEngine {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            next_id: 1,
            open: Vec::new(),
        }
    }

    fn fill_price(&self, order: &Order, bar: &Bar) -> Option<f64> {
        match (order.order_type, order.limit_price) {
            (OrderType::Market, _) => Some(apply_slippage(bar.close, order.side, self.config.slippage_pct)),
            (OrderType::Limit, Some(limit)) => {
                let reached = match order.side {
                    Side::Buy => bar.close <= limit,
                    Side::Sell => bar.close >= limit,
                };
                reached.then_some(limit)
            }
            (OrderType::Limit, None) => None,
        }
    }
}

impl OrderEngine for SimulatedOrderEngine {
    fn submit(&mut self, request: OrderRequest) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        tracing::debug!(
            id,
            symbol = %request.symbol,
            side = ?request.side,
            quantity = request.quantity,
            "order submitted"
        );
        self.open.push(Order {
            id,
            symbol: request.symbol,
            side: request.side,
            quantity: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            submitted_at: request.timestamp,
        });
        id
    }

    fn on_market_data(&mut self, bar: &Bar) -> Vec<Fill> {
        let mut fills = Vec::new();
        let mut resting = Vec::with_capacity(self.open.len());
        for order in std::mem::take(&mut self.open) {
            let price = if order.symbol == bar.symbol && !bar.synthetic {
                self.fill_price(&order, bar)
            } else {
                None
            };
            match price {
                Some(price) => {
                    let commission = calculate_commission(order.quantity * price, &self.config);
                    fills.push(Fill {
                        order_id: order.id,
                        symbol: order.symbol,
                        side: order.side,
                        quantity: order.quantity,
                        price,
                        commission,
                        timestamp: bar.timestamp,
                    });
                }
                None => resting.push(order),
            }
        }
        self.open = resting;
        fills
    }

    fn open_orders(&self) -> Vec<Order> {
        self.open.clone()
    }

    fn cancel_all(&mut self) {
        if !self.open.is_empty() {
            tracing::debug!(count = self.open.len(), "cancelling open orders");
        }
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: 10.0,
            commission_pct: 0.1,
            slippage_pct: 0.5,
        }
    }

    fn bar(symbol: &str, close: f64) -> Bar {
        Bar::new(symbol, 1_000, close, close, close, close, 100.0)
    }

    fn request(side: Side, order_type: OrderType, limit_price: Option<f64>) -> OrderRequest {
        OrderRequest {
            symbol: "BHP".into(),
            side,
            quantity: 10.0,
            order_type,
            limit_price,
            timestamp: 0,
        }
    }

    #[test]
    fn commission_flat_plus_pct() {
        assert_relative_eq!(calculate_commission(10_000.0, &config()), 20.0);
        assert_relative_eq!(calculate_commission(10_000.0, &ExecutionConfig::default()), 0.0);
    }

    #[test]
    fn slippage_against_trader() {
        assert_relative_eq!(apply_slippage(100.0, Side::Buy, 0.5), 100.5);
        assert_relative_eq!(apply_slippage(100.0, Side::Sell, 0.5), 99.5);
    }

    #[test]
    fn affordable_quantity_accounts_for_costs() {
        let cfg = ExecutionConfig::default();
        assert_eq!(affordable_quantity(1_000.0, 30.0, &cfg), 33.0);
        // 100.5 per unit plus 0.1%, after a flat 10
        assert_eq!(affordable_quantity(10_000.0, 100.0, &config()), 99.0);
        assert_eq!(affordable_quantity(5.0, 100.0, &config()), 0.0);
    }

    #[test]
    fn market_order_fills_on_matching_symbol() {
        let mut engine = SimulatedOrderEngine::new(config());
        let id = engine.submit(request(Side::Buy, OrderType::Market, None));
        assert!(engine.on_market_data(&bar("CBA", 50.0)).is_empty());
        assert_eq!(engine.open_orders().len(), 1);

        let fills = engine.on_market_data(&bar("BHP", 100.0));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, id);
        assert_relative_eq!(fills[0].price, 100.5);
        assert_relative_eq!(fills[0].commission, 10.0 + 1005.0 * 0.001);
        assert_relative_eq!(fills[0].signed_quantity(), 10.0);
        assert!(engine.open_orders().is_empty());
    }

    #[test]
    fn limit_order_waits_for_price() {
        let mut engine = SimulatedOrderEngine::new(ExecutionConfig::default());
        engine.submit(request(Side::Buy, OrderType::Limit, Some(95.0)));
        engine.submit(request(Side::Sell, OrderType::Limit, Some(105.0)));
        assert!(engine.on_market_data(&bar("BHP", 100.0)).is_empty());

        let fills = engine.on_market_data(&bar("BHP", 94.0));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::Buy);
        assert_relative_eq!(fills[0].price, 95.0);

        let fills = engine.on_market_data(&bar("BHP", 106.0));
        assert_eq!(fills[0].side, Side::Sell);
        assert_relative_eq!(fills[0].price, 105.0);
    }

    #[test]
    fn synthetic_bars_do_not_fill() {
        let mut engine = SimulatedOrderEngine::new(ExecutionConfig::default());
        engine.submit(request(Side::Buy, OrderType::Market, None));
        let filled_forward = bar("BHP", 100.0).forward_fill(2_000);
        assert!(engine.on_market_data(&filled_forward).is_empty());
    }

    #[test]
    fn cancel_all_clears_book() {
        let mut engine = SimulatedOrderEngine::new(ExecutionConfig::default());
        let first = engine.submit(request(Side::Buy, OrderType::Market, None));
        let second = engine.submit(request(Side::Sell, OrderType::Market, None));
        assert!(second > first);
        engine.cancel_all();
        assert!(engine.open_orders().is_empty());
    }
}
