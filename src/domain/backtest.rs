//! Backtest simulation loop.
//!
//! Every symbol is aligned onto one timeline. At each tick where the primary
//! symbol has data the whole program is executed over the bars visible so
//! far, signals stamped with that tick become orders, the order engine sees
//! the tick's bars, and equity and drawdown are recorded.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::execution::{
    affordable_quantity, ExecutionConfig, OrderRequest, Side, SimulatedOrderEngine,
};
use crate::domain::interpreter::{DataFeed, Interpreter};
use crate::domain::limiter::Limits;
use crate::domain::metrics::{drawdown, CurvePoint, Metrics};
use crate::domain::ohlcv::Bar;
use crate::domain::output::Signal;
use crate::domain::parser::parse;
use crate::domain::portfolio::Portfolio;
use crate::domain::position::{ClosedTrade, Position};
use crate::domain::timeline::{build_timeline, prepare, DateRange, SymbolTrack};
use crate::ports::order_port::OrderEngine;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub slippage_pct: f64,
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    /// Halt once drawdown exceeds this percentage; 0 disables the cap.
    pub max_drawdown_pct: f64,
    /// Fraction of available cash committed when a signal has no quantity.
    pub position_size: f64,
    pub allow_shorting: bool,
    pub risk_free_rate: f64,
    pub date_range: DateRange,
    /// Defaults to the first symbol in name order.
    pub primary_symbol: Option<String>,
    pub limits: Limits,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            slippage_pct: 0.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            max_drawdown_pct: 0.0,
            position_size: 1.0,
            allow_shorting: false,
            risk_free_rate: 0.0,
            date_range: DateRange::unbounded(),
            primary_symbol: None,
            limits: Limits::default(),
        }
    }
}

impl BacktestConfig {
    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: self.commission_per_trade,
            commission_pct: self.commission_pct,
            slippage_pct: self.slippage_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub success: bool,
    pub primary_symbol: Option<String>,
    pub metrics: Metrics,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<CurvePoint>,
    pub drawdown_curve: Vec<CurvePoint>,
    /// Signals that were routed, in order.
    pub signals: Vec<Signal>,
    pub errors: Vec<String>,
    /// Why the loop stopped before the end of the timeline.
    pub halted: Option<String>,
    pub open_positions: Vec<Position>,
    pub ticks: usize,
}

impl BacktestResult {
    fn failure(config: &BacktestConfig, error: String) -> Self {
        BacktestResult {
            success: false,
            primary_symbol: config.primary_symbol.clone(),
            metrics: Metrics::compute(&[], &[], config.initial_capital, config.risk_free_rate),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            signals: Vec::new(),
            errors: vec![error],
            halted: None,
            open_positions: Vec::new(),
            ticks: 0,
        }
    }
}

/// State owned by one backtest run. The interpreter only ever sees bar
/// slices and a data feed built from it for a single tick.
#[derive(Debug)]
pub struct BacktestContext<E> {
    pub timeline: Vec<i64>,
    pub tracks: BTreeMap<String, SymbolTrack>,
    pub primary: String,
    pub tick: usize,
    pub portfolio: Portfolio,
    pub engine: E,
    execution: ExecutionConfig,
    position_size: f64,
    allow_shorting: bool,
    pending: HashMap<String, f64>,
    reserved: f64,
}

impl<E: OrderEngine> BacktestContext<E> {
    /// Synchronize `symbol_data` for `config`. Fails if the primary symbol
    /// has no bars in range.
    pub fn new(
        symbol_data: &BTreeMap<String, Vec<Bar>>,
        config: &BacktestConfig,
        engine: E,
    ) -> Result<Self, String> {
        let primary = match &config.primary_symbol {
            Some(symbol) => symbol.clone(),
            None => symbol_data
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| "No symbol data supplied".to_string())?,
        };

        let prepared: BTreeMap<&str, Vec<Bar>> = symbol_data
            .iter()
            .map(|(symbol, bars)| (symbol.as_str(), prepare(bars.clone(), &config.date_range)))
            .collect();
        let timeline = build_timeline(prepared.values().map(Vec::as_slice));
        let tracks: BTreeMap<String, SymbolTrack> = prepared
            .iter()
            .filter_map(|(symbol, bars)| {
                SymbolTrack::align(symbol, bars, &timeline).map(|t| (symbol.to_string(), t))
            })
            .collect();

        if !tracks.contains_key(&primary) {
            return Err(format!("No data for primary symbol '{}'", primary));
        }

        Ok(Self {
            timeline,
            tracks,
            primary,
            tick: 0,
            portfolio: Portfolio::new(config.initial_capital),
            engine,
            execution: config.execution(),
            position_size: config.position_size,
            allow_shorting: config.allow_shorting,
            pending: HashMap::new(),
            reserved: 0.0,
        })
    }

    /// Primary bars visible at the current tick.
    pub fn primary_bars(&self) -> &[Bar] {
        match self.tracks.get(&self.primary) {
            Some(track) => track.visible(self.tick),
            None => &[],
        }
    }

    /// Every symbol's bars up to the current tick.
    pub fn feed(&self) -> DataFeed<'_> {
        let mut feed = DataFeed::empty();
        for (symbol, track) in &self.tracks {
            let visible = track.visible(self.tick);
            if !visible.is_empty() {
                feed.insert(symbol, visible);
            }
        }
        feed
    }

    /// Closing prices at the current tick.
    pub fn prices(&self) -> HashMap<String, f64> {
        self.tracks
            .iter()
            .filter_map(|(symbol, track)| {
                track.bar_at(self.tick).map(|bar| (symbol.clone(), bar.close))
            })
            .collect()
    }

    fn begin_tick(&mut self, tick: usize) {
        self.tick = tick;
        self.pending.clear();
        self.reserved = 0.0;
    }

    /// Position including orders already submitted this tick.
    fn projected(&self, symbol: &str) -> f64 {
        self.portfolio.quantity(symbol) + self.pending.get(symbol).copied().unwrap_or(0.0)
    }

    fn sized(&self, price: f64) -> f64 {
        let budget = (self.portfolio.cash - self.reserved).max(0.0) * self.position_size;
        affordable_quantity(budget, price, &self.execution)
    }

    /// Turn a signal into an order. Returns whether an order was submitted.
    pub fn route(&mut self, signal: &Signal) -> bool {
        let price = if signal.price.is_finite() {
            signal.price
        } else {
            match self.tracks.get(&signal.symbol).and_then(|t| t.bar_at(self.tick)) {
                Some(bar) => bar.close,
                None => {
                    tracing::warn!(symbol = %signal.symbol, "no price for signal; ignored");
                    return false;
                }
            }
        };

        let held = self.projected(&signal.symbol);
        let order = match signal.action.as_str() {
            "BUY" | "LONG" => {
                if held < 0.0 {
                    Some((Side::Buy, -held))
                } else if let Some(quantity) = signal.quantity {
                    Some((Side::Buy, quantity))
                } else if held == 0.0 {
                    Some((Side::Buy, self.sized(price)))
                } else {
                    None
                }
            }
            "SELL" | "SHORT" => {
                if held > 0.0 {
                    Some((Side::Sell, signal.quantity.unwrap_or(held).min(held)))
                } else if !self.allow_shorting {
                    tracing::debug!(symbol = %signal.symbol, "shorting disabled; sell ignored");
                    None
                } else if let Some(quantity) = signal.quantity {
                    Some((Side::Sell, quantity))
                } else if held == 0.0 {
                    Some((Side::Sell, self.sized(price)))
                } else {
                    None
                }
            }
            "CLOSE" | "EXIT" | "FLAT" => {
                if held > 0.0 {
                    Some((Side::Sell, held))
                } else if held < 0.0 {
                    Some((Side::Buy, -held))
                } else {
                    None
                }
            }
            other => {
                tracing::warn!(action = other, "unknown signal action ignored");
                None
            }
        };

        let Some((side, quantity)) = order else {
            return false;
        };
        if quantity.is_nan() || quantity <= 0.0 {
            tracing::debug!(symbol = %signal.symbol, "signal sized to zero; ignored");
            return false;
        }

        *self.pending.entry(signal.symbol.clone()).or_insert(0.0) += side.sign() * quantity;
        if side == Side::Buy {
            self.reserved += quantity * price;
        }
        self.engine.submit(OrderRequest {
            symbol: signal.symbol.clone(),
            side,
            quantity,
            order_type: signal.order_type,
            limit_price: signal.limit_price,
            timestamp: signal.timestamp,
        });
        true
    }

    /// Offer the tick's bars to the engine and apply resulting fills.
    pub fn process_market_data(&mut self) {
        let bars: Vec<Bar> = self
            .tracks
            .values()
            .filter_map(|track| track.bar_at(self.tick).cloned())
            .collect();
        for bar in &bars {
            for fill in self.engine.on_market_data(bar) {
                if let Some(trade) = self.portfolio.apply_fill(&fill) {
                    tracing::debug!(
                        symbol = %trade.symbol,
                        pnl = trade.pnl,
                        "trade closed"
                    );
                }
            }
        }
    }

    pub fn equity(&self) -> f64 {
        self.portfolio.equity(&self.prices())
    }
}

/// Compile `source` and backtest it with the simulated order engine.
pub fn run(source: &str, symbol_data: &BTreeMap<String, Vec<Bar>>, config: &BacktestConfig) -> BacktestResult {
    run_with_engine(
        source,
        symbol_data,
        config,
        SimulatedOrderEngine::new(config.execution()),
    )
}

pub fn run_with_engine<E: OrderEngine>(
    source: &str,
    symbol_data: &BTreeMap<String, Vec<Bar>>,
    config: &BacktestConfig,
    engine: E,
) -> BacktestResult {
    let program = match parse(source) {
        Ok(program) => program,
        Err(e) => return BacktestResult::failure(config, e.to_string()),
    };
    let mut ctx = match BacktestContext::new(symbol_data, config, engine) {
        Ok(ctx) => ctx,
        Err(e) => return BacktestResult::failure(config, e),
    };

    tracing::info!(
        primary = %ctx.primary,
        symbols = ctx.tracks.len(),
        ticks = ctx.timeline.len(),
        "backtest started"
    );

    let interpreter = Interpreter::new(config.limits);
    let mut equity_curve = Vec::new();
    let mut drawdown_curve = Vec::new();
    let mut routed = Vec::new();
    let mut errors = Vec::new();
    let mut halted = None;
    let mut peak = config.initial_capital;
    let mut ticks = 0;

    for tick in 0..ctx.timeline.len() {
        ctx.begin_tick(tick);
        let timestamp = ctx.timeline[tick];
        if ctx.primary_bars().is_empty() {
            continue;
        }
        ticks += 1;

        let result = interpreter.execute(&program, ctx.primary_bars(), &ctx.feed());
        if !result.success {
            tracing::warn!(tick, errors = ?result.errors, "script failed; backtest halted");
            errors = result.errors;
            halted = Some(format!("script error at tick {}", tick));
            break;
        }

        for signal in result.signals.into_iter().filter(|s| s.timestamp == timestamp) {
            if ctx.route(&signal) {
                routed.push(signal);
            }
        }
        ctx.process_market_data();

        let equity = ctx.equity();
        peak = peak.max(equity);
        let dd = drawdown(peak, equity);
        equity_curve.push(CurvePoint {
            timestamp,
            value: equity,
        });
        drawdown_curve.push(CurvePoint {
            timestamp,
            value: dd,
        });

        if config.max_drawdown_pct > 0.0 && dd * 100.0 > config.max_drawdown_pct {
            let reason = format!(
                "drawdown {:.2}% exceeded limit of {}%",
                dd * 100.0,
                config.max_drawdown_pct
            );
            tracing::warn!(tick, %reason, "backtest halted");
            halted = Some(reason);
            break;
        }
    }

    ctx.engine.cancel_all();
    let trades = ctx.portfolio.closed_trades.clone();
    let metrics = Metrics::compute(
        &equity_curve,
        &trades,
        config.initial_capital,
        config.risk_free_rate,
    );

    tracing::info!(
        ticks,
        trades = trades.len(),
        final_equity = metrics.final_equity,
        halted = halted.is_some(),
        "backtest finished"
    );

    BacktestResult {
        success: errors.is_empty(),
        primary_symbol: Some(ctx.primary.clone()),
        metrics,
        trades,
        equity_curve,
        drawdown_curve,
        signals: routed,
        errors,
        halted,
        open_positions: ctx.portfolio.positions.values().cloned().collect(),
        ticks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::output::OrderType;
    use approx::assert_relative_eq;

    fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(symbol, i as i64 * 86_400_000, c, c, c, c, 100.0))
            .collect()
    }

    fn data(closes: &[f64]) -> BTreeMap<String, Vec<Bar>> {
        BTreeMap::from([("AAA".to_string(), bars("AAA", closes))])
    }

    fn signal(action: &str, quantity: Option<f64>) -> Signal {
        Signal {
            action: action.into(),
            symbol: "AAA".into(),
            timestamp: 0,
            bar_index: 0,
            price: 10.0,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
        }
    }

    fn context(config: &BacktestConfig) -> BacktestContext<SimulatedOrderEngine> {
        let mut ctx = BacktestContext::new(&data(&[10.0]), config, SimulatedOrderEngine::default()).unwrap();
        ctx.begin_tick(0);
        ctx
    }

    #[test]
    fn defaults() {
        let c = BacktestConfig::default();
        assert_relative_eq!(c.initial_capital, 100_000.0);
        assert_relative_eq!(c.position_size, 1.0);
        assert!(!c.allow_shorting);
        assert_eq!(c.limits, Limits::default());
    }

    #[test]
    fn buy_sizes_from_cash_and_fills_at_close() {
        let config = BacktestConfig {
            initial_capital: 1_000.0,
            position_size: 0.5,
            ..BacktestConfig::default()
        };
        let mut ctx = context(&config);
        assert!(ctx.route(&signal("BUY", None)));
        // a second sized BUY in the same tick sees the pending long
        assert!(!ctx.route(&signal("BUY", None)));
        ctx.process_market_data();
        assert_relative_eq!(ctx.portfolio.quantity("AAA"), 50.0);
        assert_relative_eq!(ctx.portfolio.cash, 500.0);
    }

    #[test]
    fn sell_without_position_needs_shorting() {
        let mut ctx = context(&BacktestConfig::default());
        assert!(!ctx.route(&signal("SELL", None)));

        let config = BacktestConfig {
            initial_capital: 100.0,
            allow_shorting: true,
            ..BacktestConfig::default()
        };
        let mut ctx = context(&config);
        assert!(ctx.route(&signal("SHORT", None)));
        ctx.process_market_data();
        assert_relative_eq!(ctx.portfolio.quantity("AAA"), -10.0);
    }

    #[test]
    fn close_flattens_and_unknown_is_ignored() {
        let mut ctx = context(&BacktestConfig::default());
        ctx.route(&signal("BUY", Some(3.0)));
        ctx.process_market_data();
        ctx.begin_tick(0);
        assert!(!ctx.route(&signal("HODL", None)));
        assert!(ctx.route(&signal("EXIT", None)));
        ctx.process_market_data();
        assert_eq!(ctx.portfolio.position_count(), 0);
        assert_eq!(ctx.portfolio.closed_trades.len(), 1);
    }

    #[test]
    fn missing_primary_fails() {
        let config = BacktestConfig {
            primary_symbol: Some("ZZZ".into()),
            ..BacktestConfig::default()
        };
        let result = run("let a = 1", &data(&[1.0]), &config);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["No data for primary symbol 'ZZZ'".to_string()]);
    }

    #[test]
    fn compile_error_fails_fast() {
        let result = run("let = 1", &data(&[1.0]), &BacktestConfig::default());
        assert!(!result.success);
        assert!(result.errors[0].contains("[Line 1:5]"));
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn one_curve_point_per_tick() {
        let result = run("let a = 1", &data(&[1.0, 2.0, 3.0]), &BacktestConfig::default());
        assert!(result.success);
        assert_eq!(result.ticks, 3);
        assert_eq!(result.equity_curve.len(), 3);
        assert_eq!(result.drawdown_curve.len(), 3);
        assert!(result.drawdown_curve.iter().all(|p| p.value == 0.0));
    }

    #[test]
    fn buy_and_hold_tracks_price() {
        let src = "on_bar { if bar_index == 0 { signal('buy') } }";
        let result = run(src, &data(&[10.0, 12.0, 8.0]), &BacktestConfig {
            initial_capital: 1_000.0,
            ..BacktestConfig::default()
        });
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.signals.len(), 1);
        let values: Vec<f64> = result.equity_curve.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1_000.0, 1_200.0, 800.0]);
        assert_relative_eq!(result.drawdown_curve[2].value, 400.0 / 1_200.0);
        assert_eq!(result.open_positions.len(), 1);
    }

    #[test]
    fn drawdown_cap_halts() {
        let src = "signal('buy')";
        let config = BacktestConfig {
            initial_capital: 1_000.0,
            max_drawdown_pct: 10.0,
            ..BacktestConfig::default()
        };
        let result = run(src, &data(&[10.0, 9.5, 8.0, 12.0]), &config);
        assert!(result.success);
        assert!(result.halted.as_deref().unwrap_or("").contains("exceeded limit of 10%"));
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn script_error_halts_with_partial_results() {
        let src = "if bar_count == 2 { foobar() }";
        let result = run(src, &data(&[1.0, 2.0, 3.0]), &BacktestConfig::default());
        assert!(!result.success);
        assert!(result.errors[0].contains("Unknown function: foobar"));
        assert_eq!(result.equity_curve.len(), 1);
        assert!(result.halted.is_some());
    }
}
