//! Event handler registry and the per-execution event loop.
//!
//! Every `on_*` block is registered, but only `on_start`, `on_bar` and
//! `on_end` are driven here. `on_tick`, `on_order_fill` and
//! `on_position_change` are left to an order engine embedding the
//! interpreter.

use std::collections::BTreeMap;

use crate::domain::ast::{EventHandler, EventKind, Program, StmtKind};
use crate::domain::error::RuntimeError;
use crate::domain::interpreter::{limit_error, Execution, Phase};
use crate::domain::ohlcv::Bar;
use crate::domain::value::Value;

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerEntry<'p> {
    pub(crate) handler: &'p EventHandler,
    pub(crate) line: usize,
    pub(crate) column: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Handlers<'p> {
    entries: BTreeMap<EventKind, HandlerEntry<'p>>,
}

impl<'p> Handlers<'p> {
    pub(crate) fn collect(program: &'p Program) -> Self {
        let entries = program
            .statements
            .iter()
            .filter_map(|stmt| match &stmt.kind {
                StmtKind::EventHandler(handler) => Some((
                    handler.event,
                    HandlerEntry {
                        handler,
                        line: stmt.line,
                        column: stmt.column,
                    },
                )),
                _ => None,
            })
            .collect();
        Self { entries }
    }

    pub(crate) fn get(&self, kind: EventKind) -> Option<HandlerEntry<'p>> {
        self.entries.get(&kind).copied()
    }

    pub(crate) fn registered(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.entries.keys().copied()
    }
}

/// The `bar` dictionary bound during `on_bar`.
fn bar_value(bar: &Bar, index: usize) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("symbol".to_string(), Value::string(&bar.symbol));
    entries.insert("timestamp".to_string(), Value::Number(bar.timestamp as f64));
    entries.insert("open".to_string(), Value::Number(bar.open));
    entries.insert("high".to_string(), Value::Number(bar.high));
    entries.insert("low".to_string(), Value::Number(bar.low));
    entries.insert("close".to_string(), Value::Number(bar.close));
    entries.insert("volume".to_string(), Value::Number(bar.volume));
    entries.insert("index".to_string(), Value::Number(index as f64));
    Value::dict(entries)
}

impl<'p, 'd> Execution<'p, 'd> {
    pub(crate) fn dispatch_events(&mut self) -> Result<(), RuntimeError> {
        tracing::trace!(
            handlers = ?self.handlers.registered().collect::<Vec<_>>(),
            bars = self.bars.len(),
            "dispatching events"
        );

        if let Some(entry) = self.handlers.get(EventKind::Start) {
            self.phase = Phase::Handler(EventKind::Start);
            self.run_handler(entry, Vec::new())?;
        }

        if let Some(entry) = self.handlers.get(EventKind::Bar) {
            self.phase = Phase::Handler(EventKind::Bar);
            let bars = self.bars;
            for (index, bar) in bars.iter().enumerate() {
                self.limiter
                    .step()
                    .map_err(|e| limit_error(e, entry.line, entry.column))?;
                self.limiter
                    .check_deadline()
                    .map_err(|e| limit_error(e, entry.line, entry.column))?;

                self.current_bar = Some(index);
                {
                    let mut globals = self.globals.borrow_mut();
                    globals.define("bar_index", Value::Number(index as f64), false);
                    globals.define("bar", bar_value(bar, index), false);
                }
                self.run_handler(entry, vec![Value::string(&bar.symbol)])?;
            }
            self.current_bar = None;
        }

        if let Some(entry) = self.handlers.get(EventKind::End) {
            self.phase = Phase::Handler(EventKind::End);
            self.run_handler(entry, Vec::new())?;
        }
        Ok(())
    }

    fn run_handler(&mut self, entry: HandlerEntry<'p>, args: Vec<Value>) -> Result<(), RuntimeError> {
        let globals = self.globals.clone();
        self.invoke(
            &entry.handler.params,
            &entry.handler.body,
            &globals,
            args,
            entry.line,
            entry.column,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::interpreter::{DataFeed, Interpreter};
    use crate::domain::limiter::Limits;
    use crate::domain::output::InterpreterResult;
    use crate::domain::parser::parse;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new("EV", i as i64 * 60_000, c, c, c, c, 10.0))
            .collect()
    }

    fn run(source: &str, closes: &[f64]) -> InterpreterResult {
        Interpreter::default().execute_source(source, &bars(closes), &DataFeed::empty())
    }

    #[test]
    fn collects_every_handler_kind() {
        let program = parse(
            "on_start { }\non_tick { }\non_order_fill(f) { }\non_position_change { }\non_end { }",
        )
        .unwrap();
        let handlers = Handlers::collect(&program);
        let kinds: Vec<EventKind> = handlers.registered().collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Start,
                EventKind::Tick,
                EventKind::End,
                EventKind::OrderFill,
                EventKind::PositionChange
            ]
        );
        assert_eq!(handlers.get(EventKind::Tick).map(|e| e.line), Some(2));
    }

    #[test]
    fn start_bar_end_order() {
        let src = "on_end { debug('end') }\non_bar { debug('bar', bar_index) }\non_start { debug('start') }";
        let result = run(src, &[1.0, 2.0]);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(
            result.logs,
            vec!["start", "[bar 0] bar 0", "[bar 1] bar 1", "end"]
        );
    }

    #[test]
    fn on_tick_is_not_driven() {
        let result = run("let n = 0\non_tick { n += 1 }", &[1.0, 2.0]);
        assert_eq!(result.variables.get("n"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn symbol_passed_when_declared() {
        let result = run("let seen = ''\non_bar(sym) { seen = sym }", &[1.0]);
        assert_eq!(result.variables.get("seen"), Some(&Value::string("EV")));
    }

    #[test]
    fn bar_binding_tracks_dispatch() {
        let src = "let total = 0\non_bar { total += bar.close }";
        let result = run(src, &[1.0, 2.0, 3.5]);
        assert_eq!(result.variables.get("total"), Some(&Value::Number(6.5)));
    }

    #[test]
    fn series_read_at_current_bar() {
        let src = "let hits = 0\non_bar { if close > 1 { hits += 1 } }";
        let result = run(src, &[1.0, 2.0, 3.0]);
        assert_eq!(result.variables.get("hits"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn handler_error_stops_dispatch() {
        let src = "let n = 0\non_bar { n += 1\n if bar_index == 1 { foobar() } }\non_end { n = 100 }";
        let result = run(src, &[1.0, 2.0, 3.0]);
        assert!(!result.success);
        assert!(result.errors[0].contains("Unknown function: foobar"));
        assert_eq!(result.variables.get("n"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn each_bar_costs_a_step() {
        let limits = Limits {
            max_iterations: 3,
            ..Limits::default()
        };
        let result = Interpreter::new(limits).execute_source(
            "on_bar { }",
            &bars(&[1.0, 2.0, 3.0, 4.0]),
            &DataFeed::empty(),
        );
        assert!(result.errors[0].contains("Limit exceeded"));
    }

    #[test]
    fn handler_assignments_do_not_create_overlays() {
        let result = run("let s = 0\non_end { s = close * 2 }", &[1.0, 2.0]);
        assert!(result.success);
        assert!(result.overlays.is_empty());
    }
}
