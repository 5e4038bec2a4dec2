//! End-to-end interpreter tests: compile and execute whole scripts against
//! bar data, the way the `run` command does.

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use samscript::domain::interpreter::{DataFeed, Interpreter};
use samscript::domain::limiter::Limits;
use samscript::domain::output::{InterpreterResult, OrderType};
use samscript::domain::parser::parse;
use samscript::domain::value::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const SMA_CROSS: &str = r##"
indicator("SMA cross")

let fast = sma(2)
let slow = sma(4)
plot(fast, "fast", "#ff0000")
plot(slow, "slow")

on_bar {
    if crossover(fast, slow) {
        signal("buy")
    }
    if crossunder(fast, slow) {
        signal("sell")
    }
}
"##;

fn run(source: &str, closes: &[f64]) -> InterpreterResult {
    let bars = bars_from_closes("BHP", "2024-01-01", closes);
    Interpreter::default().execute_source(source, &bars, &DataFeed::empty())
}

#[test]
fn sma_crossover_emits_one_buy() {
    let result = run(SMA_CROSS, &[1.0, 2.0, 3.0, 10.0, 2.0, 1.0]);
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.title.as_deref(), Some("SMA cross"));

    let buys: Vec<_> = result.signals.iter().filter(|s| s.action == "BUY").collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].bar_index, 3);
    assert_eq!(buys[0].symbol, "BHP");
    assert_eq!(buys[0].order_type, OrderType::Market);
    assert_relative_eq!(buys[0].price, 10.0);
    assert_eq!(buys[0].timestamp, millis(date(2024, 1, 4)));

    let fast = result.overlay("fast").unwrap();
    assert_eq!(fast.color, "#ff0000");
    // warm-up NaN is omitted
    assert_eq!(fast.lines[0].points.len(), 5);
    assert!(result.overlay("slow").is_some());
}

#[test]
fn indicator_values_match_hand_computation() {
    let src = "let s = sma(3)\nlet e = ema(3)\nlet r = roc(1)\nlet last_s = s[len(s) - 1]";
    let result = run(src, &[1.0, 2.0, 3.0, 4.0]);
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.variables["last_s"], Value::Number(3.0));
    match &result.variables["r"] {
        Value::Series(values) => {
            assert!(values[0].is_nan());
            assert_relative_eq!(values[1], 100.0);
        }
        other => panic!("expected series, got {other:?}"),
    }
}

#[test]
fn functions_closures_and_recursion_together() {
    let src = r#"
fn outer(start) {
    let n = start
    fn bump() {
        n += 1
    }
    bump()
    bump()
    return n
}
fn fib(k) {
    if k < 2 { return k }
    return fib(k - 1) + fib(k - 2)
}
let after = outer(10)
let f = fib(15)
"#;
    let result = run(src, &[1.0]);
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.variables["after"], Value::Number(12.0));
    assert_eq!(result.variables["f"], Value::Number(610.0));
}

#[test]
fn runtime_error_is_located_and_keeps_prior_state() {
    let result = run("let a = 1\nlet b = a + missing", &[1.0]);
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("[Line 2:"), "{}", result.errors[0]);
    assert_eq!(result.variables["a"], Value::Number(1.0));
}

#[test]
fn compile_error_surfaces_through_execute_source() {
    let result = run("let x = (1 + 2", &[1.0]);
    assert!(!result.success);
    assert!(result.errors[0].starts_with("[Line 1:"));
    assert!(result.signals.is_empty());
}

#[test]
fn feed_reads_other_symbols() {
    let primary = bars_from_closes("BHP", "2024-01-01", &[1.0, 2.0, 3.0]);
    let other = BTreeMap::from([(
        "CBA".to_string(),
        bars_from_closes("CBA", "2024-01-01", &[10.0, 20.0, 30.0]),
    )]);
    let feed = DataFeed::from_map(&other);
    let src = "let spread = feed('CBA') - close\nlet last = spread[2]\nsignal('buy', {symbol: 'CBA', qty: 5})";
    let result = Interpreter::default().execute_source(src, &primary, &feed);
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.variables["last"], Value::Number(27.0));
    assert_eq!(result.signals[0].symbol, "CBA");
    assert_relative_eq!(result.signals[0].price, 30.0);
    assert_eq!(result.signals[0].quantity, Some(5.0));

    let missing = Interpreter::default().execute_source("feed('XYZ')", &primary, &feed);
    assert!(missing.errors[0].contains("No data feed for symbol 'XYZ'"));
}

#[test]
fn infinite_loop_is_stopped_by_iteration_limit() {
    let limits = Limits {
        max_iterations: 500,
        ..Limits::default()
    };
    let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);
    let result = Interpreter::new(limits).execute_source("let n = 0\nwhile true { n += 1 }", &bars, &DataFeed::empty());
    assert!(!result.success);
    assert!(result.errors[0].contains("Limit exceeded"));
    assert_eq!(result.variables["n"], Value::Number(500.0));
}

#[test]
fn runaway_recursion_is_stopped_by_call_depth() {
    let result = run("fn down(n) { return down(n + 1) }\ndown(0)", &[1.0]);
    assert!(!result.success);
    assert!(result.errors[0].contains("call depth"), "{}", result.errors[0]);
}

#[test]
fn recursion_without_loops_or_bars_is_bounded() {
    let src = "fn f(n) { if n <= 0 { return 0 }\n return f(n - 1) + f(n - 1) }\nlet r = f(18)";
    let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);

    let limits = Limits {
        max_iterations: 10,
        ..Limits::default()
    };
    let result = Interpreter::new(limits).execute_source(src, &bars, &DataFeed::empty());
    assert!(!result.success);
    assert!(result.errors[0].contains("iterations"), "{}", result.errors[0]);

    // about a billion calls: only the deadline can stop it
    let src = src.replace("f(18)", "f(30)");
    let limits = Limits {
        max_iterations: u64::MAX,
        max_duration: Duration::from_millis(50),
        ..Limits::default()
    };
    let started = std::time::Instant::now();
    let result = Interpreter::new(limits).execute_source(&src, &bars, &DataFeed::empty());
    assert!(!result.success);
    assert!(result.errors[0].contains("longer than 50 ms"), "{}", result.errors[0]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn hostile_nesting_is_a_compile_error() {
    let depth = 10_000;
    let src = format!("let x = {}1{}", "(".repeat(depth), ")".repeat(depth));
    let result = run(&src, &[1.0]);
    assert!(!result.success);
    assert!(result.errors[0].contains("nested too deeply"), "{}", result.errors[0]);

    let src = format!("let x = 1{}", " + 1".repeat(depth));
    assert!(run(&src, &[1.0]).errors[0].contains("nested too deeply"));
}

#[test]
fn wall_clock_limit_trips() {
    let limits = Limits {
        max_duration: Duration::ZERO,
        ..Limits::default()
    };
    let bars = bars_from_closes("BHP", "2024-01-01", &[1.0, 2.0]);
    let result = Interpreter::new(limits).execute_source("on_bar { let x = 1 }", &bars, &DataFeed::empty());
    assert!(!result.success);
    assert!(result.errors[0].contains("Limit exceeded"));
}

#[test]
fn one_compiled_program_runs_many_times() {
    let program = parse(SMA_CROSS).unwrap();
    let interpreter = Interpreter::default();
    let bars = bars_from_closes("BHP", "2024-01-01", &[1.0, 2.0, 3.0, 10.0, 2.0, 1.0]);
    for n in 1..=bars.len() {
        let result = interpreter.execute(&program, &bars[..n], &DataFeed::empty());
        assert!(result.success);
        let expected = usize::from(n >= 4);
        assert_eq!(result.signals.iter().filter(|s| s.action == "BUY").count(), expected);
    }
}

proptest! {
    #[test]
    fn execution_is_deterministic(closes in proptest::collection::vec(1.0f64..500.0, 1..60)) {
        let first = run(SMA_CROSS, &closes);
        let second = run(SMA_CROSS, &closes);
        prop_assert!(first.success);
        prop_assert_eq!(first.signals, second.signals);
        prop_assert_eq!(first.logs, second.logs);
        prop_assert_eq!(first.steps, second.steps);
    }

    #[test]
    fn iteration_limit_is_never_exceeded(limit in 1u64..2_000) {
        let limits = Limits { max_iterations: limit, ..Limits::default() };
        let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);
        let src = "let n = 0\nwhile true { n += 1 }";
        let result = Interpreter::new(limits).execute_source(src, &bars, &DataFeed::empty());
        prop_assert!(!result.success);
        let n = result.variables.get("n").and_then(Value::as_number).unwrap_or(0.0);
        prop_assert_eq!(n, limit as f64);
    }

    #[test]
    fn recursion_is_charged_per_call(limit in 1u64..2_000) {
        let limits = Limits { max_iterations: limit, ..Limits::default() };
        let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);
        // 4095 calls in total, never deeper than 12 frames
        let src = "let calls = 0\nfn fan(d) {\n calls += 1\n if d > 0 { fan(d - 1)\n fan(d - 1) }\n}\nfan(11)";
        let result = Interpreter::new(limits).execute_source(src, &bars, &DataFeed::empty());
        prop_assert!(!result.success);
        prop_assert!(result.errors[0].contains("Limit exceeded"), "{:?}", result.errors);
        prop_assert_eq!(result.variables["calls"].clone(), Value::Number(limit as f64));
        prop_assert_eq!(result.steps, limit + 1);
    }

    #[test]
    fn for_over_array_stops_at_the_limit(limit in 1u64..2_000) {
        let limits = Limits { max_iterations: limit, ..Limits::default() };
        let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);
        let items = vec!["0"; 2_100].join(", ");
        let src = format!("let items = [{items}]\nlet n = 0\nfor x in items {{ n += 1 }}");
        let result = Interpreter::new(limits).execute_source(&src, &bars, &DataFeed::empty());
        prop_assert!(!result.success);
        prop_assert_eq!(result.variables["n"].clone(), Value::Number(limit as f64));
    }

    #[test]
    fn counting_loop_under_the_limit_completes(count in 0u64..300) {
        let limits = Limits { max_iterations: 1_000, ..Limits::default() };
        let bars = bars_from_closes("BHP", "2024-01-01", &[1.0]);
        let src = format!("let n = 0\nfor i in range({count}) {{ n += 1 }}");
        let result = Interpreter::new(limits).execute_source(&src, &bars, &DataFeed::empty());
        prop_assert!(result.success, "{:?}", result.errors);
        prop_assert_eq!(result.variables["n"].clone(), Value::Number(count as f64));
    }
}
