//! Built-in functions: indicators, numeric helpers and script outputs.
//!
//! Builtins report failures as plain messages; the interpreter attaches the
//! call-site location.

use std::collections::BTreeMap;

use crate::domain::indicator::{
    self, atr, bollinger, ema, highest, lowest, macd, roc, rsi, stddev, wma,
};
use crate::domain::interpreter::Execution;
use crate::domain::ohlcv::{field_series, Bar, PriceField};
use crate::domain::output::{OrderType, OverlayPoint, Signal};
use crate::domain::value::{check_array_len, format_number, render_joined, Value};

const DEFAULT_ATR_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub(crate) line: usize,
    pub(crate) column: usize,
}

type Indicator = fn(&[f64], usize) -> Vec<f64>;

/// Call the builtin `name`, or `None` if there is no such builtin.
pub(crate) fn call(
    ex: &mut Execution<'_, '_>,
    name: &str,
    args: &[Value],
    site: CallSite,
) -> Option<Result<Value, String>> {
    let result = match name {
        "sma" => moving(ex, args, name, indicator::sma),
        "ema" => moving(ex, args, name, ema),
        "wma" => moving(ex, args, name, wma),
        "rsi" => moving(ex, args, name, rsi),
        "stddev" => moving(ex, args, name, stddev),
        "roc" => moving(ex, args, name, roc),
        "highest" => moving(ex, args, name, highest),
        "lowest" => moving(ex, args, name, lowest),
        "macd" => macd_builtin(ex, args),
        "bollinger" => bollinger_builtin(ex, args),
        "atr" => atr_builtin(ex, args),
        "crossover" => cross(ex, args, name, true),
        "crossunder" => cross(ex, args, name, false),
        "min" => extremum(args, name, f64::min),
        "max" => extremum(args, name, f64::max),
        "abs" => map_numeric(args, name, f64::abs),
        "floor" => map_numeric(args, name, f64::floor),
        "ceil" => map_numeric(args, name, f64::ceil),
        "sqrt" => map_numeric(args, name, f64::sqrt),
        "round" => round(args),
        "pow" => {
            arity(name, args, 2, 2).and_then(|()| numeric2(name, &args[0], &args[1], f64::powf))
        }
        "len" => len(args),
        "push" => push(args),
        "range" => range(ex, args),
        "keys" => keys(args),
        "nz" => nz(args),
        "feed" => feed(ex, args),
        "plot" => plot(ex, args, site),
        "signal" => signal(ex, args),
        "debug" => debug(ex, args),
        _ => return None,
    };
    Some(result)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    };
    Err(format!(
        "{}() expects {} argument(s), got {}",
        name,
        expected,
        args.len()
    ))
}

fn number(name: &str, value: &Value) -> Result<f64, String> {
    value
        .as_number()
        .ok_or_else(|| format!("{}() expects a number, got {}", name, value.type_name()))
}

fn period(name: &str, value: &Value) -> Result<usize, String> {
    match value {
        Value::Number(n) if n.is_finite() && *n >= 1.0 && n.fract() == 0.0 => Ok(*n as usize),
        _ => Err(format!("{}() period must be a positive integer", name)),
    }
}

/// A price source: a series, a numeric array or an OHLCV field name.
fn source(ex: &Execution<'_, '_>, name: &str, value: &Value) -> Result<Vec<f64>, String> {
    match value {
        Value::Str(field) => PriceField::from_name(field)
            .map(|f| field_series(ex.bars, f))
            .ok_or_else(|| format!("{}(): unknown price field '{}'", name, field)),
        other => other.to_numbers().ok_or_else(|| {
            format!(
                "{}() expects a series, numeric array or field name, got {}",
                name,
                other.type_name()
            )
        }),
    }
}

fn closes(ex: &Execution<'_, '_>) -> Vec<f64> {
    field_series(ex.bars, PriceField::Close)
}

fn moving(ex: &Execution<'_, '_>, args: &[Value], name: &str, f: Indicator) -> Result<Value, String> {
    arity(name, args, 1, 2)?;
    let (values, period_arg) = match args {
        [src, p] => (source(ex, name, src)?, p),
        _ => (closes(ex), &args[0]),
    };
    Ok(Value::series(f(&values, period(name, period_arg)?)))
}

/// Split an optional leading source argument from trailing numbers.
fn source_and_rest<'a>(
    ex: &Execution<'_, '_>,
    name: &str,
    args: &'a [Value],
) -> Result<(Vec<f64>, &'a [Value]), String> {
    match args.first() {
        Some(first) if !matches!(first, Value::Number(_)) => Ok((source(ex, name, first)?, &args[1..])),
        _ => Ok((closes(ex), args)),
    }
}

fn macd_builtin(ex: &Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("macd", args, 0, 4)?;
    let (values, rest) = source_and_rest(ex, "macd", args)?;
    if rest.len() > 3 {
        return Err("macd() expects at most 3 periods".to_string());
    }
    let nth = |i: usize, default: usize| rest.get(i).map_or(Ok(default), |v| period("macd", v));
    let out = macd(
        &values,
        nth(0, indicator::macd::DEFAULT_FAST)?,
        nth(1, indicator::macd::DEFAULT_SLOW)?,
        nth(2, indicator::macd::DEFAULT_SIGNAL)?,
    );
    let mut entries = BTreeMap::new();
    entries.insert("macd".to_string(), Value::series(out.line));
    entries.insert("signal".to_string(), Value::series(out.signal));
    entries.insert("histogram".to_string(), Value::series(out.histogram));
    Ok(Value::dict(entries))
}

fn bollinger_builtin(ex: &Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("bollinger", args, 0, 3)?;
    let (values, rest) = source_and_rest(ex, "bollinger", args)?;
    if rest.len() > 2 {
        return Err("bollinger() expects at most a period and a multiplier".to_string());
    }
    let period = match rest.first() {
        Some(v) => period("bollinger", v)?,
        None => indicator::bollinger::DEFAULT_PERIOD,
    };
    let mult = match rest.get(1) {
        Some(v) => number("bollinger", v)?,
        None => indicator::bollinger::DEFAULT_MULTIPLIER,
    };
    let bands = bollinger(&values, period, mult);
    let mut entries = BTreeMap::new();
    entries.insert("upper".to_string(), Value::series(bands.upper));
    entries.insert("middle".to_string(), Value::series(bands.middle));
    entries.insert("lower".to_string(), Value::series(bands.lower));
    Ok(Value::dict(entries))
}

fn atr_builtin(ex: &Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("atr", args, 0, 1)?;
    let period = match args.first() {
        Some(v) => period("atr", v)?,
        None => DEFAULT_ATR_PERIOD,
    };
    Ok(Value::series(atr(ex.bars, period)))
}

/// Whether `a` moved strictly above (`above`) or below `b` at the current
/// bar. A `NaN` on the previous bar never counts as already crossed.
fn cross(ex: &Execution<'_, '_>, args: &[Value], name: &str, above: bool) -> Result<Value, String> {
    arity(name, args, 2, 2)?;
    let at = |value: &Value, i: usize| {
        value.number_at(i).ok_or_else(|| {
            format!(
                "{}() expects series or numbers, got {}",
                name,
                value.type_name()
            )
        })
    };
    let t = ex.current_index();
    let (a, b) = (at(&args[0], t)?, at(&args[1], t)?);
    if t == 0 {
        return Ok(Value::Bool(false));
    }
    let (prev_a, prev_b) = (at(&args[0], t - 1)?, at(&args[1], t - 1)?);
    let crossed = if above {
        a > b && !(prev_a > prev_b)
    } else {
        a < b && !(prev_a < prev_b)
    };
    Ok(Value::Bool(crossed))
}

fn extremum(args: &[Value], name: &str, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    if args.is_empty() {
        return Err(format!("{}() expects at least 1 argument", name));
    }

    if let [single] = args {
        if let Some(values) = single.to_numbers() {
            let best = values.into_iter().filter(|v| !v.is_nan()).reduce(pick);
            return Ok(best.map_or(Value::Null, Value::Number));
        }
    }

    let series_len = args.iter().find_map(|a| match a {
        Value::Series(values) => Some(values.len()),
        _ => None,
    });
    if let Some(len) = series_len {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let mut acc: Option<f64> = None;
            for arg in args {
                let v = match arg {
                    Value::Series(values) if values.len() == len => values[i],
                    Value::Series(values) => {
                        return Err(format!(
                            "{}(): series length mismatch ({} vs {})",
                            name,
                            len,
                            values.len()
                        ));
                    }
                    other => number(name, other)?,
                };
                acc = Some(match acc {
                    _ if v.is_nan() => f64::NAN,
                    Some(prev) if prev.is_nan() => f64::NAN,
                    Some(prev) => pick(prev, v),
                    None => v,
                });
            }
            out.push(acc.unwrap_or(f64::NAN));
        }
        return Ok(Value::series(out));
    }

    let mut best: Option<f64> = None;
    for arg in args {
        let v = number(name, arg)?;
        best = Some(best.map_or(v, |b| pick(b, v)));
    }
    Ok(best.map_or(Value::Null, Value::Number))
}

fn map_numeric(args: &[Value], name: &str, f: fn(f64) -> f64) -> Result<Value, String> {
    arity(name, args, 1, 1)?;
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(f(*n))),
        Value::Series(values) => Ok(Value::series(values.iter().map(|v| f(*v)).collect())),
        other => Err(format!(
            "{}() expects a number or series, got {}",
            name,
            other.type_name()
        )),
    }
}

/// Apply `f` to two numbers, broadcasting over series.
fn numeric2(name: &str, a: &Value, b: &Value, f: fn(f64, f64) -> f64) -> Result<Value, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(f(*x, *y))),
        (Value::Series(xs), Value::Series(ys)) => {
            if xs.len() != ys.len() {
                return Err(format!(
                    "{}(): series length mismatch ({} vs {})",
                    name,
                    xs.len(),
                    ys.len()
                ));
            }
            Ok(Value::series(xs.iter().zip(ys.iter()).map(|(x, y)| f(*x, *y)).collect()))
        }
        (Value::Series(xs), Value::Number(y)) => Ok(Value::series(xs.iter().map(|x| f(*x, *y)).collect())),
        (Value::Number(x), Value::Series(ys)) => Ok(Value::series(ys.iter().map(|y| f(*x, *y)).collect())),
        (x, y) => Err(format!(
            "{}() expects numbers or series, got {} and {}",
            name,
            x.type_name(),
            y.type_name()
        )),
    }
}

fn round(args: &[Value]) -> Result<Value, String> {
    arity("round", args, 1, 2)?;
    let digits = match args.get(1) {
        Some(v) => number("round", v)?,
        None => 0.0,
    };
    let factor = 10f64.powi(digits.clamp(-15.0, 15.0) as i32);
    let round_to = |x: f64| (x * factor).round() / factor;
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(round_to(*n))),
        Value::Series(values) => Ok(Value::series(values.iter().map(|v| round_to(*v)).collect())),
        other => Err(format!(
            "round() expects a number or series, got {}",
            other.type_name()
        )),
    }
}

fn len(args: &[Value]) -> Result<Value, String> {
    arity("len", args, 1, 1)?;
    args[0]
        .length()
        .map(|n| Value::Number(n as f64))
        .ok_or_else(|| format!("len() is not defined for {}", args[0].type_name()))
}

fn push(args: &[Value]) -> Result<Value, String> {
    arity("push", args, 2, 2)?;
    match &args[0] {
        Value::Array(items) => {
            check_array_len(items.len() + 1)?;
            let mut items = items.as_ref().clone();
            items.push(args[1].clone());
            Ok(Value::array(items))
        }
        other => Err(format!("push() expects an array, got {}", other.type_name())),
    }
}

fn range(ex: &Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("range", args, 1, 3)?;
    let nums = args
        .iter()
        .map(|a| number("range", a))
        .collect::<Result<Vec<f64>, String>>()?;
    let (start, end, step) = match nums[..] {
        [] => (0.0, 0.0, 1.0),
        [end] => (0.0, end, 1.0),
        [start, end] => (start, end, 1.0),
        [start, end, step, ..] => (start, end, step),
    };
    if step == 0.0 || !step.is_finite() {
        return Err("range() step must be a non-zero number".to_string());
    }
    let count = ((end - start) / step).ceil().max(0.0);
    let budget = ex.limiter.limits().max_iterations;
    if !count.is_finite() || count > budget as f64 {
        return Err(format!(
            "Limit exceeded: range() of {} elements is above the iteration budget of {}",
            format_number(count),
            budget
        ));
    }
    check_array_len(count as usize)?;
    let items = (0..count as u64)
        .map(|i| Value::Number(start + i as f64 * step))
        .collect();
    Ok(Value::array(items))
}

fn keys(args: &[Value]) -> Result<Value, String> {
    arity("keys", args, 1, 1)?;
    match &args[0] {
        Value::Dict(entries) => Ok(Value::array(entries.keys().map(Value::string).collect())),
        other => Err(format!("keys() expects a dictionary, got {}", other.type_name())),
    }
}

/// Replace `NaN` and `null` with a default.
fn nz(args: &[Value]) -> Result<Value, String> {
    arity("nz", args, 1, 2)?;
    let fallback = match args.get(1) {
        Some(v) => number("nz", v)?,
        None => 0.0,
    };
    let fix = |v: f64| if v.is_nan() { fallback } else { v };
    Ok(match &args[0] {
        Value::Null => Value::Number(fallback),
        Value::Number(n) => Value::Number(fix(*n)),
        Value::Series(values) => Value::series(values.iter().map(|v| fix(*v)).collect()),
        other => other.clone(),
    })
}

fn feed(ex: &Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("feed", args, 1, 2)?;
    let symbol = args[0]
        .as_str()
        .ok_or_else(|| format!("feed() expects a symbol string, got {}", args[0].type_name()))?;
    let field = match args.get(1) {
        Some(Value::Str(name)) => PriceField::from_name(name)
            .ok_or_else(|| format!("feed(): unknown price field '{}'", name))?,
        Some(other) => {
            return Err(format!(
                "feed() expects a field name, got {}",
                other.type_name()
            ));
        }
        None => PriceField::Close,
    };
    let bars = ex
        .feed
        .get(symbol)
        .ok_or_else(|| format!("No data feed for symbol '{}'", symbol))?;
    Ok(Value::series(field_series(bars, field)))
}

fn plot(ex: &mut Execution<'_, '_>, args: &[Value], site: CallSite) -> Result<Value, String> {
    arity("plot", args, 1, 3)?;
    let title = match args.get(1) {
        Some(Value::Str(title)) => title.to_string(),
        Some(Value::Null) | None => format!("plot {}:{}", site.line, site.column),
        Some(other) => return Err(format!("plot() title must be a string, got {}", other.type_name())),
    };
    let color = match args.get(2) {
        Some(Value::Str(color)) => Some(color.as_ref()),
        Some(Value::Null) | None => None,
        Some(other) => return Err(format!("plot() color must be a string, got {}", other.type_name())),
    };

    match &args[0] {
        Value::Number(value) => {
            let bar = ex
                .bars
                .get(ex.current_index())
                .ok_or_else(|| "plot() needs at least one bar".to_string())?;
            let point = OverlayPoint {
                timestamp: bar.timestamp,
                value: *value,
            };
            ex.overlays.push_point(&title, point, color);
        }
        value @ (Value::Series(_) | Value::Dict(_)) => {
            if !ex.overlays.register(&title, value, ex.bars, color) {
                return Err(format!(
                    "plot() needs values aligned with the {} bars",
                    ex.bars.len()
                ));
            }
        }
        other => return Err(format!("plot() cannot chart {}", other.type_name())),
    }
    Ok(args[0].clone())
}

/// Close of `symbol` at or before `timestamp`, looked up in the data feed.
fn feed_price(ex: &Execution<'_, '_>, symbol: &str, timestamp: i64) -> Option<f64> {
    let bars = ex.feed.get(symbol)?;
    let visible = bars.partition_point(|b: &Bar| b.timestamp <= timestamp);
    bars[..visible].last().map(|b| b.close)
}

fn signal(ex: &mut Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    arity("signal", args, 1, 2)?;
    let action = match &args[0] {
        Value::Str(action) if !action.trim().is_empty() => action.trim().to_uppercase(),
        _ => return Err("signal() expects an action string".to_string()),
    };
    let index = ex.current_index();
    let bar = ex
        .bars
        .get(index)
        .ok_or_else(|| "signal() needs at least one bar".to_string())?;

    let mut symbol = bar.symbol.clone();
    let mut quantity = None;
    let mut order_type = OrderType::Market;
    let mut limit_price = None;

    match args.get(1) {
        None | Some(Value::Null) => {}
        Some(Value::Number(q)) => quantity = Some(*q),
        Some(Value::Dict(options)) => {
            for (key, value) in options.iter() {
                match key.as_str() {
                    "quantity" | "qty" => quantity = Some(number("signal", value)?),
                    "symbol" => {
                        symbol = value
                            .as_str()
                            .ok_or_else(|| "signal() symbol must be a string".to_string())?
                            .to_string();
                    }
                    "type" => {
                        order_type = match value.as_str().map(str::to_lowercase).as_deref() {
                            Some("market") => OrderType::Market,
                            Some("limit") => OrderType::Limit,
                            _ => return Err(format!("signal() unknown order type {}", value)),
                        };
                    }
                    "price" => limit_price = Some(number("signal", value)?),
                    _ => {}
                }
            }
        }
        Some(other) => {
            return Err(format!(
                "signal() expects a quantity or options dictionary, got {}",
                other.type_name()
            ));
        }
    }

    if let Some(q) = quantity {
        if !(q.is_finite() && q > 0.0) {
            return Err("signal() quantity must be a positive number".to_string());
        }
    }
    if order_type == OrderType::Limit && limit_price.is_none() {
        return Err("signal() limit orders need a price".to_string());
    }

    let price = if symbol == bar.symbol {
        bar.close
    } else {
        feed_price(ex, &symbol, bar.timestamp).unwrap_or(f64::NAN)
    };
    let emitted = Signal {
        action,
        symbol,
        timestamp: bar.timestamp,
        bar_index: index,
        price,
        quantity,
        order_type,
        limit_price,
    };
    tracing::debug!(
        action = %emitted.action,
        symbol = %emitted.symbol,
        bar_index = index,
        price = emitted.price,
        "signal emitted"
    );
    ex.signals.push(emitted);
    Ok(Value::Bool(true))
}

fn debug(ex: &mut Execution<'_, '_>, args: &[Value]) -> Result<Value, String> {
    let message = render_joined(args, " ")?;
    let line = match ex.current_bar {
        Some(index) => format!("[bar {}] {}", index, message),
        None => message,
    };
    tracing::debug!(target: "samscript::script", "{}", line);
    ex.logs.push(line);
    Ok(Value::Null)
}
