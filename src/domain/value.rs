//! Runtime values of the strategy language.
//!
//! Containers are reference counted and copied on write, so passing an array
//! or dictionary around is cheap while assignment keeps value semantics.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;

/// Longest string (in bytes) or array (in elements) a script may build.
pub const MAX_VALUE_LEN: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Array(Arc<Vec<Value>>),
    /// Numbers aligned one-to-one with the bar sequence; `NaN` marks warm-up.
    Series(Arc<[f64]>),
    Dict(Arc<BTreeMap<String, Value>>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn series(values: Vec<f64>) -> Value {
        Value::Series(values.into())
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Arc::new(values))
    }

    pub fn dict(entries: BTreeMap<String, Value>) -> Value {
        Value::Dict(Arc::new(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Series(_) => "series",
            Value::Dict(_) => "dictionary",
        }
    }

    /// Truthiness, reading a series at bar `at`.
    pub fn truthy(&self, at: usize) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => number_truthy(*n),
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Series(values) => values.get(at).copied().is_some_and(number_truthy),
            Value::Dict(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A numeric array or a series as a plain vector of numbers.
    pub fn to_numbers(&self) -> Option<Vec<f64>> {
        match self {
            Value::Series(values) => Some(values.to_vec()),
            Value::Array(items) => items.iter().map(Value::as_number).collect(),
            _ => None,
        }
    }

    /// The value of a number or of a series at bar `at`.
    pub fn number_at(&self, at: usize) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Series(values) => Some(values.get(at).copied().unwrap_or(f64::NAN)),
            _ => None,
        }
    }

    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Series(values) => Some(values.len()),
            Value::Dict(entries) => Some(entries.len()),
            _ => None,
        }
    }
}

/// Text sink that fails once it would pass `MAX_VALUE_LEN` bytes, so shared
/// containers are never expanded past the limit.
struct Capped(String);

impl Write for Capped {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.0.len() + s.len() > MAX_VALUE_LEN {
            return Err(fmt::Error);
        }
        self.0.push_str(s);
        Ok(())
    }
}

/// Display `values` joined by `separator`, bounded by `MAX_VALUE_LEN`.
pub fn render_joined<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    separator: &str,
) -> Result<String, String> {
    let mut sink = Capped(String::new());
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            sink.write_str(separator).map_err(|_| string_too_long())?;
        }
        write!(sink, "{}", value).map_err(|_| string_too_long())?;
    }
    Ok(sink.0)
}

pub fn string_too_long() -> String {
    format!("Limit exceeded: string longer than {} bytes", MAX_VALUE_LEN)
}

/// Check a prospective array length against `MAX_VALUE_LEN`.
pub fn check_array_len(len: usize) -> Result<(), String> {
    if len > MAX_VALUE_LEN {
        return Err(format!(
            "Limit exceeded: array longer than {} elements",
            MAX_VALUE_LEN
        ));
    }
    Ok(())
}

fn number_truthy(n: f64) -> bool {
    n != 0.0 && !n.is_nan()
}

/// Format a number the way scripts see it: integral values without `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
            Value::Series(values) => {
                let last = values.last().copied().unwrap_or(f64::NAN);
                write!(f, "series[{}] {}", values.len(), format_number(last))
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
