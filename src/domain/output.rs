//! Execution outputs: overlays, trade signals and the interpreter result.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::ohlcv::Bar;
use crate::domain::value::Value;

const PALETTE: [&str; 8] = [
    "#2962FF", "#FF6D00", "#00C853", "#D50000", "#AA00FF", "#FFD600", "#00B8D4", "#C51162",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Line,
    MultiLine,
    Band,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayPoint {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayLine {
    pub label: String,
    pub points: Vec<OverlayPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub name: String,
    pub kind: OverlayKind,
    pub color: String,
    pub lines: Vec<OverlayLine>,
}

impl Overlay {
    pub fn line(&self, label: &str) -> Option<&OverlayLine> {
        self.lines.iter().find(|l| l.label == label)
    }
}

/// Overlays of one execution, in registration order. Registering an existing
/// name replaces its data but keeps its color.
#[derive(Debug, Default)]
pub struct OverlaySet {
    overlays: Vec<Overlay>,
}

impl OverlaySet {
    /// Register `value` under `name` if it is chartable: a series aligned
    /// with `bars`, or a dictionary of such series. Returns whether an
    /// overlay was registered.
    pub fn register(&mut self, name: &str, value: &Value, bars: &[Bar], color: Option<&str>) -> bool {
        let (kind, lines) = match value {
            Value::Series(values) if values.len() == bars.len() => {
                (OverlayKind::Line, vec![aligned_line(name, values, bars)])
            }
            Value::Dict(entries) => {
                let lines: Vec<OverlayLine> = entries
                    .iter()
                    .filter_map(|(label, v)| match v {
                        Value::Series(values) if values.len() == bars.len() => {
                            Some(aligned_line(label, values, bars))
                        }
                        _ => None,
                    })
                    .collect();
                if lines.is_empty() {
                    return false;
                }
                let kind = if entries.contains_key("upper") && entries.contains_key("lower") {
                    OverlayKind::Band
                } else {
                    OverlayKind::MultiLine
                };
                (kind, lines)
            }
            _ => return false,
        };
        self.upsert(name, kind, lines, color);
        true
    }

    /// Append one point to the single-line overlay `name`, creating it on
    /// first use. `NaN` points are dropped.
    pub fn push_point(&mut self, name: &str, point: OverlayPoint, color: Option<&str>) {
        if !self.overlays.iter().any(|o| o.name == name) {
            self.upsert(name, OverlayKind::Line, vec![OverlayLine {
                label: name.to_string(),
                points: Vec::new(),
            }], color);
        }
        if point.value.is_nan() {
            return;
        }
        if let Some(line) = self
            .overlays
            .iter_mut()
            .find(|o| o.name == name)
            .and_then(|o| o.lines.first_mut())
        {
            line.points.push(point);
        }
    }

    fn upsert(&mut self, name: &str, kind: OverlayKind, lines: Vec<OverlayLine>, color: Option<&str>) {
        if let Some(existing) = self.overlays.iter_mut().find(|o| o.name == name) {
            existing.kind = kind;
            existing.lines = lines;
            if let Some(color) = color {
                existing.color = color.to_string();
            }
            return;
        }
        let color = color
            .map(str::to_string)
            .unwrap_or_else(|| PALETTE[self.overlays.len() % PALETTE.len()].to_string());
        self.overlays.push(Overlay {
            name: name.to_string(),
            kind,
            color,
            lines,
        });
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn into_vec(self) -> Vec<Overlay> {
        self.overlays
    }
}

fn aligned_line(label: &str, values: &[f64], bars: &[Bar]) -> OverlayLine {
    OverlayLine {
        label: label.to_string(),
        points: values
            .iter()
            .zip(bars)
            .filter(|(v, _)| !v.is_nan())
            .map(|(&value, bar)| OverlayPoint {
                timestamp: bar.timestamp,
                value,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// A trade intent emitted by `signal(...)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    /// Upper-cased action, e.g. `BUY`, `SELL`, `CLOSE`.
    pub action: String,
    pub symbol: String,
    pub timestamp: i64,
    pub bar_index: usize,
    /// Close of the bar the signal was emitted on.
    pub price: f64,
    pub quantity: Option<f64>,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

/// Everything one execution produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpreterResult {
    pub success: bool,
    pub title: Option<String>,
    pub overlays: Vec<Overlay>,
    pub signals: Vec<Signal>,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
    /// Final global bindings, excluding the pre-bound market data names.
    pub variables: BTreeMap<String, Value>,
    /// Step budget consumed.
    pub steps: u64,
}

impl InterpreterResult {
    /// A failed result carrying a single error and nothing else.
    pub fn failure(error: String) -> Self {
        InterpreterResult {
            success: false,
            title: None,
            overlays: Vec::new(),
            signals: Vec::new(),
            errors: vec![error],
            logs: Vec::new(),
            variables: BTreeMap::new(),
            steps: 0,
        }
    }

    pub fn overlay(&self, name: &str) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::new("T", i as i64 * 1000, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect()
    }

    #[test]
    fn series_becomes_line_without_nan_points() {
        let mut set = OverlaySet::default();
        let value = Value::series(vec![f64::NAN, 2.0, 3.0]);
        assert!(set.register("fast", &value, &bars(3), None));
        let overlays = set.into_vec();
        assert_eq!(overlays[0].kind, OverlayKind::Line);
        assert_eq!(overlays[0].color, PALETTE[0]);
        let points = &overlays[0].lines[0].points;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1000);
    }

    #[test]
    fn misaligned_series_is_ignored() {
        let mut set = OverlaySet::default();
        assert!(!set.register("x", &Value::series(vec![1.0]), &bars(3), None));
        assert!(set.is_empty());
    }

    #[test]
    fn dict_with_upper_lower_is_band() {
        let mut entries = BTreeMap::new();
        for key in ["upper", "middle", "lower"] {
            entries.insert(key.to_string(), Value::series(vec![1.0, 2.0]));
        }
        let mut set = OverlaySet::default();
        assert!(set.register("bb", &Value::dict(entries), &bars(2), None));
        let overlay = &set.into_vec()[0];
        assert_eq!(overlay.kind, OverlayKind::Band);
        assert!(overlay.line("middle").is_some());
    }

    #[test]
    fn other_dict_is_multiline() {
        let mut entries = BTreeMap::new();
        entries.insert("macd".to_string(), Value::series(vec![1.0]));
        entries.insert("signal".to_string(), Value::series(vec![1.0]));
        let mut set = OverlaySet::default();
        set.register("m", &Value::dict(entries), &bars(1), None);
        assert_eq!(set.into_vec()[0].kind, OverlayKind::MultiLine);
    }

    #[test]
    fn re_register_keeps_color_and_position() {
        let mut set = OverlaySet::default();
        set.register("a", &Value::series(vec![1.0]), &bars(1), None);
        set.register("b", &Value::series(vec![1.0]), &bars(1), Some("#000000"));
        set.register("a", &Value::series(vec![5.0]), &bars(1), None);
        let overlays = set.into_vec();
        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[0].name, "a");
        assert_eq!(overlays[0].color, PALETTE[0]);
        assert_eq!(overlays[0].lines[0].points[0].value, 5.0);
        assert_eq!(overlays[1].color, "#000000");
    }

    #[test]
    fn push_point_accumulates() {
        let mut set = OverlaySet::default();
        set.push_point("p", OverlayPoint { timestamp: 1, value: 1.0 }, None);
        set.push_point("p", OverlayPoint { timestamp: 2, value: f64::NAN }, None);
        set.push_point("p", OverlayPoint { timestamp: 3, value: 3.0 }, None);
        let overlays = set.into_vec();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].lines[0].points.len(), 2);
    }
}
