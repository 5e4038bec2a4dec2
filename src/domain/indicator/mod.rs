//! Technical indicators over numeric series.
//!
//! Every function maps an input series to an output of the same length.
//! Positions without enough history are `NaN`. Leading `NaN`s in the input
//! (an upstream warm-up, e.g. an EMA of an SMA) shift the warm-up window
//! instead of poisoning the whole output.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod extremes;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod stddev;
pub mod wma;

pub use atr::atr;
pub use bollinger::{bollinger, Bands};
pub use ema::ema;
pub use extremes::{highest, lowest};
pub use macd::{macd, Macd};
pub use roc::roc;
pub use rsi::rsi;
pub use stddev::stddev;
pub use wma::wma;

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    windowed(values, period, |window| {
        window.iter().sum::<f64>() / window.len() as f64
    })
}

/// Apply `f` to every complete trailing window of `period` values.
pub(crate) fn windowed(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    after_warmup(values, |data| {
        (0..data.len())
            .map(|i| {
                if i + 1 < period {
                    f64::NAN
                } else {
                    f(&data[i + 1 - period..=i])
                }
            })
            .collect()
    })
}

/// Run `compute` on the input with its leading `NaN`s stripped, then pad the
/// result back to the input length.
pub(crate) fn after_warmup(values: &[f64], compute: impl FnOnce(&[f64]) -> Vec<f64>) -> Vec<f64> {
    let start = values
        .iter()
        .position(|v| !v.is_nan())
        .unwrap_or(values.len());
    let mut out = vec![f64::NAN; start];
    out.extend(compute(&values[start..]));
    out
}

#[cfg(test)]
pub(crate) mod test_util {
    pub fn assert_series(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "length mismatch");
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            if e.is_nan() {
                assert!(a.is_nan(), "index {}: expected NaN, got {}", i, a);
            } else {
                approx::assert_relative_eq!(*a, *e, epsilon = 1e-9);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::assert_series;
    use super::*;

    const NAN: f64 = f64::NAN;

    #[test]
    fn sma_basic() {
        assert_series(&sma(&[1.0, 2.0, 3.0, 4.0], 2), &[NAN, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn sma_period_longer_than_input() {
        assert_series(&sma(&[1.0, 2.0], 5), &[NAN, NAN]);
    }

    #[test]
    fn sma_period_zero_is_all_nan() {
        assert_series(&sma(&[1.0, 2.0], 0), &[NAN, NAN]);
    }

    #[test]
    fn sma_of_warmed_up_series() {
        let inner = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_series(&sma(&inner, 2), &[NAN, NAN, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn sma_empty() {
        assert!(sma(&[], 3).is_empty());
    }
}
