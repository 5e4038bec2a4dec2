//! Bollinger Bands: SMA middle band with upper/lower bands at
//! `mult` population standard deviations.

use crate::domain::indicator::{sma, stddev};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(values: &[f64], period: usize, mult: f64) -> Bands {
    let middle = sma(values, period);
    let deviation = stddev(values, period);
    let upper = middle
        .iter()
        .zip(&deviation)
        .map(|(m, d)| m + mult * d)
        .collect();
    let lower = middle
        .iter()
        .zip(&deviation)
        .map(|(m, d)| m - mult * d)
        .collect();
    Bands {
        upper,
        middle,
        lower,
    }
}
