//! Rolling highest and lowest values.

use crate::domain::indicator::windowed;

pub fn highest(values: &[f64], period: usize) -> Vec<f64> {
    windowed(values, period, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn lowest(values: &[f64], period: usize) -> Vec<f64> {
    windowed(values, period, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}
