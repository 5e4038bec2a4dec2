//! Rolling population standard deviation (divides by n).

use crate::domain::indicator::windowed;

pub fn stddev(values: &[f64], period: usize) -> Vec<f64> {
    windowed(values, period, population_stddev)
}

pub(crate) fn population_stddev(window: &[f64]) -> f64 {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt()
}
