//! Rate of change: ((P[i] - P[i-n]) / P[i-n]) * 100, 0 when P[i-n] is 0.

use crate::domain::indicator::after_warmup;

pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    after_warmup(values, |data| {
        (0..data.len())
            .map(|i| {
                if period == 0 || i < period {
                    return f64::NAN;
                }
                let prev = data[i - period];
                if prev == 0.0 {
                    0.0
                } else {
                    (data[i] - prev) / prev * 100.0
                }
            })
            .collect()
    })
}
