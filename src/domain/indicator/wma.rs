//! Weighted Moving Average.
//!
//! WMA(n) = (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2), kept in
//! O(1) per step with a running weighted sum and window sum.

use crate::domain::indicator::after_warmup;

pub fn wma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    after_warmup(values, |data| {
        let divisor = (period * (period + 1)) as f64 / 2.0;
        let mut weighted_sum = 0.0;
        let mut window_sum = 0.0;
        let mut out = Vec::with_capacity(data.len());

        for (i, &price) in data.iter().enumerate() {
            if i < period {
                weighted_sum += (i + 1) as f64 * price;
                window_sum += price;
            } else {
                weighted_sum += period as f64 * price - window_sum;
                window_sum += price - data[i - period];
            }
            out.push(if i + 1 >= period {
                weighted_sum / divisor
            } else {
                f64::NAN
            });
        }
        out
    })
}
