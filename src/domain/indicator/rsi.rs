//! Relative Strength Index with Wilder smoothing.
//!
//! The first average gain/loss is the mean over the first n changes, then
//! avg = (prev_avg * (n-1) + current) / n. RSI = 100 - 100 / (1 + gain/loss),
//! and 100 when the average loss is zero. The first n positions are warm-up.

use crate::domain::indicator::after_warmup;

pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    after_warmup(values, |data| {
        let mut out = vec![f64::NAN; data.len()];
        if data.len() <= period {
            return out;
        }

        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for i in 1..data.len() {
            let change = data[i] - data[i - 1];
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            if i < period {
                avg_gain += gain;
                avg_loss += loss;
                continue;
            }
            if i == period {
                avg_gain = (avg_gain + gain) / period as f64;
                avg_loss = (avg_loss + loss) / period as f64;
            } else {
                avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
                avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
            }
            out[i] = if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
            };
        }
        out
    })
}
