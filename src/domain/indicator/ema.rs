//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the SMA of the first n values, then
//! EMA[i] = P[i]*k + EMA[i-1]*(1-k). The first n-1 positions are warm-up.

use crate::domain::indicator::after_warmup;

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    after_warmup(values, |data| {
        let k = 2.0 / (period as f64 + 1.0);
        let mut out = Vec::with_capacity(data.len());
        let mut ema = 0.0;
        let mut sum = 0.0;
        for (i, &price) in data.iter().enumerate() {
            if i < period - 1 {
                sum += price;
                out.push(f64::NAN);
            } else if i == period - 1 {
                sum += price;
                ema = sum / period as f64;
                out.push(ema);
            } else {
                ema = price * k + ema * (1.0 - k);
                out.push(ema);
            }
        }
        out
    })
}
