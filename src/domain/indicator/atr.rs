//! Average True Range with Wilder smoothing over high/low/close.

use crate::domain::ohlcv::Bar;

pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }

    let true_ranges: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut current = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = current;
    for i in period..bars.len() {
        current = (current * (period - 1) as f64 + true_ranges[i]) / period as f64;
        out[i] = current;
    }
    out
}
