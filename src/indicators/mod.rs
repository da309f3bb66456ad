//! Indicator Library - pure numeric functions over a price series
//!
//! Invoked by downstream consumers over stored history:
//! - SMA (simple moving average)
//! - EMA (exponential moving average)
//! - RSI (Wilder's smoothing)
//! - stddev (population standard deviation)
//! - ROC (rate of change, percent)
//!
//! All functions take the series oldest-first and return `None` when
//! the series is too short for the requested period.

/// Simple moving average over the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average over the whole series, seeded with an SMA
/// of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    for v in &values[period..] {
        ema = v * k + ema * (1.0 - k);
    }
    Some(ema)
}

/// Relative Strength Index with Wilder's smoothing.
/// Needs at least `period + 1` values to form `period` deltas.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in values[..period + 1].windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += -delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in values[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta > 0.0 {
            (delta, 0.0)
        } else {
            (0.0, -delta)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Population standard deviation of the last `period` values
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some(variance.sqrt())
}

/// Rate of change in percent over the last `period` steps
pub fn roc(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let prev = values[values.len() - 1 - period];
    if prev == 0.0 {
        return None;
    }
    let last = values[values.len() - 1];
    Some((last - prev) / prev * 100.0)
}
