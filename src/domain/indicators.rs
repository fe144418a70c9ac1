//! Summary statistics and the derived indicators stored alongside price rows.
//!
//! Series functions return one value per input close; warmup positions are
//! `None`.
//!
//! - SMA(n)[i] = mean(C[i-n+1..=i])
//! - RSI(n): Wilder smoothing, avg = (prev_avg * (n-1) + current) / n,
//!   RSI = 100 - 100 / (1 + avg_gain / avg_loss), 100 when avg_loss == 0.
//! - Volatility(n)[i] = sample stdev of the n simple returns ending at i.

pub const SMA_PERIOD: usize = 20;
pub const RSI_PERIOD: usize = 14;
pub const VOLATILITY_PERIOD: usize = 20;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); needs two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values
        .iter()
        .map(|v| {
            let diff = v - m;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

pub fn sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; closes.len()];
    }
    (0..closes.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                mean(&closes[i + 1 - period..=i])
            }
        })
        .collect()
}

pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return values;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let rsi_of = |avg_gain: f64, avg_loss: f64| {
        if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
        }
    };

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    values[period] = Some(rsi_of(avg_gain, avg_loss));

    for i in period + 1..closes.len() {
        let idx = i - 1;
        avg_gain = (avg_gain * (period - 1) as f64 + gains[idx]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[idx]) / period as f64;
        values[i] = Some(rsi_of(avg_gain, avg_loss));
    }

    values
}

pub fn rolling_volatility(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    if period < 2 {
        return values;
    }
    let returns: Vec<Option<f64>> = std::iter::once(None)
        .chain(closes.windows(2).map(|w| {
            if w[0] > 0.0 {
                Some(w[1] / w[0] - 1.0)
            } else {
                None
            }
        }))
        .collect();

    for i in period..closes.len() {
        let window: Option<Vec<f64>> = returns[i + 1 - period..=i].iter().copied().collect();
        values[i] = window.and_then(|w| sample_std(&w));
    }
    values
}

/// The three indicator columns persisted per row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorRow {
    pub sma_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub volatility_20: Option<f64>,
}

pub fn compute_indicator_rows(closes: &[f64]) -> Vec<IndicatorRow> {
    let sma = sma(closes, SMA_PERIOD);
    let rsi = rsi(closes, RSI_PERIOD);
    let vol = rolling_volatility(closes, VOLATILITY_PERIOD);
    (0..closes.len())
        .map(|i| IndicatorRow {
            sma_20: sma[i],
            rsi_14: rsi[i],
            volatility_20: vol[i],
        })
        .collect()
}
