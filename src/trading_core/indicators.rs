//! Numeric building blocks shared by the pipeline components
//!
//! Every function returns a neutral value (0, 50, `None`) instead of NaN when
//! its input is too short or degenerate.

use super::bars::Bar;

/// Wilder-smoothed directional movement reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Ordinary least squares fit of value against index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Slope as a percentage of the mean value, per bar
    pub slope_pct: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean and sample standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let m = mean(values);
    if values.len() < 2 {
        return (m, 0.0);
    }
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    (m, var.sqrt())
}

/// Share of `history` at or below `value`, in percent
pub fn percentile_rank(history: &[f64], value: f64) -> f64 {
    if history.is_empty() {
        return 50.0;
    }
    let below = history.iter().filter(|&&h| h <= value).count();
    below as f64 / history.len() as f64 * 100.0
}

pub fn highest_high(bars: &[Bar]) -> f64 {
    bars.iter().map(|b| b.high).fold(f64::MIN, f64::max)
}

pub fn lowest_low(bars: &[Bar]) -> f64 {
    bars.iter().map(|b| b.low).fold(f64::MAX, f64::min)
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// True ranges for bars[1..]
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| w[1].true_range(w[0].close))
        .collect()
}

/// Wilder Average True Range over the whole slice
pub fn atr(bars: &[Bar], period: usize) -> f64 {
    if bars.len() < 2 {
        return bars.first().map(|b| b.range()).unwrap_or(0.0);
    }
    let period = period.max(1);
    let trs = true_ranges(bars);
    if trs.len() < period {
        return mean(&trs);
    }

    let mut value = mean(&trs[..period]);
    for tr in &trs[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
    }
    value
}

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(mean(&values[values.len() - period..]))
}

/// EMA series seeded with the SMA of the first `period` values.
///
/// Element `k` of the result corresponds to `values[period - 1 + k]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut ema = mean(&values[..period]);
    out.push(ema);
    for v in &values[period..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Wilder ADX with +DI / -DI. Needs at least `2 * period + 1` bars.
pub fn adx(bars: &[Bar], period: usize) -> Option<AdxReading> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let n = bars.len();
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut trs = Vec::with_capacity(n - 1);

    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        trs.push(bars[i].true_range(bars[i - 1].close));
    }

    let p = period as f64;
    let mut tr_s: f64 = trs[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let di = |dm: f64, tr: f64| if tr > 0.0 { 100.0 * dm / tr } else { 0.0 };
    let dx = |plus: f64, minus: f64| {
        let sum = plus + minus;
        if sum > 0.0 { 100.0 * (plus - minus).abs() / sum } else { 0.0 }
    };

    let mut plus_di = di(plus_s, tr_s);
    let mut minus_di = di(minus_s, tr_s);
    let mut dxs = vec![dx(plus_di, minus_di)];

    for i in period..trs.len() {
        tr_s = tr_s - tr_s / p + trs[i];
        plus_s = plus_s - plus_s / p + plus_dm[i];
        minus_s = minus_s - minus_s / p + minus_dm[i];
        plus_di = di(plus_s, tr_s);
        minus_di = di(minus_s, tr_s);
        dxs.push(dx(plus_di, minus_di));
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = mean(&dxs[..period]);
    for d in &dxs[period..] {
        adx = (adx * (p - 1.0) + d) / p;
    }

    Some(AdxReading { adx, plus_di, minus_di })
}

/// OLS of `values` against their index
pub fn linear_regression(values: &[f64]) -> Option<Regression> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = mean(values);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx <= 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy > 0.0 { (sxy * sxy) / (sxx * syy) } else { 0.0 };
    let slope_pct = if mean_y != 0.0 { slope / mean_y * 100.0 } else { 0.0 };

    Some(Regression { slope, intercept, r_squared, slope_pct })
}

/// Rescaled-range Hurst exponent of the log returns of `prices`.
///
/// Chunk sizes double from `min_chunk` while at least two chunks fit; the
/// exponent is the slope of ln(R/S) against ln(size). `None` when fewer than
/// two chunk sizes produce a usable R/S value.
pub fn hurst_exponent(prices: &[f64], min_chunk: usize) -> Option<f64> {
    if prices.iter().any(|p| *p <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut size = min_chunk.max(4);
    while size * 2 <= returns.len() {
        let mut rs_values = Vec::new();
        for chunk in returns.chunks_exact(size) {
            let m = mean(chunk);
            let mut cum = 0.0;
            let mut max_dev = f64::MIN;
            let mut min_dev = f64::MAX;
            for r in chunk {
                cum += r - m;
                max_dev = max_dev.max(cum);
                min_dev = min_dev.min(cum);
            }
            let variance = chunk.iter().map(|r| (r - m).powi(2)).sum::<f64>() / size as f64;
            let s = variance.sqrt();
            if s > 1e-12 {
                rs_values.push((max_dev - min_dev) / s);
            }
        }
        let avg_rs = mean(&rs_values);
        if !rs_values.is_empty() && avg_rs > 0.0 {
            xs.push((size as f64).ln());
            ys.push(avg_rs.ln());
        }
        size *= 2;
    }

    if xs.len() < 2 {
        return None;
    }
    let mx = mean(&xs);
    let my = mean(&ys);
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    if sxx <= 0.0 {
        return None;
    }
    Some((sxy / sxx).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::testing::{bars_from_closes, linear_bars};

    #[test]
    fn test_mean_std_and_percentile() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((m - 5.0).abs() < 1e-12);
        assert!((s - 2.138089935).abs() < 1e-6);
        assert_eq!(mean_std(&[3.0]), (3.0, 0.0));
        assert_eq!(percentile_rank(&[], 1.0), 50.0);
        assert_eq!(percentile_rank(&[1.0, 2.0, 3.0, 4.0], 2.0), 50.0);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = bars_from_closes(&[100.0; 30], 1.0);
        assert!((atr(&bars, 14) - 1.0).abs() < 1e-9);
        assert_eq!(atr(&[], 14), 0.0);
    }

    #[test]
    fn test_ema_seeding() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let series = ema_series(&values, 3);
        assert_eq!(series.len(), 8);
        assert!((series[0] - 2.0).abs() < 1e-12);
        assert!((series[1] - 3.0).abs() < 1e-12);
        assert!(ema(&values, 20).is_none());
        assert_eq!(sma(&values, 4), Some(8.5));
    }

    #[test]
    fn test_linear_regression_perfect_fit() {
        let values: Vec<f64> = (0..50).map(|i| 100.0 + 0.5 * i as f64).collect();
        let reg = linear_regression(&values).unwrap();
        assert!((reg.slope - 0.5).abs() < 1e-9);
        assert!((reg.r_squared - 1.0).abs() < 1e-9);
        assert!(reg.slope_pct > 0.0);

        let flat = linear_regression(&[5.0; 10]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r_squared, 0.0);
    }

    #[test]
    fn test_adx_strong_on_linear_rise() {
        let bars = linear_bars(60, 100.0, 0.2);
        let reading = adx(&bars, 14).unwrap();
        assert!(reading.adx > 90.0);
        assert!(reading.plus_di > reading.minus_di);
        assert!(adx(&bars[..20], 14).is_none());
    }

    #[test]
    fn test_hurst_needs_two_sizes() {
        assert!(hurst_exponent(&[100.0; 10], 8).is_none());
        assert!(hurst_exponent(&[100.0, -1.0, 100.0], 8).is_none());
    }
}
