use screener_core::Bar;

/// Fraction of the most recent window used when locating a VWAP anchor low:
/// the anchor is the first bar whose close sits within this relative
/// tolerance of the window minimum.
const ANCHOR_LOW_TOLERANCE: f64 = 0.001;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period`
/// elements. Output length matches the input length (the seed fills the
/// first `period` slots) so MACD alignment stays index-for-index.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len());
    let multiplier = 2.0 / (period as f64 + 1.0);

    let sma_seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let sma_seed = finite_or(sma_seed, 0.0);

    for _ in 0..period {
        result.push(sma_seed);
    }

    for i in period..data.len() {
        let prev_ema = result[i - 1];
        let ema_val = (data[i] - prev_ema) * multiplier + prev_ema;
        result.push(finite_or(ema_val, prev_ema));
    }

    result
}

/// Relative Strength Index with Wilder smoothing. Undefined for fewer than
/// `period + 1` bars; 100 when the window holds no down moves.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0)
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD over closes. Needs at least `slow_period + signal_period` bars so
/// both the slow EMA and the signal EMA are seeded.
pub fn macd(
    data: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdResult {
    let empty = MacdResult {
        macd_line: vec![],
        signal_line: vec![],
        histogram: vec![],
    };
    if fast_period == 0
        || slow_period == 0
        || signal_period == 0
        || slow_period < fast_period
        || data.len() < slow_period + signal_period
    {
        return empty;
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    // Both EMAs are input-aligned; the line is meaningful once the slow EMA
    // has left its seed region.
    let macd_line: Vec<f64> = (slow_period - 1..data.len())
        .map(|i| ema_fast[i] - ema_slow[i])
        .collect();

    let signal_line = ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(line, signal)| line - signal)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Average True Range with Wilder smoothing
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let mut true_ranges = Vec::new();

    for i in 1..bars.len() {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();

        let tr = high_low.max(high_close).max(low_close);
        true_ranges.push(tr);
    }

    let mut atr_values = Vec::new();
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    atr = finite_or(atr, 0.0);
    atr_values.push(atr);

    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(finite_or(atr, 0.0));
    }

    atr_values
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    /// Position of a price inside the latest band, clamped to [0, 1].
    pub fn position(&self, price: f64) -> Option<f64> {
        let upper = *self.upper.last()?;
        let lower = *self.lower.last()?;
        if upper <= lower {
            return Some(0.5);
        }
        Some(((price - lower) / (upper - lower)).clamp(0.0, 1.0))
    }
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for i in period - 1..data.len() {
        let slice = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper.push(finite_or(mean + std_dev * std, mean));
        lower.push(finite_or(mean - std_dev * std, mean));
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// Volume-weighted average price anchored at `anchor`: cumulative typical
/// price x volume over cumulative volume from the anchor forward. One value
/// per bar from the anchor to the end of the series.
pub fn anchored_vwap(bars: &[Bar], anchor: usize) -> Vec<f64> {
    if anchor >= bars.len() {
        return vec![];
    }

    let mut vwap_values = Vec::with_capacity(bars.len() - anchor);
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;

    for bar in &bars[anchor..] {
        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        cumulative_tpv += typical_price * bar.volume;
        cumulative_volume += bar.volume;

        let vwap = if cumulative_volume > 0.0 {
            cumulative_tpv / cumulative_volume
        } else {
            typical_price
        };

        vwap_values.push(finite_or(vwap, typical_price));
    }

    vwap_values
}

/// Locate the anchor for an anchored VWAP: the first bar of the most recent
/// `window` bars whose close sits at (or within a small tolerance of) the
/// window's minimum close. Returns an index into `bars`.
pub fn find_vwap_anchor(bars: &[Bar], window: usize) -> Option<usize> {
    if bars.is_empty() || window == 0 {
        return None;
    }

    let start = bars.len().saturating_sub(window);
    let min_close = bars[start..]
        .iter()
        .map(|b| b.close)
        .fold(f64::INFINITY, f64::min);
    if !min_close.is_finite() {
        return None;
    }

    let threshold = min_close + min_close.abs() * ANCHOR_LOW_TOLERANCE;
    bars[start..]
        .iter()
        .position(|b| b.close <= threshold)
        .map(|offset| start + offset)
}

/// Maximum high of the `lookback` bars preceding the latest bar. The latest
/// bar is excluded so a breakout compares against prior resistance.
pub fn ref_high(bars: &[Bar], lookback: usize) -> Option<f64> {
    if lookback == 0 || bars.len() < lookback + 1 {
        return None;
    }

    let end = bars.len() - 1;
    let high = bars[end - lookback..end]
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    high.is_finite().then_some(high)
}

/// Mean volume of the 20 completed bars preceding the latest bar.
pub fn avg_volume_20(bars: &[Bar]) -> Option<f64> {
    if bars.len() < 21 {
        return None;
    }
    let end = bars.len() - 1;
    Some(bars[end - 20..end].iter().map(|b| b.volume).sum::<f64>() / 20.0)
}

/// Latest bar's volume over the 20-bar completed-volume mean.
pub fn volume_multiple(bars: &[Bar]) -> Option<f64> {
    let avg = avg_volume_20(bars)?;
    if avg <= 0.0 {
        return None;
    }
    Some(bars[bars.len() - 1].volume / avg)
}

/// Fraction of the last 10 bars whose volume exceeds the 20-bar mean.
pub fn volume_continuity_ratio(bars: &[Bar]) -> Option<f64> {
    let avg = avg_volume_20(bars)?;
    let recent = &bars[bars.len() - 10..];
    let above = recent.iter().filter(|b| b.volume > avg).count();
    Some(above as f64 / 10.0)
}
