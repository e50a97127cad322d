use screener_core::{
    Bar, Classification, EvalContext, MetricValue, Metrics, RiskLevel, ScreenerError,
    StrategyEvaluator, TickerEvaluation,
};
use serde_json::Value;
use technical_indicators::{
    atr, avg_volume_20, macd, ref_high, rsi, sma, volume_continuity_ratio, volume_multiple,
};

use crate::params::BreakoutParams;

/// Minimum usable history: SMA200 plus settled MACD/RSI smoothing.
const MIN_BARS: usize = 220;
/// Reject series whose last bar is older than this many calendar days.
const MAX_STALE_DAYS: i64 = 5;
/// Trailing window for the 52-week high check.
const YEAR_BARS: usize = 252;

const POINTS_SMA10: f64 = 8.0;
const POINTS_SMA50: f64 = 9.0;
const POINTS_SMA200: f64 = 8.0;
const POINTS_MACD_HIST: f64 = 12.0;
const POINTS_MACD_LINE: f64 = 8.0;
const POINTS_RSI_MAX: f64 = 20.0;
const POINTS_VOLUME: f64 = 20.0;
const POINTS_BREAKOUT: f64 = 15.0;
const BONUS_CONTINUITY: f64 = 5.0;
const BONUS_52W_HIGH: f64 = 5.0;

/// Technical bullish-breakout screen: trend alignment, momentum, volume
/// confirmation, and proximity to prior resistance.
pub struct BullishBreakoutScreener;

impl BullishBreakoutScreener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BullishBreakoutScreener {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyEvaluator for BullishBreakoutScreener {
    fn strategy_code(&self) -> &'static str {
        "bullish_breakout"
    }

    fn version(&self) -> u32 {
        2
    }

    fn validate(&self, params: &Value) -> Result<Value, ScreenerError> {
        Ok(BreakoutParams::from_value(params)?.normalized())
    }

    fn evaluate(
        &self,
        ctx: &EvalContext<'_>,
        normalized: &Value,
        bars: &[Bar],
    ) -> Result<TickerEvaluation, ScreenerError> {
        let params = BreakoutParams::from_value(normalized)?;

        if bars.len() < MIN_BARS {
            return Ok(gated("data_insufficient", bars.len()));
        }
        let last = &bars[bars.len() - 1];
        if (ctx.as_of - last.timestamp).num_days() > MAX_STALE_DAYS {
            return Ok(gated("data_stale", bars.len()));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let close = *closes.last().expect("non-empty series");

        let sma10 = *sma(&closes, 10).last().expect("sma10");
        let sma50 = *sma(&closes, 50).last().expect("sma50");
        let sma200 = *sma(&closes, 200).last().expect("sma200");
        let rsi14 = *rsi(&closes, 14).last().expect("rsi14");
        let macd_result = macd(&closes, 12, 26, 9);
        let macd_line = *macd_result.macd_line.last().expect("macd line");
        let macd_signal = *macd_result.signal_line.last().expect("macd signal");
        let macd_hist = *macd_result.histogram.last().expect("macd histogram");
        let atr14 = atr(bars, 14).last().copied().unwrap_or(0.0);

        let lookback = params.lookback_ref_high as usize;
        let reference_high = ref_high(bars, lookback);
        let vol_multiple = volume_multiple(bars).unwrap_or(0.0);
        let continuity = volume_continuity_ratio(bars).unwrap_or(0.0);
        let vol_avg20 = avg_volume_20(bars).unwrap_or(0.0);

        let high_52w = bars[bars.len() - YEAR_BARS.min(bars.len())..]
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let near_52w_high = close >= 0.99 * high_52w;

        let mut score = 0.0;
        let mut reasons: Vec<String> = Vec::new();
        let mut metrics = Metrics::new();
        let mut requirement_failed = false;

        let award = |metrics: &mut Metrics,
                         reasons: &mut Vec<String>,
                         key: &str,
                         token: &str,
                         earned: bool,
                         points: f64| {
            let value = if earned { points } else { 0.0 };
            metrics.insert(format!("points_{key}"), MetricValue::Float(value));
            if earned {
                reasons.push(token.to_string());
            }
            value
        };

        score += award(
            &mut metrics,
            &mut reasons,
            "sma10",
            "above_sma10",
            close > sma10,
            POINTS_SMA10,
        );
        score += award(
            &mut metrics,
            &mut reasons,
            "sma50",
            "above_sma50",
            close > sma50,
            POINTS_SMA50,
        );
        score += award(
            &mut metrics,
            &mut reasons,
            "sma200",
            "above_sma200",
            close > sma200,
            POINTS_SMA200,
        );
        score += award(
            &mut metrics,
            &mut reasons,
            "macd_hist",
            "macd_hist_positive",
            macd_hist > 0.0,
            POINTS_MACD_HIST,
        );
        score += award(
            &mut metrics,
            &mut reasons,
            "macd_line",
            "macd_line_positive",
            macd_line > 0.0,
            POINTS_MACD_LINE,
        );
        if params.strict_macd_positive && macd_line <= 0.0 {
            requirement_failed = true;
            reasons.push("macd_line_negative".to_string());
        }

        let rsi_points = rsi_band_points(rsi14, params.allow_overbought);
        metrics.insert("points_rsi".into(), MetricValue::Float(rsi_points));
        if rsi_points > 0.0 {
            reasons.push("rsi_momentum".to_string());
        }
        score += rsi_points;

        score += award(
            &mut metrics,
            &mut reasons,
            "volume",
            "volume_confirmed",
            vol_multiple >= params.min_volume_multiple,
            POINTS_VOLUME,
        );

        let breakout = reference_high.is_some_and(|h| close >= 0.99 * h);
        score += award(
            &mut metrics,
            &mut reasons,
            "breakout",
            "breakout_ref_high",
            breakout,
            POINTS_BREAKOUT,
        );

        score += award(
            &mut metrics,
            &mut reasons,
            "continuity_bonus",
            "volume_continuity",
            continuity >= 0.6,
            BONUS_CONTINUITY,
        );
        score += award(
            &mut metrics,
            &mut reasons,
            "52w_bonus",
            "near_52w_high",
            near_52w_high,
            BONUS_52W_HIGH,
        );
        if params.require_52w_high && !near_52w_high {
            requirement_failed = true;
            reasons.push("below_52w_high".to_string());
        }

        let score = score.max(0.0);

        let extension_pct = (close - sma50) / sma50;
        let risk = risk_level(rsi14, extension_pct);
        let suggested_stop = (sma50 * 0.98).min(close * 0.94);

        let classification = if requirement_failed {
            Classification::Wait
        } else {
            classify(score, risk, params.min_score)
        };
        let passed = !requirement_failed && score >= params.min_score as f64;

        metrics.insert("close".into(), MetricValue::Float(close));
        metrics.insert("sma10".into(), MetricValue::Float(sma10));
        metrics.insert("sma50".into(), MetricValue::Float(sma50));
        metrics.insert("sma200".into(), MetricValue::Float(sma200));
        metrics.insert("rsi14".into(), MetricValue::Float(rsi14));
        metrics.insert("macd".into(), MetricValue::Float(macd_line));
        metrics.insert("macd_signal".into(), MetricValue::Float(macd_signal));
        metrics.insert("macd_hist".into(), MetricValue::Float(macd_hist));
        metrics.insert("atr14".into(), MetricValue::Float(atr14));
        metrics.insert("volume".into(), MetricValue::Float(last.volume));
        metrics.insert("vol_avg20".into(), MetricValue::Float(vol_avg20));
        metrics.insert("volume_multiple".into(), MetricValue::Float(vol_multiple));
        if let Some(h) = reference_high {
            metrics.insert("ref_high".into(), MetricValue::Float(h));
            metrics.insert("breakout_pct".into(), MetricValue::Float((close - h) / h));
        }
        metrics.insert("extension_pct".into(), MetricValue::Float(extension_pct));
        metrics.insert("suggested_stop".into(), MetricValue::Float(suggested_stop));
        metrics.insert("risk".into(), MetricValue::Text(risk.as_str().to_string()));

        tracing::debug!(
            ticker = ctx.ticker,
            score,
            classification = classification.as_str(),
            "breakout screen evaluated"
        );

        Ok(TickerEvaluation {
            passed,
            score,
            classification,
            reasons,
            metrics,
            error_message: None,
        })
    }
}

fn gated(reason: &str, bar_count: usize) -> TickerEvaluation {
    let mut metrics = Metrics::new();
    metrics.insert("bar_count".into(), MetricValue::Int(bar_count as i64));
    TickerEvaluation {
        passed: false,
        score: 0.0,
        classification: Classification::Wait,
        reasons: vec![reason.to_string()],
        metrics,
        error_message: None,
    }
}

/// RSI criterion: full credit inside [55, 80], linear falloff to 0 at 40 on
/// the low side and 85 on the high side. Overbought credit above 80 is only
/// granted when `allow_overbought` is set.
fn rsi_band_points(rsi: f64, allow_overbought: bool) -> f64 {
    if (55.0..=80.0).contains(&rsi) {
        POINTS_RSI_MAX
    } else if rsi < 55.0 {
        if rsi <= 40.0 {
            0.0
        } else {
            POINTS_RSI_MAX * (rsi - 40.0) / 15.0
        }
    } else if !allow_overbought || rsi >= 85.0 {
        0.0
    } else {
        POINTS_RSI_MAX * (85.0 - rsi) / 5.0
    }
}

/// Risk from momentum exhaustion: RSI above 75 or close stretched more than
/// 7% over SMA50 is high; a 4-7% stretch is medium.
fn risk_level(rsi: f64, extension_pct: f64) -> RiskLevel {
    if rsi > 75.0 || extension_pct > 0.07 {
        RiskLevel::High
    } else if extension_pct > 0.04 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn classify(score: f64, risk: RiskLevel, min_score: i64) -> Classification {
    let min_score = min_score as f64;
    if score >= 90.0 && risk == RiskLevel::Low {
        Classification::StrongBuy
    } else if score >= min_score {
        Classification::Buy
    } else if score >= min_score - 10.0 {
        Classification::Watch
    } else {
        Classification::Wait
    }
}

/// Trade levels derived from a stored result's metric bag: entry at the
/// close, target 10% above, stop at the suggested stop.
pub fn entry_target_stop(metrics: &Metrics) -> Option<(f64, f64, f64)> {
    let close = metrics.get("close")?.as_f64()?;
    let stop = metrics.get("suggested_stop")?.as_f64()?;
    Some((close, close * 1.10, stop))
}
