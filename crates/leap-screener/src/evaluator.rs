use screener_core::{
    Bar, Classification, EvalContext, InstrumentMeta, MetricValue, Metrics, ScreenerError,
    StrategyEvaluator, TickerEvaluation,
};
use serde_json::Value;
use technical_indicators::{anchored_vwap, avg_volume_20, find_vwap_anchor, rsi, sma};

use crate::params::LeapParams;

const MIN_BARS: usize = 220;
const MAX_STALE_DAYS: i64 = 5;
/// Window scanned for the anchored-VWAP low.
const ANCHOR_WINDOW: usize = 252;

const POINTS_RSI_SWEET: f64 = 30.0;
const POINTS_RSI_BAND: f64 = 20.0;
const POINTS_VWAP_BELOW: f64 = 25.0;
const POINTS_VWAP_NEAR: f64 = 15.0;
const POINTS_VOLUME_MAX: f64 = 20.0;
const POINTS_TECHNICAL: f64 = 15.0;
const POINTS_QUALITY: f64 = 10.0;

/// Mean daily volume earning full adequacy credit, and the floor below
/// which the credit reaches zero.
const VOLUME_FULL: f64 = 500_000.0;
const VOLUME_FLOOR: f64 = 100_000.0;

/// RSI sweet spot for a prime entry, independent of the configured band.
const RSI_SWEET_LO: f64 = 50.0;
const RSI_SWEET_HI: f64 = 55.0;

const MAJOR_EXCHANGES: &[&str] = &[
    "NYSE", "NASDAQ", "AMEX", "ARCA", "BATS", "XNYS", "XNAS", "XASE", "ARCX",
];

/// LEAP-entry screen: accumulation zones near an anchored-VWAP low with
/// settled momentum and adequate liquidity.
pub struct LeapEntryScreener;

impl LeapEntryScreener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeapEntryScreener {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyEvaluator for LeapEntryScreener {
    fn strategy_code(&self) -> &'static str {
        "leap_entry"
    }

    fn version(&self) -> u32 {
        1
    }

    fn validate(&self, params: &Value) -> Result<Value, ScreenerError> {
        Ok(LeapParams::from_value(params)?.normalized())
    }

    fn evaluate(
        &self,
        ctx: &EvalContext<'_>,
        normalized: &Value,
        bars: &[Bar],
    ) -> Result<TickerEvaluation, ScreenerError> {
        let params = LeapParams::from_value(normalized)?;

        if bars.len() < MIN_BARS {
            return Ok(gated("data_insufficient", bars.len()));
        }
        let last = &bars[bars.len() - 1];
        if (ctx.as_of - last.timestamp).num_days() > MAX_STALE_DAYS {
            return Ok(gated("data_stale", bars.len()));
        }

        let anchor = match find_vwap_anchor(bars, ANCHOR_WINDOW) {
            Some(idx) if bars[idx..].iter().map(|b| b.volume).sum::<f64>() > 0.0 => idx,
            _ => return Ok(gated("avwap_undefined", bars.len())),
        };
        let avwap = *anchored_vwap(bars, anchor).last().expect("anchored vwap");

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let close = *closes.last().expect("non-empty series");
        let rsi_now = *rsi(&closes, 14).last().expect("rsi14");
        let sma50_series = sma(&closes, 50);
        let sma50 = *sma50_series.last().expect("sma50");
        let sma50_prior = sma50_series[sma50_series.len().saturating_sub(6)];
        let sma200 = *sma(&closes, 200).last().expect("sma200");
        let avg_volume = avg_volume_20(bars).unwrap_or(0.0);

        let rsi_points = score_rsi(rsi_now, params.rsi_band);
        let vwap_points = score_vwap(close, avwap, params.vwap_tolerance_pct);
        let volume_points = score_volume(avg_volume);
        let technical_points = score_technical(close, sma200, sma50, sma50_prior);
        let quality_points = score_quality(ctx.metadata);

        let score = rsi_points + vwap_points + volume_points + technical_points + quality_points;
        let classification = classify(score, rsi_now, close, avwap, params.min_score);
        let passed = score >= params.min_score as f64;

        let mut reasons = Vec::new();
        if rsi_points >= POINTS_RSI_SWEET {
            reasons.push("rsi_sweet_spot".to_string());
        } else if rsi_points > 0.0 {
            reasons.push("rsi_in_band".to_string());
        }
        if vwap_points >= POINTS_VWAP_BELOW {
            reasons.push("below_anchored_vwap".to_string());
        } else if vwap_points > 0.0 {
            reasons.push("near_anchored_vwap".to_string());
        }
        if volume_points > 0.0 {
            reasons.push("volume_adequate".to_string());
        }
        if technical_points > 0.0 {
            reasons.push("trend_intact".to_string());
        }
        if quality_points > 0.0 {
            reasons.push("quality_listing".to_string());
        }

        let mut metrics = Metrics::new();
        metrics.insert("close".into(), MetricValue::Float(close));
        metrics.insert("rsi".into(), MetricValue::Float(rsi_now));
        metrics.insert("avwap".into(), MetricValue::Float(avwap));
        metrics.insert(
            "avwap_distance_pct".into(),
            MetricValue::Float((close - avwap) / avwap * 100.0),
        );
        metrics.insert(
            "volume_ratio".into(),
            MetricValue::Float(avg_volume / VOLUME_FULL),
        );
        metrics.insert("sma50".into(), MetricValue::Float(sma50));
        metrics.insert("sma200".into(), MetricValue::Float(sma200));
        metrics.insert(
            "classification".into(),
            MetricValue::Text(classification.as_str().to_string()),
        );
        metrics.insert("points_rsi".into(), MetricValue::Float(rsi_points));
        metrics.insert("points_vwap".into(), MetricValue::Float(vwap_points));
        metrics.insert("points_volume".into(), MetricValue::Float(volume_points));
        metrics.insert(
            "points_technical".into(),
            MetricValue::Float(technical_points),
        );
        metrics.insert("points_quality".into(), MetricValue::Float(quality_points));

        tracing::debug!(
            ticker = ctx.ticker,
            score,
            classification = classification.as_str(),
            "leap screen evaluated"
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

/// RSI positioning: 30 inside the [50, 55] sweet spot, 20 inside the
/// configured band, linear falloff to 0 at 40 below and 70 above.
fn score_rsi(rsi: f64, band: (f64, f64)) -> f64 {
    let (lo, hi) = band;
    if (RSI_SWEET_LO..=RSI_SWEET_HI).contains(&rsi) {
        POINTS_RSI_SWEET
    } else if rsi >= lo && rsi <= hi {
        POINTS_RSI_BAND
    } else if rsi < lo {
        if rsi <= 40.0 || lo <= 40.0 {
            0.0
        } else {
            POINTS_RSI_BAND * (rsi - 40.0) / (lo - 40.0)
        }
    } else if rsi >= 70.0 || hi >= 70.0 {
        0.0
    } else {
        POINTS_RSI_BAND * (70.0 - rsi) / (70.0 - hi)
    }
}

/// VWAP positioning: full credit below the lower tolerance bound, partial
/// inside the band, nothing above it.
fn score_vwap(close: f64, avwap: f64, tolerance_pct: f64) -> f64 {
    let band = avwap * tolerance_pct / 100.0;
    if close < avwap - band {
        POINTS_VWAP_BELOW
    } else if close <= avwap + band {
        POINTS_VWAP_NEAR
    } else {
        0.0
    }
}

/// Volume adequacy: full credit at a 500k-share 20-bar mean, scaling
/// linearly to zero at 100k.
fn score_volume(avg_volume: f64) -> f64 {
    if avg_volume >= VOLUME_FULL {
        POINTS_VOLUME_MAX
    } else if avg_volume <= VOLUME_FLOOR {
        0.0
    } else {
        POINTS_VOLUME_MAX * (avg_volume - VOLUME_FLOOR) / (VOLUME_FULL - VOLUME_FLOOR)
    }
}

/// Technical setup: above the long-term average with a non-declining SMA50.
fn score_technical(close: f64, sma200: f64, sma50_now: f64, sma50_prior: f64) -> f64 {
    if close > sma200 && sma50_now >= sma50_prior {
        POINTS_TECHNICAL
    } else {
        0.0
    }
}

/// Quality factor: a known sector on a major listing. Zero when metadata is
/// unavailable.
fn score_quality(meta: Option<&InstrumentMeta>) -> f64 {
    let Some(meta) = meta else {
        return 0.0;
    };
    let has_sector = meta.sector.as_deref().is_some_and(|s| !s.trim().is_empty());
    let major_listing = meta
        .exchange
        .as_deref()
        .is_some_and(|e| MAJOR_EXCHANGES.contains(&e.trim().to_uppercase().as_str()));
    if has_sector && major_listing {
        POINTS_QUALITY
    } else {
        0.0
    }
}

fn classify(score: f64, rsi: f64, close: f64, avwap: f64, min_score: i64) -> Classification {
    let min_score = min_score as f64;
    if score >= 80.0 && (RSI_SWEET_LO..=RSI_SWEET_HI).contains(&rsi) && close <= avwap {
        Classification::Prime
    } else if score >= min_score {
        Classification::Watch
    } else if score >= min_score - 10.0 {
        Classification::Standard
    } else {
        Classification::Wait
    }
}
