use screener_core::{HistoryPeriod, ScreenerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-tunable knobs for the LEAP-entry screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LeapParams {
    /// Threshold for `passed = true`
    pub min_score: i64,
    /// Preferred RSI entry window (lower, upper)
    pub rsi_band: (f64, f64),
    /// Band width around the anchored VWAP, in percent
    pub vwap_tolerance_pct: f64,
    /// History window requested from the market-data port
    pub period: HistoryPeriod,
}

impl Default for LeapParams {
    fn default() -> Self {
        Self {
            min_score: 60,
            rsi_band: (45.0, 60.0),
            vwap_tolerance_pct: 2.0,
            period: HistoryPeriod::TwoYears,
        }
    }
}

impl LeapParams {
    pub fn from_value(params: &Value) -> Result<Self, ScreenerError> {
        let parsed: LeapParams = serde_json::from_value(params.clone())
            .map_err(|e| ScreenerError::invalid_param("params", e.to_string()))?;
        parsed.check()?;
        Ok(parsed)
    }

    fn check(&self) -> Result<(), ScreenerError> {
        if !(0..=100).contains(&self.min_score) {
            return Err(ScreenerError::invalid_param(
                "min_score",
                format!("must be in 0..=100, got {}", self.min_score),
            ));
        }
        let (lo, hi) = self.rsi_band;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi || lo < 0.0 || hi > 100.0 {
            return Err(ScreenerError::invalid_param(
                "rsi_band",
                format!("must satisfy 0 <= lower < upper <= 100, got ({lo}, {hi})"),
            ));
        }
        if !self.vwap_tolerance_pct.is_finite() || self.vwap_tolerance_pct < 0.0 {
            return Err(ScreenerError::invalid_param(
                "vwap_tolerance_pct",
                format!("must be a finite value >= 0, got {}", self.vwap_tolerance_pct),
            ));
        }
        Ok(())
    }

    pub fn normalized(&self) -> Value {
        serde_json::to_value(self).expect("leap params serialize")
    }
}
