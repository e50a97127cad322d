use screener_core::{HistoryPeriod, ScreenerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-tunable knobs for the bullish-breakout screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakoutParams {
    /// Threshold for `passed = true`
    pub min_score: i64,
    /// Required ratio of current to 20-bar mean volume
    pub min_volume_multiple: f64,
    /// Require a positive MACD line in addition to a positive histogram
    pub strict_macd_positive: bool,
    /// Keep scoring RSI falloff credit above 80
    pub allow_overbought: bool,
    /// Require the close within 1% of the trailing 252-bar high
    pub require_52w_high: bool,
    /// History window requested from the market-data port
    pub period: HistoryPeriod,
    /// Bars used for the breakout reference high
    pub lookback_ref_high: i64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            min_score: 70,
            min_volume_multiple: 1.0,
            strict_macd_positive: false,
            allow_overbought: false,
            require_52w_high: false,
            period: HistoryPeriod::TwoYears,
            lookback_ref_high: 126,
        }
    }
}

impl BreakoutParams {
    /// Deserialize raw caller parameters, rejecting unknown fields and
    /// filling documented defaults, then range-check.
    pub fn from_value(params: &Value) -> Result<Self, ScreenerError> {
        let parsed: BreakoutParams = serde_json::from_value(params.clone())
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
        if !self.min_volume_multiple.is_finite() || self.min_volume_multiple < 0.0 {
            return Err(ScreenerError::invalid_param(
                "min_volume_multiple",
                format!("must be a finite value >= 0, got {}", self.min_volume_multiple),
            ));
        }
        if self.lookback_ref_high < 1 {
            return Err(ScreenerError::invalid_param(
                "lookback_ref_high",
                format!("must be >= 1, got {}", self.lookback_ref_high),
            ));
        }
        Ok(())
    }

    /// Canonical normalized form used for hashing and persistence.
    pub fn normalized(&self) -> Value {
        serde_json::to_value(self).expect("breakout params serialize")
    }
}
