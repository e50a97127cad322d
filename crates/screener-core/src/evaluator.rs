use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ScreenerError;
use crate::types::{Bar, HistoryPeriod, InstrumentMeta, TickerEvaluation};

/// Ambient inputs for one evaluation. `as_of` is injected by the caller so
/// staleness gating stays deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub ticker: &'a str,
    pub as_of: DateTime<Utc>,
    pub metadata: Option<&'a InstrumentMeta>,
}

/// Contract every screening strategy satisfies. Evaluation must be
/// deterministic over (ticker, normalized params, bars, as_of).
pub trait StrategyEvaluator: Send + Sync {
    /// Stable identifier used for registry lookup and persistence.
    fn strategy_code(&self) -> &'static str;

    /// Bumped whenever scoring or thresholds change.
    fn version(&self) -> u32;

    /// Validate raw caller parameters and return the normalized form:
    /// unknown fields rejected, defaults filled, values range-checked.
    /// The normalized value is what gets hashed and persisted.
    fn validate(&self, params: &Value) -> Result<Value, ScreenerError>;

    /// History window to request from the market-data port.
    fn history_period(&self, normalized: &Value) -> HistoryPeriod {
        normalized
            .get("period")
            .and_then(Value::as_str)
            .and_then(HistoryPeriod::parse)
            .unwrap_or_default()
    }

    /// Score and classify one ticker over its OHLCV series.
    fn evaluate(
        &self,
        ctx: &EvalContext<'_>,
        normalized: &Value,
        bars: &[Bar],
    ) -> Result<TickerEvaluation, ScreenerError>;
}
