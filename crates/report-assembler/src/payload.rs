use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Structured report tree consumed by the external renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPayload {
    pub header: ReportHeader,
    pub executive_summary: ExecutiveSummary,
    pub results_analysis: ResultsAnalysis,
    pub opportunities: Vec<Opportunity>,
    pub methodology: Methodology,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportHeader {
    pub run_id: String,
    pub strategy_code: String,
    pub strategy_version: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub universe_size: i64,
    pub qualifying_count: i64,
    pub pass_rate: f64,
    pub execution_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveSummary {
    pub risk_distribution: String,
    pub sector_distribution: String,
    pub recommendation_text: String,
}

/// Strategy-specific analysis subsections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResultsAnalysis {
    BullishBreakout {
        sma_alignment: SmaAlignment,
        macd: MacdAnalysis,
        volume: VolumeAnalysis,
    },
    LeapEntry {
        rsi_positioning: RsiPositioning,
        vwap_positioning: VwapPositioning,
        classification_breakdown: BTreeMap<String, i64>,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmaAlignment {
    pub above_sma50: i64,
    pub above_sma200: i64,
    pub fully_aligned: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MacdAnalysis {
    pub histogram_positive: i64,
    pub line_positive: i64,
    pub avg_histogram: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeAnalysis {
    pub avg_volume_multiple: f64,
    pub confirmed_count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RsiPositioning {
    pub avg_rsi: f64,
    pub sweet_spot_count: i64,
    pub in_band_count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VwapPositioning {
    pub below_count: i64,
    pub near_count: i64,
    pub above_count: i64,
    pub avg_distance_pct: f64,
}

/// One qualifying ticker with its derived trade guidance.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub ticker: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub score: f64,
    pub classification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Methodology {
    pub strategy_code: String,
    pub version: i64,
    pub description: String,
}
