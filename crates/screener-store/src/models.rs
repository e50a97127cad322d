use chrono::{DateTime, Utc};
use screener_core::{Classification, ExitStatus, Metrics};
use serde::Serialize;

/// Durable record of one strategy execution over a ticker universe.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyRun {
    pub run_id: String,
    pub strategy_code: String,
    pub strategy_version: i64,
    pub params_hash: String,
    pub params_blob: String,
    pub universe_source: String,
    pub universe_size: i64,
    pub tickers: Vec<String>,
    pub min_score: Option<f64>,
    pub exit_status: ExitStatus,
    pub execution_status: String,
    pub current_ticker: Option<String>,
    pub progress_percent: i64,
    pub processed_count: i64,
    pub total_count: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub last_progress_update: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Input for run creation at admission time.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub strategy_code: String,
    pub strategy_version: i64,
    pub params_hash: String,
    pub params_blob: String,
    pub universe_source: String,
    pub tickers: Vec<String>,
    pub min_score: Option<f64>,
}

/// Immutable per-ticker outcome row.
#[derive(Debug, Clone, Serialize)]
pub struct TickerResult {
    pub run_id: String,
    pub ticker: String,
    pub passed: bool,
    pub score: f64,
    pub classification: Classification,
    pub reasons: Vec<String>,
    pub metrics: Metrics,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Result row joined with instrument metadata for API reads.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedResult {
    #[serde(flatten)]
    pub result: TickerResult,
    pub company_name: Option<String>,
    pub sector: Option<String>,
}

/// Live progress-feed entry, one per processed ticker.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEntry {
    pub ticker: String,
    pub sequence_number: i64,
    pub passed: bool,
    pub score: f64,
    pub classification: Classification,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub processed_at: DateTime<Utc>,
}

/// Run row plus aggregates derived from its results.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub run: StrategyRun,
    pub passed_count: i64,
    pub pass_rate: f64,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
    pub min_score_actual: Option<f64>,
}

/// Score histogram over a run's results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreDistribution {
    #[serde(rename = "0-20")]
    pub b0_20: i64,
    #[serde(rename = "21-40")]
    pub b21_40: i64,
    #[serde(rename = "41-60")]
    pub b41_60: i64,
    #[serde(rename = "61-80")]
    pub b61_80: i64,
    #[serde(rename = "81-100")]
    pub b81_100: i64,
    #[serde(rename = "100+")]
    pub b100_plus: i64,
}

impl ScoreDistribution {
    pub fn from_scores(scores: &[f64]) -> Self {
        let mut dist = Self::default();
        for &score in scores {
            if score <= 20.0 {
                dist.b0_20 += 1;
            } else if score <= 40.0 {
                dist.b21_40 += 1;
            } else if score <= 60.0 {
                dist.b41_60 += 1;
            } else if score <= 80.0 {
                dist.b61_80 += 1;
            } else if score <= 100.0 {
                dist.b81_100 += 1;
            } else {
                dist.b100_plus += 1;
            }
        }
        dist
    }
}

/// Full run view: summary, score histogram, and the top results by score.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub score_distribution: ScoreDistribution,
    pub top_results: Vec<EnrichedResult>,
}

/// Sort column for run listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunOrder {
    #[default]
    StartedAt,
    CreatedAt,
    DurationMs,
}

impl RunOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            // Queued runs have no started_at yet; fall back to admission time
            RunOrder::StartedAt => "COALESCE(r.started_at, r.created_at)",
            RunOrder::CreatedAt => "r.created_at",
            RunOrder::DurationMs => "r.duration_ms",
        }
    }
}

/// Sort column for result pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultOrder {
    #[default]
    Score,
    Ticker,
    CreatedAt,
}

impl ResultOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            ResultOrder::Score => "sr.score",
            ResultOrder::Ticker => "sr.ticker",
            ResultOrder::CreatedAt => "sr.created_at",
        }
    }
}

/// Filter set for `list_runs`.
#[derive(Debug, Clone)]
pub struct RunFilter {
    pub strategy_code: Option<String>,
    pub status: Option<ExitStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub order_by: RunOrder,
    pub desc: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            strategy_code: None,
            status: None,
            started_after: None,
            started_before: None,
            order_by: RunOrder::StartedAt,
            desc: true,
            limit: 20,
            offset: 0,
        }
    }
}

/// Filter set for `get_run_results`.
#[derive(Debug, Clone)]
pub struct ResultFilter {
    pub passed: Option<bool>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub classification: Option<Classification>,
    pub ticker: Option<String>,
    pub sector: Option<String>,
    pub order_by: ResultOrder,
    pub desc: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ResultFilter {
    fn default() -> Self {
        Self {
            passed: None,
            min_score: None,
            max_score: None,
            classification: None,
            ticker: None,
            sector: None,
            order_by: ResultOrder::Score,
            desc: true,
            limit: 100,
            offset: 0,
        }
    }
}

pub(crate) fn clamp_page(limit: i64, default: i64, max: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 { default } else { limit.min(max) };
    (limit, offset.max(0))
}

// ---------------------------------------------------------------------------
// Internal row types for sqlx deserialization
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub strategy_code: String,
    pub strategy_version: i64,
    pub params_hash: String,
    pub params_blob: String,
    pub universe_source: String,
    pub universe_size: i64,
    pub universe_blob: String,
    pub min_score: Option<f64>,
    pub exit_status: String,
    pub execution_status: String,
    pub current_ticker: Option<String>,
    pub progress_percent: i64,
    pub processed_count: i64,
    pub total_count: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub last_progress_update: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RunRow {
    pub(crate) fn into_run(self) -> StrategyRun {
        StrategyRun {
            tickers: serde_json::from_str(&self.universe_blob).unwrap_or_default(),
            exit_status: ExitStatus::parse(&self.exit_status).unwrap_or(ExitStatus::Pending),
            run_id: self.run_id,
            strategy_code: self.strategy_code,
            strategy_version: self.strategy_version,
            params_hash: self.params_hash,
            params_blob: self.params_blob,
            universe_source: self.universe_source,
            universe_size: self.universe_size,
            min_score: self.min_score,
            execution_status: self.execution_status,
            current_ticker: self.current_ticker,
            progress_percent: self.progress_percent,
            processed_count: self.processed_count,
            total_count: self.total_count,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            last_progress_update: self.last_progress_update,
            error_message: self.error_message,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SummaryRow {
    #[sqlx(flatten)]
    pub run: RunRow,
    pub passed_count: i64,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
    pub min_score_actual: Option<f64>,
}

impl SummaryRow {
    pub(crate) fn into_summary(self) -> RunSummary {
        let run = self.run.into_run();
        let pass_rate = if run.total_count > 0 {
            self.passed_count as f64 / run.total_count as f64
        } else {
            0.0
        };
        RunSummary {
            run,
            passed_count: self.passed_count,
            pass_rate,
            avg_score: self.avg_score,
            max_score: self.max_score,
            min_score_actual: self.min_score_actual,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ResultRow {
    pub run_id: String,
    pub ticker: String,
    pub passed: bool,
    pub score: f64,
    pub classification: String,
    pub reasons: String,
    pub metrics: String,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ResultRow {
    pub(crate) fn into_result(self) -> TickerResult {
        TickerResult {
            reasons: serde_json::from_str(&self.reasons).unwrap_or_default(),
            metrics: serde_json::from_str(&self.metrics).unwrap_or_default(),
            classification: Classification::parse(&self.classification)
                .unwrap_or(Classification::Error),
            run_id: self.run_id,
            ticker: self.ticker,
            passed: self.passed,
            score: self.score,
            error_message: self.error_message,
            processing_time_ms: self.processing_time_ms,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct EnrichedRow {
    #[sqlx(flatten)]
    pub result: ResultRow,
    pub company_name: Option<String>,
    pub sector: Option<String>,
}

impl EnrichedRow {
    pub(crate) fn into_enriched(self) -> EnrichedResult {
        EnrichedResult {
            result: self.result.into_result(),
            company_name: self.company_name,
            sector: self.sector,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProgressRow {
    pub ticker: String,
    pub sequence_number: i64,
    pub passed: bool,
    pub score: f64,
    pub classification: String,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub processed_at: DateTime<Utc>,
}

impl ProgressRow {
    pub(crate) fn into_entry(self) -> ProgressEntry {
        ProgressEntry {
            classification: Classification::parse(&self.classification)
                .unwrap_or(Classification::Error),
            ticker: self.ticker,
            sequence_number: self.sequence_number,
            passed: self.passed,
            score: self.score,
            error_message: self.error_message,
            processing_time_ms: self.processing_time_ms,
            processed_at: self.processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_distribution_buckets() {
        let dist =
            ScoreDistribution::from_scores(&[0.0, 15.0, 20.0, 20.5, 45.0, 61.0, 85.0, 100.0, 104.0]);
        assert_eq!(dist.b0_20, 3);
        assert_eq!(dist.b21_40, 1);
        assert_eq!(dist.b41_60, 1);
        assert_eq!(dist.b61_80, 1);
        assert_eq!(dist.b81_100, 2);
        assert_eq!(dist.b100_plus, 1);
    }

    #[test]
    fn clamp_page_bounds() {
        assert_eq!(clamp_page(0, 20, 100, 0), (20, 0));
        assert_eq!(clamp_page(500, 20, 100, -3), (100, 0));
        assert_eq!(clamp_page(50, 20, 100, 10), (50, 10));
    }
}
