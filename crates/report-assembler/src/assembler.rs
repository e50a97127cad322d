use std::collections::BTreeMap;

use breakout_screener::entry_target_stop;
use screener_core::{Classification, ScreenerError};
use screener_store::{EnrichedResult, ResultFilter, ScreenerDb};

use crate::payload::{
    ExecutiveSummary, MacdAnalysis, Methodology, Opportunity, ReportHeader, ReportPayload,
    ResultsAnalysis, RsiPositioning, SmaAlignment, VolumeAnalysis, VwapPositioning,
};

const DEFAULT_TOP_K: usize = 20;
const BREAKOUT_CODE: &str = "bullish_breakout";
const LEAP_CODE: &str = "leap_entry";

/// Builds the renderer-facing report tree for a terminal run. Pure
/// transformation of persisted rows; never fetches market data.
pub struct ReportAssembler {
    db: ScreenerDb,
}

impl ReportAssembler {
    pub fn new(db: ScreenerDb) -> Self {
        Self { db }
    }

    /// Assemble the report payload for `run_id`. When `strategy_code` is
    /// given it must match the run. Fails on live runs.
    pub async fn assemble(
        &self,
        run_id: &str,
        strategy_code: Option<&str>,
    ) -> Result<ReportPayload, ScreenerError> {
        let summary = self.db.run_summary(run_id).await?;
        let run = &summary.run;

        if !run.exit_status.is_terminal() {
            return Err(ScreenerError::RunNotTerminal(run_id.to_string()));
        }
        if let Some(expected) = strategy_code {
            if expected != run.strategy_code {
                return Err(ScreenerError::UnknownStrategy(expected.to_string()));
            }
        }

        let results = self
            .db
            .get_run_results(
                run_id,
                &ResultFilter {
                    limit: 500,
                    ..ResultFilter::default()
                },
            )
            .await?;
        let passing: Vec<&EnrichedResult> = results.iter().filter(|r| r.result.passed).collect();

        let results_analysis = match run.strategy_code.as_str() {
            BREAKOUT_CODE => breakout_analysis(&passing),
            LEAP_CODE => leap_analysis(&results, &passing),
            other => return Err(ScreenerError::UnknownStrategy(other.to_string())),
        };

        let opportunities = opportunities(&run.strategy_code, &passing, DEFAULT_TOP_K);

        tracing::debug!(
            run_id = %run.run_id,
            qualifying = summary.passed_count,
            "report payload assembled"
        );

        Ok(ReportPayload {
            header: ReportHeader {
                run_id: run.run_id.clone(),
                strategy_code: run.strategy_code.clone(),
                strategy_version: run.strategy_version,
                started_at: run.started_at,
                completed_at: run.completed_at,
                universe_size: run.universe_size,
                qualifying_count: summary.passed_count,
                pass_rate: summary.pass_rate,
                execution_time_ms: run.duration_ms,
            },
            executive_summary: ExecutiveSummary {
                risk_distribution: risk_distribution(&passing),
                sector_distribution: sector_distribution(&passing),
                recommendation_text: recommendation_text(
                    summary.passed_count,
                    run.universe_size,
                ),
            },
            results_analysis,
            opportunities,
            methodology: methodology(&run.strategy_code, run.strategy_version),
        })
    }
}

fn metric(result: &EnrichedResult, key: &str) -> Option<f64> {
    result.result.metrics.get(key)?.as_f64()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        0.0
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}

fn breakout_analysis(passing: &[&EnrichedResult]) -> ResultsAnalysis {
    let mut sma = SmaAlignment::default();
    let mut macd = MacdAnalysis::default();
    let mut volume = VolumeAnalysis::default();

    for result in passing {
        let close = metric(result, "close").unwrap_or(0.0);
        let above_50 = metric(result, "sma50").map(|s| close > s).unwrap_or(false);
        let above_200 = metric(result, "sma200").map(|s| close > s).unwrap_or(false);
        let above_10 = metric(result, "sma10").map(|s| close > s).unwrap_or(false);
        if above_50 {
            sma.above_sma50 += 1;
        }
        if above_200 {
            sma.above_sma200 += 1;
        }
        if above_10 && above_50 && above_200 {
            sma.fully_aligned += 1;
        }

        if metric(result, "macd_hist").unwrap_or(0.0) > 0.0 {
            macd.histogram_positive += 1;
        }
        if metric(result, "macd").unwrap_or(0.0) > 0.0 {
            macd.line_positive += 1;
        }
        if metric(result, "points_volume").unwrap_or(0.0) > 0.0 {
            volume.confirmed_count += 1;
        }
    }
    macd.avg_histogram = mean(passing.iter().filter_map(|r| metric(r, "macd_hist")));
    volume.avg_volume_multiple = mean(passing.iter().filter_map(|r| metric(r, "volume_multiple")));

    ResultsAnalysis::BullishBreakout {
        sma_alignment: sma,
        macd,
        volume,
    }
}

fn leap_analysis(all: &[EnrichedResult], passing: &[&EnrichedResult]) -> ResultsAnalysis {
    let mut rsi = RsiPositioning::default();
    let mut vwap = VwapPositioning::default();

    for result in passing {
        if let Some(value) = metric(result, "rsi") {
            if (50.0..=55.0).contains(&value) {
                rsi.sweet_spot_count += 1;
            }
        }
        if metric(result, "points_rsi").unwrap_or(0.0) >= 20.0 {
            rsi.in_band_count += 1;
        }
        match metric(result, "points_vwap").unwrap_or(0.0) {
            points if points >= 25.0 => vwap.below_count += 1,
            points if points > 0.0 => vwap.near_count += 1,
            _ => vwap.above_count += 1,
        }
    }
    rsi.avg_rsi = mean(passing.iter().filter_map(|r| metric(r, "rsi")));
    vwap.avg_distance_pct = mean(passing.iter().filter_map(|r| metric(r, "avwap_distance_pct")));

    let mut classification_breakdown: BTreeMap<String, i64> = BTreeMap::new();
    for result in all {
        *classification_breakdown
            .entry(result.result.classification.as_str().to_string())
            .or_default() += 1;
    }

    ResultsAnalysis::LeapEntry {
        rsi_positioning: rsi,
        vwap_positioning: vwap,
        classification_breakdown,
    }
}

fn opportunities(
    strategy_code: &str,
    passing: &[&EnrichedResult],
    top_k: usize,
) -> Vec<Opportunity> {
    passing
        .iter()
        .take(top_k)
        .map(|result| {
            let (entry, target, stop) = if strategy_code == BREAKOUT_CODE {
                match entry_target_stop(&result.result.metrics) {
                    Some((entry, target, stop)) => (Some(entry), Some(target), Some(stop)),
                    None => (None, None, None),
                }
            } else {
                (None, None, None)
            };
            let recommendation = (strategy_code == LEAP_CODE)
                .then(|| leap_recommendation(result.result.classification).to_string());

            Opportunity {
                ticker: result.result.ticker.clone(),
                company_name: result.company_name.clone(),
                sector: result.sector.clone(),
                score: result.result.score,
                classification: result.result.classification.as_str().to_string(),
                entry,
                target,
                stop,
                recommendation,
            }
        })
        .collect()
}

fn leap_recommendation(classification: Classification) -> &'static str {
    match classification {
        Classification::Prime => "prime entry zone, accumulate on weakness",
        Classification::Watch => "watch for entry confirmation",
        Classification::Standard => "standard candidate, size conservatively",
        _ => "hold off",
    }
}

fn risk_distribution(passing: &[&EnrichedResult]) -> String {
    let mut low = 0;
    let mut medium = 0;
    let mut high = 0;
    for result in passing {
        match result.result.metrics.get("risk").and_then(|v| v.as_str()) {
            Some("low") => low += 1,
            Some("medium") => medium += 1,
            Some("high") => high += 1,
            _ => {}
        }
    }
    if low + medium + high == 0 {
        "no risk labels recorded".to_string()
    } else {
        format!("{low} low / {medium} medium / {high} high risk among qualifying names")
    }
}

fn sector_distribution(passing: &[&EnrichedResult]) -> String {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for result in passing {
        if let Some(sector) = result.sector.as_deref() {
            *counts.entry(sector).or_default() += 1;
        }
    }
    if counts.is_empty() {
        "sector data unavailable".to_string()
    } else {
        counts
            .iter()
            .map(|(sector, count)| format!("{sector}: {count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Overall recommendation keyed on how many names qualified.
fn recommendation_text(qualifying: i64, universe: i64) -> String {
    if qualifying == 0 {
        format!("no opportunities identified across {universe} screened tickers")
    } else if qualifying < 5 {
        format!("limited opportunity set: {qualifying} of {universe} tickers qualified")
    } else if qualifying < 15 {
        format!("moderate opportunity set: {qualifying} of {universe} tickers qualified")
    } else {
        format!("rich opportunity set: {qualifying} of {universe} tickers qualified")
    }
}

fn methodology(strategy_code: &str, version: i64) -> Methodology {
    let description = match strategy_code {
        BREAKOUT_CODE => {
            "Scores each ticker for bullish-breakout potential: trend alignment \
             across the 10/50/200-day moving averages, MACD momentum, RSI \
             positioning, volume confirmation against the 20-day mean, and \
             proximity to the breakout reference high, with bonuses for \
             sustained volume and 52-week-high proximity. Entries are taken at \
             the close with a 10% target and a stop at the suggested level."
        }
        LEAP_CODE => {
            "Scores long-dated entry quality on the underlying: RSI settling \
             into the 50-55 zone, price positioned at or below the volume \
             weighted average anchored at the last significant low, liquidity \
             adequacy, an intact long-term trend, and listing quality. Prime \
             entries combine a qualifying score with the RSI sweet spot below \
             the anchored average."
        }
        _ => "",
    };
    Methodology {
        strategy_code: strategy_code.to_string(),
        version,
        description: description.to_string(),
    }
}
