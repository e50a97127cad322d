use std::collections::BTreeMap;

use screener_core::ScreenerError;

use crate::db::{db_err, ScreenerDb};
use crate::models::{
    clamp_page, EnrichedResult, EnrichedRow, ResultFilter, RunDetail, RunFilter, RunSummary,
    ScoreDistribution, SummaryRow,
};

/// Run columns plus result aggregates, grouped per run.
const SUMMARY_BASE: &str = "
    SELECT r.*,
           COALESCE(a.passed_count, 0) AS passed_count,
           a.avg_score, a.max_score, a.min_score_actual
    FROM strategy_run r
    LEFT JOIN (
        SELECT run_id,
               SUM(CASE WHEN passed THEN 1 ELSE 0 END) AS passed_count,
               AVG(CASE WHEN passed THEN score END) AS avg_score,
               MAX(score) AS max_score,
               MIN(score) AS min_score_actual
        FROM strategy_result
        GROUP BY run_id
    ) a ON a.run_id = r.run_id";

const RESULT_BASE: &str = "
    SELECT sr.*, i.company_name AS company_name, i.sector AS sector
    FROM strategy_result sr
    LEFT JOIN instrument i ON i.ticker = sr.ticker";

impl ScreenerDb {
    /// Filtered, paginated page of run summaries with derived aggregates.
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, ScreenerError> {
        let (limit, offset) = clamp_page(filter.limit, 20, 100, filter.offset);

        let mut sql = String::from(SUMMARY_BASE);
        let mut conditions: Vec<&str> = Vec::new();
        if filter.strategy_code.is_some() {
            conditions.push("r.strategy_code = ?");
        }
        if filter.status.is_some() {
            conditions.push("r.exit_status = ?");
        }
        if filter.started_after.is_some() {
            conditions.push("r.started_at >= ?");
        }
        if filter.started_before.is_some() {
            conditions.push("r.started_at <= ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ? OFFSET ?",
            filter.order_by.sql(),
            if filter.desc { "DESC" } else { "ASC" }
        ));

        let mut query = sqlx::query_as::<_, SummaryRow>(&sql);
        if let Some(code) = &filter.strategy_code {
            query = query.bind(code);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(t) = filter.started_after {
            query = query.bind(t);
        }
        if let Some(t) = filter.started_before {
            query = query.bind(t);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    /// Single-run summary with aggregates.
    pub async fn run_summary(&self, run_id: &str) -> Result<RunSummary, ScreenerError> {
        let sql = format!("{SUMMARY_BASE} WHERE r.run_id = ?");
        let row = sqlx::query_as::<_, SummaryRow>(&sql)
            .bind(run_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(SummaryRow::into_summary)
            .ok_or_else(|| ScreenerError::NotFound(run_id.to_string()))
    }

    /// Full run view: aggregates, score histogram, and the top `top_n`
    /// results by score.
    pub async fn get_run_detail(
        &self,
        run_id: &str,
        top_n: i64,
    ) -> Result<RunDetail, ScreenerError> {
        let summary = self.run_summary(run_id).await?;

        let scores: Vec<f64> =
            sqlx::query_scalar("SELECT score FROM strategy_result WHERE run_id = ?")
                .bind(run_id)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?;
        let score_distribution = ScoreDistribution::from_scores(&scores);

        let top_results = self
            .get_run_results(
                run_id,
                &ResultFilter {
                    limit: if top_n <= 0 { 10 } else { top_n },
                    ..ResultFilter::default()
                },
            )
            .await?;

        Ok(RunDetail {
            summary,
            score_distribution,
            top_results,
        })
    }

    /// Paginated, filtered results for a run, enriched with instrument
    /// metadata.
    pub async fn get_run_results(
        &self,
        run_id: &str,
        filter: &ResultFilter,
    ) -> Result<Vec<EnrichedResult>, ScreenerError> {
        let (limit, offset) = clamp_page(filter.limit, 100, 500, filter.offset);

        let mut sql = format!("{RESULT_BASE} WHERE sr.run_id = ?");
        if filter.passed.is_some() {
            sql.push_str(" AND sr.passed = ?");
        }
        if filter.min_score.is_some() {
            sql.push_str(" AND sr.score >= ?");
        }
        if filter.max_score.is_some() {
            sql.push_str(" AND sr.score <= ?");
        }
        if filter.classification.is_some() {
            sql.push_str(" AND sr.classification = ?");
        }
        if filter.ticker.is_some() {
            sql.push_str(" AND sr.ticker = ?");
        }
        if filter.sector.is_some() {
            sql.push_str(" AND i.sector = ?");
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ? OFFSET ?",
            filter.order_by.sql(),
            if filter.desc { "DESC" } else { "ASC" }
        ));

        let mut query = sqlx::query_as::<_, EnrichedRow>(&sql).bind(run_id);
        if let Some(passed) = filter.passed {
            query = query.bind(passed);
        }
        if let Some(min) = filter.min_score {
            query = query.bind(min);
        }
        if let Some(max) = filter.max_score {
            query = query.bind(max);
        }
        if let Some(classification) = filter.classification {
            query = query.bind(classification.as_str());
        }
        if let Some(ticker) = &filter.ticker {
            query = query.bind(ticker.trim().to_uppercase());
        }
        if let Some(sector) = &filter.sector {
            query = query.bind(sector);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(EnrichedRow::into_enriched).collect())
    }

    /// Latest runs per strategy, newest first within each code.
    pub async fn get_latest_by_strategy(
        &self,
        per_strategy: i64,
    ) -> Result<BTreeMap<String, Vec<RunSummary>>, ScreenerError> {
        let per_strategy = if per_strategy <= 0 {
            5
        } else {
            per_strategy.min(50)
        };

        let sql = "
            SELECT * FROM (
                SELECT r.*,
                       COALESCE(a.passed_count, 0) AS passed_count,
                       a.avg_score, a.max_score, a.min_score_actual,
                       ROW_NUMBER() OVER (
                           PARTITION BY r.strategy_code
                           ORDER BY COALESCE(r.started_at, r.created_at) DESC
                       ) AS rn
                FROM strategy_run r
                LEFT JOIN (
                    SELECT run_id,
                           SUM(CASE WHEN passed THEN 1 ELSE 0 END) AS passed_count,
                           AVG(CASE WHEN passed THEN score END) AS avg_score,
                           MAX(score) AS max_score,
                           MIN(score) AS min_score_actual
                    FROM strategy_result
                    GROUP BY run_id
                ) a ON a.run_id = r.run_id
            ) WHERE rn <= ?
            ORDER BY strategy_code, rn";

        let rows = sqlx::query_as::<_, SummaryRow>(sql)
            .bind(per_strategy)
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        let mut grouped: BTreeMap<String, Vec<RunSummary>> = BTreeMap::new();
        for row in rows {
            let summary = row.into_summary();
            grouped
                .entry(summary.run.strategy_code.clone())
                .or_default()
                .push(summary);
        }
        Ok(grouped)
    }
}
