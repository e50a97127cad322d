use chrono::{DateTime, Utc};
use screener_core::{ExitStatus, ScreenerError, TickerEvaluation};

use crate::db::{db_err, retry_busy, ScreenerDb};
use crate::models::{NewRun, ProgressEntry, ProgressRow, RunRow, StrategyRun};

impl ScreenerDb {
    /// Insert the run row at admission, atomically with its initial
    /// progress fields.
    pub async fn create_run(&self, new_run: &NewRun) -> Result<(), ScreenerError> {
        let universe_blob =
            serde_json::to_string(&new_run.tickers).map_err(|e| ScreenerError::Persistence(e.to_string()))?;
        let now = Utc::now();
        let total = new_run.tickers.len() as i64;

        retry_busy(|| {
            sqlx::query(
                "INSERT INTO strategy_run (
                    run_id, strategy_code, strategy_version, params_hash, params_blob,
                    universe_source, universe_size, universe_blob, min_score,
                    exit_status, execution_status, progress_percent, processed_count,
                    total_count, cancel_requested, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'queued', 0, 0, ?, 0, ?)",
            )
            .bind(&new_run.run_id)
            .bind(&new_run.strategy_code)
            .bind(new_run.strategy_version)
            .bind(&new_run.params_hash)
            .bind(&new_run.params_blob)
            .bind(&new_run.universe_source)
            .bind(total)
            .bind(&universe_blob)
            .bind(new_run.min_score)
            .bind(total)
            .bind(now)
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    /// Transition a pending run to running. Returns false when the run was
    /// already picked up or finalized.
    pub async fn mark_running(&self, run_id: &str) -> Result<bool, ScreenerError> {
        let now = Utc::now();
        let result = retry_busy(|| {
            sqlx::query(
                "UPDATE strategy_run
                 SET exit_status = 'running', execution_status = 'running',
                     started_at = ?, last_progress_update = ?
                 WHERE run_id = ? AND exit_status = 'pending'",
            )
            .bind(now)
            .bind(now)
            .bind(run_id)
            .execute(self.pool())
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Persist one ticker outcome: the result row, its progress-feed mirror,
    /// and the run-row progress fields, in a single short transaction. The
    /// write is refused once the run has left the running state.
    pub async fn append_result(
        &self,
        run_id: &str,
        ticker: &str,
        sequence_number: i64,
        evaluation: &TickerEvaluation,
        processing_time_ms: i64,
    ) -> Result<(), ScreenerError> {
        let reasons_json = serde_json::to_string(&evaluation.reasons)
            .map_err(|e| ScreenerError::Persistence(e.to_string()))?;
        let metrics_json = serde_json::to_string(&evaluation.metrics)
            .map_err(|e| ScreenerError::Persistence(e.to_string()))?;
        let now = Utc::now();

        retry_busy(|| {
            self.try_append(
                run_id,
                ticker,
                sequence_number,
                evaluation,
                &reasons_json,
                &metrics_json,
                processing_time_ms,
                now,
            )
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_append(
        &self,
        run_id: &str,
        ticker: &str,
        sequence_number: i64,
        evaluation: &TickerEvaluation,
        reasons_json: &str,
        metrics_json: &str,
        processing_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let run: Option<(i64, String)> =
            sqlx::query_as("SELECT total_count, exit_status FROM strategy_run WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (total_count, exit_status) = run
            .ok_or_else(|| sqlx::Error::Protocol(format!("run {run_id} not found")))?;
        if exit_status != "running" {
            return Err(sqlx::Error::Protocol(format!(
                "run {run_id} is {exit_status}, refusing result write"
            )));
        }

        sqlx::query(
            "INSERT INTO strategy_result (
                run_id, ticker, passed, score, classification, reasons, metrics,
                error_message, processing_time_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(ticker)
        .bind(evaluation.passed)
        .bind(evaluation.score)
        .bind(evaluation.classification.as_str())
        .bind(reasons_json)
        .bind(metrics_json)
        .bind(&evaluation.error_message)
        .bind(processing_time_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO execution_progress (
                run_id, ticker, sequence_number, passed, score, classification,
                error_message, processing_time_ms, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(ticker)
        .bind(sequence_number)
        .bind(evaluation.passed)
        .bind(evaluation.score)
        .bind(evaluation.classification.as_str())
        .bind(&evaluation.error_message)
        .bind(processing_time_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let progress_percent = if total_count > 0 {
            ((sequence_number as f64 / total_count as f64) * 100.0).round() as i64
        } else {
            0
        };
        sqlx::query(
            "UPDATE strategy_run
             SET current_ticker = ?, processed_count = ?, progress_percent = ?,
                 last_progress_update = ?
             WHERE run_id = ? AND exit_status = 'running'",
        )
        .bind(ticker)
        .bind(sequence_number)
        .bind(progress_percent)
        .bind(now)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    /// Move a run to a terminal state. Returns false (without writing) when
    /// the run is already terminal, which makes cancellation idempotent.
    pub async fn finalize_run(
        &self,
        run_id: &str,
        status: ExitStatus,
        error_message: Option<&str>,
    ) -> Result<bool, ScreenerError> {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        retry_busy(|| self.try_finalize(run_id, status, error_message, now)).await
    }

    async fn try_finalize(
        &self,
        run_id: &str,
        status: ExitStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let run: Option<(Option<DateTime<Utc>>, String)> =
            sqlx::query_as("SELECT started_at, exit_status FROM strategy_run WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (started_at, current) = run
            .ok_or_else(|| sqlx::Error::Protocol(format!("run {run_id} not found")))?;
        if ExitStatus::parse(&current).map(|s| s.is_terminal()).unwrap_or(false) {
            return Ok(false);
        }

        let duration_ms = started_at.map(|s| (now - s).num_milliseconds());
        sqlx::query(
            "UPDATE strategy_run
             SET exit_status = ?, execution_status = ?, completed_at = ?,
                 duration_ms = ?, error_message = COALESCE(?, error_message),
                 current_ticker = NULL
             WHERE run_id = ?",
        )
        .bind(status.as_str())
        .bind(status.execution_status())
        .bind(now)
        .bind(duration_ms)
        .bind(error_message)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Set the durable cancel flag. Terminal runs are left untouched.
    pub async fn request_cancel(&self, run_id: &str) -> Result<(), ScreenerError> {
        retry_busy(|| {
            sqlx::query(
                "UPDATE strategy_run SET cancel_requested = 1
                 WHERE run_id = ? AND exit_status IN ('pending', 'running')",
            )
            .bind(run_id)
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    pub async fn cancel_requested(&self, run_id: &str) -> Result<bool, ScreenerError> {
        sqlx::query_scalar::<_, bool>("SELECT cancel_requested FROM strategy_run WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or_else(|| ScreenerError::NotFound(run_id.to_string()))
    }

    pub async fn get_run(&self, run_id: &str) -> Result<StrategyRun, ScreenerError> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM strategy_run WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(RunRow::into_run)
            .ok_or_else(|| ScreenerError::NotFound(run_id.to_string()))
    }

    /// Most recent progress entries, newest first.
    pub async fn get_progress(
        &self,
        run_id: &str,
        limit: i64,
    ) -> Result<Vec<ProgressEntry>, ScreenerError> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT ticker, sequence_number, passed, score, classification,
                    error_message, processing_time_ms, processed_at
             FROM execution_progress WHERE run_id = ?
             ORDER BY sequence_number DESC LIMIT ?",
        )
        .bind(run_id)
        .bind(limit.max(0))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(ProgressRow::into_entry).collect())
    }

    /// Remove a run; results and progress rows cascade with it.
    pub async fn delete_run(&self, run_id: &str) -> Result<(), ScreenerError> {
        retry_busy(|| {
            sqlx::query("DELETE FROM strategy_run WHERE run_id = ?")
                .bind(run_id)
                .execute(self.pool())
        })
        .await?;
        Ok(())
    }
}
