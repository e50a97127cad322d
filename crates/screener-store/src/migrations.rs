use screener_core::ScreenerError;
use sqlx::sqlite::SqlitePool;

use crate::db::db_err;

/// Forward-only schema steps, strictly ordered. Each step runs inside a
/// transaction together with the version bump; re-running against an
/// up-to-date store is a no-op. Additive changes only, no destructive
/// rewrites.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS instrument (
            ticker TEXT PRIMARY KEY,
            company_name TEXT,
            sector TEXT,
            industry TEXT,
            instrument_type TEXT NOT NULL DEFAULT 'stock',
            currency TEXT,
            exchange TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS strategy_run (
            run_id TEXT PRIMARY KEY,
            strategy_code TEXT NOT NULL,
            strategy_version INTEGER NOT NULL,
            params_hash TEXT NOT NULL,
            params_blob TEXT NOT NULL,
            universe_source TEXT NOT NULL,
            universe_size INTEGER NOT NULL,
            universe_blob TEXT NOT NULL,
            min_score REAL,
            exit_status TEXT NOT NULL DEFAULT 'pending',
            execution_status TEXT NOT NULL DEFAULT 'queued',
            current_ticker TEXT,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            processed_count INTEGER NOT NULL DEFAULT 0,
            total_count INTEGER NOT NULL,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            duration_ms INTEGER,
            last_progress_update TEXT,
            error_message TEXT
        );

        CREATE TABLE IF NOT EXISTS strategy_result (
            run_id TEXT NOT NULL REFERENCES strategy_run(run_id) ON DELETE CASCADE,
            ticker TEXT NOT NULL,
            passed INTEGER NOT NULL,
            score REAL NOT NULL,
            classification TEXT NOT NULL,
            reasons TEXT NOT NULL DEFAULT '[]',
            metrics TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            processing_time_ms INTEGER,
            created_at TEXT NOT NULL,
            PRIMARY KEY (run_id, ticker)
        );

        CREATE TABLE IF NOT EXISTS execution_progress (
            run_id TEXT NOT NULL REFERENCES strategy_run(run_id) ON DELETE CASCADE,
            ticker TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            passed INTEGER NOT NULL,
            score REAL NOT NULL,
            classification TEXT NOT NULL,
            error_message TEXT,
            processing_time_ms INTEGER,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (run_id, ticker)
        );

        CREATE INDEX IF NOT EXISTS idx_strategy_run_code_started
            ON strategy_run(strategy_code, started_at DESC);
        CREATE INDEX IF NOT EXISTS idx_strategy_result_run
            ON strategy_result(run_id);
        CREATE INDEX IF NOT EXISTS idx_execution_progress_run_seq
            ON execution_progress(run_id, sequence_number)
        "#,
    ),
    (
        2,
        r#"
        ALTER TABLE instrument ADD COLUMN style_category TEXT
        "#,
    ),
    (
        3,
        r#"
        CREATE INDEX IF NOT EXISTS idx_strategy_result_score
            ON strategy_result(score);
        CREATE INDEX IF NOT EXISTS idx_strategy_result_ticker
            ON strategy_result(ticker)
        "#,
    ),
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}

/// Bring the store up to the latest schema version. Called at startup.
pub async fn apply(pool: &SqlitePool) -> Result<(), ScreenerError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    let current: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
    let current: i64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);

    if current > latest_version() {
        return Err(ScreenerError::Persistence(format!(
            "store schema version {} is newer than this build supports ({})",
            current,
            latest_version()
        )));
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let mut tx = pool.begin().await.map_err(db_err)?;

        // sqlx executes one statement per query; split the step manually.
        for statement in sql.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&mut *tx).await.map_err(db_err)?;
            }
        }

        sqlx::query(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(version.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}
