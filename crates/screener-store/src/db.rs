use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use screener_core::ScreenerError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::migrations;

/// Handle over the embedded store. Cheap to clone; all operations go
/// through the shared pool.
#[derive(Clone)]
pub struct ScreenerDb {
    pool: SqlitePool,
}

impl ScreenerDb {
    /// Open (creating if missing) the database at `database_url`, either a
    /// plain file path or a `sqlite:` URL, and bring the schema up to date.
    pub async fn new(database_url: &str) -> Result<Self, ScreenerError> {
        let options = if database_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(database_url).map_err(db_err)?
        } else {
            SqliteConnectOptions::new().filename(database_url)
        };
        // WAL keeps readers from blocking the single writer during a run.
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        migrations::apply(&db.pool).await?;

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> ScreenerError {
    ScreenerError::Persistence(e.to_string())
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

/// Retry transient lock contention with bounded exponential backoff; any
/// other failure propagates as a persistence error.
pub(crate) async fn retry_busy<T, F, Fut>(mut op: F) -> Result<T, ScreenerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(25);

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_busy(&e) && attempt < MAX_ATTEMPTS => {
                tracing::debug!(attempt, "database busy, backing off {:?}", delay);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(db_err(e)),
        }
    }
    unreachable!("retry loop always returns")
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::ScreenerDb;
    use tempfile::TempDir;

    /// Fresh on-disk database in a temp dir (kept alive by the returned
    /// guard). In-memory SQLite hands every pooled connection its own
    /// database, so tests use real files.
    pub async fn temp_db() -> (ScreenerDb, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("screener.db");
        let db = ScreenerDb::new(path.to_str().unwrap()).await.expect("open db");
        (db, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::temp_db;
    use super::*;

    #[tokio::test]
    async fn opens_and_migrates() {
        let (db, _dir) = temp_db().await;
        let version: i64 =
            sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM meta WHERE key = 'schema_version'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(version, migrations::latest_version());
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("screener.db");
        let path = path.to_str().unwrap();

        let first = ScreenerDb::new(path).await.unwrap();
        drop(first);
        let second = ScreenerDb::new(path).await.unwrap();
        assert!(second.pool().acquire().await.is_ok());
    }
}
