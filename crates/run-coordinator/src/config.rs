use std::str::FromStr;
use std::time::Duration;

/// Engine settings sourced from the environment with documented defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_path: String,
    pub max_concurrent_runs: usize,
    pub max_workers_per_run: usize,
    pub max_queue_size: usize,
    pub run_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "./portfolio.db".to_string(),
            max_concurrent_runs: 2,
            max_workers_per_run: 4,
            max_queue_size: 32,
            run_timeout: Duration::from_secs(1800),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Read settings from the process environment (after loading `.env`
    /// best-effort). Unparsable values fall back to the default with a
    /// warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            max_concurrent_runs: env_parse("MAX_CONCURRENT_RUNS", defaults.max_concurrent_runs),
            max_workers_per_run: env_parse("MAX_WORKERS_PER_RUN", defaults.max_workers_per_run),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", defaults.max_queue_size),
            run_timeout: Duration::from_secs(env_parse(
                "RUN_TIMEOUT_SECONDS",
                defaults.run_timeout.as_secs(),
            )),
            fetch_timeout: Duration::from_secs(env_parse(
                "FETCH_TIMEOUT_SECONDS",
                defaults.fetch_timeout.as_secs(),
            )),
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {key}={raw}, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.database_path, "./portfolio.db");
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.max_workers_per_run, 4);
        assert_eq!(config.max_queue_size, 32);
        assert_eq!(config.run_timeout, Duration::from_secs(1800));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_and_bad_values() {
        std::env::set_var("MAX_CONCURRENT_RUNS", "7");
        std::env::set_var("RUN_TIMEOUT_SECONDS", "not-a-number");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrent_runs, 7);
        assert_eq!(config.run_timeout, Duration::from_secs(1800));
        std::env::remove_var("MAX_CONCURRENT_RUNS");
        std::env::remove_var("RUN_TIMEOUT_SECONDS");
    }
}
