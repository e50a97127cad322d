use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use screener_core::{
    normalize_ticker, params_hash, EvalContext, ExitStatus, InstrumentMeta, InstrumentType,
    Interval, MarketDataProvider, Priority, ScreenerError, StrategyEvaluator, StrategyRegistry,
    TickerEvaluation,
};
use screener_store::{NewRun, ProgressEntry, ScreenerDb};
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::EngineConfig;

/// A strategy execution request as accepted at admission.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub strategy_code: String,
    pub params: Value,
    pub tickers: Vec<String>,
    pub universe_source: String,
    pub priority: Priority,
}

impl RunRequest {
    pub fn new(strategy_code: &str, params: Value, tickers: Vec<String>) -> Self {
        Self {
            strategy_code: strategy_code.to_string(),
            params,
            tickers,
            universe_source: "custom".to_string(),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Poll-friendly view of a run's progress.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub exit_status: ExitStatus,
    pub execution_status: String,
    pub current_ticker: Option<String>,
    pub progress_percent: i64,
    pub processed_count: i64,
    pub total_count: i64,
    pub last_update: Option<DateTime<Utc>>,
    pub recent_results: Vec<ProgressEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedRunInfo {
    pub run_id: String,
    pub strategy_code: String,
    pub position: usize,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningRunInfo {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub queued: Vec<QueuedRunInfo>,
    pub running: Vec<RunningRunInfo>,
    pub max_concurrent: usize,
}

struct QueueEntry {
    run_id: String,
    strategy_code: String,
    priority: Priority,
    seq: u64,
    tickers: Vec<String>,
    normalized: Value,
    evaluator: Arc<dyn StrategyEvaluator>,
    cancel: Arc<AtomicBool>,
}

struct Inner {
    db: ScreenerDb,
    registry: Arc<StrategyRegistry>,
    market_data: Arc<dyn MarketDataProvider>,
    config: EngineConfig,
    queue: Mutex<Vec<QueueEntry>>,
    /// Queued entries plus slots reserved by in-flight admissions. The
    /// depth cap is enforced against this counter, not `queue.len()`,
    /// because admission awaits the run insert between check and push.
    queue_depth: AtomicUsize,
    submit_seq: AtomicU64,
    running_count: AtomicUsize,
    running: DashMap<String, DateTime<Utc>>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
}

/// Owns the lifecycle of screening runs: admission, the bounded run pool,
/// the per-run ticker walk, progress persistence, cancellation, and
/// timeouts. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
}

impl ExecutionCoordinator {
    pub fn new(
        db: ScreenerDb,
        registry: Arc<StrategyRegistry>,
        market_data: Arc<dyn MarketDataProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                market_data,
                config,
                queue: Mutex::new(Vec::new()),
                queue_depth: AtomicUsize::new(0),
                submit_seq: AtomicU64::new(0),
                running_count: AtomicUsize::new(0),
                running: DashMap::new(),
                cancel_flags: DashMap::new(),
            }),
        }
    }

    /// Open the store at the configured path and wire up the built-in
    /// strategy registry.
    pub async fn connect(
        config: EngineConfig,
        market_data: Arc<dyn MarketDataProvider>,
    ) -> Result<Self, ScreenerError> {
        let db = ScreenerDb::new(&config.database_path).await?;
        let registry = Arc::new(crate::default_registry());
        Ok(Self::new(db, registry, market_data, config))
    }

    pub fn store(&self) -> &ScreenerDb {
        &self.inner.db
    }

    /// Admit a run: resolve and validate, normalize the universe, persist
    /// the pending run row, and enqueue. Returns the run id immediately;
    /// execution proceeds asynchronously.
    pub async fn submit(&self, request: RunRequest) -> Result<String, ScreenerError> {
        let evaluator = self.inner.registry.get(&request.strategy_code)?;
        let normalized = evaluator.validate(&request.params)?;

        if request.tickers.is_empty() {
            return Err(ScreenerError::EmptyUniverse);
        }
        let mut seen = HashSet::new();
        let mut tickers = Vec::with_capacity(request.tickers.len());
        for raw in &request.tickers {
            let ticker = normalize_ticker(raw)?;
            if seen.insert(ticker.clone()) {
                tickers.push(ticker);
            }
        }
        if tickers.is_empty() {
            return Err(ScreenerError::EmptyUniverse);
        }

        self.reserve_queue_slot()?;

        let run_id = Uuid::new_v4().simple().to_string();
        let hash = params_hash(&normalized);
        let min_score = normalized.get("min_score").and_then(Value::as_f64);

        if let Err(e) = self
            .inner
            .db
            .create_run(&NewRun {
                run_id: run_id.clone(),
                strategy_code: request.strategy_code.clone(),
                strategy_version: evaluator.version() as i64,
                params_hash: hash,
                params_blob: normalized.to_string(),
                universe_source: request.universe_source.clone(),
                tickers: tickers.clone(),
                min_score,
            })
            .await
        {
            self.inner.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .cancel_flags
            .insert(run_id.clone(), Arc::clone(&cancel));

        let entry = QueueEntry {
            run_id: run_id.clone(),
            strategy_code: request.strategy_code.clone(),
            priority: request.priority,
            seq: self.inner.submit_seq.fetch_add(1, Ordering::SeqCst),
            tickers,
            normalized,
            evaluator,
            cancel,
        };
        self.inner.queue.lock().unwrap().push(entry);

        tracing::info!(
            %run_id,
            strategy = %request.strategy_code,
            priority = request.priority.as_str(),
            "📊 screening run admitted"
        );

        self.pump();
        Ok(run_id)
    }

    /// Current progress of a run plus its most recent per-ticker outcomes.
    pub async fn status(&self, run_id: &str) -> Result<RunStatus, ScreenerError> {
        let run = self.inner.db.get_run(run_id).await?;
        let recent_results = self.inner.db.get_progress(run_id, 10).await?;
        Ok(RunStatus {
            run_id: run.run_id,
            exit_status: run.exit_status,
            execution_status: run.execution_status,
            current_ticker: run.current_ticker,
            progress_percent: run.progress_percent,
            processed_count: run.processed_count,
            total_count: run.total_count,
            last_update: run.last_progress_update,
            recent_results,
        })
    }

    /// Request cancellation. Durable, cooperative, idempotent; a no-op on
    /// terminal runs. Already-processed results are retained.
    pub async fn cancel(&self, run_id: &str) -> Result<(), ScreenerError> {
        let run = self.inner.db.get_run(run_id).await?;
        if run.exit_status.is_terminal() {
            return Ok(());
        }

        self.inner.db.request_cancel(run_id).await?;
        if let Some(flag) = self.inner.cancel_flags.get(run_id) {
            flag.store(true, Ordering::SeqCst);
        }

        // A run still waiting in the queue is finalized right away.
        let dequeued = {
            let mut queue = self.inner.queue.lock().unwrap();
            match queue.iter().position(|e| e.run_id == run_id) {
                Some(pos) => {
                    queue.remove(pos);
                    self.inner.queue_depth.fetch_sub(1, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };
        if dequeued {
            self.inner
                .db
                .finalize_run(run_id, ExitStatus::Cancelled, None)
                .await?;
            self.inner.cancel_flags.remove(run_id);
            tracing::info!(%run_id, "queued run cancelled");
        }
        Ok(())
    }

    /// Snapshot of the waiting queue and the active run pool.
    pub fn queue(&self) -> QueueSnapshot {
        let mut waiting: Vec<(Priority, u64, String, String)> = self
            .inner
            .queue
            .lock()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e.priority,
                    e.seq,
                    e.run_id.clone(),
                    e.strategy_code.clone(),
                )
            })
            .collect();
        // Dequeue order: priority first, then arrival
        waiting.sort_by_key(|(priority, seq, _, _)| (std::cmp::Reverse(*priority), *seq));

        let queued = waiting
            .into_iter()
            .enumerate()
            .map(|(i, (priority, _, run_id, strategy_code))| QueuedRunInfo {
                run_id,
                strategy_code,
                position: i + 1,
                priority,
            })
            .collect();

        let running = self
            .inner
            .running
            .iter()
            .map(|entry| RunningRunInfo {
                run_id: entry.key().clone(),
                started_at: *entry.value(),
            })
            .collect();

        QueueSnapshot {
            queued,
            running,
            max_concurrent: self.inner.config.max_concurrent_runs,
        }
    }

    /// Atomically claim a queue slot, or reject with `Overloaded`. The slot
    /// is released when the entry is dequeued (by the pump or a cancel) or
    /// when admission fails after the reservation.
    fn reserve_queue_slot(&self) -> Result<(), ScreenerError> {
        let depth = &self.inner.queue_depth;
        let mut current = depth.load(Ordering::SeqCst);
        loop {
            if current >= self.inner.config.max_queue_size {
                return Err(ScreenerError::Overloaded);
            }
            match depth.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Start queued runs while pool slots are free.
    fn pump(&self) {
        loop {
            let entry = {
                let mut queue = self.inner.queue.lock().unwrap();
                if self.inner.running_count.load(Ordering::SeqCst)
                    >= self.inner.config.max_concurrent_runs
                {
                    break;
                }
                let Some(best) = queue
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, e)| (e.priority, std::cmp::Reverse(e.seq)))
                    .map(|(i, _)| i)
                else {
                    break;
                };
                self.inner.running_count.fetch_add(1, Ordering::SeqCst);
                self.inner.queue_depth.fetch_sub(1, Ordering::SeqCst);
                queue.remove(best)
            };

            self.inner.running.insert(entry.run_id.clone(), Utc::now());
            let this = self.clone();
            tokio::spawn(async move {
                this.execute_run(entry).await;
            });
        }
    }

    async fn execute_run(&self, entry: QueueEntry) {
        let run_id = entry.run_id.clone();
        if let Err(e) = self.run_loop(&entry).await {
            tracing::error!(%run_id, error = %e, "run hit a systemic failure");
            let _ = self
                .inner
                .db
                .finalize_run(&run_id, ExitStatus::Error, Some(&e.to_string()))
                .await;
        }

        self.inner.running.remove(&run_id);
        self.inner.cancel_flags.remove(&run_id);
        self.inner.running_count.fetch_sub(1, Ordering::SeqCst);
        self.pump();
    }

    /// The sequential ticker walk. Market-data fetches for upcoming tickers
    /// are pipelined, but evaluation, sequence numbering, and persistence
    /// happen in acceptance order with this task as the run's only writer.
    async fn run_loop(&self, entry: &QueueEntry) -> Result<(), ScreenerError> {
        let db = &self.inner.db;
        if !db.mark_running(&entry.run_id).await? {
            // Finalized while queued (e.g. cancelled before pickup)
            return Ok(());
        }
        if db.cancel_requested(&entry.run_id).await.unwrap_or(false) {
            entry.cancel.store(true, Ordering::SeqCst);
        }

        tracing::info!(
            run_id = %entry.run_id,
            strategy = %entry.strategy_code,
            universe = entry.tickers.len(),
            "run started"
        );

        let started = Instant::now();
        let period = entry.evaluator.history_period(&entry.normalized);
        let fetch_timeout = self.inner.config.fetch_timeout;
        let provider = Arc::clone(&self.inner.market_data);

        let fetches = stream::iter(entry.tickers.iter().cloned().enumerate())
            .map(|(idx, ticker)| {
                let provider = Arc::clone(&provider);
                async move {
                    let fetch_started = Instant::now();
                    let bars = match timeout(
                        fetch_timeout,
                        provider.fetch_ohlcv(&ticker, period, Interval::Day1),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ScreenerError::MarketDataUnavailable(format!(
                            "fetch for {ticker} timed out after {}s",
                            fetch_timeout.as_secs()
                        ))),
                    };
                    // Metadata is best-effort; failures never sink a ticker
                    let meta = match timeout(fetch_timeout, provider.fetch_metadata(&ticker)).await
                    {
                        Ok(Ok(meta)) => meta,
                        _ => None,
                    };
                    let fetch_ms = fetch_started.elapsed().as_millis() as i64;
                    (idx, ticker, bars, meta, fetch_ms)
                }
            })
            .buffered(self.inner.config.max_workers_per_run.max(1));
        tokio::pin!(fetches);

        while let Some((idx, ticker, bars, meta, fetch_ms)) = fetches.next().await {
            // Checkpoints sit immediately after the fetch suspension point
            // and before the persistence write.
            if entry.cancel.load(Ordering::SeqCst) {
                db.finalize_run(&entry.run_id, ExitStatus::Cancelled, None)
                    .await?;
                tracing::info!(run_id = %entry.run_id, processed = idx, "run cancelled");
                return Ok(());
            }
            if started.elapsed() > self.inner.config.run_timeout {
                db.finalize_run(&entry.run_id, ExitStatus::Timeout, None)
                    .await?;
                tracing::warn!(run_id = %entry.run_id, processed = idx, "run timed out");
                return Ok(());
            }

            let eval_started = Instant::now();
            let evaluation = match bars {
                Ok(bars) => {
                    self.record_metadata(&ticker, meta.as_ref()).await;
                    let ctx = EvalContext {
                        ticker: &ticker,
                        as_of: Utc::now(),
                        metadata: meta.as_ref(),
                    };
                    match entry.evaluator.evaluate(&ctx, &entry.normalized, &bars) {
                        Ok(evaluation) => evaluation,
                        Err(e) => {
                            tracing::warn!(run_id = %entry.run_id, %ticker, error = %e, "evaluator failed");
                            TickerEvaluation::error("evaluator_exception", e.to_string())
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(run_id = %entry.run_id, %ticker, error = %e, "market data unavailable");
                    TickerEvaluation::error("market_data_unavailable", e.to_string())
                }
            };

            let processing_ms = fetch_ms + eval_started.elapsed().as_millis() as i64;
            db.append_result(
                &entry.run_id,
                &ticker,
                (idx + 1) as i64,
                &evaluation,
                processing_ms,
            )
            .await?;
        }

        db.finalize_run(&entry.run_id, ExitStatus::Ok, None).await?;
        tracing::info!(
            run_id = %entry.run_id,
            total = entry.tickers.len(),
            "run completed"
        );
        Ok(())
    }

    async fn record_metadata(&self, ticker: &str, meta: Option<&InstrumentMeta>) {
        let Some(meta) = meta else { return };
        if let Err(e) = self
            .inner
            .db
            .upsert_instrument(ticker, meta, InstrumentType::Stock)
            .await
        {
            tracing::warn!(%ticker, error = %e, "instrument upsert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use screener_core::{Bar, Classification, HistoryPeriod};
    use screener_store::ResultFilter;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockProvider {
        series: HashMap<String, Vec<Bar>>,
        meta: HashMap<String, InstrumentMeta>,
        failing: HashSet<String>,
        delay: Option<Duration>,
    }

    impl MockProvider {
        fn with_series(mut self, ticker: &str, bars: Vec<Bar>) -> Self {
            self.series.insert(ticker.to_string(), bars);
            self
        }

        fn with_meta(mut self, ticker: &str, meta: InstrumentMeta) -> Self {
            self.meta.insert(ticker.to_string(), meta);
            self
        }

        fn with_failure(mut self, ticker: &str) -> Self {
            self.failing.insert(ticker.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        async fn fetch_ohlcv(
            &self,
            ticker: &str,
            _period: HistoryPeriod,
            _interval: Interval,
        ) -> Result<Vec<Bar>, ScreenerError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(ticker) {
                return Err(ScreenerError::MarketDataUnavailable(
                    "simulated vendor outage".into(),
                ));
            }
            Ok(self.series.get(ticker).cloned().unwrap_or_default())
        }

        async fn fetch_metadata(
            &self,
            ticker: &str,
        ) -> Result<Option<InstrumentMeta>, ScreenerError> {
            Ok(self.meta.get(ticker).cloned())
        }
    }

    fn rising_series(n: usize) -> Vec<Bar> {
        let now = Utc::now();
        (0..n)
            .map(|i| {
                let close = 100.0 + 60.0 * i as f64 / (n - 1) as f64;
                Bar {
                    timestamp: now - ChronoDuration::days((n - 1 - i) as i64),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    fn test_config(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            database_path: dir.path().join("screener.db").to_str().unwrap().to_string(),
            max_concurrent_runs: 2,
            max_workers_per_run: 1,
            max_queue_size: 32,
            run_timeout: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
        }
    }

    async fn coordinator_with(
        provider: MockProvider,
        config: EngineConfig,
    ) -> ExecutionCoordinator {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let db = ScreenerDb::new(&config.database_path).await.unwrap();
        ExecutionCoordinator::new(
            db,
            Arc::new(crate::default_registry()),
            Arc::new(provider),
            config,
        )
    }

    async fn wait_terminal(coordinator: &ExecutionCoordinator, run_id: &str) -> RunStatus {
        for _ in 0..500 {
            let status = coordinator.status(run_id).await.unwrap();
            if status.exit_status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn breakout_run_completes_with_passing_result() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default()
            .with_series("AAA", rising_series(260))
            .with_meta(
                "AAA",
                InstrumentMeta {
                    company_name: Some("Test Corp".into()),
                    sector: Some("Technology".into()),
                    industry: None,
                    currency: Some("USD".into()),
                    exchange: Some("NYSE".into()),
                },
            );
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({"min_score": 70, "min_volume_multiple": 1.0}),
                vec!["aaa".into()],
            ))
            .await
            .unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.exit_status, ExitStatus::Ok);
        assert_eq!(status.processed_count, 1);
        assert_eq!(status.total_count, 1);
        assert_eq!(status.progress_percent, 100);
        assert_eq!(status.execution_status, "completed");

        let results = coordinator
            .store()
            .get_run_results(&run_id, &ResultFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.result.ticker, "AAA");
        assert!(result.result.passed);
        assert_eq!(result.result.classification, Classification::Buy);
        assert!(result.result.score >= 80.0 && result.result.score <= 100.0);
        assert!((result.result.metrics["close"].as_f64().unwrap() - 160.0).abs() < 1e-9);
        // Metadata was captured into the instrument table during the walk
        assert_eq!(result.company_name.as_deref(), Some("Test Corp"));
        assert_eq!(result.sector.as_deref(), Some("Technology"));
    }

    #[tokio::test]
    async fn short_history_records_wait_and_run_is_ok() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default().with_series("BBB", rising_series(50));
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["BBB".into()],
            ))
            .await
            .unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.exit_status, ExitStatus::Ok);

        let results = coordinator
            .store()
            .get_run_results(&run_id, &ResultFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].result.passed);
        assert_eq!(results[0].result.classification, Classification::Wait);
        assert!(results[0]
            .result
            .reasons
            .iter()
            .any(|r| r == "data_insufficient"));
    }

    #[tokio::test]
    async fn vendor_outage_is_recorded_per_ticker() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default()
            .with_failure("AAA")
            .with_series("BBB", rising_series(260));
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["AAA".into(), "BBB".into()],
            ))
            .await
            .unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.exit_status, ExitStatus::Ok);
        assert_eq!(status.processed_count, 2);

        let progress = coordinator.store().get_progress(&run_id, 10).await.unwrap();
        assert_eq!(progress.len(), 2);
        let first = progress.iter().find(|p| p.sequence_number == 1).unwrap();
        let second = progress.iter().find(|p| p.sequence_number == 2).unwrap();
        assert_eq!(first.ticker, "AAA");
        assert_eq!(first.classification, Classification::Error);
        assert!(!first.passed);
        assert!(first.error_message.as_deref().unwrap_or("").len() > 0);
        assert_eq!(second.ticker, "BBB");
        assert_eq!(second.classification, Classification::Buy);
    }

    #[tokio::test]
    async fn cancel_mid_run_keeps_the_processed_prefix() {
        let dir = TempDir::new().unwrap();
        let mut provider = MockProvider::default().with_delay(Duration::from_millis(200));
        for ticker in ["T1", "T2", "T3", "T4", "T5"] {
            provider = provider.with_series(ticker, rising_series(260));
        }
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["T1".into(), "T2".into(), "T3".into(), "T4".into(), "T5".into()],
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        coordinator.cancel(&run_id).await.unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.exit_status, ExitStatus::Cancelled);
        assert!(
            (1..=2).contains(&status.processed_count),
            "processed {} tickers",
            status.processed_count
        );

        let results = coordinator
            .store()
            .get_run_results(&run_id, &ResultFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len() as i64, status.processed_count);

        // Cancelling again is a no-op on the terminal run
        coordinator.cancel(&run_id).await.unwrap();
        let again = coordinator.status(&run_id).await.unwrap();
        assert_eq!(again.exit_status, ExitStatus::Cancelled);
        assert_eq!(again.processed_count, status.processed_count);
    }

    #[tokio::test]
    async fn run_deadline_finalizes_timeout_with_partial_results() {
        let dir = TempDir::new().unwrap();
        let mut provider = MockProvider::default().with_delay(Duration::from_millis(200));
        for ticker in ["T1", "T2", "T3", "T4", "T5"] {
            provider = provider.with_series(ticker, rising_series(260));
        }
        let mut config = test_config(&dir);
        config.run_timeout = Duration::from_millis(300);
        let coordinator = coordinator_with(provider, config).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["T1".into(), "T2".into(), "T3".into(), "T4".into(), "T5".into()],
            ))
            .await
            .unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.exit_status, ExitStatus::Timeout);
        assert!(status.processed_count >= 1);
        assert!(status.processed_count < status.total_count);
    }

    #[tokio::test]
    async fn admission_rejections() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(MockProvider::default(), test_config(&dir)).await;

        let err = coordinator
            .submit(RunRequest::new("no_such_strategy", json!({}), vec!["AAA".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.token(), "unknown_strategy");

        let err = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({"min_score": 500}),
                vec!["AAA".into()],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.token(), "invalid_parameters");

        let err = coordinator
            .submit(RunRequest::new("bullish_breakout", json!({}), vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.token(), "empty_universe");

        let err = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["BAD TICKER".into()],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.token(), "invalid_parameters");
    }

    #[tokio::test]
    async fn full_queue_rejects_with_overloaded() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default()
            .with_delay(Duration::from_millis(300))
            .with_series("AAA", rising_series(260));
        let mut config = test_config(&dir);
        config.max_concurrent_runs = 1;
        config.max_queue_size = 1;
        let coordinator = coordinator_with(provider, config).await;

        let first = coordinator
            .submit(RunRequest::new("bullish_breakout", json!({}), vec!["AAA".into()]))
            .await
            .unwrap();
        let second = coordinator
            .submit(RunRequest::new("bullish_breakout", json!({}), vec!["AAA".into()]))
            .await
            .unwrap();

        let err = coordinator
            .submit(RunRequest::new("bullish_breakout", json!({}), vec!["AAA".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.token(), "overloaded");

        wait_terminal(&coordinator, &first).await;
        wait_terminal(&coordinator, &second).await;
    }

    #[tokio::test]
    async fn concurrent_submissions_respect_queue_depth() {
        let dir = TempDir::new().unwrap();
        // A slow provider keeps the single pool slot saturated for the
        // whole submission burst, so admissions can only drain the queue
        // by the one pump pop.
        let provider = MockProvider::default()
            .with_delay(Duration::from_millis(500))
            .with_series("AAA", rising_series(50));
        let mut config = test_config(&dir);
        config.max_concurrent_runs = 1;
        config.max_queue_size = 4;
        let max_admissible = config.max_queue_size + config.max_concurrent_runs;
        let coordinator = coordinator_with(provider, config).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .submit(RunRequest::new(
                            "bullish_breakout",
                            json!({}),
                            vec!["AAA".into()],
                        ))
                        .await
                })
            })
            .collect();

        let mut admitted = Vec::new();
        let mut rejected = 0;
        for outcome in futures_util::future::join_all(handles).await {
            match outcome.unwrap() {
                Ok(run_id) => admitted.push(run_id),
                Err(e) => {
                    assert_eq!(e.token(), "overloaded");
                    rejected += 1;
                }
            }
        }

        assert!(
            admitted.len() <= max_admissible,
            "admitted {} runs past a cap of {max_admissible}",
            admitted.len()
        );
        assert_eq!(admitted.len() + rejected, 20);
        assert!(rejected >= 20 - max_admissible);

        for run_id in &admitted {
            wait_terminal(&coordinator, run_id).await;
        }
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default()
            .with_delay(Duration::from_millis(150))
            .with_series("AAA", rising_series(260));
        let mut config = test_config(&dir);
        config.max_concurrent_runs = 1;
        let coordinator = coordinator_with(provider, config).await;

        let request = || RunRequest::new("bullish_breakout", json!({}), vec!["AAA".into()]);
        let blocker = coordinator.submit(request()).await.unwrap();
        let low = coordinator
            .submit(request().with_priority(Priority::Low))
            .await
            .unwrap();
        let high = coordinator
            .submit(request().with_priority(Priority::High))
            .await
            .unwrap();

        let snapshot = coordinator.queue();
        assert_eq!(snapshot.max_concurrent, 1);
        assert_eq!(snapshot.queued.len(), 2);
        assert_eq!(snapshot.queued[0].run_id, high);
        assert_eq!(snapshot.queued[0].position, 1);
        assert_eq!(snapshot.queued[1].run_id, low);

        wait_terminal(&coordinator, &blocker).await;
        wait_terminal(&coordinator, &low).await;
        wait_terminal(&coordinator, &high).await;

        let high_run = coordinator.store().get_run(&high).await.unwrap();
        let low_run = coordinator.store().get_run(&low).await.unwrap();
        assert!(high_run.started_at.unwrap() < low_run.started_at.unwrap());
    }

    #[tokio::test]
    async fn params_hash_ignores_key_order() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default().with_series("AAA", rising_series(50));
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_a = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({"min_score": 75, "min_volume_multiple": 1.5}),
                vec!["AAA".into()],
            ))
            .await
            .unwrap();
        let run_b = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({"min_volume_multiple": 1.5, "min_score": 75}),
                vec!["AAA".into()],
            ))
            .await
            .unwrap();

        wait_terminal(&coordinator, &run_a).await;
        wait_terminal(&coordinator, &run_b).await;

        let a = coordinator.store().get_run(&run_a).await.unwrap();
        let b = coordinator.store().get_run(&run_b).await.unwrap();
        assert_eq!(a.params_hash, b.params_hash);
        assert_eq!(a.min_score, Some(75.0));
    }

    #[tokio::test]
    async fn duplicate_tickers_are_deduplicated_at_admission() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::default().with_series("AAA", rising_series(50));
        let coordinator = coordinator_with(provider, test_config(&dir)).await;

        let run_id = coordinator
            .submit(RunRequest::new(
                "bullish_breakout",
                json!({}),
                vec!["aaa".into(), "AAA".into(), " aaa ".into()],
            ))
            .await
            .unwrap();

        let status = wait_terminal(&coordinator, &run_id).await;
        assert_eq!(status.total_count, 1);
        assert_eq!(status.processed_count, 1);
    }
}
