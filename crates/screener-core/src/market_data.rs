use async_trait::async_trait;

use crate::error::ScreenerError;
use crate::types::{Bar, HistoryPeriod, InstrumentMeta, Interval};

/// Abstract market-data fetcher. The engine never knows the vendor; an
/// implementation is injected at coordinator construction. Implementations
/// must normalize daily timestamps to UTC day boundaries and be safe to
/// share across tasks.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Historical OHLCV window for a ticker, oldest bar first. An unknown
    /// ticker yields an empty series; transient failures surface as
    /// `MarketDataUnavailable`.
    async fn fetch_ohlcv(
        &self,
        ticker: &str,
        period: HistoryPeriod,
        interval: Interval,
    ) -> Result<Vec<Bar>, ScreenerError>;

    /// Basic instrument metadata, `None` when the vendor has nothing.
    async fn fetch_metadata(&self, ticker: &str) -> Result<Option<InstrumentMeta>, ScreenerError>;
}
