use chrono::Utc;
use screener_core::{InstrumentMeta, InstrumentType, ScreenerError};

use crate::db::{db_err, retry_busy, ScreenerDb};

/// Instrument row as read back from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Instrument {
    pub ticker: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub instrument_type: String,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub style_category: Option<String>,
}

impl ScreenerDb {
    /// Create the instrument on first observation or refresh its metadata.
    /// Missing fields in a refresh never erase previously known values.
    pub async fn upsert_instrument(
        &self,
        ticker: &str,
        meta: &InstrumentMeta,
        instrument_type: InstrumentType,
    ) -> Result<(), ScreenerError> {
        let now = Utc::now();
        retry_busy(|| {
            sqlx::query(
                "INSERT INTO instrument (
                    ticker, company_name, sector, industry, instrument_type,
                    currency, exchange, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(ticker) DO UPDATE SET
                    company_name = COALESCE(excluded.company_name, instrument.company_name),
                    sector = COALESCE(excluded.sector, instrument.sector),
                    industry = COALESCE(excluded.industry, instrument.industry),
                    currency = COALESCE(excluded.currency, instrument.currency),
                    exchange = COALESCE(excluded.exchange, instrument.exchange),
                    updated_at = excluded.updated_at",
            )
            .bind(ticker)
            .bind(&meta.company_name)
            .bind(&meta.sector)
            .bind(&meta.industry)
            .bind(instrument_type.as_str())
            .bind(&meta.currency)
            .bind(&meta.exchange)
            .bind(now)
            .bind(now)
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    pub async fn get_instrument(&self, ticker: &str) -> Result<Option<Instrument>, ScreenerError> {
        sqlx::query_as::<_, Instrument>(
            "SELECT ticker, company_name, sector, industry, instrument_type,
                    currency, exchange, style_category
             FROM instrument WHERE ticker = ?",
        )
        .bind(ticker)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }
}
