use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScreenerError;

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Instrument metadata returned by the market-data port
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
}

/// Kind of listed instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Stock,
    Etf,
    Adr,
    Index,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Stock => "stock",
            InstrumentType::Etf => "etf",
            InstrumentType::Adr => "adr",
            InstrumentType::Index => "index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock" => Some(InstrumentType::Stock),
            "etf" => Some(InstrumentType::Etf),
            "adr" => Some(InstrumentType::Adr),
            "index" => Some(InstrumentType::Index),
            _ => None,
        }
    }
}

/// History window requested from the market-data port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1y")]
    OneYear,
    #[default]
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl HistoryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::OneYear => "1y",
            HistoryPeriod::TwoYears => "2y",
            HistoryPeriod::FiveYears => "5y",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1y" => Some(HistoryPeriod::OneYear),
            "2y" => Some(HistoryPeriod::TwoYears),
            "5y" => Some(HistoryPeriod::FiveYears),
            _ => None,
        }
    }

    /// Approximate number of daily bars in the window
    pub fn approx_bars(&self) -> usize {
        match self {
            HistoryPeriod::OneYear => 252,
            HistoryPeriod::TwoYears => 504,
            HistoryPeriod::FiveYears => 1260,
        }
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Day1 => "1d",
            Interval::Week1 => "1w",
        }
    }
}

/// Evaluator verdict for a single ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    StrongBuy,
    Buy,
    Watch,
    Hold,
    Trim,
    Exit,
    Wait,
    Error,
    Prime,
    Standard,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::StrongBuy => "strong_buy",
            Classification::Buy => "buy",
            Classification::Watch => "watch",
            Classification::Hold => "hold",
            Classification::Trim => "trim",
            Classification::Exit => "exit",
            Classification::Wait => "wait",
            Classification::Error => "error",
            Classification::Prime => "prime",
            Classification::Standard => "standard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strong_buy" => Some(Classification::StrongBuy),
            "buy" => Some(Classification::Buy),
            "watch" => Some(Classification::Watch),
            "hold" => Some(Classification::Hold),
            "trim" => Some(Classification::Trim),
            "exit" => Some(Classification::Exit),
            "wait" => Some(Classification::Wait),
            "error" => Some(Classification::Error),
            "prime" => Some(Classification::Prime),
            "standard" => Some(Classification::Standard),
            _ => None,
        }
    }
}

/// Risk label attached by the breakout screener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Queue priority for submitted runs. Higher priorities dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Lifecycle state of a strategy run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatus {
    Pending,
    Running,
    Ok,
    Error,
    Timeout,
    Cancelled,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Pending => "pending",
            ExitStatus::Running => "running",
            ExitStatus::Ok => "ok",
            ExitStatus::Error => "error",
            ExitStatus::Timeout => "timeout",
            ExitStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExitStatus::Pending),
            "running" => Some(ExitStatus::Running),
            "ok" => Some(ExitStatus::Ok),
            "error" => Some(ExitStatus::Error),
            "timeout" => Some(ExitStatus::Timeout),
            "cancelled" => Some(ExitStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExitStatus::Ok | ExitStatus::Error | ExitStatus::Timeout | ExitStatus::Cancelled
        )
    }

    /// Progress-feed status string mirrored on the run row
    pub fn execution_status(&self) -> &'static str {
        match self {
            ExitStatus::Pending => "queued",
            ExitStatus::Running => "running",
            ExitStatus::Ok => "completed",
            ExitStatus::Error => "failed",
            ExitStatus::Timeout => "timeout",
            ExitStatus::Cancelled => "cancelled",
        }
    }
}

/// Tagged scalar stored in a result's metric bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(v) => Some(*v),
            MetricValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Strategy-dependent metric bag. BTreeMap keeps the persisted JSON canonical.
pub type Metrics = BTreeMap<String, MetricValue>;

/// Outcome of evaluating one ticker against a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerEvaluation {
    pub passed: bool,
    pub score: f64,
    pub classification: Classification,
    pub reasons: Vec<String>,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TickerEvaluation {
    /// Error placeholder recorded when a ticker could not be evaluated
    pub fn error(reason: &str, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            classification: Classification::Error,
            reasons: vec![reason.to_string()],
            metrics: Metrics::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Normalize a raw ticker string: trim, uppercase, validate charset and length
pub fn normalize_ticker(raw: &str) -> Result<String, ScreenerError> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty() || ticker.len() > 10 {
        return Err(ScreenerError::invalid_param(
            "tickers",
            format!("ticker `{}` must be 1-10 characters", raw.trim()),
        ));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(ScreenerError::invalid_param(
            "tickers",
            format!("ticker `{}` contains invalid characters", raw.trim()),
        ));
    }
    Ok(ticker)
}
