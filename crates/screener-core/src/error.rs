use thiserror::Error;

/// Error taxonomy shared across the engine. Every variant carries a short
/// stable token for programmatic handling plus a human-readable message.
#[derive(Error, Debug, Clone)]
pub enum ScreenerError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameters { field: String, reason: String },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("empty ticker universe")]
    EmptyUniverse,

    #[error("execution queue is full")]
    Overloaded,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("run {0} is not terminal")]
    RunNotTerminal(String),

    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("evaluator failure: {0}")]
    Evaluator(String),
}

impl ScreenerError {
    pub fn invalid_param(field: &str, reason: impl Into<String>) -> Self {
        ScreenerError::InvalidParameters {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Short stable token suitable for programmatic handling
    pub fn token(&self) -> &'static str {
        match self {
            ScreenerError::InvalidParameters { .. } => "invalid_parameters",
            ScreenerError::UnknownStrategy(_) => "unknown_strategy",
            ScreenerError::EmptyUniverse => "empty_universe",
            ScreenerError::Overloaded => "overloaded",
            ScreenerError::NotFound(_) => "not_found",
            ScreenerError::RunNotTerminal(_) => "run_not_terminal",
            ScreenerError::MarketDataUnavailable(_) => "market_data_unavailable",
            ScreenerError::Persistence(_) => "persistence_error",
            ScreenerError::Evaluator(_) => "evaluator_exception",
        }
    }
}
