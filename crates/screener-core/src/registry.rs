use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScreenerError;
use crate::evaluator::StrategyEvaluator;

/// Process-wide mapping from `strategy_code` to evaluator. Populated at
/// startup and then shared immutably (wrap in `Arc`); lookups never lock.
#[derive(Default)]
pub struct StrategyRegistry {
    evaluators: HashMap<&'static str, Arc<dyn StrategyEvaluator>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, evaluator: Arc<dyn StrategyEvaluator>) {
        let code = evaluator.strategy_code();
        if self.evaluators.insert(code, evaluator).is_some() {
            tracing::warn!("strategy `{}` registered twice, keeping the latest", code);
        }
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn StrategyEvaluator>, ScreenerError> {
        self.evaluators
            .get(code)
            .cloned()
            .ok_or_else(|| ScreenerError::UnknownStrategy(code.to_string()))
    }

    pub fn codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = self.evaluators.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}
