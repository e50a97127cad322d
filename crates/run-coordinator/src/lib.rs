pub mod config;
pub mod coordinator;

pub use config::*;
pub use coordinator::*;

use std::sync::Arc;

use breakout_screener::BullishBreakoutScreener;
use leap_screener::LeapEntryScreener;
use screener_core::StrategyRegistry;

/// Registry with the built-in strategies. Call once at startup and share
/// the result behind an `Arc`.
pub fn default_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(BullishBreakoutScreener::new()));
    registry.register(Arc::new(LeapEntryScreener::new()));
    registry
}
