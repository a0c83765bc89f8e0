// =============================================================================
// Market data intake
// =============================================================================

pub mod events;
pub mod stream;

pub use events::{
    fnv1a32, verify_route, DepthUpdate, IntakeStats, Liquidation, MarketEvent, Tick, Trade,
};
