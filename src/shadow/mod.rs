// =============================================================================
// Shadow execution — deterministic fill simulation + divergence monitoring
// =============================================================================

pub mod divergence;
pub mod executor;

pub use divergence::DivergenceMonitor;
pub use executor::{ExecMode, FillKind, MarketView, ShadowExecutor, ShadowFill};
