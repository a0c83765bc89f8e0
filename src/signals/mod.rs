// =============================================================================
// Signal pipeline — four independent per-symbol engines + the cross-symbol
// bridge
// =============================================================================
//
// Shared contract: `ingest(input)` feeds raw market data, `evaluate(now_ns)`
// returns an immutable signal. Engines are single-symbol and owned by the
// symbol's lane task, so they take `&mut self` and need no locks. Every
// engine refuses to fire until its warm-up has elapsed; until then it only
// updates baselines.
// =============================================================================

pub mod bridge;
pub mod depth;
pub mod impulse;
pub mod liquidation;
pub mod ofi;

pub use bridge::SignalBridge;
pub use depth::{DepthEngine, DepthSignal};
pub use impulse::{ImpulseEngine, ImpulseSignal};
pub use liquidation::{LiquidationEngine, LiquidationSignal};
pub use ofi::{OfiEngine, OfiSignal};
