// =============================================================================
// Risk authority — the ordered, non-bypassable gate chain and its guards
// =============================================================================

pub mod authority;
pub mod bucket;
pub mod expectancy;
pub mod portfolio;
pub mod ramp;
pub mod regime;
pub mod slippage;
pub mod slope;
pub mod spread_capture;

pub use authority::{RiskAuthority, SizeDecision, SizeRequest};
pub use bucket::{bucket_for_hour, BucketQualityManager, TimeBucket};
pub use expectancy::ExpectancyAuthority;
pub use portfolio::{group_for_symbol, CorrelationGroup, PortfolioGovernor};
pub use ramp::{CapitalRamp, RampLevel};
pub use regime::{Regime, RegimeClassifier};
pub use slippage::{SlippageGovernor, SlippageState};
pub use slope::SlopeGuard;
pub use spread_capture::SpreadCaptureManager;
