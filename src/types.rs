// =============================================================================
// Shared types used across the Borealis decision core
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Trade direction. Signals that carry no direction use `Option<Side>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sign convention used throughout the PnL math: Buy = +1, Sell = -1.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

/// Process-wide run mode. Latched once at startup by the mode guard; any
/// mode-restricted operation called from the wrong mode is a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Real orders go to the venue. Shadow runs in parallel for divergence.
    Live,
    /// Live market data, simulated fills only. No order leaves the process.
    Shadow,
    /// Events come from a causal log; the wall clock is never read.
    Replay,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Shadow => write!(f, "Shadow"),
            Self::Replay => write!(f, "Replay"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "shadow" => Ok(Self::Shadow),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Order kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

// ---------------------------------------------------------------------------
// No-trade reason
// ---------------------------------------------------------------------------

/// Why the engine is not trading a symbol right now.
///
/// Only the FIRST blocking gate is ever reported, never a combination. The
/// dashboard colours these by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoTradeReason {
    // Gate-level blocks, in chain order.
    ModeOff,
    GlobalKill,
    DailyLossCap,
    WeeklyLossCap,
    SymbolPaused,
    RegimeToxic,
    ExpectancyDisabled,
    ExpectancyPaused,
    SlopeDecay,
    BucketDisabled,
    SlippageCritical,
    MakerDisabled,
    PortfolioPaused,
    PortfolioLimit,
    PositionLimit,
    SpreadTooWide,
    CooldownActive,
    SizeZero,
    // Informational, not a fault.
    WaitingForSignal,
}

/// Dashboard severity tier for a block reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockSeverity {
    Normal,
    Info,
    Warning,
    Error,
    Fatal,
}

impl NoTradeReason {
    /// Short machine label used in logs and the causal record.
    pub fn label(self) -> &'static str {
        match self {
            Self::ModeOff => "MODE_OFF",
            Self::GlobalKill => "KILLED",
            Self::DailyLossCap => "DAILY_LOSS",
            Self::WeeklyLossCap => "WEEKLY_LOSS",
            Self::SymbolPaused => "SYM_PAUSED",
            Self::RegimeToxic => "REGIME_TOXIC",
            Self::ExpectancyDisabled => "EXPECTANCY_DISABLED",
            Self::ExpectancyPaused => "EXPECTANCY_PAUSED",
            Self::SlopeDecay => "SLOPE_DECAY",
            Self::BucketDisabled => "BUCKET_DISABLED",
            Self::SlippageCritical => "SLIPPAGE_CRITICAL",
            Self::MakerDisabled => "MAKER_DISABLED",
            Self::PortfolioPaused => "PORTFOLIO_PAUSED",
            Self::PortfolioLimit => "PORTFOLIO_LIMIT",
            Self::PositionLimit => "POS_LIMIT",
            Self::SpreadTooWide => "WIDE_SPREAD",
            Self::CooldownActive => "COOLDOWN",
            Self::SizeZero => "SIZE_ZERO",
            Self::WaitingForSignal => "WAITING",
        }
    }

    /// Human-readable description for the dashboard.
    pub fn description(self) -> &'static str {
        match self {
            Self::ModeOff => "Trading switched off",
            Self::GlobalKill => "Kill switch activated",
            Self::DailyLossCap => "Daily loss limit reached",
            Self::WeeklyLossCap => "Weekly loss limit reached",
            Self::SymbolPaused => "Symbol paused by divergence monitor",
            Self::RegimeToxic => "Market regime classified toxic",
            Self::ExpectancyDisabled => "Slow-horizon expectancy negative, symbol disabled",
            Self::ExpectancyPaused => "Fast-horizon expectancy below pause threshold",
            Self::SlopeDecay => "Expectancy slope decaying",
            Self::BucketDisabled => "Time bucket degraded two sessions running",
            Self::SlippageCritical => "Realised slippage critical, symbol paused",
            Self::MakerDisabled => "Spread capture too low, maker disabled",
            Self::PortfolioPaused => "Portfolio median expectancy negative",
            Self::PortfolioLimit => "Portfolio risk budget exhausted",
            Self::PositionLimit => "Maximum positions reached",
            Self::SpreadTooWide => "Spread exceeds maximum threshold",
            Self::CooldownActive => "Post-trade cooldown period",
            Self::SizeZero => "Final size rounded to zero",
            Self::WaitingForSignal => "Normal: waiting for trade signal",
        }
    }

    pub fn severity(self) -> BlockSeverity {
        match self {
            Self::WaitingForSignal => BlockSeverity::Normal,
            Self::CooldownActive | Self::BucketDisabled => BlockSeverity::Info,
            Self::SpreadTooWide
            | Self::PositionLimit
            | Self::PortfolioLimit
            | Self::SlopeDecay
            | Self::SizeZero
            | Self::ExpectancyPaused => BlockSeverity::Warning,
            Self::RegimeToxic
            | Self::ExpectancyDisabled
            | Self::SlippageCritical
            | Self::MakerDisabled
            | Self::PortfolioPaused
            | Self::SymbolPaused => BlockSeverity::Error,
            Self::ModeOff | Self::GlobalKill | Self::DailyLossCap | Self::WeeklyLossCap => {
                BlockSeverity::Fatal
            }
        }
    }
}

impl std::fmt::Display for NoTradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_convention() {
        assert!((Side::Buy.sign() - 1.0).abs() < f64::EPSILON);
        assert!((Side::Sell.sign() + 1.0).abs() < f64::EPSILON);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!("live".parse::<RunMode>().unwrap(), RunMode::Live);
        assert_eq!("SHADOW".parse::<RunMode>().unwrap(), RunMode::Shadow);
        assert_eq!("Replay".parse::<RunMode>().unwrap(), RunMode::Replay);
        assert!("paper".parse::<RunMode>().is_err());
    }

    #[test]
    fn kill_reasons_are_fatal() {
        assert_eq!(NoTradeReason::GlobalKill.severity(), BlockSeverity::Fatal);
        assert_eq!(NoTradeReason::DailyLossCap.severity(), BlockSeverity::Fatal);
        assert_eq!(
            NoTradeReason::WaitingForSignal.severity(),
            BlockSeverity::Normal
        );
    }
}
