// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Kinds, not call sites:
//   - Config:             bad or missing startup options. Exit code 1.
//   - ModeViolation:      wrong run mode for an operation. Exit code 2 when
//                         detected at startup, fatal otherwise.
//   - RoutingMismatch:    symbol hash disagrees with the lane. The event is
//                         dropped and counted; this variant exists for the
//                         counter path, it never propagates into decisions.
//   - Invariant:          order state regression, NaN PnL, etc. Always fatal.
//   - Recorder:           causal log I/O failure. Exit code 4.
//   - ReplayDivergence:   live and replayed decisions disagree. Exit code 3
//                         when the count exceeds the configured threshold.
//   - Venue:              fatal venue failure. Exit code 4.
// =============================================================================

use crate::types::RunMode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("mode violation: operation requires {required}, process is {actual}")]
    ModeViolation { required: RunMode, actual: RunMode },

    #[error("routing mismatch for {symbol}: expected hash {expected:#010x}, got {got:#010x}")]
    RoutingMismatch {
        symbol: String,
        expected: u32,
        got: u32,
    },

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("causal recorder failure: {0}")]
    Recorder(#[from] std::io::Error),

    #[error("replay divergence: {count} mismatches (threshold {threshold})")]
    ReplayDivergence { count: u64, threshold: u64 },

    #[error("venue failure: {0}")]
    Venue(String),
}

impl EngineError {
    /// Process exit code mandated for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::ModeViolation { .. } => 2,
            Self::ReplayDivergence { .. } => 3,
            Self::Recorder(_) | Self::Venue(_) => 4,
            // Invariant violations and misroutes that reach the top are
            // programming errors; exit as a recorder-grade fatal.
            Self::Invariant(_) | Self::RoutingMismatch { .. } => 4,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(EngineError::Config("x".into()).exit_code(), 1);
        assert_eq!(
            EngineError::ModeViolation {
                required: RunMode::Replay,
                actual: RunMode::Live,
            }
            .exit_code(),
            2
        );
        assert_eq!(
            EngineError::ReplayDivergence {
                count: 3,
                threshold: 0,
            }
            .exit_code(),
            3
        );
        assert_eq!(EngineError::Venue("down".into()).exit_code(), 4);
    }
}
