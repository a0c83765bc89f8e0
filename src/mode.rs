// =============================================================================
// Run-mode guard — set once at startup, then logically immutable
// =============================================================================
//
// The guard is one of the two process-wide singletons (the other is the
// causal recorder). It is constructed exactly once in main, locked, and then
// passed by Arc into every component that is mode-restricted. Calling a
// restricted operation from the wrong mode is a fatal invariant violation,
// surfaced as `EngineError::ModeViolation`.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::types::RunMode;

pub struct ModeGuard {
    mode: RunMode,
    locked: AtomicBool,
}

impl ModeGuard {
    /// Create the guard in the given mode. The mode is fixed for the life of
    /// the process; `lock` only arms the violation checks.
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            locked: AtomicBool::new(false),
        }
    }

    /// Latch the mode. After this point the guard is immutable and every
    /// `require_*` check is armed.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
        info!(mode = %self.mode, "run mode latched");
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn current(&self) -> RunMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == RunMode::Live
    }

    pub fn is_shadow(&self) -> bool {
        self.mode == RunMode::Shadow
    }

    pub fn is_replay(&self) -> bool {
        self.mode == RunMode::Replay
    }

    /// Fail unless the process runs in `required` mode.
    pub fn require(&self, required: RunMode) -> EngineResult<()> {
        if self.mode == required {
            Ok(())
        } else {
            Err(EngineError::ModeViolation {
                required,
                actual: self.mode,
            })
        }
    }

    /// Live-order dispatch is the canonical mode-restricted operation: it
    /// must never happen in Shadow or Replay.
    pub fn require_live_dispatch(&self) -> EngineResult<()> {
        self.require(RunMode::Live)
    }

    /// Replay must never consult a real-time clock; callers that are about to
    /// do so check this first.
    pub fn forbid_wall_clock(&self) -> EngineResult<()> {
        if self.mode == RunMode::Replay {
            Err(EngineError::ModeViolation {
                required: RunMode::Live,
                actual: RunMode::Replay,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_dispatch_blocked_outside_live() {
        let guard = ModeGuard::new(RunMode::Shadow);
        guard.lock();
        assert!(guard.require_live_dispatch().is_err());
        assert!(guard.require(RunMode::Shadow).is_ok());
    }

    #[test]
    fn replay_forbids_wall_clock() {
        let guard = ModeGuard::new(RunMode::Replay);
        guard.lock();
        assert!(guard.forbid_wall_clock().is_err());

        let live = ModeGuard::new(RunMode::Live);
        assert!(live.forbid_wall_clock().is_ok());
    }

    #[test]
    fn mode_is_fixed_after_construction() {
        let guard = ModeGuard::new(RunMode::Live);
        assert_eq!(guard.current(), RunMode::Live);
        guard.lock();
        assert!(guard.is_locked());
        assert_eq!(guard.current(), RunMode::Live);
    }
}
