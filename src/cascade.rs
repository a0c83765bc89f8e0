// =============================================================================
// Cascade arbiter — fuses the four signal engines into a directional entry
// =============================================================================
//
// State machine per leader symbol:
//
//   Idle ──signals──▶ Armed ──fusion──▶ (fire) ──mark_executed──▶ InTrade
//   InTrade ──max_hold / mark_exit──▶ Cooldown ──cooldown_ns──▶ Idle
//
// Fusion rule: consensus side is a vote over OFI, Liquidation and Impulse;
// Depth gates but never votes. Any signed disagreement aborts the evaluation
// outright. With a non-null consensus the arbiter fires when any of the four
// confirmation patterns holds. A spread wider than the cap rejects the fire
// before any pattern is considered.
// =============================================================================

use serde::Serialize;
use tracing::{debug, info};

use crate::signals::{
    DepthSignal, ImpulseSignal, LiquidationSignal, OfiSignal, SignalBridge,
};
use crate::types::Side;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CascadeState {
    Idle,
    Armed,
    InTrade,
    Cooldown,
}

impl std::fmt::Display for CascadeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Armed => write!(f, "ARMED"),
            Self::InTrade => write!(f, "IN_TRADE"),
            Self::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// Outcome of one arbiter evaluation. Emitted at most once per state
/// transition; a non-fired signal still carries the confirmation snapshot
/// for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeSignal {
    pub fired: bool,
    pub side: Option<Side>,
    pub ts_ns: u64,
    pub ofi_confirmed: bool,
    pub depth_confirmed: bool,
    pub liq_confirmed: bool,
    pub impulse_confirmed: bool,
    pub confirmation_count: u32,
}

impl CascadeSignal {
    fn empty(ts_ns: u64) -> Self {
        Self {
            fired: false,
            side: None,
            ts_ns,
            ofi_confirmed: false,
            depth_confirmed: false,
            liq_confirmed: false,
            impulse_confirmed: false,
            confirmation_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub min_confirmations: u32,
    pub max_spread_bps: f64,
    pub max_hold_ns: u64,
    pub cooldown_ns: u64,
    pub follower_block_ns: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            min_confirmations: 3,
            max_spread_bps: 5.0,
            max_hold_ns: 30_000_000_000,
            cooldown_ns: 5_000_000_000,
            follower_block_ns: 500_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Arbiter
// ---------------------------------------------------------------------------

pub struct CascadeArbiter {
    cfg: CascadeConfig,
    symbol_hash: u32,
    state: CascadeState,
    entry_ts_ns: u64,
    cooldown_start_ns: u64,
    should_trade: bool,
    last_signal: CascadeSignal,
}

impl CascadeArbiter {
    pub fn new(symbol_hash: u32, cfg: CascadeConfig) -> Self {
        Self {
            cfg,
            symbol_hash,
            state: CascadeState::Idle,
            entry_ts_ns: 0,
            cooldown_start_ns: 0,
            should_trade: false,
            last_signal: CascadeSignal::empty(0),
        }
    }

    /// Evaluate the fusion rule against the four freshly evaluated signals.
    pub fn evaluate(
        &mut self,
        now_ns: u64,
        spread_bps: f64,
        ofi: &OfiSignal,
        depth: &DepthSignal,
        liq: &LiquidationSignal,
        impulse: &ImpulseSignal,
        bridge: &SignalBridge,
    ) -> CascadeSignal {
        let mut result = CascadeSignal::empty(now_ns);

        // Cooldown expiry.
        if self.state == CascadeState::Cooldown {
            if now_ns.saturating_sub(self.cooldown_start_ns) < self.cfg.cooldown_ns {
                self.last_signal = result.clone();
                return result;
            }
            self.state = CascadeState::Idle;
            debug!(symbol_hash = self.symbol_hash, "cascade cooldown expired");
        }

        // Forced time stop while in a trade.
        if self.state == CascadeState::InTrade {
            if now_ns.saturating_sub(self.entry_ts_ns) > self.cfg.max_hold_ns {
                self.state = CascadeState::Cooldown;
                self.cooldown_start_ns = now_ns;
                debug!(symbol_hash = self.symbol_hash, "max hold elapsed, cooling down");
            }
            self.last_signal = result.clone();
            return result;
        }

        // Leader blocked by a recent follower signal.
        if bridge.blocked(self.symbol_hash, now_ns) {
            self.last_signal = result.clone();
            return result;
        }

        result.ofi_confirmed = ofi.fired;
        result.depth_confirmed = depth.fired;
        result.liq_confirmed = liq.fired;
        result.impulse_confirmed = impulse.fired;
        result.confirmation_count = [ofi.fired, depth.fired, liq.fired, impulse.fired]
            .iter()
            .filter(|f| **f)
            .count() as u32;

        // Arm when anything has fired but fusion has not yet completed.
        self.state = if result.confirmation_count > 0 {
            CascadeState::Armed
        } else {
            CascadeState::Idle
        };

        // Spread gate rejects before any pattern is considered.
        if spread_bps > self.cfg.max_spread_bps {
            self.last_signal = result.clone();
            return result;
        }

        // Consensus vote over the signed engines. Depth has no vote.
        let mut consensus: Option<Side> = None;
        for side in [
            ofi.fired.then_some(ofi.side).flatten(),
            liq.fired.then_some(liq.side).flatten(),
            impulse.fired.then_some(impulse.side).flatten(),
        ]
        .into_iter()
        .flatten()
        {
            match consensus {
                None => consensus = Some(side),
                Some(existing) if existing == side => {}
                Some(_) => {
                    // Signed engines disagree: abort the evaluation.
                    self.last_signal = result.clone();
                    return result;
                }
            }
        }

        let should_fire = consensus.is_some()
            && ((liq.fired && depth.fired && ofi.fired)
                || (liq.fired && impulse.fired)
                || (depth.fired && ofi.fired && impulse.fired)
                || result.confirmation_count >= self.cfg.min_confirmations);

        if should_fire {
            result.fired = true;
            result.side = consensus;
            self.should_trade = true;
            self.last_signal = result.clone();

            bridge.block_others(self.symbol_hash, now_ns + self.cfg.follower_block_ns);

            info!(
                symbol_hash = self.symbol_hash,
                side = ?consensus,
                confirmations = result.confirmation_count,
                ofi = ofi.fired,
                depth = depth.fired,
                liq = liq.fired,
                impulse = impulse.fired,
                "cascade fired"
            );
        } else {
            self.last_signal = result.clone();
        }

        result
    }

    /// The coordinator dispatched the entry: the arbiter holds InTrade until
    /// exit or the time stop.
    pub fn mark_executed(&mut self) {
        self.should_trade = false;
        self.state = CascadeState::InTrade;
        self.entry_ts_ns = self.last_signal.ts_ns;
    }

    /// The position was closed: enter cooldown.
    pub fn mark_exit(&mut self, now_ns: u64) {
        self.state = CascadeState::Cooldown;
        self.cooldown_start_ns = now_ns;
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    pub fn should_trade(&self) -> bool {
        self.should_trade
    }

    pub fn last_signal(&self) -> &CascadeSignal {
        &self.last_signal
    }
}
