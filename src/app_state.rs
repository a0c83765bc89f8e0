// =============================================================================
// Central application state — Borealis decision core
// =============================================================================
//
// Ties the subsystems together and provides the snapshot surface for the
// telemetry API and WebSocket feed. Subsystem engines own their state behind
// their own locks; AppState holds Arc handles plus the per-symbol display
// snapshots that lanes and the coordinator push after every update.
//
// A monotonically increasing version counter signals the WebSocket feed that
// fresh data is available.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::cascade::CascadeState;
use crate::governance::{GovernanceController, GovernanceSnapshot};
use crate::market::IntakeStats;
use crate::physics::{PhysicsSnapshot, VenuePhysics};
use crate::playbook::Capabilities;
use crate::position::{Position, PositionBook};
use crate::risk::authority::SizeDecision;
use crate::risk::portfolio::PortfolioSnapshot;
use crate::risk::{RampLevel, Regime};
use crate::shadow::divergence::DivergenceSnapshot;
use crate::shadow::DivergenceMonitor;
use crate::shadow::MarketView;
use crate::types::{BlockSeverity, NoTradeReason, RunMode};

// =============================================================================
// Per-symbol snapshot
// =============================================================================

/// Everything the dashboard shows for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub symbol_hash: u32,

    // Top of book.
    pub bid: f64,
    pub ask: f64,
    pub spread_bps: f64,
    pub last_price: f64,

    // Signal engine scalars.
    pub ofi_zscore: f64,
    pub ofi_accel: f64,
    pub depth_ratio: f64,
    pub liq_intensity: f64,
    pub displacement_bps: f64,

    // Signal firings from the last evaluation.
    pub ofi_fired: bool,
    pub depth_fired: bool,
    pub liq_fired: bool,
    pub impulse_fired: bool,

    pub arbiter_state: String,
    pub in_cooldown: bool,
    pub regime: String,

    pub position: Option<Position>,

    /// First blocking gate, never a combination.
    pub no_trade_reason: String,
    pub no_trade_description: String,
    pub no_trade_severity: BlockSeverity,

    pub last_decision: Option<SizeDecision>,

    pub physics: String,
    pub capabilities: Option<Capabilities>,

    pub divergence: DivergenceSnapshot,
}

impl SymbolSnapshot {
    pub fn empty(symbol: &str, symbol_hash: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            symbol_hash,
            bid: 0.0,
            ask: 0.0,
            spread_bps: 0.0,
            last_price: 0.0,
            ofi_zscore: 0.0,
            ofi_accel: 0.0,
            depth_ratio: 1.0,
            liq_intensity: 0.0,
            displacement_bps: 0.0,
            ofi_fired: false,
            depth_fired: false,
            liq_fired: false,
            impulse_fired: false,
            arbiter_state: CascadeState::Idle.to_string(),
            in_cooldown: false,
            regime: "UNKNOWN".to_string(),
            position: None,
            no_trade_reason: NoTradeReason::WaitingForSignal.label().to_string(),
            no_trade_description: NoTradeReason::WaitingForSignal.description().to_string(),
            no_trade_severity: NoTradeReason::WaitingForSignal.severity(),
            last_decision: None,
            physics: "UNKNOWN".to_string(),
            capabilities: None,
            divergence: DivergenceSnapshot {
                paused: false,
                divergence_bps: 0.0,
                shadow_trades: 0,
                live_trades: 0,
                alerts: 0,
            },
        }
    }
}

// =============================================================================
// Global snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct IntakeSnapshot {
    pub accepted: u64,
    pub dropped_misroute: u64,
    pub dropped_parse: u64,
}

/// Full engine state pushed to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSnapshot {
    pub state_version: u64,
    pub mode: RunMode,
    pub symbols: HashMap<String, SymbolSnapshot>,
    pub portfolio: Option<PortfolioSnapshot>,
    pub ramp_level: Option<RampLevel>,
    pub governance: GovernanceSnapshot,
    pub intake: IntakeSnapshot,
    pub venues: HashMap<String, PhysicsSnapshot>,
    pub total_exposure: f64,
    pub total_realized_pnl: f64,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    pub mode: RunMode,
    pub state_version: AtomicU64,

    /// Display snapshots, keyed by symbol name.
    symbol_snapshots: RwLock<HashMap<String, SymbolSnapshot>>,
    /// Latest market view per symbol hash, for the coordinator's exits.
    market_views: RwLock<HashMap<u32, MarketView>>,
    /// Latest regime per symbol hash, fed by lanes, read by the coordinator.
    regimes: RwLock<HashMap<u32, Regime>>,

    /// Pushed by the coordinator after each decision batch.
    portfolio: RwLock<Option<PortfolioSnapshot>>,
    ramp_level: RwLock<Option<RampLevel>>,

    pub positions: Arc<PositionBook>,
    pub governance: Arc<GovernanceController>,
    pub divergence: Arc<DivergenceMonitor>,
    pub venue_physics: Arc<VenuePhysics>,
    pub intake_stats: Arc<IntakeStats>,
}

impl AppState {
    pub fn new(
        mode: RunMode,
        symbols: &[(String, u32)],
        positions: Arc<PositionBook>,
        governance: Arc<GovernanceController>,
        divergence: Arc<DivergenceMonitor>,
        venue_physics: Arc<VenuePhysics>,
        intake_stats: Arc<IntakeStats>,
    ) -> Self {
        let mut snapshots = HashMap::new();
        for (symbol, hash) in symbols {
            snapshots.insert(symbol.clone(), SymbolSnapshot::empty(symbol, *hash));
        }

        Self {
            mode,
            state_version: AtomicU64::new(1),
            symbol_snapshots: RwLock::new(snapshots),
            market_views: RwLock::new(HashMap::new()),
            regimes: RwLock::new(HashMap::new()),
            portfolio: RwLock::new(None),
            ramp_level: RwLock::new(None),
            positions,
            governance,
            divergence,
            venue_physics,
            intake_stats,
        }
    }

    pub fn bump_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Lane-side update of a symbol's display snapshot.
    pub fn update_symbol<F>(&self, symbol: &str, update: F)
    where
        F: FnOnce(&mut SymbolSnapshot),
    {
        let mut snapshots = self.symbol_snapshots.write();
        if let Some(snapshot) = snapshots.get_mut(symbol) {
            update(snapshot);
        }
        drop(snapshots);
        self.bump_version();
    }

    pub fn symbol_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.symbol_snapshots.read().get(symbol).cloned()
    }

    pub fn set_market_view(&self, symbol_hash: u32, view: MarketView) {
        self.market_views.write().insert(symbol_hash, view);
    }

    pub fn market_view(&self, symbol_hash: u32) -> Option<MarketView> {
        self.market_views.read().get(&symbol_hash).copied()
    }

    pub fn set_regime(&self, symbol_hash: u32, regime: Regime) {
        self.regimes.write().insert(symbol_hash, regime);
    }

    pub fn regimes(&self) -> Vec<(u32, Regime)> {
        self.regimes
            .read()
            .iter()
            .map(|(hash, regime)| (*hash, *regime))
            .collect()
    }

    pub fn set_portfolio(&self, snapshot: PortfolioSnapshot, ramp: RampLevel) {
        *self.portfolio.write() = Some(snapshot);
        *self.ramp_level.write() = Some(ramp);
        self.bump_version();
    }

    /// Build the full snapshot for the REST/WS surface.
    pub fn build_snapshot(&self, now_ns: u64) -> GlobalSnapshot {
        let symbols = self.symbol_snapshots.read().clone();

        GlobalSnapshot {
            state_version: self.version(),
            mode: self.mode,
            symbols,
            portfolio: self.portfolio.read().clone(),
            ramp_level: *self.ramp_level.read(),
            governance: self.governance.snapshot(),
            intake: IntakeSnapshot {
                accepted: self.intake_stats.accepted_count(),
                dropped_misroute: self.intake_stats.misroute_count(),
                dropped_parse: self.intake_stats.parse_failure_count(),
            },
            venues: self.venue_physics.all_snapshots(now_ns),
            total_exposure: self.positions.total_exposure(),
            total_realized_pnl: self.positions.total_realized_pnl(),
        }
    }
}
