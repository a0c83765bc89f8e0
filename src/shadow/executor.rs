// =============================================================================
// Shadow executor — simulated fills, zero orders sent
// =============================================================================
//
// Consumes live market snapshots and simulates fills against them. Three
// modes:
//
//   TakerOnly  fill at the opposing top-of-book immediately; slippage is the
//              distance from mid in bps.
//   MakerOnly  queue-aware probabilistic fill: queue ahead is estimated as
//              1.5x the same-side top-of-book quantity, fill probability is
//              1 - exp(-recent_taker_volume / queue_ahead). Rejected when
//              the probability or the spread is too small; otherwise a
//              deterministic RNG seeded by the triggering event id draws the
//              outcome. Maker fills execute at the limit with zero slippage.
//   Hybrid     maker first, taker fallback.
//
// Exits are always simulated as taker — when getting out matters, assume the
// worst. The per-symbol maker-health tracker shuts maker mode down for 15
// minutes when the fill rate, adverse-selection rate, or maker expectancy
// breaches its bound.
//
// Every random draw is seeded from event data, so a replay of the same log
// reproduces identical fills bit for bit.
// =============================================================================

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::types::Side;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecMode {
    TakerOnly,
    MakerOnly,
    Hybrid,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TakerOnly => "TAKER_ONLY",
            Self::MakerOnly => "MAKER_ONLY",
            Self::Hybrid => "HYBRID",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FillKind {
    Maker,
    Taker,
    HybridMaker,
    HybridTaker,
    NoFill,
}

/// Market state needed for one simulation step.
#[derive(Debug, Clone, Copy)]
pub struct MarketView {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub recent_taker_volume: f64,
    pub ts_ns: u64,
}

impl MarketView {
    pub fn valid(&self) -> bool {
        self.best_bid > 0.0 && self.best_ask > 0.0 && self.best_ask > self.best_bid
    }

    pub fn mid(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid > 0.0 {
            (self.best_ask - self.best_bid) / mid * 10_000.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShadowFill {
    pub symbol_hash: u32,
    pub side: Side,
    pub kind: FillKind,
    pub filled: bool,
    pub qty: f64,
    pub price: f64,
    pub slippage_bps: f64,
    pub spread_bps: f64,
    pub ts_ns: u64,
    pub reason: &'static str,
}

impl ShadowFill {
    fn no_fill(symbol_hash: u32, side: Side, ts_ns: u64, reason: &'static str) -> Self {
        Self {
            symbol_hash,
            side,
            kind: FillKind::NoFill,
            filled: false,
            qty: 0.0,
            price: 0.0,
            slippage_bps: 0.0,
            spread_bps: 0.0,
            ts_ns,
            reason,
        }
    }
}

/// Result of closing a shadow position: the exit fill plus trade PnL.
#[derive(Debug, Clone, Serialize)]
pub struct ShadowExit {
    pub fill: ShadowFill,
    pub entry_price: f64,
    pub pnl: f64,
    pub pnl_bps: f64,
    pub hold_ns: u64,
}

// ---------------------------------------------------------------------------
// Maker health
// ---------------------------------------------------------------------------

const HEALTH_ALPHA: f64 = 0.1;
const MIN_FILL_RATE: f64 = 0.20;
const MAX_ADVERSE_RATE: f64 = 0.30;
const MAKER_COOLDOWN_NS: u64 = 15 * 60 * 1_000_000_000;

/// Rolling maker quality per symbol. Breaching any bound disables maker for
/// a 15-minute cooldown.
#[derive(Debug, Clone, Serialize)]
pub struct MakerHealth {
    pub fill_rate: f64,
    pub adverse_rate: f64,
    pub expectancy_bps: f64,
    pub attempts: u32,
    pub fills: u32,
    pub cooldown_until_ns: u64,
}

impl Default for MakerHealth {
    fn default() -> Self {
        Self {
            fill_rate: 0.5,
            adverse_rate: 0.0,
            expectancy_bps: 0.0,
            attempts: 0,
            fills: 0,
            cooldown_until_ns: 0,
        }
    }
}

impl MakerHealth {
    fn record_fill(&mut self, now_ns: u64) {
        self.attempts += 1;
        self.fills += 1;
        self.fill_rate = HEALTH_ALPHA + (1.0 - HEALTH_ALPHA) * self.fill_rate;
        self.check(now_ns);
    }

    fn record_no_fill(&mut self, now_ns: u64) {
        self.attempts += 1;
        self.fill_rate *= 1.0 - HEALTH_ALPHA;
        self.check(now_ns);
    }

    fn record_adverse(&mut self, now_ns: u64) {
        self.attempts += 1;
        self.adverse_rate = HEALTH_ALPHA + (1.0 - HEALTH_ALPHA) * self.adverse_rate;
        self.check(now_ns);
    }

    /// Maker expectancy is tracked on exits.
    fn record_expectancy(&mut self, pnl_bps: f64, now_ns: u64) {
        self.expectancy_bps = HEALTH_ALPHA * pnl_bps + (1.0 - HEALTH_ALPHA) * self.expectancy_bps;
        self.check(now_ns);
    }

    fn check(&mut self, now_ns: u64) {
        // Give the tracker a few attempts before it can trip.
        if self.attempts < 10 {
            return;
        }
        if self.fill_rate < MIN_FILL_RATE
            || self.adverse_rate > MAX_ADVERSE_RATE
            || self.expectancy_bps < 0.0
        {
            if now_ns >= self.cooldown_until_ns {
                info!(
                    fill_rate = self.fill_rate,
                    adverse_rate = self.adverse_rate,
                    expectancy_bps = self.expectancy_bps,
                    "maker health tripped, cooling down 15m"
                );
            }
            self.cooldown_until_ns = now_ns + MAKER_COOLDOWN_NS;
        }
    }

    pub fn maker_available(&self, now_ns: u64) -> bool {
        now_ns >= self.cooldown_until_ns
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShadowConfig {
    pub mode: ExecMode,
    pub qty: f64,
    pub min_fill_prob: f64,
    pub min_spread_for_maker_bps: f64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Hybrid,
            qty: 0.001,
            min_fill_prob: 0.25,
            min_spread_for_maker_bps: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ShadowPosition {
    side: Side,
    qty: f64,
    entry_price: f64,
    entry_ts_ns: u64,
    entry_was_maker: bool,
}

pub struct ShadowExecutor {
    cfg: ShadowConfig,
    positions: HashMap<u32, ShadowPosition>,
    health: HashMap<u32, MakerHealth>,
    trades: u64,
    wins: u64,
    losses: u64,
    total_pnl: f64,
}

impl ShadowExecutor {
    pub fn new(cfg: ShadowConfig) -> Self {
        Self {
            cfg,
            positions: HashMap::new(),
            health: HashMap::new(),
            trades: 0,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
        }
    }

    /// Simulate an entry. `event_id` seeds the maker fill draw so replays
    /// reproduce the identical outcome.
    pub fn execute(
        &mut self,
        event_id: u64,
        symbol_hash: u32,
        side: Side,
        qty: f64,
        market: &MarketView,
    ) -> ShadowFill {
        let qty = if qty > 0.0 { qty } else { self.cfg.qty };
        if self.positions.contains_key(&symbol_hash) {
            return ShadowFill::no_fill(symbol_hash, side, market.ts_ns, "POSITION_OPEN");
        }
        if !market.valid() {
            return ShadowFill::no_fill(symbol_hash, side, market.ts_ns, "INVALID_MARKET");
        }

        let fill = match self.cfg.mode {
            ExecMode::TakerOnly => self.simulate_taker(symbol_hash, side, qty, market),
            ExecMode::MakerOnly => self.simulate_maker(event_id, symbol_hash, side, qty, market),
            ExecMode::Hybrid => {
                let maker = self.simulate_maker(event_id, symbol_hash, side, qty, market);
                if maker.filled {
                    ShadowFill {
                        kind: FillKind::HybridMaker,
                        ..maker
                    }
                } else {
                    let taker = self.simulate_taker(symbol_hash, side, qty, market);
                    ShadowFill {
                        kind: FillKind::HybridTaker,
                        ..taker
                    }
                }
            }
        };

        if fill.filled {
            self.positions.insert(
                symbol_hash,
                ShadowPosition {
                    side,
                    qty: fill.qty,
                    entry_price: fill.price,
                    entry_ts_ns: market.ts_ns,
                    entry_was_maker: matches!(
                        fill.kind,
                        FillKind::Maker | FillKind::HybridMaker
                    ),
                },
            );
            debug!(
                symbol_hash,
                side = %side,
                kind = ?fill.kind,
                price = fill.price,
                "shadow entry"
            );
        }

        fill
    }

    /// Close the shadow position. Exits are always taker.
    pub fn close(&mut self, symbol_hash: u32, market: &MarketView) -> Option<ShadowExit> {
        let pos = self.positions.remove(&symbol_hash)?;
        if !market.valid() {
            // Keep the position; a broken snapshot is not an exit.
            self.positions.insert(symbol_hash, pos);
            return None;
        }

        let exit_side = pos.side.opposite();
        let exit_price = match exit_side {
            Side::Sell => market.best_bid,
            Side::Buy => market.best_ask,
        };

        let mid = market.mid();
        let slippage_bps = if mid > 0.0 {
            (exit_price - mid).abs() / mid * 10_000.0
        } else {
            0.0
        };

        let pnl = (exit_price - pos.entry_price) * pos.qty * pos.side.sign();
        let notional = pos.entry_price * pos.qty;
        let pnl_bps = if notional > 0.0 {
            pnl / notional * 10_000.0
        } else {
            0.0
        };

        self.trades += 1;
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        if pos.entry_was_maker {
            self.health
                .entry(symbol_hash)
                .or_default()
                .record_expectancy(pnl_bps, market.ts_ns);
        }

        let fill = ShadowFill {
            symbol_hash,
            side: exit_side,
            kind: FillKind::Taker,
            filled: true,
            qty: pos.qty,
            price: exit_price,
            slippage_bps,
            spread_bps: market.spread_bps(),
            ts_ns: market.ts_ns,
            reason: "EXIT",
        };

        Some(ShadowExit {
            fill,
            entry_price: pos.entry_price,
            pnl,
            pnl_bps,
            hold_ns: market.ts_ns.saturating_sub(pos.entry_ts_ns),
        })
    }

    // -------------------------------------------------------------------------
    // Simulation internals
    // -------------------------------------------------------------------------

    fn simulate_taker(
        &mut self,
        symbol_hash: u32,
        side: Side,
        qty: f64,
        market: &MarketView,
    ) -> ShadowFill {
        // Cross the spread: buy at ask, sell at bid.
        let price = match side {
            Side::Buy => market.best_ask,
            Side::Sell => market.best_bid,
        };
        let mid = market.mid();
        let slippage_bps = (price - mid).abs() / mid * 10_000.0;

        ShadowFill {
            symbol_hash,
            side,
            kind: FillKind::Taker,
            filled: true,
            qty,
            price,
            slippage_bps,
            spread_bps: market.spread_bps(),
            ts_ns: market.ts_ns,
            reason: "TAKER",
        }
    }

    fn simulate_maker(
        &mut self,
        event_id: u64,
        symbol_hash: u32,
        side: Side,
        qty: f64,
        market: &MarketView,
    ) -> ShadowFill {
        let now_ns = market.ts_ns;
        let health = self.health.entry(symbol_hash).or_default();

        if !health.maker_available(now_ns) {
            return ShadowFill::no_fill(symbol_hash, side, now_ns, "MAKER_DISABLED");
        }
        if market.spread_bps() < self.cfg.min_spread_for_maker_bps {
            return ShadowFill::no_fill(symbol_hash, side, now_ns, "SPREAD_TOO_TIGHT");
        }

        // Pessimistic queue estimate: 1.5x the visible same-side quantity.
        let same_side_qty = match side {
            Side::Buy => market.bid_qty,
            Side::Sell => market.ask_qty,
        };
        let queue_ahead = same_side_qty * 1.5;

        let fill_prob = if market.recent_taker_volume > 0.0 && queue_ahead > 0.0 {
            1.0 - (-market.recent_taker_volume / queue_ahead).exp()
        } else {
            0.0
        };

        if fill_prob < self.cfg.min_fill_prob {
            health.record_no_fill(now_ns);
            return ShadowFill::no_fill(symbol_hash, side, now_ns, "LOW_FILL_PROB");
        }

        // Deterministic draw: seeded by the triggering event id.
        let mut rng = StdRng::seed_from_u64(event_id);
        let draw: f64 = rng.gen();
        if draw >= fill_prob {
            health.record_no_fill(now_ns);
            return ShadowFill::no_fill(symbol_hash, side, now_ns, "QUEUE_NOT_REACHED");
        }

        health.record_fill(now_ns);

        // Maker fills at the limit price with zero slippage.
        let price = match side {
            Side::Buy => market.best_bid,
            Side::Sell => market.best_ask,
        };

        ShadowFill {
            symbol_hash,
            side,
            kind: FillKind::Maker,
            filled: true,
            qty,
            price,
            slippage_bps: 0.0,
            spread_bps: market.spread_bps(),
            ts_ns: now_ns,
            reason: "MAKER",
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn has_position(&self, symbol_hash: u32) -> bool {
        self.positions.contains_key(&symbol_hash)
    }

    pub fn maker_health(&self, symbol_hash: u32) -> Option<&MakerHealth> {
        self.health.get(&symbol_hash)
    }

    pub fn trades(&self) -> u64 {
        self.trades
    }

    pub fn win_rate(&self) -> f64 {
        if self.wins + self.losses == 0 {
            0.0
        } else {
            self.wins as f64 / (self.wins + self.losses) as f64
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }
}

impl Default for ShadowExecutor {
    fn default() -> Self {
        Self::new(ShadowConfig::default())
    }
}
