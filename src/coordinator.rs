// =============================================================================
// Coordinator — the single consumer of the cross-symbol intent queue
// =============================================================================
//
// Runs the risk authority over every trade intent, dispatches allowed
// entries to the order lifecycle manager (Live) and to the shadow executor
// (always — the shadow leg is what the divergence monitor compares against),
// applies fills to the position book, and closes the metrics feedback loop:
// slippage, spread capture, expectancy, attribution, governance.
//
// `handle_intent`, `apply_fill` and `check_time_stops` are synchronous so
// the live task and the replay driver execute the identical decision path.
// The returned `LaneNotice` values tell the driver which arbiter marks to
// deliver back to the lanes.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::attribution::{AttributionKey, AttributionTracker, TradeRecord};
use crate::causal::{CausalEvent, DecisionRecord, EventHeader, EventKind, Payload, Recorder};
use crate::clock::EngineClock;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::governance::GovernanceController;
use crate::lane::TradeIntent;
use crate::mode::ModeGuard;
use crate::orders::{FillReport, OrderManager, OrderRequest, OrderState, OrderUpdate};
use crate::physics::VenuePhysics;
use crate::playbook;
use crate::position::PositionBook;
use crate::risk::authority::{RiskAuthority, SizeDecision, SizeRequest};
use crate::risk::Regime;
use crate::shadow::{DivergenceMonitor, ShadowExecutor};
use crate::types::{NoTradeReason, OrderKind, RunMode, Side};

/// Default ack timeout before a Submitted order is cancelled.
pub const DEFAULT_ACK_TIMEOUT_NS: u64 = 2_000_000_000;

/// What the driver must relay back to a lane after coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneNotice {
    Executed(u32),
    Exited(u32),
}

struct OpenTradeMeta {
    symbol: String,
    side: Side,
    regime: Regime,
    utc_hour: u32,
    entry_ts_ns: u64,
    entry_notional: f64,
}

/// Per-symbol accumulator for the hour's trade expectancy, flushed into the
/// time-bucket guard when the hour rolls.
#[derive(Default, Clone, Copy)]
struct HourStats {
    hour: u32,
    sum_pnl_bps: f64,
    trades: u32,
}

pub struct Coordinator {
    mode: Arc<ModeGuard>,
    clock: Arc<EngineClock>,
    recorder: Arc<Recorder>,
    app_state: Arc<AppState>,
    governance: Arc<GovernanceController>,
    divergence: Arc<DivergenceMonitor>,
    venue_physics: Arc<VenuePhysics>,
    positions: Arc<PositionBook>,
    attribution: Arc<AttributionTracker>,

    authority: RiskAuthority,
    orders: OrderManager,
    shadow: ShadowExecutor,

    primary_venue: String,
    hostile_symbols: Vec<String>,
    base_order_qty: f64,
    base_capital: f64,
    risk_unit: f64,
    max_hold_ns: u64,

    open_trades: HashMap<u32, OpenTradeMeta>,
    hour_stats: HashMap<u32, HourStats>,

    /// Every decision this session, in order, for the replay contract.
    decision_log: Vec<DecisionRecord>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        mode: Arc<ModeGuard>,
        clock: Arc<EngineClock>,
        recorder: Arc<Recorder>,
        app_state: Arc<AppState>,
        governance: Arc<GovernanceController>,
        divergence: Arc<DivergenceMonitor>,
        venue_physics: Arc<VenuePhysics>,
        positions: Arc<PositionBook>,
        attribution: Arc<AttributionTracker>,
        authority: RiskAuthority,
        orders: OrderManager,
        shadow: ShadowExecutor,
        max_hold_ns: u64,
    ) -> Self {
        Self {
            mode,
            clock,
            recorder,
            app_state,
            governance,
            divergence,
            venue_physics,
            positions,
            attribution,
            authority,
            orders,
            shadow,
            primary_venue: config
                .venue_endpoints
                .first()
                .map(|v| v.name.clone())
                .unwrap_or_else(|| "primary".to_string()),
            hostile_symbols: config.hostile_symbols.clone(),
            base_order_qty: config.base_order_qty,
            base_capital: config.base_capital,
            risk_unit: config.risk_unit(),
            max_hold_ns,
            open_trades: HashMap::new(),
            hour_stats: HashMap::new(),
            decision_log: Vec::new(),
        }
    }

    pub fn decision_log(&self) -> &[DecisionRecord] {
        &self.decision_log
    }

    // =========================================================================
    // Intent handling
    // =========================================================================

    /// Run one intent through governance, physics, and the gate chain.
    /// Returns the lane notices the driver must deliver.
    pub fn handle_intent(&mut self, intent: &TradeIntent) -> EngineResult<Vec<LaneNotice>> {
        let now_ns = intent.ts_ns;
        let mut notices = Vec::new();

        // Pre-chain blocks that are not the authority's to decide.
        if self.governance.is_killed() {
            self.record_block(intent, NoTradeReason::GlobalKill);
            return Ok(notices);
        }
        if self.divergence.paused(intent.symbol_hash) {
            self.record_block(intent, NoTradeReason::SymbolPaused);
            return Ok(notices);
        }

        // Execution physics for the primary venue.
        let physics_snap = self.venue_physics.snapshot_for(&self.primary_venue, now_ns);
        let (caps, playbook) = playbook::resolve(
            &intent.symbol,
            physics_snap.class,
            physics_snap.spiking,
            &self.hostile_symbols,
        );

        let is_maker = caps.allow_maker
            && (playbook.prefer_maker || self.authority.maker_forced(intent.symbol_hash));

        let request = SizeRequest {
            symbol: intent.symbol.clone(),
            symbol_hash: intent.symbol_hash,
            requested_size: self.base_order_qty * playbook.size_multiplier,
            confidence: intent.confidence,
            is_maker,
            utc_hour: self.clock.utc_hour_for(now_ns),
        };

        let decision = self.authority.calculate_size(&request);
        self.record_decision(intent, &request, &decision);

        self.app_state.update_symbol(&intent.symbol, |snap| {
            snap.physics = caps.physics.to_string();
            snap.capabilities = Some(caps);
            snap.last_decision = Some(decision.clone());
            let reason = decision.reason.unwrap_or(NoTradeReason::WaitingForSignal);
            snap.no_trade_reason = reason.label().to_string();
            snap.no_trade_description = reason.description().to_string();
            snap.no_trade_severity = reason.severity();
        });
        self.app_state
            .set_portfolio(self.authority.portfolio().snapshot(), self.authority.ramp_level());

        if !decision.allowed {
            return Ok(notices);
        }

        // ── Dispatch ────────────────────────────────────────────────
        let regime = self.authority.regime(intent.symbol_hash);
        self.open_trades.insert(
            intent.symbol_hash,
            OpenTradeMeta {
                symbol: intent.symbol.clone(),
                side: intent.side,
                regime,
                utc_hour: request.utc_hour,
                entry_ts_ns: now_ns,
                entry_notional: decision.final_size * intent.market.mid(),
            },
        );
        self.authority.position_opened(&intent.symbol);

        // Shadow leg always runs: in Shadow mode it IS the execution, in
        // Live mode it is the divergence baseline. Seeded by the triggering
        // market event's id, which the causal log preserves, so a replay
        // draws the identical fill.
        let shadow_fill = self.shadow.execute(
            intent.parent_id,
            intent.symbol_hash,
            intent.side,
            decision.final_size,
            &intent.market,
        );
        if !shadow_fill.filled {
            info!(
                symbol = %intent.symbol,
                reason = shadow_fill.reason,
                "shadow leg did not fill"
            );
            if !self.mode.is_live() {
                // Shadow mode with no simulated fill: the trade never
                // happened. Release the slot.
                self.open_trades.remove(&intent.symbol_hash);
                self.authority.position_closed(&intent.symbol, 0.0);
                return Ok(notices);
            }
        }

        if self.mode.is_live() {
            self.mode.require_live_dispatch()?;
            let price = match intent.side {
                Side::Buy => intent.market.best_ask,
                Side::Sell => intent.market.best_bid,
            };
            let request = OrderRequest {
                client_id: Uuid::new_v4().to_string(),
                symbol: intent.symbol.clone(),
                symbol_hash: intent.symbol_hash,
                side: intent.side,
                qty: decision.final_size,
                price,
                kind: OrderKind::Limit,
                is_maker,
                mid_at_submit: intent.market.mid(),
                quoted_spread_bps: intent.spread_bps,
                parent_event_id: intent.event_id,
            };
            self.record_order_intent(intent, &request);
            self.orders.submit(request, now_ns)?;
        }

        notices.push(LaneNotice::Executed(intent.symbol_hash));
        Ok(notices)
    }

    // =========================================================================
    // Fills
    // =========================================================================

    /// Apply a live fill to the book and feed every metrics loop.
    pub fn apply_fill(&mut self, fill: &FillReport) -> EngineResult<Vec<LaneNotice>> {
        let mut notices = Vec::new();
        let now_ns = fill.ts_ns;

        // Ack latency feeds the physics detector.
        let ack_ms = now_ns.saturating_sub(fill.submit_ts_ns) as f64 / 1_000_000.0;
        self.venue_physics
            .record_ack(&self.primary_venue, ack_ms, now_ns);

        self.record_fill_event(fill);

        let effect = self.positions.on_fill(
            fill.symbol_hash,
            fill.side.is_buy(),
            fill.qty,
            fill.price,
            now_ns,
        )?;

        self.authority.record_slippage(
            fill.symbol_hash,
            fill.mid_at_submit,
            fill.price,
            fill.side.is_buy(),
        );
        if fill.is_maker {
            let quoted_spread = fill.mid_at_submit * fill.quoted_spread_bps / 10_000.0;
            self.authority.record_spread_capture(
                fill.symbol_hash,
                fill.mid_at_submit,
                fill.price,
                quoted_spread,
                fill.side.is_buy(),
            );
        }

        // A closing fill ends the trade: attribute it and feed the loops.
        if effect.closed_qty > 0.0 {
            if let Some(meta) = self.open_trades.remove(&fill.symbol_hash) {
                self.close_trade(&meta, fill, effect.realized_delta, now_ns)?;
                notices.push(LaneNotice::Exited(fill.symbol_hash));
            }
        }

        Ok(notices)
    }

    fn close_trade(
        &mut self,
        meta: &OpenTradeMeta,
        fill: &FillReport,
        realized: f64,
        now_ns: u64,
    ) -> EngineResult<()> {
        let pnl_bps = if meta.entry_notional.abs() > 0.0 {
            realized / meta.entry_notional.abs() * 10_000.0
        } else {
            0.0
        };
        let pnl_r = if self.risk_unit > 0.0 {
            realized / self.risk_unit
        } else {
            0.0
        };
        let hold_sec = now_ns.saturating_sub(meta.entry_ts_ns) as f64 * 1e-9;

        self.authority.record_trade_pnl(fill.symbol_hash, pnl_bps);
        self.authority.position_closed(&meta.symbol, pnl_r);
        self.governance.record_trade_pnl_r(pnl_r);
        if self.governance.is_killed() {
            self.emergency_flatten(now_ns);
        }

        // Divergence: the live leg. The shadow leg closes alongside.
        if self.mode.current() == RunMode::Live {
            self.divergence.record_live(fill.symbol_hash, pnl_bps);
        }
        if let Some(view) = self.app_state.market_view(fill.symbol_hash) {
            let mut view = view;
            view.ts_ns = now_ns;
            if let Some(exit) = self.shadow.close(fill.symbol_hash, &view) {
                self.divergence.record_shadow(fill.symbol_hash, exit.pnl_bps);
                self.record_divergence_event(fill.symbol_hash, exit.pnl_bps, pnl_bps, now_ns);
            }
        }

        // Hour-bucket accumulation.
        let stats = self
            .hour_stats
            .entry(fill.symbol_hash)
            .or_insert(HourStats {
                hour: meta.utc_hour,
                sum_pnl_bps: 0.0,
                trades: 0,
            });
        if stats.hour != meta.utc_hour && stats.trades > 0 {
            let session_expectancy = stats.sum_pnl_bps / stats.trades as f64;
            self.authority
                .update_bucket(fill.symbol_hash, stats.hour, session_expectancy);
            *stats = HourStats {
                hour: meta.utc_hour,
                sum_pnl_bps: 0.0,
                trades: 0,
            };
        }
        stats.sum_pnl_bps += pnl_bps;
        stats.trades += 1;

        // Attribution: exactly one key per closed trade.
        let key = AttributionKey::new(&meta.symbol, meta.regime, "CASCADE", meta.utc_hour);
        let slippage_cost = {
            let slip_bps = (fill.price - fill.mid_at_submit).abs() / fill.mid_at_submit.max(1e-12)
                * 10_000.0;
            meta.entry_notional.abs() * slip_bps / 10_000.0
        };
        self.attribution.record_trade(&TradeRecord {
            key,
            gross_pnl: realized,
            fees: 0.0,
            slippage: slippage_cost,
            hold_sec,
        });

        self.record_attribution_event(fill, realized, slippage_cost, hold_sec, now_ns);

        info!(
            symbol = %meta.symbol,
            side = %meta.side,
            pnl = realized,
            pnl_bps,
            pnl_r,
            hold_sec,
            "trade closed"
        );

        Ok(())
    }

    // =========================================================================
    // Time stops & flatten
    // =========================================================================

    /// Force exits for trades past the maximum hold. Runs on the rebalance
    /// cadence.
    pub fn check_time_stops(&mut self, now_ns: u64) -> EngineResult<Vec<LaneNotice>> {
        let expired: Vec<u32> = self
            .open_trades
            .iter()
            .filter(|(_, meta)| now_ns.saturating_sub(meta.entry_ts_ns) >= self.max_hold_ns)
            .map(|(hash, _)| *hash)
            .collect();

        let mut notices = Vec::new();
        for symbol_hash in expired {
            warn!(symbol_hash, "max hold elapsed, forcing exit");
            notices.extend(self.force_exit(symbol_hash, now_ns)?);
        }

        // Stale Submitted orders miss their ack window and get cancelled.
        self.orders.expire_stale(now_ns);
        Ok(notices)
    }

    /// Close a symbol's position at the current market.
    fn force_exit(&mut self, symbol_hash: u32, now_ns: u64) -> EngineResult<Vec<LaneNotice>> {
        let mut notices = Vec::new();
        let position = self.positions.get(symbol_hash);
        let flat = position.map_or(true, |p| p.is_flat());

        if flat {
            // Shadow-only trade: close the shadow leg directly.
            if let Some(view) = self.app_state.market_view(symbol_hash) {
                let mut view = view;
                view.ts_ns = now_ns;
                if let Some(exit) = self.shadow.close(symbol_hash, &view) {
                    self.divergence.record_shadow(symbol_hash, exit.pnl_bps);
                    if let Some(meta) = self.open_trades.remove(&symbol_hash) {
                        self.finish_shadow_trade(&meta, symbol_hash, exit.pnl_bps, now_ns);
                    }
                    notices.push(LaneNotice::Exited(symbol_hash));
                    return Ok(notices);
                }
            }
            // Nothing to close anywhere: drop the stale slot.
            if let Some(meta) = self.open_trades.remove(&symbol_hash) {
                self.authority.position_closed(&meta.symbol, 0.0);
                notices.push(LaneNotice::Exited(symbol_hash));
            }
            return Ok(notices);
        }

        let Some(position) = position else {
            return Ok(notices);
        };
        let Some(view) = self.app_state.market_view(symbol_hash) else {
            return Ok(notices);
        };
        let Some(meta) = self.open_trades.get(&symbol_hash) else {
            return Ok(notices);
        };

        let exit_side = if position.net_qty > 0.0 {
            Side::Sell
        } else {
            Side::Buy
        };
        let price = match exit_side {
            Side::Buy => view.best_ask,
            Side::Sell => view.best_bid,
        };

        let request = OrderRequest {
            client_id: Uuid::new_v4().to_string(),
            symbol: meta.symbol.clone(),
            symbol_hash,
            side: exit_side,
            qty: position.net_qty.abs(),
            price,
            kind: OrderKind::Market,
            is_maker: false,
            mid_at_submit: view.mid(),
            quoted_spread_bps: view.spread_bps(),
            parent_event_id: 0,
        };
        self.orders.submit(request, now_ns)?;
        Ok(notices)
    }

    /// Shadow-mode trade close: the shadow PnL is the trade PnL.
    fn finish_shadow_trade(&mut self, meta: &OpenTradeMeta, symbol_hash: u32, pnl_bps: f64, now_ns: u64) {
        let realized = meta.entry_notional.abs() * pnl_bps / 10_000.0;
        let pnl_r = if self.risk_unit > 0.0 {
            realized / self.risk_unit
        } else {
            0.0
        };
        self.authority.record_trade_pnl(symbol_hash, pnl_bps);
        self.authority.position_closed(&meta.symbol, pnl_r);
        self.governance.record_trade_pnl_r(pnl_r);

        let key = AttributionKey::new(&meta.symbol, meta.regime, "CASCADE", meta.utc_hour);
        self.attribution.record_trade(&TradeRecord {
            key,
            gross_pnl: realized,
            fees: 0.0,
            slippage: 0.0,
            hold_sec: now_ns.saturating_sub(meta.entry_ts_ns) as f64 * 1e-9,
        });
    }

    /// Global kill: cancel everything, close every position.
    pub fn emergency_flatten(&mut self, now_ns: u64) {
        error!("emergency flatten: cancelling all orders, closing all positions");
        self.orders.kill_all();
        self.authority.set_halted(true);

        let open: Vec<u32> = self.open_trades.keys().copied().collect();
        for symbol_hash in open {
            if let Err(e) = self.force_exit(symbol_hash, now_ns) {
                error!(symbol_hash, error = %e, "flatten exit failed");
            }
        }
    }

    // =========================================================================
    // Rebalance hooks
    // =========================================================================

    /// Periodic upkeep: regime feed-through, session roll, ramp end-of-day.
    pub fn rebalance(&mut self, regimes: &[(u32, Regime)], now_ns: u64) -> EngineResult<Vec<LaneNotice>> {
        for (symbol_hash, regime) in regimes {
            self.authority.set_regime(*symbol_hash, *regime);
        }

        let today = self.clock.utc_date_for(now_ns);
        if let Some(close) = self.governance.roll_session(&today) {
            let equity = self.base_capital + self.positions.total_realized_pnl();
            self.authority.end_of_day(close.daily_pnl_r, equity);
        }

        self.app_state
            .set_portfolio(self.authority.portfolio().snapshot(), self.authority.ramp_level());

        self.check_time_stops(now_ns)
    }

    /// Clean shutdown: cancel everything live and flush the log.
    pub fn shutdown(&mut self) {
        self.orders.kill_all();
        if let Err(e) = self.recorder.flush() {
            error!(error = %e, "recorder flush failed during shutdown");
        }
    }

    /// Drain synthesized mock-venue updates (Live mode with the mock).
    pub fn drain_venue_updates(&mut self, updates: Vec<OrderUpdate>, now_ns: u64) -> EngineResult<Vec<LaneNotice>> {
        let mut notices = Vec::new();
        for update in updates {
            if update.state == OrderState::Rejected {
                warn!(client_id = %update.client_id, "order rejected by venue");
            }
            if let Some(fill) = self.orders.on_venue_update(&update, now_ns)? {
                notices.extend(self.apply_fill(&fill)?);
            }
        }
        Ok(notices)
    }

    // =========================================================================
    // Causal records
    // =========================================================================

    fn record_decision(
        &mut self,
        intent: &TradeIntent,
        request: &SizeRequest,
        decision: &SizeDecision,
    ) {
        self.decision_log.push(DecisionRecord {
            allow: decision.allowed,
            final_size: decision.final_size,
        });

        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: intent.event_id,
                kind: EventKind::Risk,
                ts_ns: intent.ts_ns,
                symbol_hash: intent.symbol_hash,
            },
            payload: Payload::Risk {
                allow: decision.allowed,
                final_size: decision.final_size,
                requested_size: request.requested_size,
                mults: [
                    decision.regime_mult,
                    decision.expectancy_mult,
                    decision.slope_mult,
                    decision.bucket_mult,
                    decision.slippage_mult,
                    decision.capture_mult,
                    decision.portfolio_mult,
                    decision.capital_mult,
                ],
            },
        };
        let _ = self.recorder.record(&event);
    }

    fn record_block(&mut self, intent: &TradeIntent, reason: NoTradeReason) {
        self.decision_log.push(DecisionRecord {
            allow: false,
            final_size: 0.0,
        });
        self.app_state.update_symbol(&intent.symbol, |snap| {
            snap.no_trade_reason = reason.label().to_string();
            snap.no_trade_description = reason.description().to_string();
            snap.no_trade_severity = reason.severity();
        });

        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: intent.event_id,
                kind: EventKind::Risk,
                ts_ns: intent.ts_ns,
                symbol_hash: intent.symbol_hash,
            },
            payload: Payload::Risk {
                allow: false,
                final_size: 0.0,
                requested_size: self.base_order_qty,
                mults: [1.0; 8],
            },
        };
        let _ = self.recorder.record(&event);
    }

    fn record_order_intent(&self, intent: &TradeIntent, request: &OrderRequest) {
        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: intent.event_id,
                kind: EventKind::OrderIntent,
                ts_ns: intent.ts_ns,
                symbol_hash: intent.symbol_hash,
            },
            payload: Payload::OrderIntent {
                is_buy: request.side.is_buy(),
                price: request.price,
                qty: request.qty,
                utc_hour: self.clock.utc_hour_for(intent.ts_ns) as u8,
            },
        };
        let _ = self.recorder.record(&event);
    }

    fn record_fill_event(&self, fill: &FillReport) {
        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: fill.parent_event_id,
                kind: EventKind::Fill,
                ts_ns: fill.ts_ns,
                symbol_hash: fill.symbol_hash,
            },
            payload: Payload::Fill {
                price: fill.price,
                qty: fill.qty,
                is_buy: fill.side.is_buy(),
            },
        };
        let _ = self.recorder.record(&event);
    }

    fn record_attribution_event(
        &self,
        fill: &FillReport,
        pnl: f64,
        slippage: f64,
        hold_sec: f64,
        now_ns: u64,
    ) {
        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: fill.parent_event_id,
                kind: EventKind::Attribution,
                ts_ns: now_ns,
                symbol_hash: fill.symbol_hash,
            },
            payload: Payload::Attribution {
                pnl,
                fee: 0.0,
                slippage,
                hold_sec,
            },
        };
        let _ = self.recorder.record(&event);
    }

    fn record_divergence_event(&self, symbol_hash: u32, shadow_bps: f64, live_bps: f64, now_ns: u64) {
        let event = CausalEvent {
            header: EventHeader {
                event_id: self.clock.next_event_id(),
                parent_id: 0,
                kind: EventKind::Divergence,
                ts_ns: now_ns,
                symbol_hash,
            },
            payload: Payload::Divergence {
                shadow_bps,
                live_bps,
                paused: self.divergence.paused(symbol_hash),
            },
        };
        let _ = self.recorder.record(&event);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::GovernanceConfig;
    use crate::market::{fnv1a32, IntakeStats};
    use crate::orders::MockVenue;
    use crate::risk::portfolio::PortfolioConfig;
    use crate::risk::ramp::RampConfig;
    use crate::shadow::divergence::DivergenceConfig;
    use crate::shadow::executor::{ExecMode, ShadowConfig};
    use crate::shadow::MarketView;

    const SEC: u64 = 1_000_000_000;

    struct Fixture {
        coordinator: Coordinator,
        venue: Arc<MockVenue>,
        hash: u32,
    }

    fn fixture(mode: RunMode) -> Fixture {
        let symbol = "BTCUSDT".to_string();
        let hash = fnv1a32(&symbol);

        let mut config = EngineConfig::default();
        config.mode = Some(mode);
        config.symbols = vec![symbol.clone()];
        config.leader_symbol = symbol.clone();

        let mode_guard = Arc::new(ModeGuard::new(mode));
        mode_guard.lock();
        let clock = Arc::new(EngineClock::wall());
        let positions = Arc::new(PositionBook::new());
        let governance = Arc::new(GovernanceController::new(
            GovernanceConfig::default(),
            "2025-06-01".to_string(),
        ));
        let divergence = Arc::new(DivergenceMonitor::new(DivergenceConfig::default()));
        let venue_physics = Arc::new(VenuePhysics::new());
        let intake = Arc::new(IntakeStats::default());
        let app_state = Arc::new(AppState::new(
            mode,
            &[(symbol.clone(), hash)],
            positions.clone(),
            governance.clone(),
            divergence.clone(),
            venue_physics.clone(),
            intake,
        ));

        let dir = std::env::temp_dir().join("borealis_coordinator_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join(format!("coord_{}_{:?}", std::process::id(), mode));
        let recorder = Arc::new(Recorder::create(&base.to_string_lossy()).unwrap());

        let mut authority = RiskAuthority::new(
            PortfolioConfig::default(),
            RampConfig::default(),
            config.base_capital,
            config.risk_unit(),
        );
        authority.register_symbol(hash, &symbol);

        let venue = Arc::new(MockVenue::new());
        let orders = OrderManager::new(venue.clone(), DEFAULT_ACK_TIMEOUT_NS);
        let shadow = ShadowExecutor::new(ShadowConfig {
            mode: ExecMode::TakerOnly,
            ..ShadowConfig::default()
        });

        let attribution = Arc::new(AttributionTracker::new(
            dir.join(format!("attr_{}_{:?}.csv", std::process::id(), mode)),
        ));

        let coordinator = Coordinator::new(
            &config,
            mode_guard,
            clock,
            recorder,
            app_state.clone(),
            governance,
            divergence,
            venue_physics,
            positions,
            attribution,
            authority,
            orders,
            shadow,
            30 * SEC,
        );

        // Seed a market view for exits.
        app_state.set_market_view(
            hash,
            MarketView {
                best_bid: 99.99,
                best_ask: 100.01,
                bid_qty: 5.0,
                ask_qty: 5.0,
                recent_taker_volume: 50.0,
                ts_ns: SEC,
            },
        );

        Fixture {
            coordinator,
            venue,
            hash,
        }
    }

    fn intent(hash: u32, ts_ns: u64) -> TradeIntent {
        TradeIntent {
            event_id: 100,
            parent_id: 99,
            symbol: "BTCUSDT".to_string(),
            symbol_hash: hash,
            side: Side::Buy,
            confidence: 0.9,
            confirmation_count: 3,
            spread_bps: 2.0,
            market: MarketView {
                best_bid: 99.99,
                best_ask: 100.01,
                bid_qty: 5.0,
                ask_qty: 5.0,
                recent_taker_volume: 50.0,
                ts_ns,
            },
            ts_ns,
        }
    }

    #[test]
    fn live_intent_dispatches_and_fills() {
        let mut f = fixture(RunMode::Live);
        let notices = f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        assert_eq!(notices, vec![LaneNotice::Executed(f.hash)]);

        // Mock venue acked + filled; drain the updates into the book.
        let updates = f.venue.drain_updates();
        assert!(!updates.is_empty());
        f.coordinator.drain_venue_updates(updates, 2 * SEC).unwrap();

        let pos = f.coordinator.positions.get(f.hash).unwrap();
        assert!(pos.net_qty > 0.0);
        assert_eq!(f.coordinator.decision_log().len(), 1);
        assert!(f.coordinator.decision_log()[0].allow);
    }

    #[test]
    fn shadow_mode_never_touches_the_venue() {
        let mut f = fixture(RunMode::Shadow);
        let notices = f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        assert_eq!(notices, vec![LaneNotice::Executed(f.hash)]);
        // No order reached the (mock) venue.
        assert!(f.venue.drain_updates().is_empty());
        // But the shadow leg holds a position.
        assert!(f.coordinator.shadow.has_position(f.hash));
    }

    #[test]
    fn kill_blocks_before_the_chain() {
        let mut f = fixture(RunMode::Live);
        f.coordinator.governance.kill("test");
        let notices = f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        assert!(notices.is_empty());
        assert!(f.venue.drain_updates().is_empty());
        let log = f.coordinator.decision_log();
        assert_eq!(log.len(), 1);
        assert!(!log[0].allow);
    }

    #[test]
    fn divergence_pause_blocks_the_symbol() {
        let mut f = fixture(RunMode::Live);
        // Force a divergence pause.
        for _ in 0..25 {
            f.coordinator.divergence.record_shadow(f.hash, 10.0);
            f.coordinator.divergence.record_live(f.hash, -10.0);
        }
        assert!(f.coordinator.divergence.paused(f.hash));

        let notices = f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        assert!(notices.is_empty());
        assert!(f.venue.drain_updates().is_empty());
    }

    #[test]
    fn time_stop_exits_a_shadow_trade() {
        let mut f = fixture(RunMode::Shadow);
        f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        assert!(f.coordinator.shadow.has_position(f.hash));

        // Before max hold: nothing happens.
        let notices = f.coordinator.check_time_stops(10 * SEC).unwrap();
        assert!(notices.is_empty());

        // Past the 30s max hold the shadow trade is forced out.
        let notices = f.coordinator.check_time_stops(40 * SEC).unwrap();
        assert_eq!(notices, vec![LaneNotice::Exited(f.hash)]);
        assert!(!f.coordinator.shadow.has_position(f.hash));
    }

    #[test]
    fn live_close_feeds_divergence_and_attribution() {
        let mut f = fixture(RunMode::Live);
        f.coordinator.handle_intent(&intent(f.hash, SEC)).unwrap();
        let updates = f.venue.drain_updates();
        f.coordinator.drain_venue_updates(updates, 2 * SEC).unwrap();

        // Exit: an opposite fill closes the position.
        let exit = FillReport {
            client_id: "exit".to_string(),
            symbol: "BTCUSDT".to_string(),
            symbol_hash: f.hash,
            side: Side::Sell,
            qty: f.coordinator.positions.get(f.hash).unwrap().net_qty,
            price: 100.51,
            is_maker: false,
            mid_at_submit: 100.50,
            quoted_spread_bps: 2.0,
            submit_ts_ns: 9 * SEC,
            ts_ns: 10 * SEC,
            parent_event_id: 100,
        };
        let notices = f.coordinator.apply_fill(&exit).unwrap();
        assert_eq!(notices, vec![LaneNotice::Exited(f.hash)]);

        let pos = f.coordinator.positions.get(f.hash).unwrap();
        assert!(pos.is_flat());
        assert!(pos.realized_pnl > 0.0);

        // The divergence monitor saw the live leg.
        let snap = f.coordinator.divergence.snapshot(f.hash);
        assert_eq!(snap.live_trades, 1);
    }
}
