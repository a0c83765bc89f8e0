// =============================================================================
// Symbol lane — the single writer for everything one symbol owns
// =============================================================================
//
// One lane per symbol. The lane owns the four signal engines, the regime
// classifier, the cascade arbiter (leader only), and the symbol's slice of
// the market view. All of it is `&mut self` with no locks: exactly one task
// drives a lane, in arrival order, which is what keeps per-symbol EWMA
// updates deterministic for replay.
//
// `on_event` is a plain synchronous function so the live driver (an async
// task popping a bounded queue) and the replay driver (a loop over the log)
// run the identical code path.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::app_state::AppState;
use crate::cascade::{CascadeArbiter, CascadeConfig, CascadeState};
use crate::causal::{CausalEvent, EventHeader, EventKind, Payload, Recorder};
use crate::clock::EngineClock;
use crate::market::{verify_route, IntakeStats, MarketEvent};
use crate::position::PositionBook;
use crate::risk::regime::{RegimeClassifier, RegimeConfig};
use crate::shadow::MarketView;
use crate::signals::{
    DepthEngine, ImpulseEngine, LiquidationEngine, OfiEngine, SignalBridge,
};
use crate::types::Side;

/// Messages a lane accepts from its queue. Market data comes from intake;
/// the marks come back from the coordinator.
#[derive(Debug)]
pub enum LaneMsg {
    Market(MarketEvent),
    MarkExecuted,
    MarkExit,
    SetJitter(f64),
}

/// A cascade fire, handed to the coordinator for the risk authority.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub event_id: u64,
    /// The market event that triggered the cascade.
    pub parent_id: u64,
    pub symbol: String,
    pub symbol_hash: u32,
    pub side: Side,
    pub confidence: f64,
    pub confirmation_count: u32,
    pub spread_bps: f64,
    pub market: MarketView,
    pub ts_ns: u64,
}

/// Rolling taker-volume window feeding the shadow maker queue model.
const TAKER_VOLUME_WINDOW_NS: u64 = 1_000_000_000;

pub struct SymbolLane {
    symbol: String,
    symbol_hash: u32,

    ofi: OfiEngine,
    depth: DepthEngine,
    liq: LiquidationEngine,
    impulse: ImpulseEngine,
    regime: RegimeClassifier,
    cascade: Option<CascadeArbiter>,

    bridge: Arc<SignalBridge>,
    positions: Arc<PositionBook>,
    clock: Arc<EngineClock>,
    recorder: Arc<Recorder>,
    app_state: Arc<AppState>,
    intake_stats: Arc<IntakeStats>,

    // Market view cache.
    best_bid: f64,
    best_ask: f64,
    bid_qty: f64,
    ask_qty: f64,
    taker_window: VecDeque<(u64, f64)>,
    taker_volume: f64,
}

impl SymbolLane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        symbol_hash: u32,
        is_leader: bool,
        cascade_cfg: CascadeConfig,
        bridge: Arc<SignalBridge>,
        positions: Arc<PositionBook>,
        clock: Arc<EngineClock>,
        recorder: Arc<Recorder>,
        app_state: Arc<AppState>,
        intake_stats: Arc<IntakeStats>,
    ) -> Self {
        bridge.register(symbol_hash);
        Self {
            symbol: symbol.to_string(),
            symbol_hash,
            ofi: OfiEngine::default(),
            depth: DepthEngine::default(),
            liq: LiquidationEngine::default(),
            impulse: ImpulseEngine::default(),
            regime: RegimeClassifier::new(RegimeConfig::default()),
            cascade: is_leader.then(|| CascadeArbiter::new(symbol_hash, cascade_cfg)),
            bridge,
            positions,
            clock,
            recorder,
            app_state,
            intake_stats,
            best_bid: 0.0,
            best_ask: 0.0,
            bid_qty: 0.0,
            ask_qty: 0.0,
            taker_window: VecDeque::new(),
            taker_volume: 0.0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn symbol_hash(&self) -> u32 {
        self.symbol_hash
    }

    pub fn handle(&mut self, msg: &LaneMsg) -> Option<TradeIntent> {
        match msg {
            LaneMsg::Market(event) => self.on_event(event),
            LaneMsg::MarkExecuted => {
                if let Some(cascade) = &mut self.cascade {
                    cascade.mark_executed();
                }
                None
            }
            LaneMsg::MarkExit => {
                let now = self.clock.now_ns();
                if let Some(cascade) = &mut self.cascade {
                    cascade.mark_exit(now);
                }
                None
            }
            LaneMsg::SetJitter(jitter_ms) => {
                self.regime.set_jitter_ms(*jitter_ms);
                None
            }
        }
    }

    /// Process one market event. Returns a trade intent when the cascade
    /// fires.
    pub fn on_event(&mut self, event: &MarketEvent) -> Option<TradeIntent> {
        if !verify_route(event, self.symbol_hash, &self.intake_stats) {
            return None;
        }

        self.record_market_event(event);

        match event {
            MarketEvent::Tick(tick) => {
                self.best_bid = tick.bid;
                self.best_ask = tick.ask;
                self.bid_qty = tick.bid_size;
                self.ask_qty = tick.ask_size;

                let mid = tick.mid();
                self.impulse.ingest(mid, tick.ts_ns);
                self.regime
                    .on_tick(tick.bid, tick.ask, tick.spread_bps(), tick.ts_ns);
                self.positions.mark_to_market(self.symbol_hash, mid);
                self.prune_taker_window(tick.ts_ns);

                self.app_state
                    .set_market_view(self.symbol_hash, self.market_view(tick.ts_ns));

                let intent = self.evaluate_cascade(tick.ts_ns, tick.event_id, tick.spread_bps());
                self.publish_snapshot(tick.ts_ns);
                intent
            }
            MarketEvent::Trade(trade) => {
                self.ofi.ingest(trade.qty, trade.is_buy, trade.ts_ns);
                self.taker_window.push_back((trade.ts_ns, trade.qty));
                self.taker_volume += trade.qty;
                self.prune_taker_window(trade.ts_ns);
                None
            }
            MarketEvent::Depth(depth) => {
                self.depth
                    .ingest(depth.bid_depth, depth.ask_depth, depth.ts_ns);
                None
            }
            MarketEvent::Liquidation(liq) => {
                self.liq.ingest(liq.notional, liq.is_long, liq.ts_ns);
                None
            }
        }
    }

    fn evaluate_cascade(
        &mut self,
        now_ns: u64,
        parent_id: u64,
        spread_bps: f64,
    ) -> Option<TradeIntent> {
        self.cascade.as_ref()?;

        self.liq.decay(now_ns);
        let ofi_sig = self.ofi.evaluate(now_ns);
        let depth_sig = self.depth.evaluate(now_ns);
        let liq_sig = self.liq.evaluate(now_ns);
        let impulse_sig = self.impulse.evaluate(now_ns);

        let bridge = Arc::clone(&self.bridge);
        let result = self.cascade.as_mut()?.evaluate(
            now_ns,
            spread_bps,
            &ofi_sig,
            &depth_sig,
            &liq_sig,
            &impulse_sig,
            &bridge,
        );

        if !result.fired {
            return None;
        }

        let side = result.side?;
        let event_id = self.clock.next_event_id();

        // The cascade fire is itself a causal event.
        let confirm_mask = u8::from(result.ofi_confirmed)
            | u8::from(result.depth_confirmed) << 1
            | u8::from(result.liq_confirmed) << 2
            | u8::from(result.impulse_confirmed) << 3;
        self.record(CausalEvent {
            header: EventHeader {
                event_id,
                parent_id,
                kind: EventKind::Cascade,
                ts_ns: now_ns,
                symbol_hash: self.symbol_hash,
            },
            payload: Payload::Cascade {
                side: match side {
                    Side::Buy => 1,
                    Side::Sell => 2,
                },
                fired: true,
                confirmation_count: result.confirmation_count as u8,
                confirm_mask,
            },
        });

        let confidence = [
            ofi_sig.fired.then_some(ofi_sig.confidence),
            depth_sig.fired.then_some(depth_sig.confidence),
            liq_sig.fired.then_some(liq_sig.confidence),
            impulse_sig.fired.then_some(impulse_sig.confidence),
        ]
        .into_iter()
        .flatten()
        .fold(0.0f64, f64::max);

        debug!(
            symbol = %self.symbol,
            side = %side,
            confirmations = result.confirmation_count,
            "lane emitting trade intent"
        );

        Some(TradeIntent {
            event_id,
            parent_id,
            symbol: self.symbol.clone(),
            symbol_hash: self.symbol_hash,
            side,
            confidence,
            confirmation_count: result.confirmation_count,
            spread_bps,
            market: self.market_view(now_ns),
            ts_ns: now_ns,
        })
    }

    pub fn market_view(&self, ts_ns: u64) -> MarketView {
        MarketView {
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            bid_qty: self.bid_qty,
            ask_qty: self.ask_qty,
            recent_taker_volume: self.taker_volume,
            ts_ns,
        }
    }

    fn prune_taker_window(&mut self, now_ns: u64) {
        let cutoff = now_ns.saturating_sub(TAKER_VOLUME_WINDOW_NS);
        while let Some((ts, qty)) = self.taker_window.front().copied() {
            if ts >= cutoff {
                break;
            }
            self.taker_window.pop_front();
            self.taker_volume -= qty;
        }
        if self.taker_window.is_empty() {
            self.taker_volume = 0.0;
        }
    }

    fn record_market_event(&self, event: &MarketEvent) {
        let (kind, payload) = match event {
            MarketEvent::Tick(t) => (
                EventKind::Tick,
                Payload::Tick {
                    bid: t.bid,
                    ask: t.ask,
                    bid_size: t.bid_size,
                    ask_size: t.ask_size,
                },
            ),
            MarketEvent::Trade(t) => (
                EventKind::Trade,
                Payload::Trade {
                    price: t.price,
                    qty: t.qty,
                    is_buy: t.is_buy,
                },
            ),
            MarketEvent::Depth(d) => (
                EventKind::Depth,
                Payload::Depth {
                    bid_depth: d.bid_depth,
                    ask_depth: d.ask_depth,
                },
            ),
            MarketEvent::Liquidation(l) => (
                EventKind::Liquidation,
                Payload::Liquidation {
                    price: l.price,
                    qty: l.qty,
                    notional: l.notional,
                    is_long: l.is_long,
                },
            ),
        };

        self.record(CausalEvent {
            header: EventHeader {
                event_id: event.event_id(),
                parent_id: 0,
                kind,
                ts_ns: event.ts_ns(),
                symbol_hash: event.symbol_hash(),
            },
            payload,
        });
    }

    fn record(&self, event: CausalEvent) {
        // Back-pressure policy: market events are essential records; a
        // recorder failure here is surfaced by the coordinator's next flush,
        // not by stalling the lane.
        let _ = self.recorder.record(&event);
    }

    fn publish_snapshot(&mut self, now_ns: u64) {
        let ofi_sig = self.ofi.evaluate(now_ns);
        let depth_sig = self.depth.evaluate(now_ns);
        let liq_sig = self.liq.evaluate(now_ns);
        let impulse_sig = self.impulse.evaluate(now_ns);
        let regime = self.regime.classify(now_ns);

        let (arbiter_state, in_cooldown) = match &self.cascade {
            Some(c) => (c.state().to_string(), c.state() == CascadeState::Cooldown),
            None => (CascadeState::Idle.to_string(), false),
        };

        let best_bid = self.best_bid;
        let best_ask = self.best_ask;
        let spread_bps = if best_bid > 0.0 && best_ask > 0.0 {
            (best_ask - best_bid) / ((best_ask + best_bid) / 2.0) * 10_000.0
        } else {
            0.0
        };
        let position = self.positions.get(self.symbol_hash);
        let divergence = self.app_state.divergence.snapshot(self.symbol_hash);
        self.app_state.set_regime(self.symbol_hash, regime);

        self.app_state.update_symbol(&self.symbol, |snap| {
            snap.bid = best_bid;
            snap.ask = best_ask;
            snap.spread_bps = spread_bps;
            snap.last_price = (best_bid + best_ask) / 2.0;
            snap.ofi_zscore = ofi_sig.zscore;
            snap.ofi_accel = ofi_sig.accel;
            snap.depth_ratio = depth_sig.depth_ratio;
            snap.liq_intensity = liq_sig.intensity;
            snap.displacement_bps = impulse_sig.displacement_bps;
            snap.ofi_fired = ofi_sig.fired;
            snap.depth_fired = depth_sig.fired;
            snap.liq_fired = liq_sig.fired;
            snap.impulse_fired = impulse_sig.fired;
            snap.arbiter_state = arbiter_state;
            snap.in_cooldown = in_cooldown;
            snap.regime = regime.to_string();
            snap.position = position;
            snap.divergence = divergence;
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::{GovernanceConfig, GovernanceController};
    use crate::market::{fnv1a32, Liquidation, Tick, Trade};
    use crate::physics::VenuePhysics;
    use crate::shadow::divergence::{DivergenceConfig, DivergenceMonitor};
    use crate::types::RunMode;

    const MS: u64 = 1_000_000;
    const SEC: u64 = 1_000_000_000;

    struct Fixture {
        lane: SymbolLane,
        clock: Arc<EngineClock>,
    }

    fn fixture(symbol: &str) -> Fixture {
        let hash = fnv1a32(symbol);
        let clock = Arc::new(EngineClock::wall());
        let positions = Arc::new(PositionBook::new());
        let intake = Arc::new(IntakeStats::default());
        let app_state = Arc::new(AppState::new(
            RunMode::Shadow,
            &[(symbol.to_string(), hash)],
            positions.clone(),
            Arc::new(GovernanceController::new(
                GovernanceConfig::default(),
                "2025-06-01".to_string(),
            )),
            Arc::new(DivergenceMonitor::new(DivergenceConfig::default())),
            Arc::new(VenuePhysics::new()),
            intake.clone(),
        ));
        let base = std::env::temp_dir()
            .join("borealis_lane_tests")
            .join(format!("lane_{}_{}", symbol, std::process::id()));
        std::fs::create_dir_all(base.parent().unwrap()).unwrap();
        let recorder = Arc::new(Recorder::create(&base.to_string_lossy()).unwrap());

        let lane = SymbolLane::new(
            symbol,
            hash,
            true,
            CascadeConfig::default(),
            Arc::new(SignalBridge::new()),
            positions,
            clock.clone(),
            recorder,
            app_state,
            intake,
        );
        Fixture { lane, clock }
    }

    fn tick(f: &Fixture, bid: f64, ask: f64, ts_ns: u64) -> MarketEvent {
        MarketEvent::Tick(Tick {
            event_id: f.clock.next_event_id(),
            symbol: f.lane.symbol().to_string(),
            symbol_hash: f.lane.symbol_hash(),
            bid,
            ask,
            bid_size: 5.0,
            ask_size: 5.0,
            ts_ns,
        })
    }

    fn trade(f: &Fixture, qty: f64, is_buy: bool, ts_ns: u64) -> MarketEvent {
        MarketEvent::Trade(Trade {
            event_id: f.clock.next_event_id(),
            symbol: f.lane.symbol().to_string(),
            symbol_hash: f.lane.symbol_hash(),
            price: 100.0,
            qty,
            is_buy,
            ts_ns,
        })
    }

    fn liquidation(f: &Fixture, notional: f64, is_long: bool, ts_ns: u64) -> MarketEvent {
        MarketEvent::Liquidation(Liquidation {
            event_id: f.clock.next_event_id(),
            symbol: f.lane.symbol().to_string(),
            symbol_hash: f.lane.symbol_hash(),
            price: 100.0,
            qty: notional / 100.0,
            notional,
            is_long,
            ts_ns,
        })
    }

    fn depth(f: &Fixture, bid_depth: f64, ask_depth: f64, ts_ns: u64) -> MarketEvent {
        MarketEvent::Depth(crate::market::DepthUpdate {
            event_id: f.clock.next_event_id(),
            symbol: f.lane.symbol().to_string(),
            symbol_hash: f.lane.symbol_hash(),
            bid_depth,
            ask_depth,
            ts_ns,
        })
    }

    #[test]
    fn balanced_flow_produces_no_intent() {
        // End-to-end scenario: alternating equal-size buys and sells never
        // fire OFI, the arbiter stays idle, and the lane emits nothing.
        let mut f = fixture("BTCUSDT");
        for i in 0..200u64 {
            let ev = trade(&f, 1.0, i % 2 == 0, i * 10 * MS);
            assert!(f.lane.on_event(&ev).is_none());
        }
        for i in 0..50u64 {
            let ev = tick(&f, 99.995, 100.005, 2 * SEC + i * 10 * MS);
            assert!(f.lane.on_event(&ev).is_none());
        }
    }

    #[test]
    fn liquidation_cascade_emits_a_sell_intent() {
        let mut f = fixture("BTCUSDT");

        // Warm the engines: healthy depth baseline + balanced tape.
        for i in 0..150u64 {
            f.lane.on_event(&depth(&f, 100.0, 100.0, i * 10 * MS));
            f.lane.on_event(&trade(&f, 1.0, i % 2 == 0, i * 10 * MS));
            f.lane.on_event(&tick(&f, 99.995, 100.005, i * 10 * MS));
        }

        let t0 = 10 * SEC;
        // Long-liquidation flush, then a sustained depth collapse.
        f.lane.on_event(&liquidation(&f, 5_000_000.0, true, t0));
        for i in 0..7u64 {
            f.lane.on_event(&depth(&f, 30.0, 100.0, t0 + i * 100 * MS));
        }

        // Heavy one-sided sell flow while the vacuum holds; evaluate on each
        // tick so the arbiter sees the OFI acceleration as it builds.
        let mut intent = None;
        for i in 0..40u64 {
            let ts = t0 + 600 * MS + i * 10 * MS;
            f.lane.on_event(&trade(&f, 6.0, false, ts));
            f.lane.on_event(&depth(&f, 30.0, 100.0, ts));
            if let Some(found) = f.lane.on_event(&tick(&f, 99.995, 100.005, ts)) {
                intent = Some(found);
                break;
            }
        }

        let intent = intent.expect("cascade should fire");
        assert_eq!(intent.side, Side::Sell);
        assert!(intent.confirmation_count >= 2);
        assert!(intent.confidence > 0.0);
    }

    #[test]
    fn wide_spread_suppresses_the_fire() {
        let mut f = fixture("BTCUSDT");
        for i in 0..150u64 {
            f.lane.on_event(&depth(&f, 100.0, 100.0, i * 10 * MS));
            f.lane.on_event(&trade(&f, 1.0, i % 2 == 0, i * 10 * MS));
        }

        let t0 = 10 * SEC;
        f.lane.on_event(&liquidation(&f, 5_000_000.0, true, t0));
        for i in 0..7u64 {
            f.lane.on_event(&depth(&f, 30.0, 100.0, t0 + i * 100 * MS));
        }

        // Fusion conditions identical to the firing scenario, but the book
        // is quoted 10 bps wide against the 5 bps cap: no intent, ever.
        for i in 0..40u64 {
            let ts = t0 + 600 * MS + i * 10 * MS;
            f.lane.on_event(&trade(&f, 6.0, false, ts));
            f.lane.on_event(&depth(&f, 30.0, 100.0, ts));
            assert!(f.lane.on_event(&tick(&f, 99.95, 100.05, ts)).is_none());
        }
    }

    #[test]
    fn misrouted_event_is_dropped_before_engines() {
        let mut f = fixture("BTCUSDT");
        let mut ev = trade(&f, 500.0, true, SEC);
        if let MarketEvent::Trade(t) = &mut ev {
            t.symbol_hash = 0x1234_5678;
        }
        assert!(f.lane.on_event(&ev).is_none());
        // The OFI engine never saw the trade.
        assert_eq!(f.lane.ofi.sample_count(), 0);
    }

    #[test]
    fn marks_drive_the_arbiter_lifecycle() {
        let mut f = fixture("BTCUSDT");
        f.lane.handle(&LaneMsg::MarkExecuted);
        assert_eq!(
            f.lane.cascade.as_ref().unwrap().state(),
            CascadeState::InTrade
        );
        f.lane.handle(&LaneMsg::MarkExit);
        assert_eq!(
            f.lane.cascade.as_ref().unwrap().state(),
            CascadeState::Cooldown
        );
    }
}
