// =============================================================================
// Borealis Decision Core — main entry point
// =============================================================================
//
// Startup latches the run mode before anything else can trade:
//
//   Live    orders dispatch to the venue, shadow runs in parallel
//   Shadow  live market data, simulated fills only
//   Replay  the causal log is the only input; the wall clock is never read
//
// Exit codes: 0 clean shutdown, 1 config error, 2 mode violation at startup,
// 3 replay divergence over threshold, 4 fatal venue or recorder failure.
// =============================================================================

mod api;
mod app_state;
mod attribution;
mod cascade;
mod causal;
mod clock;
mod config;
mod coordinator;
mod error;
mod governance;
mod lane;
mod market;
mod mode;
mod orders;
mod physics;
mod playbook;
mod position;
mod risk;
mod shadow;
mod signals;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::attribution::AttributionTracker;
use crate::cascade::CascadeConfig;
use crate::causal::{
    check_divergences, CausalEvent, DecisionRecord, EventHeader, EventKind, Payload, Recorder,
    ReplayEngine,
};
use crate::clock::EngineClock;
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, LaneNotice, DEFAULT_ACK_TIMEOUT_NS};
use crate::error::EngineError;
use crate::governance::{GovernanceConfig, GovernanceController};
use crate::lane::{LaneMsg, SymbolLane, TradeIntent};
use crate::market::events::{
    fnv1a32, DepthUpdate, IntakeStats, Liquidation, MarketEvent, Tick, Trade,
};
use crate::mode::ModeGuard;
use crate::orders::{MockVenue, OrderManager};
use crate::physics::VenuePhysics;
use crate::position::PositionBook;
use crate::risk::authority::RiskAuthority;
use crate::risk::portfolio::PortfolioConfig;
use crate::risk::ramp::RampConfig;
use crate::shadow::divergence::DivergenceConfig;
use crate::shadow::executor::ShadowConfig;
use crate::shadow::{DivergenceMonitor, ShadowExecutor};
use crate::types::RunMode;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Borealis decision core starting");

    // ── 1. Configuration ─────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "borealis_config.json".to_string());

    let mut config = match EngineConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config file unavailable, using defaults + environment");
            let mut cfg = EngineConfig::default();
            cfg.apply_env_overrides();
            cfg
        }
    };
    config.symbols = config
        .symbols
        .iter()
        .map(|s| s.to_uppercase())
        .collect();

    let mode = match config.validate() {
        Ok(mode) => mode,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return e.exit_code();
        }
    };

    info!(
        mode = %mode,
        symbols = ?config.symbols,
        leader = %config.leader_symbol,
        "configuration validated"
    );

    match mode {
        RunMode::Replay => run_replay(&config),
        RunMode::Live | RunMode::Shadow => run_session(config, mode).await,
    }
}

// =============================================================================
// Shared core assembly
// =============================================================================

struct Core {
    clock: Arc<EngineClock>,
    recorder: Arc<Recorder>,
    app_state: Arc<AppState>,
    coordinator: Coordinator,
    lanes: HashMap<u32, SymbolLane>,
    venue: Arc<MockVenue>,
    attribution: Arc<AttributionTracker>,
}

fn build_core(
    config: &EngineConfig,
    mode: RunMode,
    clock: Arc<EngineClock>,
    log_base: &str,
) -> Result<Core, EngineError> {
    let mode_guard = Arc::new(ModeGuard::new(mode));
    mode_guard.lock();

    let recorder = Arc::new(Recorder::create(log_base)?);

    // The session-start record anchors UTC derivation for replay.
    let now_ns = clock.now_ns();
    recorder.record(&CausalEvent {
        header: EventHeader {
            event_id: clock.next_event_id(),
            parent_id: 0,
            kind: EventKind::SessionStart,
            ts_ns: now_ns,
            symbol_hash: 0,
        },
        payload: Payload::SessionStart {
            wall_anchor_ms: clock.wall_anchor_ms(),
            mode: mode_code(mode),
        },
    })?;

    let symbols: Vec<(String, u32)> = config
        .symbols
        .iter()
        .map(|s| (s.clone(), fnv1a32(s)))
        .collect();

    let bridge = Arc::new(signals::SignalBridge::new());
    let positions = Arc::new(PositionBook::new());
    let governance = Arc::new(GovernanceController::new(
        GovernanceConfig {
            daily_loss_limit_r: config.daily_loss_limit_r,
            weekly_loss_limit_r: config.weekly_loss_limit_r,
        },
        clock.utc_date_for(now_ns),
    ));
    let divergence = Arc::new(DivergenceMonitor::new(DivergenceConfig::default()));
    let venue_physics = Arc::new(VenuePhysics::new());
    let intake_stats = Arc::new(IntakeStats::default());
    let attribution = Arc::new(AttributionTracker::new(config.attribution_csv_path.clone()));

    let app_state = Arc::new(AppState::new(
        mode,
        &symbols,
        positions.clone(),
        governance.clone(),
        divergence.clone(),
        venue_physics.clone(),
        intake_stats.clone(),
    ));

    let mut authority = RiskAuthority::new(
        PortfolioConfig {
            max_group_risk_r: config.max_group_risk_r,
            max_portfolio_risk_r: config.max_portfolio_risk_r,
            daily_loss_limit_r: config.daily_loss_limit_r,
            max_concurrent_positions: config.max_concurrent_positions,
            max_group_positions: config.max_group_positions,
        },
        RampConfig::default(),
        config.base_capital,
        config.risk_unit(),
    );
    for (symbol, hash) in &symbols {
        authority.register_symbol(*hash, symbol);
    }

    let venue = Arc::new(MockVenue::new());
    let orders = OrderManager::new(venue.clone(), DEFAULT_ACK_TIMEOUT_NS);
    let shadow = ShadowExecutor::new(ShadowConfig {
        qty: config.base_order_qty,
        ..ShadowConfig::default()
    });

    let cascade_cfg = CascadeConfig::default();
    let max_hold_ns = cascade_cfg.max_hold_ns;

    let mut lanes = HashMap::new();
    for (symbol, hash) in &symbols {
        let lane = SymbolLane::new(
            symbol,
            *hash,
            symbol == &config.leader_symbol,
            cascade_cfg.clone(),
            bridge.clone(),
            positions.clone(),
            clock.clone(),
            recorder.clone(),
            app_state.clone(),
            intake_stats.clone(),
        );
        lanes.insert(*hash, lane);
    }

    let coordinator = Coordinator::new(
        config,
        mode_guard,
        clock.clone(),
        recorder.clone(),
        app_state.clone(),
        governance,
        divergence,
        venue_physics,
        positions,
        attribution.clone(),
        authority,
        orders,
        shadow,
        max_hold_ns,
    );

    Ok(Core {
        clock,
        recorder,
        app_state,
        coordinator,
        lanes,
        venue,
        attribution,
    })
}

fn mode_code(mode: RunMode) -> u8 {
    match mode {
        RunMode::Live => 0,
        RunMode::Shadow => 1,
        RunMode::Replay => 2,
    }
}

// =============================================================================
// Live / Shadow session
// =============================================================================

enum CoordMsg {
    Intent(TradeIntent),
    Rebalance,
    Shutdown,
}

async fn run_session(config: EngineConfig, mode: RunMode) -> i32 {
    let clock = Arc::new(EngineClock::wall());
    let core = match build_core(&config, mode, clock, &config.causal_log_path) {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "core assembly failed");
            return e.exit_code();
        }
    };

    let Core {
        clock,
        recorder,
        app_state,
        mut coordinator,
        lanes,
        venue,
        attribution,
    } = core;

    // ── Lane tasks: one single-writer task per symbol ───────────────────
    let (intent_tx, mut intent_rx) = mpsc::channel::<TradeIntent>(256);
    let mut lane_txs: HashMap<u32, mpsc::Sender<LaneMsg>> = HashMap::new();

    for (hash, mut lane) in lanes {
        let (tx, mut rx) = mpsc::channel::<LaneMsg>(4096);
        lane_txs.insert(hash, tx);
        let intent_tx = intent_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Some(intent) = lane.handle(&msg) {
                    if intent_tx.send(intent).await.is_err() {
                        break;
                    }
                }
            }
        });
    }
    drop(intent_tx);

    // ── Coordinator task: the only consumer of the intent queue ────────
    let (coord_tx, mut coord_rx) = mpsc::channel::<CoordMsg>(256);

    // Intents feed the coordinator queue.
    {
        let coord_tx = coord_tx.clone();
        tokio::spawn(async move {
            while let Some(intent) = intent_rx.recv().await {
                if coord_tx.send(CoordMsg::Intent(intent)).await.is_err() {
                    break;
                }
            }
        });
    }

    // Rebalance ticker (~10 s): ramp, portfolio aggregates, session roll.
    {
        let coord_tx = coord_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(10));
            loop {
                ticker.tick().await;
                if coord_tx.send(CoordMsg::Rebalance).await.is_err() {
                    break;
                }
            }
        });
    }

    let coordinator_task = {
        let clock = clock.clone();
        let recorder = recorder.clone();
        let app_state = app_state.clone();
        let lane_txs_c = lane_txs.clone();
        tokio::spawn(async move {
            while let Some(msg) = coord_rx.recv().await {
                let result = match msg {
                    CoordMsg::Intent(intent) => coordinator
                        .handle_intent(&intent)
                        .and_then(|mut notices| {
                            let updates = venue.drain_updates();
                            notices.extend(
                                coordinator.drain_venue_updates(updates, clock.now_ns())?,
                            );
                            notices.extend(coordinator.check_time_stops(clock.now_ns())?);
                            Ok(notices)
                        }),
                    CoordMsg::Rebalance => {
                        let regimes = app_state.regimes();
                        coordinator.rebalance(&regimes, clock.now_ns()).map(|n| {
                            let _ = recorder.flush();
                            n
                        })
                    }
                    CoordMsg::Shutdown => {
                        coordinator.shutdown();
                        break;
                    }
                };

                match result {
                    Ok(notices) => route_notices(&lane_txs_c, &notices),
                    Err(e) => {
                        // Invariant violations are fatal by contract: emit a
                        // final record and exit non-zero.
                        error!(error = %e, "fatal coordinator error");
                        let _ = recorder.flush();
                        std::process::exit(e.exit_code());
                    }
                }
            }
        })
    };

    // ── Market intake: one reconnect loop per venue ─────────────────────
    for endpoint in &config.venue_endpoints {
        let router: crate::market::stream::LaneRouter = lane_txs.clone();
        let clock = clock.clone();
        let stats = app_state.intake_stats.clone();
        let name = endpoint.name.clone();
        let url = crate::market::stream::combined_stream_url(&endpoint.url, &config.symbols);
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    crate::market::stream::run_intake(&name, &url, &router, &clock, &stats).await
                {
                    error!(venue = %name, error = %e, "intake stream error, reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    // ── Telemetry server ────────────────────────────────────────────────
    {
        let ctx = ApiContext {
            app_state: app_state.clone(),
            clock: clock.clone(),
            attribution,
        };
        let bind_addr = config.telemetry_bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(ctx);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "telemetry server listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "telemetry server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "telemetry bind failed"),
            }
        });
    }

    info!("all subsystems running");

    // ── Shutdown ────────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    warn!("shutdown signal received, draining");

    let _ = coord_tx.send(CoordMsg::Shutdown).await;
    let _ = coordinator_task.await;
    let _ = recorder.flush();

    info!("Borealis shut down clean");
    0
}

fn route_notices(lane_txs: &HashMap<u32, mpsc::Sender<LaneMsg>>, notices: &[LaneNotice]) {
    for notice in notices {
        let (hash, msg) = match notice {
            LaneNotice::Executed(hash) => (*hash, LaneMsg::MarkExecuted),
            LaneNotice::Exited(hash) => (*hash, LaneMsg::MarkExit),
        };
        if let Some(tx) = lane_txs.get(&hash) {
            let _ = tx.try_send(msg);
        }
    }
}

// =============================================================================
// Replay
// =============================================================================

fn run_replay(config: &EngineConfig) -> i32 {
    let Some(input_path) = config.replay_input_path.as_deref() else {
        return 2;
    };

    let replay = match ReplayEngine::load(input_path) {
        Ok(replay) => replay,
        Err(e) => {
            error!(error = %e, "replay log load failed");
            return e.exit_code();
        }
    };
    let (wall_anchor_ms, _recorded_mode) = match replay.session_start() {
        Ok(start) => start,
        Err(e) => {
            error!(error = %e, "replay log rejected");
            return e.exit_code();
        }
    };

    // Replay never touches a real-time clock: time is driven by the log.
    let clock = Arc::new(EngineClock::replay(wall_anchor_ms));

    let replay_log_base = format!("{}_replay", config.causal_log_path);
    let core = match build_core(config, RunMode::Replay, clock, &replay_log_base) {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "core assembly failed");
            return e.exit_code();
        }
    };
    let Core {
        clock,
        recorder,
        app_state: _app_state,
        mut coordinator,
        mut lanes,
        venue: _venue,
        attribution: _attribution,
    } = core;

    let symbol_names: HashMap<u32, String> = config
        .symbols
        .iter()
        .map(|s| (fnv1a32(s), s.clone()))
        .collect();

    // The recorded decision stream is the contract to match.
    let recorded: Vec<DecisionRecord> = replay
        .events()
        .iter()
        .filter_map(|e| match &e.payload {
            Payload::Risk {
                allow, final_size, ..
            } => Some(DecisionRecord {
                allow: *allow,
                final_size: *final_size,
            }),
            _ => None,
        })
        .collect();

    let mut skipped_unknown = 0u64;
    for event in replay.events() {
        clock.advance_to(event.header.ts_ns);

        let Some(market_event) = reconstruct_market_event(event, &symbol_names) else {
            if matches!(
                event.header.kind,
                EventKind::Tick | EventKind::Trade | EventKind::Depth | EventKind::Liquidation
            ) {
                skipped_unknown += 1;
            }
            continue;
        };

        let hash = market_event.symbol_hash();
        let Some(lane) = lanes.get_mut(&hash) else {
            skipped_unknown += 1;
            continue;
        };

        if let Some(intent) = lane.on_event(&market_event) {
            let notices = coordinator
                .handle_intent(&intent)
                .and_then(|mut notices| {
                    notices.extend(coordinator.check_time_stops(clock.now_ns())?);
                    Ok(notices)
                });
            match notices {
                Ok(notices) => {
                    for notice in notices {
                        match notice {
                            LaneNotice::Executed(hash) => {
                                if let Some(lane) = lanes.get_mut(&hash) {
                                    lane.handle(&LaneMsg::MarkExecuted);
                                }
                            }
                            LaneNotice::Exited(hash) => {
                                if let Some(lane) = lanes.get_mut(&hash) {
                                    lane.handle(&LaneMsg::MarkExit);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "fatal error during replay");
                    return e.exit_code();
                }
            }
        }
    }

    if skipped_unknown > 0 {
        warn!(skipped_unknown, "events for unconfigured symbols were skipped");
    }
    let _ = recorder.flush();

    match check_divergences(
        &recorded,
        coordinator.decision_log(),
        config.replay_divergence_threshold,
    ) {
        Ok(divergences) => {
            info!(
                recorded = recorded.len(),
                replayed = coordinator.decision_log().len(),
                divergences,
                "replay complete"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "replay diverged from the live session");
            e.exit_code()
        }
    }
}

/// Rebuild the normalised market event from its causal record.
fn reconstruct_market_event(
    event: &CausalEvent,
    symbol_names: &HashMap<u32, String>,
) -> Option<MarketEvent> {
    let header = &event.header;
    let symbol = symbol_names.get(&header.symbol_hash)?.clone();

    match &event.payload {
        Payload::Tick {
            bid,
            ask,
            bid_size,
            ask_size,
        } => Some(MarketEvent::Tick(Tick {
            event_id: header.event_id,
            symbol,
            symbol_hash: header.symbol_hash,
            bid: *bid,
            ask: *ask,
            bid_size: *bid_size,
            ask_size: *ask_size,
            ts_ns: header.ts_ns,
        })),
        Payload::Trade { price, qty, is_buy } => Some(MarketEvent::Trade(Trade {
            event_id: header.event_id,
            symbol,
            symbol_hash: header.symbol_hash,
            price: *price,
            qty: *qty,
            is_buy: *is_buy,
            ts_ns: header.ts_ns,
        })),
        Payload::Depth {
            bid_depth,
            ask_depth,
        } => Some(MarketEvent::Depth(DepthUpdate {
            event_id: header.event_id,
            symbol,
            symbol_hash: header.symbol_hash,
            bid_depth: *bid_depth,
            ask_depth: *ask_depth,
            ts_ns: header.ts_ns,
        })),
        Payload::Liquidation {
            price,
            qty,
            notional,
            is_long,
        } => Some(MarketEvent::Liquidation(Liquidation {
            event_id: header.event_id,
            symbol,
            symbol_hash: header.symbol_hash,
            price: *price,
            qty: *qty,
            notional: *notional,
            is_long: *is_long,
            ts_ns: header.ts_ns,
        })),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a synthetic session through the real lane + coordinator path
    /// twice with driven clocks and assert the decision streams are
    /// bit-identical. This is the replay contract exercised end to end.
    #[test]
    fn identical_event_streams_produce_identical_decisions() {
        fn run_pass(tag: &str) -> Vec<DecisionRecord> {
            let symbol = "BTCUSDT".to_string();
            let hash = fnv1a32(&symbol);
            let mut config = EngineConfig::default();
            config.mode = Some(RunMode::Replay);
            config.symbols = vec![symbol.clone()];
            config.leader_symbol = symbol.clone();
            config.replay_input_path = Some("unused".into());

            let dir = std::env::temp_dir().join("borealis_main_tests");
            std::fs::create_dir_all(&dir).unwrap();
            config.causal_log_path = dir
                .join(format!("det_{}_{}", tag, std::process::id()))
                .to_string_lossy()
                .into_owned();
            config.attribution_csv_path = dir
                .join(format!("det_attr_{}_{}.csv", tag, std::process::id()))
                .to_string_lossy()
                .into_owned();

            let clock = Arc::new(EngineClock::replay(1_750_000_000_000));
            let core =
                build_core(&config, RunMode::Replay, clock, &config.causal_log_path).unwrap();
            let Core {
                clock,
                mut coordinator,
                mut lanes,
                ..
            } = core;

            const MS: u64 = 1_000_000;
            const SEC: u64 = 1_000_000_000;
            let lane = lanes.get_mut(&hash).unwrap();
            let mut next_id = 10u64;
            let mut id = move || {
                next_id += 1;
                next_id
            };

            let mut decisions_seen = 0;
            let mut feed = |lane: &mut SymbolLane,
                            coordinator: &mut Coordinator,
                            ev: MarketEvent| {
                clock.advance_to(ev.ts_ns());
                if let Some(intent) = lane.on_event(&ev) {
                    let notices = coordinator.handle_intent(&intent).unwrap();
                    for n in notices {
                        if let LaneNotice::Executed(_) = n {
                            lane.handle(&LaneMsg::MarkExecuted);
                        }
                    }
                    decisions_seen += 1;
                }
            };

            // Warm-up: depth baseline + balanced tape.
            for i in 0..150u64 {
                let ts = SEC + i * 10 * MS;
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Depth(DepthUpdate {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        bid_depth: 100.0,
                        ask_depth: 100.0,
                        ts_ns: ts,
                    }),
                );
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Trade(Trade {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        price: 100.0,
                        qty: 1.0,
                        is_buy: i % 2 == 0,
                        ts_ns: ts,
                    }),
                );
            }

            // Liquidation flush + vacuum + one-sided flow, evaluated on
            // ticks.
            let t0 = 20 * SEC;
            feed(
                lane,
                &mut coordinator,
                MarketEvent::Liquidation(Liquidation {
                    event_id: id(),
                    symbol: symbol.clone(),
                    symbol_hash: hash,
                    price: 100.0,
                    qty: 50_000.0,
                    notional: 5_000_000.0,
                    is_long: true,
                    ts_ns: t0,
                }),
            );
            for i in 0..7u64 {
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Depth(DepthUpdate {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        bid_depth: 30.0,
                        ask_depth: 100.0,
                        ts_ns: t0 + i * 100 * MS,
                    }),
                );
            }
            for i in 0..40u64 {
                let ts = t0 + 600 * MS + i * 10 * MS;
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Trade(Trade {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        price: 100.0,
                        qty: 6.0,
                        is_buy: false,
                        ts_ns: ts,
                    }),
                );
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Depth(DepthUpdate {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        bid_depth: 30.0,
                        ask_depth: 100.0,
                        ts_ns: ts,
                    }),
                );
                feed(
                    lane,
                    &mut coordinator,
                    MarketEvent::Tick(Tick {
                        event_id: id(),
                        symbol: symbol.clone(),
                        symbol_hash: hash,
                        bid: 99.995,
                        ask: 100.005,
                        bid_size: 5.0,
                        ask_size: 5.0,
                        ts_ns: ts,
                    }),
                );
            }

            assert!(decisions_seen > 0, "scenario must produce a decision");
            coordinator.decision_log().to_vec()
        }

        let first = run_pass("a");
        let second = run_pass("b");
        assert_eq!(first.len(), second.len());
        assert_eq!(check_divergences(&first, &second, 0).unwrap(), 0);
    }
}
