// =============================================================================
// Risk authority — the single point of size control
// =============================================================================
//
// "Strategy requests size, the authority decides size."
//
// The gates execute in a fixed order and the chain is non-bypassable: the
// authority is the only writer of `final_size`, and the first gate to return
// a zero multiplier (or a hard block) terminates the chain — no downstream
// gate runs and the decision carries exactly that gate's reason.
//
//   0 Mode            halt switch (governance kill / operator off)
//   1 Regime          Toxic blocks, Transition scales 0.3x
//   2 Expectancy      dual horizon, slow disables / fast pauses
//   3 Slope           edge decay
//   4 Time bucket     session quality
//   5 Slippage        realised vs expected
//   6 Spread capture  maker orders only
//   7 Portfolio       correlation budgets + median expectancy
//   8 Capital ramp    0.25R..2.0R by proven track record
//
// Every decision, allowed or blocked, is returned with its per-gate
// multipliers so the caller can record it for audit.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::risk::bucket::{bucket_for_hour, BucketQualityManager};
use crate::risk::expectancy::{ExpectancyAuthority, ExpectancyDecision};
use crate::risk::portfolio::{PortfolioConfig, PortfolioGovernor};
use crate::risk::ramp::{CapitalRamp, RampConfig, RampLevel};
use crate::risk::regime::Regime;
use crate::risk::slippage::SlippageGovernor;
use crate::risk::slope::SlopeGuard;
use crate::risk::spread_capture::SpreadCaptureManager;
use crate::types::NoTradeReason;

// ---------------------------------------------------------------------------
// Request / decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SizeRequest {
    pub symbol: String,
    pub symbol_hash: u32,
    pub requested_size: f64,
    pub confidence: f64,
    pub is_maker: bool,
    pub utc_hour: u32,
}

/// The authority's verdict, with one multiplier per gate for audit. Gates
/// that never ran keep their 1.0 default.
#[derive(Debug, Clone, Serialize)]
pub struct SizeDecision {
    pub final_size: f64,
    pub allowed: bool,
    pub reason: Option<NoTradeReason>,

    pub regime_mult: f64,
    pub expectancy_mult: f64,
    pub slope_mult: f64,
    pub bucket_mult: f64,
    pub slippage_mult: f64,
    pub capture_mult: f64,
    pub portfolio_mult: f64,
    pub capital_mult: f64,
}

impl SizeDecision {
    fn open(requested_size: f64) -> Self {
        Self {
            final_size: requested_size,
            allowed: false,
            reason: None,
            regime_mult: 1.0,
            expectancy_mult: 1.0,
            slope_mult: 1.0,
            bucket_mult: 1.0,
            slippage_mult: 1.0,
            capture_mult: 1.0,
            portfolio_mult: 1.0,
            capital_mult: 1.0,
        }
    }

    fn block(mut self, reason: NoTradeReason) -> Self {
        self.final_size = 0.0;
        self.allowed = false;
        self.reason = Some(reason);
        self
    }
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

pub struct RiskAuthority {
    halted: bool,
    symbols: HashMap<u32, String>,
    regimes: HashMap<u32, Regime>,
    expectancy: HashMap<u32, ExpectancyAuthority>,
    slopes: HashMap<u32, SlopeGuard>,
    buckets: HashMap<u32, BucketQualityManager>,
    slippage: SlippageGovernor,
    capture: SpreadCaptureManager,
    portfolio: PortfolioGovernor,
    ramp: CapitalRamp,
}

impl RiskAuthority {
    pub fn new(
        portfolio_cfg: PortfolioConfig,
        ramp_cfg: RampConfig,
        starting_equity: f64,
        risk_unit: f64,
    ) -> Self {
        Self {
            halted: false,
            symbols: HashMap::new(),
            regimes: HashMap::new(),
            expectancy: HashMap::new(),
            slopes: HashMap::new(),
            buckets: HashMap::new(),
            slippage: SlippageGovernor::new(),
            capture: SpreadCaptureManager::new(),
            portfolio: PortfolioGovernor::new(portfolio_cfg),
            ramp: CapitalRamp::new(ramp_cfg, starting_equity, risk_unit),
        }
    }

    /// Symbols must be registered before the authority sees requests for
    /// them: the slope guard and spread-capture thresholds are asset-class
    /// specific.
    pub fn register_symbol(&mut self, symbol_hash: u32, symbol: &str) {
        self.symbols.insert(symbol_hash, symbol.to_string());
        self.expectancy
            .entry(symbol_hash)
            .or_insert_with(ExpectancyAuthority::default);
        self.slopes
            .entry(symbol_hash)
            .or_insert_with(|| SlopeGuard::for_symbol(symbol));
        self.buckets
            .entry(symbol_hash)
            .or_insert_with(BucketQualityManager::new);
        self.capture.init_symbol(symbol_hash, symbol);
    }

    // =========================================================================
    // The chain
    // =========================================================================

    pub fn calculate_size(&mut self, req: &SizeRequest) -> SizeDecision {
        let mut decision = SizeDecision::open(req.requested_size);

        // ── 0. Mode ─────────────────────────────────────────────────
        if self.halted {
            return self.log_block(req, decision.block(NoTradeReason::ModeOff));
        }

        // ── 1. Regime ───────────────────────────────────────────────
        match self.regimes.get(&req.symbol_hash).copied() {
            Some(Regime::Toxic) => {
                decision.regime_mult = 0.0;
                return self.log_block(req, decision.block(NoTradeReason::RegimeToxic));
            }
            Some(Regime::Transition) => {
                decision.regime_mult = 0.3;
                decision.final_size *= 0.3;
            }
            _ => {}
        }

        // ── 2. Dual-horizon expectancy ──────────────────────────────
        if let Some(auth) = self.expectancy.get(&req.symbol_hash) {
            decision.expectancy_mult = auth.size_multiplier();
            decision.final_size *= decision.expectancy_mult;
            if decision.expectancy_mult <= 0.0 {
                let reason = match auth.decide() {
                    ExpectancyDecision::Paused => NoTradeReason::ExpectancyPaused,
                    _ => NoTradeReason::ExpectancyDisabled,
                };
                return self.log_block(req, decision.block(reason));
            }
        }

        // ── 3. Expectancy slope ─────────────────────────────────────
        if let Some(slope) = self.slopes.get(&req.symbol_hash) {
            decision.slope_mult = slope.size_multiplier();
            decision.final_size *= decision.slope_mult;
            if decision.slope_mult <= 0.0 {
                return self.log_block(req, decision.block(NoTradeReason::SlopeDecay));
            }
        }

        // ── 4. Time-bucket quality ──────────────────────────────────
        if let Some(buckets) = self.buckets.get(&req.symbol_hash) {
            decision.bucket_mult = buckets.size_multiplier(req.utc_hour);
            decision.final_size *= decision.bucket_mult;
            if decision.bucket_mult <= 0.0 {
                return self.log_block(req, decision.block(NoTradeReason::BucketDisabled));
            }
        }

        // ── 5. Slippage governor ────────────────────────────────────
        decision.slippage_mult = self.slippage.size_multiplier(req.symbol_hash);
        decision.final_size *= decision.slippage_mult;
        if decision.slippage_mult <= 0.0 {
            return self.log_block(req, decision.block(NoTradeReason::SlippageCritical));
        }

        // ── 6. Spread capture (maker only) ──────────────────────────
        if req.is_maker {
            if !self.capture.allow_maker(req.symbol_hash) {
                decision.capture_mult = 0.0;
                return self.log_block(req, decision.block(NoTradeReason::MakerDisabled));
            }
            decision.capture_mult = self.capture.maker_multiplier(req.symbol_hash);
            decision.final_size *= decision.capture_mult;
        }

        // ── 7. Portfolio governor ───────────────────────────────────
        decision.portfolio_mult =
            self.portfolio.size_scalar(&req.symbol) * self.portfolio.expectancy_multiplier();
        decision.final_size *= decision.portfolio_mult;
        if self.portfolio.paused() || decision.portfolio_mult <= 0.0 {
            return self.log_block(req, decision.block(NoTradeReason::PortfolioPaused));
        }

        let proposed_risk_r = self.ramp.size_multiplier();
        if !self.portfolio.can_add_position(&req.symbol, proposed_risk_r) {
            let reason = if self.portfolio.at_position_cap(&req.symbol) {
                NoTradeReason::PositionLimit
            } else {
                NoTradeReason::PortfolioLimit
            };
            return self.log_block(req, decision.block(reason));
        }

        // ── 8. Capital ramp ─────────────────────────────────────────
        decision.capital_mult = self.ramp.size_multiplier();
        decision.final_size *= decision.capital_mult;

        decision.allowed = decision.final_size > 0.0;
        if !decision.allowed {
            return self.log_block(req, decision.block(NoTradeReason::SizeZero));
        }

        decision
    }

    fn log_block(&self, req: &SizeRequest, decision: SizeDecision) -> SizeDecision {
        debug!(
            symbol = %req.symbol,
            reason = ?decision.reason,
            requested = req.requested_size,
            expectancy_mult = decision.expectancy_mult,
            slope_mult = decision.slope_mult,
            bucket_mult = decision.bucket_mult,
            portfolio_mult = decision.portfolio_mult,
            "risk authority blocked trade"
        );
        decision
    }

    // =========================================================================
    // Feedback paths (called by the engine, never by strategy code)
    // =========================================================================

    /// Halt switch: governance kill or operator off.
    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn set_regime(&mut self, symbol_hash: u32, regime: Regime) {
        self.regimes.insert(symbol_hash, regime);
    }

    /// Closed-trade PnL feeds the expectancy horizons, the slope guard, and
    /// the portfolio's cross-symbol table.
    pub fn record_trade_pnl(&mut self, symbol_hash: u32, pnl_bps: f64) {
        if let Some(auth) = self.expectancy.get_mut(&symbol_hash) {
            auth.record(pnl_bps);
            let slow = auth.slow_expectancy();
            if let Some(slope) = self.slopes.get_mut(&symbol_hash) {
                slope.update(slow);
            }
            if let Some(symbol) = self.symbols.get(&symbol_hash) {
                let symbol = symbol.clone();
                self.portfolio.update_symbol_expectancy(&symbol, slow);
            }
        }
    }

    /// Session close for a time bucket.
    pub fn update_bucket(&mut self, symbol_hash: u32, utc_hour: u32, session_expectancy: f64) {
        if let Some(buckets) = self.buckets.get_mut(&symbol_hash) {
            buckets.update(bucket_for_hour(utc_hour), session_expectancy);
        }
    }

    pub fn record_slippage(
        &mut self,
        symbol_hash: u32,
        expected_price: f64,
        fill_price: f64,
        is_buy: bool,
    ) {
        self.slippage
            .record_fill(symbol_hash, expected_price, fill_price, is_buy);
    }

    pub fn record_spread_capture(
        &mut self,
        symbol_hash: u32,
        mid_at_order: f64,
        fill_price: f64,
        quoted_spread: f64,
        is_buy: bool,
    ) {
        self.capture
            .update_from_fill(symbol_hash, mid_at_order, fill_price, quoted_spread, is_buy);
    }

    pub fn position_opened(&mut self, symbol: &str) {
        let risk_r = self.ramp.size_multiplier();
        self.portfolio.add_position(symbol, risk_r);
    }

    pub fn position_closed(&mut self, symbol: &str, pnl_r: f64) {
        self.portfolio.remove_position(symbol);
        self.portfolio.record_pnl(pnl_r);
    }

    /// End of day: the only moment the capital ramp may move.
    pub fn end_of_day(&mut self, daily_pnl_r: f64, equity: f64) {
        self.ramp.end_of_day(daily_pnl_r, equity);
        self.portfolio.reset_daily();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn ramp_level(&self) -> RampLevel {
        self.ramp.level()
    }

    pub fn portfolio(&self) -> &PortfolioGovernor {
        &self.portfolio
    }

    pub fn slippage(&self) -> &SlippageGovernor {
        &self.slippage
    }

    pub fn maker_forced(&self, symbol_hash: u32) -> bool {
        self.slippage.maker_only(symbol_hash)
    }

    pub fn regime(&self, symbol_hash: u32) -> Regime {
        self.regimes
            .get(&symbol_hash)
            .copied()
            .unwrap_or(Regime::Unknown)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fnv1a32;

    const SYMBOL: &str = "BTCUSDT";

    fn authority() -> (RiskAuthority, u32) {
        let hash = fnv1a32(SYMBOL);
        let mut auth = RiskAuthority::new(
            PortfolioConfig::default(),
            RampConfig::default(),
            10_000.0,
            50.0,
        );
        auth.register_symbol(hash, SYMBOL);
        (auth, hash)
    }

    fn request(hash: u32) -> SizeRequest {
        SizeRequest {
            symbol: SYMBOL.to_string(),
            symbol_hash: hash,
            requested_size: 1.0,
            confidence: 0.8,
            is_maker: false,
            utc_hour: 13,
        }
    }

    #[test]
    fn bootstrap_trade_passes_at_micro_size() {
        let (mut auth, hash) = authority();
        let d = auth.calculate_size(&request(hash));
        assert!(d.allowed);
        assert!(d.reason.is_none());
        // requested 1.0 x ramp 0.25
        assert!((d.final_size - 0.25).abs() < f64::EPSILON);
        assert!((d.capital_mult - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn halt_blocks_before_everything() {
        let (mut auth, hash) = authority();
        auth.set_halted(true);
        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::ModeOff));
        // No downstream gate ran.
        assert!((d.regime_mult - 1.0).abs() < f64::EPSILON);
        assert!((d.expectancy_mult - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn toxic_regime_blocks_and_short_circuits() {
        let (mut auth, hash) = authority();
        auth.set_regime(hash, Regime::Toxic);
        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::RegimeToxic));
        assert!(d.regime_mult.abs() < f64::EPSILON);
        // Downstream multipliers untouched: the chain stopped at the regime
        // gate.
        assert!((d.expectancy_mult - 1.0).abs() < f64::EPSILON);
        assert!((d.capital_mult - 1.0).abs() < f64::EPSILON);
        assert!(d.final_size.abs() < f64::EPSILON);
    }

    #[test]
    fn transition_regime_scales_point_three() {
        let (mut auth, hash) = authority();
        auth.set_regime(hash, Regime::Transition);
        let d = auth.calculate_size(&request(hash));
        assert!(d.allowed);
        assert!((d.regime_mult - 0.3).abs() < f64::EPSILON);
        assert!((d.final_size - 1.0 * 0.3 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn negative_slow_expectancy_disables_symbol() {
        let (mut auth, hash) = authority();
        for _ in 0..120 {
            auth.record_trade_pnl(hash, -1.0);
        }
        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::ExpectancyDisabled));
        assert!(d.expectancy_mult.abs() < f64::EPSILON);
        // Slope/bucket/capital gates never ran.
        assert!((d.bucket_mult - 1.0).abs() < f64::EPSILON);
        assert!((d.capital_mult - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn critical_slippage_blocks_with_its_own_reason() {
        let (mut auth, hash) = authority();
        auth.slippage.set_expected(hash, 0.5);
        for _ in 0..40 {
            auth.record_slippage(hash, 100.0, 100.012, true); // 1.2 bps realised
        }
        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::SlippageCritical));
        assert!(d.slippage_mult.abs() < f64::EPSILON);
    }

    #[test]
    fn high_slippage_forces_maker_and_quarter_size() {
        let (mut auth, hash) = authority();
        auth.slippage.set_expected(hash, 0.5);
        // 0.85 bps realised against 0.5 expected converges to a ~1.7 ratio:
        // HIGH, not yet CRITICAL.
        for _ in 0..60 {
            auth.record_slippage(hash, 100.0, 100.0085, true);
        }
        let d = auth.calculate_size(&request(hash));
        assert!(d.allowed);
        assert!((d.slippage_mult - 0.25).abs() < f64::EPSILON);
        assert!(auth.maker_forced(hash));
    }

    #[test]
    fn maker_request_with_collapsed_capture_blocks() {
        let (mut auth, hash) = authority();
        // Fills at mid: zero capture, maker shut off.
        for _ in 0..40 {
            auth.record_spread_capture(hash, 100.0, 100.0, 0.02, true);
        }
        let mut req = request(hash);
        req.is_maker = true;
        let d = auth.calculate_size(&req);
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::MakerDisabled));

        // The same symbol still trades as taker.
        let d2 = auth.calculate_size(&request(hash));
        assert!(d2.allowed);
    }

    #[test]
    fn portfolio_median_pause_is_portfolio_wide() {
        let (mut auth, hash) = authority();
        let eth = fnv1a32("ETHUSDT");
        let sol = fnv1a32("SOLUSDT");
        auth.register_symbol(eth, "ETHUSDT");
        auth.register_symbol(sol, "SOLUSDT");

        auth.portfolio.update_symbol_expectancy("BTCUSDT", -0.3);
        auth.portfolio.update_symbol_expectancy("ETHUSDT", -0.2);
        auth.portfolio.update_symbol_expectancy("SOLUSDT", 0.1);

        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::PortfolioPaused));
    }

    #[test]
    fn position_count_cap_reports_position_limit() {
        let (mut auth, hash) = authority();
        // Fill the crypto-major group cap (3 positions).
        auth.position_opened("BTCUSDT");
        auth.position_opened("ETHUSDT");
        auth.position_opened("BTCUSDT");
        let d = auth.calculate_size(&request(hash));
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(NoTradeReason::PositionLimit));
    }

    #[test]
    fn end_of_day_moves_the_ramp() {
        let (mut auth, hash) = authority();
        let mut equity = 10_000.0;
        for _ in 0..7 {
            equity += 25.0;
            auth.end_of_day(0.5, equity);
        }
        assert_eq!(auth.ramp_level(), RampLevel::Small);
        let d = auth.calculate_size(&request(hash));
        assert!((d.capital_mult - 0.5).abs() < f64::EPSILON);
    }
}
