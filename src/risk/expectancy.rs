// =============================================================================
// Dual-horizon expectancy authority — fast protects, slow decides
// =============================================================================
//
// Two EWMA horizons of per-trade PnL in bps. The fast horizon (~25 trades)
// may reduce size or pause entries; only the slow horizon (~150 trades) has
// the authority to disable the symbol. Fast noise can never kill a slow
// edge. Below the bootstrap trade count the authority returns full size
// unconditionally so a cold symbol can form an expectancy at all.
// =============================================================================

use serde::Serialize;

// ---------------------------------------------------------------------------
// Single horizon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Horizon {
    expectancy_bps: f64,
    avg_win_bps: f64,
    avg_loss_bps: f64,
    trades: u32,
    wins: u32,
    losses: u32,
    alpha: f64,
}

/// Scratches within ±0.05 bps count as neither win nor loss.
const SCRATCH_BPS: f64 = 0.05;

impl Horizon {
    fn new(window: u32) -> Self {
        Self {
            expectancy_bps: 0.0,
            avg_win_bps: 0.0,
            avg_loss_bps: 0.0,
            trades: 0,
            wins: 0,
            losses: 0,
            alpha: 2.0 / (window as f64 + 1.0),
        }
    }

    fn record(&mut self, pnl_bps: f64) {
        self.trades += 1;
        self.expectancy_bps = self.alpha * pnl_bps + (1.0 - self.alpha) * self.expectancy_bps;

        if pnl_bps > SCRATCH_BPS {
            self.wins += 1;
            self.avg_win_bps = self.alpha * pnl_bps + (1.0 - self.alpha) * self.avg_win_bps;
        } else if pnl_bps < -SCRATCH_BPS {
            self.losses += 1;
            self.avg_loss_bps =
                self.alpha * pnl_bps.abs() + (1.0 - self.alpha) * self.avg_loss_bps;
        }
    }

    fn has_enough(&self, min_trades: u32) -> bool {
        self.trades >= min_trades
    }

    fn win_rate(&self) -> f64 {
        if self.trades > 0 {
            100.0 * self.wins as f64 / self.trades as f64
        } else {
            50.0
        }
    }
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExpectancyConfig {
    pub fast_window: u32,
    pub slow_window: u32,
    pub fast_min_trades: u32,
    pub slow_min_trades: u32,
    /// Fast expectancy under this pauses entries.
    pub pause_threshold: f64,
    /// Slow expectancy under this disables the symbol.
    pub disable_threshold: f64,
    /// Slow expectancy above this re-enables a disabled symbol.
    pub reenable_threshold: f64,
    /// Trades before any guard activates.
    pub bootstrap_trades: u32,
}

impl Default for ExpectancyConfig {
    fn default() -> Self {
        Self {
            fast_window: 25,
            slow_window: 150,
            fast_min_trades: 15,
            slow_min_trades: 50,
            pause_threshold: -0.1,
            disable_threshold: 0.0,
            reenable_threshold: 0.2,
            bootstrap_trades: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExpectancyDecision {
    FullSize,
    ReducedSize,
    Paused,
    Disabled,
}

pub struct ExpectancyAuthority {
    cfg: ExpectancyConfig,
    fast: Horizon,
    slow: Horizon,
}

impl ExpectancyAuthority {
    pub fn new(cfg: ExpectancyConfig) -> Self {
        let fast = Horizon::new(cfg.fast_window);
        let slow = Horizon::new(cfg.slow_window);
        Self { cfg, fast, slow }
    }

    pub fn record(&mut self, pnl_bps: f64) {
        self.fast.record(pnl_bps);
        self.slow.record(pnl_bps);
    }

    pub fn decide(&self) -> ExpectancyDecision {
        // Bootstrap bypass: without it a cold symbol would never trade and
        // never form an expectancy.
        if self.fast.trades < self.cfg.bootstrap_trades {
            return ExpectancyDecision::FullSize;
        }

        // Rule 1: slow has ultimate authority to disable.
        if self.slow.has_enough(self.cfg.slow_min_trades)
            && self.slow.expectancy_bps < self.cfg.disable_threshold
        {
            return ExpectancyDecision::Disabled;
        }

        // Rule 2: fast can pause entries but not disable.
        if self.fast.has_enough(self.cfg.fast_min_trades)
            && self.fast.expectancy_bps < self.cfg.pause_threshold
        {
            return ExpectancyDecision::Paused;
        }

        // Rule 3: fast weak while slow is healthy = reduced size.
        if self.fast.has_enough(self.cfg.fast_min_trades)
            && self.fast.expectancy_bps < 0.0
            && self.slow.expectancy_bps > 0.0
        {
            return ExpectancyDecision::ReducedSize;
        }

        ExpectancyDecision::FullSize
    }

    /// Size multiplier in [0, 1.5].
    pub fn size_multiplier(&self) -> f64 {
        match self.decide() {
            ExpectancyDecision::Disabled | ExpectancyDecision::Paused => 0.0,
            ExpectancyDecision::ReducedSize => 0.5,
            ExpectancyDecision::FullSize => self.expectancy_scalar(),
        }
    }

    pub fn can_reenable(&self) -> bool {
        self.slow.has_enough(self.cfg.slow_min_trades)
            && self.slow.expectancy_bps >= self.cfg.reenable_threshold
    }

    pub fn fast_expectancy(&self) -> f64 {
        self.fast.expectancy_bps
    }

    pub fn slow_expectancy(&self) -> f64 {
        self.slow.expectancy_bps
    }

    pub fn trades(&self) -> u32 {
        self.fast.trades
    }

    pub fn fast_win_rate(&self) -> f64 {
        self.fast.win_rate()
    }

    /// Conservative blend: the worse of the two horizons once both have
    /// enough data.
    pub fn authority_expectancy(&self) -> f64 {
        if !self.fast.has_enough(self.cfg.fast_min_trades) {
            return self.slow.expectancy_bps;
        }
        if !self.slow.has_enough(self.cfg.slow_min_trades) {
            return self.fast.expectancy_bps;
        }
        self.fast.expectancy_bps.min(self.slow.expectancy_bps)
    }

    fn expectancy_scalar(&self) -> f64 {
        // During bootstrap the blend may still be zero; trade full size.
        if self.fast.trades < self.cfg.bootstrap_trades {
            return 1.0;
        }
        let e = self.authority_expectancy();
        if e <= 0.0 {
            0.0
        } else if e < 0.2 {
            0.5
        } else if e < 0.4 {
            1.0
        } else if e < 0.6 {
            1.3
        } else {
            1.5
        }
    }
}

impl Default for ExpectancyAuthority {
    fn default() -> Self {
        Self::new(ExpectancyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_returns_full_size() {
        let mut a = ExpectancyAuthority::default();
        for _ in 0..10 {
            a.record(-5.0);
        }
        // Ten losing trades, but we are below the 20-trade bootstrap.
        assert_eq!(a.decide(), ExpectancyDecision::FullSize);
        assert!((a.size_multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fast_losses_pause_before_slow_disables() {
        let mut a = ExpectancyAuthority::default();
        // Healthy history first.
        for _ in 0..60 {
            a.record(1.0);
        }
        // Sharp recent losing streak drives the fast horizon down fast while
        // the slow horizon stays (barely) positive.
        for _ in 0..12 {
            a.record(-2.5);
        }
        assert_eq!(a.decide(), ExpectancyDecision::Paused);
        assert!(a.slow_expectancy() > 0.0);
        assert!((a.size_multiplier()).abs() < f64::EPSILON);
    }

    #[test]
    fn slow_negative_disables() {
        let mut a = ExpectancyAuthority::default();
        for _ in 0..120 {
            a.record(-1.0);
        }
        assert_eq!(a.decide(), ExpectancyDecision::Disabled);
        assert!(!a.can_reenable());
    }

    #[test]
    fn mildly_weak_fast_with_healthy_slow_halves_size() {
        let mut a = ExpectancyAuthority::default();
        for _ in 0..100 {
            a.record(1.5);
        }
        // Shallow fast dip: below zero but above the -0.1 pause threshold.
        let mut i = 0;
        while a.fast_expectancy() >= 0.0 && i < 200 {
            a.record(-0.3);
            i += 1;
        }
        if a.fast_expectancy() < 0.0
            && a.fast_expectancy() >= -0.1
            && a.slow_expectancy() > 0.0
        {
            assert_eq!(a.decide(), ExpectancyDecision::ReducedSize);
            assert!((a.size_multiplier() - 0.5).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn strong_edge_scales_up_to_cap() {
        let mut a = ExpectancyAuthority::default();
        for _ in 0..200 {
            a.record(2.0);
        }
        assert_eq!(a.decide(), ExpectancyDecision::FullSize);
        assert!((a.size_multiplier() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reenable_requires_slow_recovery() {
        let mut a = ExpectancyAuthority::default();
        for _ in 0..120 {
            a.record(-1.0);
        }
        assert_eq!(a.decide(), ExpectancyDecision::Disabled);
        for _ in 0..300 {
            a.record(1.0);
        }
        assert!(a.can_reenable());
    }
}
