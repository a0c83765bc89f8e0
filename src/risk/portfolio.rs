// =============================================================================
// Portfolio governor — cross-symbol correlation and portfolio-level risk
// =============================================================================
//
// Symbols are managed independently for signals, but risk is collective:
// correlated symbols share a budget, the whole book shares another, and the
// day's PnL scales everything down as the loss limit approaches. On top of
// the budgets sits the cross-symbol expectancy check: when the *median*
// per-symbol expectancy goes negative the whole portfolio pauses, because at
// that point the edge is gone, not merely one symbol.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Correlation groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationGroup {
    CryptoMajor,
    CryptoAlt,
    UsIndices,
    Metals,
    ForexUsd,
    ForexCross,
    Uncorrelated,
}

pub const GROUP_COUNT: usize = 7;

impl CorrelationGroup {
    fn index(self) -> usize {
        match self {
            Self::CryptoMajor => 0,
            Self::CryptoAlt => 1,
            Self::UsIndices => 2,
            Self::Metals => 3,
            Self::ForexUsd => 4,
            Self::ForexCross => 5,
            Self::Uncorrelated => 6,
        }
    }
}

impl std::fmt::Display for CorrelationGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CryptoMajor => "CRYPTO_MAJOR",
            Self::CryptoAlt => "CRYPTO_ALT",
            Self::UsIndices => "US_INDICES",
            Self::Metals => "METALS",
            Self::ForexUsd => "FOREX_USD",
            Self::ForexCross => "FOREX_CROSS",
            Self::Uncorrelated => "UNCORRELATED",
        };
        write!(f, "{s}")
    }
}

pub fn group_for_symbol(symbol: &str) -> CorrelationGroup {
    match symbol {
        "BTCUSDT" | "ETHUSDT" => CorrelationGroup::CryptoMajor,
        "SOLUSDT" | "BNBUSDT" | "XRPUSDT" => CorrelationGroup::CryptoAlt,
        "NAS100" | "SPX500" | "US30" => CorrelationGroup::UsIndices,
        "XAUUSD" | "XAGUSD" => CorrelationGroup::Metals,
        "EURUSD" | "GBPUSD" | "USDJPY" | "USDCAD" | "AUDUSD" | "USDCHF" | "NZDUSD" => {
            CorrelationGroup::ForexUsd
        }
        "EURGBP" | "EURJPY" | "GBPJPY" | "AUDNZD" => CorrelationGroup::ForexCross,
        _ => CorrelationGroup::Uncorrelated,
    }
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    /// Max risk per correlation group, in R.
    pub max_group_risk_r: f64,
    /// Max total portfolio risk, in R.
    pub max_portfolio_risk_r: f64,
    /// Daily loss limit, in R.
    pub daily_loss_limit_r: f64,
    pub max_concurrent_positions: u32,
    pub max_group_positions: u32,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            max_group_risk_r: 1.5,
            max_portfolio_risk_r: 3.0,
            daily_loss_limit_r: 5.0,
            max_concurrent_positions: 6,
            max_group_positions: 3,
        }
    }
}

/// Snapshot of portfolio aggregates for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub total_risk_r: f64,
    pub daily_pnl_r: f64,
    pub total_positions: u32,
    pub median_expectancy_bps: f64,
    pub paused: bool,
}

pub struct PortfolioGovernor {
    cfg: PortfolioConfig,
    group_risk: [f64; GROUP_COUNT],
    group_positions: [u32; GROUP_COUNT],
    total_risk: f64,
    total_positions: u32,
    daily_pnl_r: f64,
    symbol_risk: HashMap<String, f64>,
    symbol_expectancy: HashMap<String, f64>,
}

impl PortfolioGovernor {
    pub fn new(cfg: PortfolioConfig) -> Self {
        Self {
            cfg,
            group_risk: [0.0; GROUP_COUNT],
            group_positions: [0; GROUP_COUNT],
            total_risk: 0.0,
            total_positions: 0,
            daily_pnl_r: 0.0,
            symbol_risk: HashMap::new(),
            symbol_expectancy: HashMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Risk tracking
    // -------------------------------------------------------------------------

    pub fn add_position(&mut self, symbol: &str, risk_r: f64) {
        let g = group_for_symbol(symbol).index();
        self.group_risk[g] += risk_r;
        self.total_risk += risk_r;
        self.group_positions[g] += 1;
        self.total_positions += 1;
        self.symbol_risk.insert(symbol.to_string(), risk_r);
    }

    pub fn remove_position(&mut self, symbol: &str) {
        let Some(risk) = self.symbol_risk.remove(symbol) else {
            return;
        };
        let g = group_for_symbol(symbol).index();
        self.group_risk[g] = (self.group_risk[g] - risk).max(0.0);
        self.total_risk = (self.total_risk - risk).max(0.0);
        self.group_positions[g] = self.group_positions[g].saturating_sub(1);
        self.total_positions = self.total_positions.saturating_sub(1);
    }

    pub fn record_pnl(&mut self, pnl_r: f64) {
        self.daily_pnl_r += pnl_r;
    }

    /// Called at session start by the rebalance loop.
    pub fn reset_daily(&mut self) {
        self.daily_pnl_r = 0.0;
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    pub fn can_add_position(&self, symbol: &str, proposed_risk_r: f64) -> bool {
        if self.daily_pnl_r <= -self.cfg.daily_loss_limit_r {
            return false;
        }
        if self.total_risk + proposed_risk_r > self.cfg.max_portfolio_risk_r {
            return false;
        }
        if self.total_positions >= self.cfg.max_concurrent_positions {
            return false;
        }

        let g = group_for_symbol(symbol).index();
        if self.group_risk[g] + proposed_risk_r > self.cfg.max_group_risk_r {
            return false;
        }
        if self.group_positions[g] >= self.cfg.max_group_positions {
            return false;
        }

        true
    }

    /// Whether the position-count cap specifically is the blocker.
    pub fn at_position_cap(&self, symbol: &str) -> bool {
        let g = group_for_symbol(symbol).index();
        self.total_positions >= self.cfg.max_concurrent_positions
            || self.group_positions[g] >= self.cfg.max_group_positions
    }

    /// Size scalar in [0, 1]: daily-loss tiers x portfolio utilisation x
    /// group utilisation.
    pub fn size_scalar(&self, symbol: &str) -> f64 {
        let daily_scalar = if self.daily_pnl_r < -self.cfg.daily_loss_limit_r * 0.75 {
            0.25
        } else if self.daily_pnl_r < -self.cfg.daily_loss_limit_r * 0.5 {
            0.5
        } else {
            1.0
        };

        let portfolio_util = if self.cfg.max_portfolio_risk_r > 0.0 {
            self.total_risk / self.cfg.max_portfolio_risk_r
        } else {
            0.0
        };
        let portfolio_scalar = 1.0 - portfolio_util * 0.3;

        let g = group_for_symbol(symbol).index();
        let group_util = if self.cfg.max_group_risk_r > 0.0 {
            self.group_risk[g] / self.cfg.max_group_risk_r
        } else {
            0.0
        };
        let group_scalar = 1.0 - group_util * 0.3;

        (daily_scalar * portfolio_scalar * group_scalar).max(0.0)
    }

    // -------------------------------------------------------------------------
    // Cross-symbol expectancy
    // -------------------------------------------------------------------------

    pub fn update_symbol_expectancy(&mut self, symbol: &str, expectancy_bps: f64) {
        self.symbol_expectancy
            .insert(symbol.to_string(), expectancy_bps);
    }

    pub fn median_expectancy(&self) -> f64 {
        if self.symbol_expectancy.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f64> = self.symbol_expectancy.values().copied().collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = values.len();
        if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        }
    }

    /// Portfolio-wide multiplier from the median expectancy.
    pub fn expectancy_multiplier(&self) -> f64 {
        let median = self.median_expectancy();
        if median < -0.05 {
            0.0
        } else if median < 0.0 {
            0.5
        } else {
            1.0
        }
    }

    pub fn paused(&self) -> bool {
        self.median_expectancy() < -0.05
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn total_risk(&self) -> f64 {
        self.total_risk
    }

    pub fn daily_pnl_r(&self) -> f64 {
        self.daily_pnl_r
    }

    pub fn total_positions(&self) -> u32 {
        self.total_positions
    }

    pub fn group_risk(&self, group: CorrelationGroup) -> f64 {
        self.group_risk[group.index()]
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            total_risk_r: self.total_risk,
            daily_pnl_r: self.daily_pnl_r,
            total_positions: self.total_positions,
            median_expectancy_bps: self.median_expectancy(),
            paused: self.paused(),
        }
    }
}

impl Default for PortfolioGovernor {
    fn default() -> Self {
        Self::new(PortfolioConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_mapping() {
        assert_eq!(group_for_symbol("BTCUSDT"), CorrelationGroup::CryptoMajor);
        assert_eq!(group_for_symbol("SOLUSDT"), CorrelationGroup::CryptoAlt);
        assert_eq!(group_for_symbol("XAUUSD"), CorrelationGroup::Metals);
        assert_eq!(group_for_symbol("EURUSD"), CorrelationGroup::ForexUsd);
        assert_eq!(group_for_symbol("EURJPY"), CorrelationGroup::ForexCross);
        assert_eq!(group_for_symbol("WEIRD"), CorrelationGroup::Uncorrelated);
    }

    #[test]
    fn group_budget_rejects_correlated_pileup() {
        let mut g = PortfolioGovernor::default();
        g.add_position("BTCUSDT", 1.0);
        // Same group (crypto-major): 1.0 + 0.8 would breach the 1.5R cap.
        assert!(!g.can_add_position("ETHUSDT", 0.8));
        // A metals position still fits the global budget.
        assert!(g.can_add_position("XAUUSD", 0.8));
    }

    #[test]
    fn global_budget_and_count_caps() {
        let mut g = PortfolioGovernor::default();
        g.add_position("BTCUSDT", 1.4);
        g.add_position("XAUUSD", 1.4);
        // 2.8 + 0.4 breaches the 3.0R global cap.
        assert!(!g.can_add_position("EURUSD", 0.4));
        assert!(g.can_add_position("EURUSD", 0.1));

        let mut count = PortfolioGovernor::new(PortfolioConfig {
            max_concurrent_positions: 2,
            ..PortfolioConfig::default()
        });
        count.add_position("BTCUSDT", 0.1);
        count.add_position("XAUUSD", 0.1);
        assert!(!count.can_add_position("EURUSD", 0.1));
        assert!(count.at_position_cap("EURUSD"));
    }

    #[test]
    fn daily_loss_tiers_scale_size() {
        let mut g = PortfolioGovernor::default();
        assert!((g.size_scalar("BTCUSDT") - 1.0).abs() < f64::EPSILON);

        g.record_pnl(-3.0); // 60% of the 5R limit
        assert!((g.size_scalar("BTCUSDT") - 0.5).abs() < f64::EPSILON);

        g.record_pnl(-1.0); // 80% of the limit
        assert!((g.size_scalar("BTCUSDT") - 0.25).abs() < f64::EPSILON);

        g.record_pnl(-1.5); // beyond the limit
        assert!(!g.can_add_position("BTCUSDT", 0.1));

        g.reset_daily();
        assert!(g.can_add_position("BTCUSDT", 0.1));
    }

    #[test]
    fn utilisation_shaves_size() {
        let mut g = PortfolioGovernor::default();
        g.add_position("BTCUSDT", 1.5); // group fully used, half of global
        let scalar = g.size_scalar("ETHUSDT");
        // daily 1.0 x portfolio (1 - 0.5*0.3) x group (1 - 1.0*0.3)
        let expected = 0.85 * 0.7;
        assert!((scalar - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_median_expectancy_pauses_portfolio() {
        let mut g = PortfolioGovernor::default();
        g.update_symbol_expectancy("BTCUSDT", 0.4);
        g.update_symbol_expectancy("ETHUSDT", -0.2);
        g.update_symbol_expectancy("SOLUSDT", -0.3);
        // median = -0.2 < -0.05
        assert!(g.paused());
        assert!(g.expectancy_multiplier().abs() < f64::EPSILON);

        g.update_symbol_expectancy("SOLUSDT", 0.5);
        g.update_symbol_expectancy("ETHUSDT", -0.02);
        // median = -0.02: reduced but not paused
        assert!(!g.paused());
        assert!((g.expectancy_multiplier() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn close_releases_the_budget() {
        let mut g = PortfolioGovernor::default();
        g.add_position("BTCUSDT", 1.0);
        assert!(!g.can_add_position("ETHUSDT", 1.0));
        g.remove_position("BTCUSDT");
        assert!(g.can_add_position("ETHUSDT", 1.0));
        assert!(g.total_risk().abs() < f64::EPSILON);
        assert_eq!(g.total_positions(), 0);
    }
}
