// =============================================================================
// Slippage governor — realised slippage promoted from metric to gate
// =============================================================================
//
// Every fill records realised slippage in bps against the expected baseline.
// The EWMA of realised over expected drives a four-state machine:
//
//   ratio < 1.3   NORMAL    1.0x
//   ratio ≥ 1.3   ELEVATED  0.5x
//   ratio ≥ 1.6   HIGH      0.25x + maker-only
//   ratio ≥ 2.0   CRITICAL  0x (symbol paused)
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SlippageState {
    Normal,
    Elevated,
    High,
    Critical,
}

impl std::fmt::Display for SlippageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::Elevated => "ELEVATED",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// EWMA smoothing of realised slippage.
const ALPHA: f64 = 0.1;

#[derive(Debug, Clone)]
struct SymbolSlippage {
    expected_bps: f64,
    realized_bps: f64,
    fills: u32,
    state: SlippageState,
}

impl SymbolSlippage {
    fn new(expected_bps: f64) -> Self {
        Self {
            expected_bps,
            realized_bps: 0.0,
            fills: 0,
            state: SlippageState::Normal,
        }
    }

    fn record_fill(&mut self, expected_price: f64, fill_price: f64, is_buy: bool) {
        if expected_price <= 0.0 {
            return;
        }
        self.fills += 1;

        // Positive slippage = worse than expected.
        let slippage_bps = if is_buy {
            (fill_price - expected_price) / expected_price * 10_000.0
        } else {
            (expected_price - fill_price) / expected_price * 10_000.0
        };

        self.realized_bps = ALPHA * slippage_bps + (1.0 - ALPHA) * self.realized_bps;
        self.update_state();
    }

    fn update_state(&mut self) {
        if self.expected_bps <= 0.0 {
            self.state = SlippageState::Normal;
            return;
        }
        let ratio = self.realized_bps / self.expected_bps;
        self.state = if ratio >= 2.0 {
            SlippageState::Critical
        } else if ratio >= 1.6 {
            SlippageState::High
        } else if ratio >= 1.3 {
            SlippageState::Elevated
        } else {
            SlippageState::Normal
        };
    }

    fn size_multiplier(&self) -> f64 {
        match self.state {
            SlippageState::Normal => 1.0,
            SlippageState::Elevated => 0.5,
            SlippageState::High => 0.25,
            SlippageState::Critical => 0.0,
        }
    }
}

#[derive(Default)]
pub struct SlippageGovernor {
    symbols: HashMap<u32, SymbolSlippage>,
}

/// Baseline expected slippage when a symbol has not been configured.
const DEFAULT_EXPECTED_BPS: f64 = 0.5;

impl SlippageGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_expected(&mut self, symbol_hash: u32, expected_bps: f64) {
        self.symbols
            .entry(symbol_hash)
            .or_insert_with(|| SymbolSlippage::new(DEFAULT_EXPECTED_BPS))
            .expected_bps = expected_bps;
    }

    pub fn record_fill(
        &mut self,
        symbol_hash: u32,
        expected_price: f64,
        fill_price: f64,
        is_buy: bool,
    ) {
        let entry = self
            .symbols
            .entry(symbol_hash)
            .or_insert_with(|| SymbolSlippage::new(DEFAULT_EXPECTED_BPS));
        let old_state = entry.state;
        entry.record_fill(expected_price, fill_price, is_buy);

        if entry.state != old_state {
            warn!(
                symbol_hash,
                from = %old_state,
                to = %entry.state,
                realized_bps = entry.realized_bps,
                expected_bps = entry.expected_bps,
                "slippage state changed"
            );
        }
    }

    pub fn state(&self, symbol_hash: u32) -> SlippageState {
        self.symbols
            .get(&symbol_hash)
            .map_or(SlippageState::Normal, |s| s.state)
    }

    pub fn size_multiplier(&self, symbol_hash: u32) -> f64 {
        self.symbols
            .get(&symbol_hash)
            .map_or(1.0, SymbolSlippage::size_multiplier)
    }

    /// HIGH and above force maker-only execution.
    pub fn maker_only(&self, symbol_hash: u32) -> bool {
        self.state(symbol_hash) >= SlippageState::High
    }

    pub fn paused(&self, symbol_hash: u32) -> bool {
        self.state(symbol_hash) == SlippageState::Critical
    }

    pub fn realized_bps(&self, symbol_hash: u32) -> f64 {
        self.symbols.get(&symbol_hash).map_or(0.0, |s| s.realized_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `n` buy fills with constant slippage of `bps` against a 100.0
    /// expected price.
    fn feed(g: &mut SlippageGovernor, n: u32, bps: f64) {
        for _ in 0..n {
            let fill = 100.0 * (1.0 + bps / 10_000.0);
            g.record_fill(1, 100.0, fill, true);
        }
    }

    #[test]
    fn clean_fills_stay_normal() {
        let mut g = SlippageGovernor::new();
        g.set_expected(1, 0.5);
        feed(&mut g, 30, 0.4);
        assert_eq!(g.state(1), SlippageState::Normal);
        assert!((g.size_multiplier(1) - 1.0).abs() < f64::EPSILON);
        assert!(!g.maker_only(1));
    }

    #[test]
    fn seventy_percent_overshoot_goes_high() {
        let mut g = SlippageGovernor::new();
        g.set_expected(1, 0.5);
        // realised/expected converges to 1.7: HIGH, quarter size, maker-only.
        feed(&mut g, 30, 0.85);
        assert_eq!(g.state(1), SlippageState::High);
        assert!((g.size_multiplier(1) - 0.25).abs() < f64::EPSILON);
        assert!(g.maker_only(1));
        assert!(!g.paused(1));
    }

    #[test]
    fn doubled_slippage_pauses_the_symbol() {
        let mut g = SlippageGovernor::new();
        g.set_expected(1, 0.5);
        feed(&mut g, 40, 1.2);
        assert_eq!(g.state(1), SlippageState::Critical);
        assert!(g.paused(1));
        assert!(g.size_multiplier(1).abs() < f64::EPSILON);
    }

    #[test]
    fn sell_side_slippage_sign_convention() {
        let mut g = SlippageGovernor::new();
        g.set_expected(1, 0.5);
        // Selling below the expected price is adverse slippage.
        for _ in 0..30 {
            g.record_fill(1, 100.0, 99.99, false);
        }
        assert!(g.realized_bps(1) > 0.9);
    }

    #[test]
    fn price_improvement_reduces_the_ewma() {
        let mut g = SlippageGovernor::new();
        g.set_expected(1, 0.5);
        feed(&mut g, 30, 0.85);
        assert_eq!(g.state(1), SlippageState::High);
        // A run of price-improved fills recovers the state.
        feed(&mut g, 60, 0.0);
        assert_eq!(g.state(1), SlippageState::Normal);
    }
}
