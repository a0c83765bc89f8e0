// =============================================================================
// Divergence monitor — shadow vs live trajectory drift
// =============================================================================
//
// Per symbol, two bounded rings of per-trade PnL in bps: what the shadow
// executor simulated and what live execution actually produced. Once both
// rings hold the minimum trade count, the mean divergence is checked against
// the absolute threshold and against a multiple of normal slippage —
// whichever is larger. Breach pauses the symbol and raises an alert.
//
// Recovery is manual (operator reset) or automatic after a configured number
// of consecutive in-threshold pairs.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DivergenceConfig {
    /// Ring capacity per stream.
    pub window: usize,
    /// Pairs required before any check.
    pub min_trades: usize,
    /// Absolute mean-divergence threshold in bps.
    pub max_divergence_bps: f64,
    /// Divergence is also tolerated up to k x normal slippage.
    pub slippage_multiple: f64,
    /// Consecutive in-threshold pairs required for automatic recovery.
    pub recovery_fills: u32,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            window: 100,
            min_trades: 20,
            max_divergence_bps: 5.0,
            slippage_multiple: 3.0,
            recovery_fills: 10,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolDivergence {
    shadow_bps: VecDeque<f64>,
    live_bps: VecDeque<f64>,
    paused: bool,
    recovery_streak: u32,
    alerts: u64,
}

impl SymbolDivergence {
    fn mean(values: &VecDeque<f64>) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    fn divergence(&self) -> f64 {
        (Self::mean(&self.live_bps) - Self::mean(&self.shadow_bps)).abs()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DivergenceSnapshot {
    pub paused: bool,
    pub divergence_bps: f64,
    pub shadow_trades: usize,
    pub live_trades: usize,
    pub alerts: u64,
}

pub struct DivergenceMonitor {
    cfg: DivergenceConfig,
    symbols: RwLock<HashMap<u32, SymbolDivergence>>,
    /// Normal slippage baseline per symbol, fed from the slippage governor.
    normal_slippage_bps: RwLock<HashMap<u32, f64>>,
}

impl DivergenceMonitor {
    pub fn new(cfg: DivergenceConfig) -> Self {
        Self {
            cfg,
            symbols: RwLock::new(HashMap::new()),
            normal_slippage_bps: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_normal_slippage(&self, symbol_hash: u32, bps: f64) {
        self.normal_slippage_bps.write().insert(symbol_hash, bps);
    }

    pub fn record_shadow(&self, symbol_hash: u32, pnl_bps: f64) {
        let mut symbols = self.symbols.write();
        let entry = symbols.entry(symbol_hash).or_default();
        if entry.shadow_bps.len() == self.cfg.window {
            entry.shadow_bps.pop_front();
        }
        entry.shadow_bps.push_back(pnl_bps);
    }

    /// Record a live trade outcome and run the drift check.
    pub fn record_live(&self, symbol_hash: u32, pnl_bps: f64) {
        let mut symbols = self.symbols.write();
        let entry = symbols.entry(symbol_hash).or_default();
        if entry.live_bps.len() == self.cfg.window {
            entry.live_bps.pop_front();
        }
        entry.live_bps.push_back(pnl_bps);

        if entry.shadow_bps.len() < self.cfg.min_trades
            || entry.live_bps.len() < self.cfg.min_trades
        {
            return;
        }

        let threshold = self.threshold_for(symbol_hash);
        let divergence = entry.divergence();

        if divergence > threshold {
            entry.recovery_streak = 0;
            if !entry.paused {
                entry.paused = true;
                entry.alerts += 1;
                warn!(
                    symbol_hash,
                    divergence_bps = divergence,
                    threshold_bps = threshold,
                    "shadow/live divergence: symbol paused"
                );
            }
        } else if entry.paused {
            entry.recovery_streak += 1;
            if entry.recovery_streak >= self.cfg.recovery_fills {
                entry.paused = false;
                entry.recovery_streak = 0;
                info!(symbol_hash, "divergence recovered, symbol resumed");
            }
        }
    }

    fn threshold_for(&self, symbol_hash: u32) -> f64 {
        let slippage_based = self
            .normal_slippage_bps
            .read()
            .get(&symbol_hash)
            .map_or(0.0, |s| s * self.cfg.slippage_multiple);
        self.cfg.max_divergence_bps.max(slippage_based)
    }

    pub fn paused(&self, symbol_hash: u32) -> bool {
        self.symbols
            .read()
            .get(&symbol_hash)
            .is_some_and(|s| s.paused)
    }

    /// Operator reset: clears the pause and the streak, keeps history.
    pub fn reset(&self, symbol_hash: u32) {
        if let Some(entry) = self.symbols.write().get_mut(&symbol_hash) {
            entry.paused = false;
            entry.recovery_streak = 0;
            info!(symbol_hash, "divergence monitor reset by operator");
        }
    }

    pub fn snapshot(&self, symbol_hash: u32) -> DivergenceSnapshot {
        let symbols = self.symbols.read();
        match symbols.get(&symbol_hash) {
            Some(s) => DivergenceSnapshot {
                paused: s.paused,
                divergence_bps: s.divergence(),
                shadow_trades: s.shadow_bps.len(),
                live_trades: s.live_bps.len(),
                alerts: s.alerts,
            },
            None => DivergenceSnapshot {
                paused: false,
                divergence_bps: 0.0,
                shadow_trades: 0,
                live_trades: 0,
                alerts: 0,
            },
        }
    }
}

impl Default for DivergenceMonitor {
    fn default() -> Self {
        Self::new(DivergenceConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const H: u32 = 3;

    fn monitor() -> DivergenceMonitor {
        DivergenceMonitor::new(DivergenceConfig {
            min_trades: 5,
            recovery_fills: 3,
            ..DivergenceConfig::default()
        })
    }

    fn feed_pairs(m: &DivergenceMonitor, n: usize, shadow: f64, live: f64) {
        for _ in 0..n {
            m.record_shadow(H, shadow);
            m.record_live(H, live);
        }
    }

    #[test]
    fn agreement_never_pauses() {
        let m = monitor();
        feed_pairs(&m, 50, 1.0, 0.8);
        assert!(!m.paused(H));
    }

    #[test]
    fn no_check_before_min_trades() {
        let m = monitor();
        feed_pairs(&m, 4, 10.0, -10.0);
        assert!(!m.paused(H));
    }

    #[test]
    fn drift_pauses_the_symbol_once() {
        let m = monitor();
        feed_pairs(&m, 10, 5.0, -5.0);
        assert!(m.paused(H));
        let snap = m.snapshot(H);
        assert_eq!(snap.alerts, 1);
        assert!(snap.divergence_bps > 5.0);
    }

    #[test]
    fn slippage_multiple_raises_the_threshold() {
        let m = monitor();
        // Normal slippage 4 bps: tolerance becomes 12 bps, above the
        // absolute 5 bps line.
        m.set_normal_slippage(H, 4.0);
        feed_pairs(&m, 20, 5.0, -3.0); // 8 bps divergence
        assert!(!m.paused(H));
    }

    #[test]
    fn automatic_recovery_after_streak() {
        let m = monitor();
        feed_pairs(&m, 10, 5.0, -5.0);
        assert!(m.paused(H));

        // Live converges back onto shadow; after `recovery_fills`
        // consecutive in-threshold checks the symbol resumes.
        feed_pairs(&m, 60, 5.0, 5.0);
        assert!(!m.paused(H));
    }

    #[test]
    fn operator_reset_clears_the_pause() {
        let m = monitor();
        feed_pairs(&m, 10, 5.0, -5.0);
        assert!(m.paused(H));
        m.reset(H);
        assert!(!m.paused(H));
    }
}
