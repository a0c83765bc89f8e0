// =============================================================================
// Spread-capture guard — ghost-liquidity immunity for maker flow
// =============================================================================
//
// Venues can misreport queue position and show liquidity that vanishes.
// Instead of trusting fill-rate statistics, this guard measures what actually
// happened: the realised improvement over mid on each maker fill, divided by
// the quoted half-spread. A healthy maker captures ~100% of the half-spread;
// a falling capture ratio means the venue is not giving us the fills we
// queue for, and maker flow is shut off before it bleeds.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CaptureThresholds {
    /// EMA capture under this disables maker entirely.
    pub maker_off: f64,
    /// EMA capture under this decays size to 0.7x.
    pub size_decay: f64,
}

impl CaptureThresholds {
    pub fn crypto() -> Self {
        Self {
            maker_off: 0.75,
            size_decay: 0.5,
        }
    }

    pub fn gold() -> Self {
        Self {
            maker_off: 0.60,
            size_decay: 0.4,
        }
    }

    pub fn silver() -> Self {
        Self {
            maker_off: 0.70,
            size_decay: 0.5,
        }
    }

    pub fn indices() -> Self {
        Self {
            maker_off: 0.50,
            size_decay: 0.3,
        }
    }

    pub fn forex() -> Self {
        Self {
            maker_off: 0.40,
            size_decay: 0.25,
        }
    }

    pub fn for_symbol(symbol: &str) -> Self {
        match symbol {
            "BTCUSDT" | "ETHUSDT" | "SOLUSDT" | "BNBUSDT" | "XRPUSDT" => Self::crypto(),
            "XAUUSD" => Self::gold(),
            "XAGUSD" => Self::silver(),
            "NAS100" | "SPX500" | "US30" => Self::indices(),
            _ => Self::forex(),
        }
    }
}

/// EMA smoothing of the capture ratio.
const CAPTURE_ALPHA: f64 = 0.1;
/// Fills before the guard acts; until then maker gets the benefit of doubt.
const MIN_FILLS: u32 = 5;

#[derive(Debug, Clone)]
struct SpreadCaptureGuard {
    thresholds: CaptureThresholds,
    ema_capture: f64,
    min_capture: f64,
    fills: u32,
}

impl SpreadCaptureGuard {
    fn for_symbol(symbol: &str) -> Self {
        Self {
            thresholds: CaptureThresholds::for_symbol(symbol),
            ema_capture: 1.0,
            min_capture: 1.0,
            fills: 0,
        }
    }

    /// `expected` is the quoted half-spread at order time, `realized` the
    /// improvement we actually got (negative when we slipped through mid).
    fn update(&mut self, expected: f64, realized: f64) {
        if expected <= 0.0 {
            return;
        }
        let ratio = (realized / expected).clamp(-0.5, 2.0);
        self.ema_capture = CAPTURE_ALPHA * ratio + (1.0 - CAPTURE_ALPHA) * self.ema_capture;
        if ratio < self.min_capture {
            self.min_capture = ratio;
        }
        self.fills += 1;
    }

    fn update_from_fill(
        &mut self,
        mid_at_order: f64,
        fill_price: f64,
        quoted_spread: f64,
        is_buy: bool,
    ) {
        let improvement = if is_buy {
            mid_at_order - fill_price
        } else {
            fill_price - mid_at_order
        };
        self.update(quoted_spread * 0.5, improvement);
    }

    fn maker_multiplier(&self) -> f64 {
        if self.fills < MIN_FILLS {
            return 1.0;
        }
        if self.ema_capture < self.thresholds.maker_off * 0.6 {
            0.0
        } else if self.ema_capture < self.thresholds.size_decay {
            0.7
        } else {
            1.0
        }
    }

    fn allow_maker(&self) -> bool {
        self.fills < MIN_FILLS || self.ema_capture >= self.thresholds.maker_off
    }
}

// ---------------------------------------------------------------------------
// Multi-symbol manager
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SpreadCaptureManager {
    guards: HashMap<u32, SpreadCaptureGuard>,
}

impl SpreadCaptureManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_symbol(&mut self, symbol_hash: u32, symbol: &str) {
        self.guards
            .entry(symbol_hash)
            .or_insert_with(|| SpreadCaptureGuard::for_symbol(symbol));
    }

    pub fn update_from_fill(
        &mut self,
        symbol_hash: u32,
        mid_at_order: f64,
        fill_price: f64,
        quoted_spread: f64,
        is_buy: bool,
    ) {
        if let Some(guard) = self.guards.get_mut(&symbol_hash) {
            let was_allowed = guard.allow_maker();
            guard.update_from_fill(mid_at_order, fill_price, quoted_spread, is_buy);
            if was_allowed && !guard.allow_maker() {
                warn!(
                    symbol_hash,
                    ema_capture = guard.ema_capture,
                    min_capture = guard.min_capture,
                    "spread capture collapsed, maker disabled"
                );
            }
        }
    }

    pub fn maker_multiplier(&self, symbol_hash: u32) -> f64 {
        self.guards
            .get(&symbol_hash)
            .map_or(1.0, SpreadCaptureGuard::maker_multiplier)
    }

    pub fn allow_maker(&self, symbol_hash: u32) -> bool {
        self.guards
            .get(&symbol_hash)
            .map_or(true, |g| g.allow_maker())
    }

    pub fn capture(&self, symbol_hash: u32) -> f64 {
        self.guards.get(&symbol_hash).map_or(1.0, |g| g.ema_capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: u32 = 7;

    fn manager() -> SpreadCaptureManager {
        let mut m = SpreadCaptureManager::new();
        m.init_symbol(HASH, "BTCUSDT");
        m
    }

    #[test]
    fn full_capture_keeps_maker_on() {
        let mut m = manager();
        // Buy fills at the bid with a 0.02 spread around mid 100.0: full
        // half-spread captured.
        for _ in 0..20 {
            m.update_from_fill(HASH, 100.0, 99.99, 0.02, true);
        }
        assert!(m.allow_maker(HASH));
        assert!((m.maker_multiplier(HASH) - 1.0).abs() < f64::EPSILON);
        assert!((m.capture(HASH) - 1.0).abs() < 0.05);
    }

    #[test]
    fn zero_capture_disables_maker() {
        let mut m = manager();
        // Fills at mid: no improvement at all.
        for _ in 0..40 {
            m.update_from_fill(HASH, 100.0, 100.0, 0.02, true);
        }
        assert!(!m.allow_maker(HASH));
        assert!(m.maker_multiplier(HASH).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_capture_decays_size() {
        let mut m = manager();
        // Capture ratio ~0.47: above maker_off * 0.6 (0.45) but below the
        // 0.5 size-decay line for crypto.
        for _ in 0..200 {
            m.update_from_fill(HASH, 100.0, 99.9953, 0.02, true);
        }
        let mult = m.maker_multiplier(HASH);
        assert!((mult - 0.7).abs() < f64::EPSILON);
        assert!(!m.allow_maker(HASH));
    }

    #[test]
    fn benefit_of_doubt_before_min_fills() {
        let mut m = manager();
        for _ in 0..3 {
            m.update_from_fill(HASH, 100.0, 100.0, 0.02, true);
        }
        // Only three fills: the guard has not armed yet.
        assert!(m.allow_maker(HASH));
        assert!((m.maker_multiplier(HASH) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_symbol_defaults_open() {
        let m = SpreadCaptureManager::new();
        assert!(m.allow_maker(99));
        assert!((m.maker_multiplier(99) - 1.0).abs() < f64::EPSILON);
    }
}
