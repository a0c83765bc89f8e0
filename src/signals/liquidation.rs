// =============================================================================
// Liquidation engine — forced-flow spike detector
// =============================================================================
//
// Per side, notional liquidation volume is summed over a sliding window; an
// accumulator whose window has elapsed is reset before the next add. The
// engine fires when one side's intensity clears the spike threshold AND
// dominates the other side by at least the dominance ratio.
//
// Direction convention: a long-liquidation spike is forced sell flow and
// fires Sell; a short-liquidation spike is forced buy flow and fires Buy.
// =============================================================================

use serde::Serialize;

use crate::types::Side;

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationSignal {
    pub fired: bool,
    pub side: Option<Side>,
    pub confidence: f64,
    /// Combined long + short intensity over the window.
    pub intensity: f64,
    pub is_long_cascade: bool,
    pub ts_ns: u64,
}

#[derive(Debug, Clone)]
pub struct LiquidationConfig {
    pub window_ns: u64,
    /// Notional intensity a side must reach to count as a spike.
    pub spike_threshold: f64,
    /// How much one side must dominate the other.
    pub dominance: f64,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            window_ns: 5_000_000_000,
            spike_threshold: 3_000_000.0,
            dominance: 1.5,
        }
    }
}

pub struct LiquidationEngine {
    cfg: LiquidationConfig,
    long_intensity: f64,
    short_intensity: f64,
    long_window_start_ns: u64,
    short_window_start_ns: u64,
}

impl LiquidationEngine {
    pub fn new(cfg: LiquidationConfig) -> Self {
        Self {
            cfg,
            long_intensity: 0.0,
            short_intensity: 0.0,
            long_window_start_ns: 0,
            short_window_start_ns: 0,
        }
    }

    /// Feed one liquidation print.
    pub fn ingest(&mut self, notional: f64, is_long_liq: bool, ts_ns: u64) {
        let window_start = ts_ns.saturating_sub(self.cfg.window_ns);

        if is_long_liq {
            if self.long_window_start_ns < window_start {
                self.long_intensity = notional;
                self.long_window_start_ns = ts_ns;
            } else {
                self.long_intensity += notional;
            }
        } else if self.short_window_start_ns < window_start {
            self.short_intensity = notional;
            self.short_window_start_ns = ts_ns;
        } else {
            self.short_intensity += notional;
        }
    }

    /// Zero any accumulator whose window has fully elapsed. Called on the
    /// lane's tick cadence so stale spikes do not linger between prints.
    pub fn decay(&mut self, now_ns: u64) {
        let window_start = now_ns.saturating_sub(self.cfg.window_ns);
        if self.long_window_start_ns < window_start {
            self.long_intensity = 0.0;
        }
        if self.short_window_start_ns < window_start {
            self.short_intensity = 0.0;
        }
    }

    pub fn evaluate(&self, now_ns: u64) -> LiquidationSignal {
        let mut sig = LiquidationSignal {
            fired: false,
            side: None,
            confidence: 0.0,
            intensity: self.long_intensity + self.short_intensity,
            is_long_cascade: false,
            ts_ns: now_ns,
        };

        let long_spike = self.long_intensity > self.cfg.spike_threshold;
        let short_spike = self.short_intensity > self.cfg.spike_threshold;

        if long_spike && self.long_intensity > self.short_intensity * self.cfg.dominance {
            sig.fired = true;
            sig.side = Some(Side::Sell);
            sig.is_long_cascade = true;
            sig.confidence =
                (self.long_intensity / (self.cfg.spike_threshold * 2.0)).min(1.0);
        } else if short_spike && self.short_intensity > self.long_intensity * self.cfg.dominance {
            sig.fired = true;
            sig.side = Some(Side::Buy);
            sig.confidence =
                (self.short_intensity / (self.cfg.spike_threshold * 2.0)).min(1.0);
        }

        sig
    }

    pub fn long_intensity(&self) -> f64 {
        self.long_intensity
    }

    pub fn short_intensity(&self) -> f64 {
        self.short_intensity
    }
}

impl Default for LiquidationEngine {
    fn default() -> Self {
        Self::new(LiquidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn quiet_tape_never_fires() {
        let mut e = LiquidationEngine::default();
        e.ingest(50_000.0, true, SEC);
        e.ingest(60_000.0, false, 2 * SEC);
        assert!(!e.evaluate(2 * SEC).fired);
    }

    #[test]
    fn long_liquidation_spike_fires_sell() {
        let mut e = LiquidationEngine::default();
        e.ingest(5_000_000.0, true, 10 * SEC);
        let sig = e.evaluate(10 * SEC);
        assert!(sig.fired);
        assert_eq!(sig.side, Some(Side::Sell));
        assert!(sig.is_long_cascade);
        assert!(sig.confidence > 0.8);
    }

    #[test]
    fn short_liquidation_spike_fires_buy() {
        let mut e = LiquidationEngine::default();
        e.ingest(4_000_000.0, false, 10 * SEC);
        let sig = e.evaluate(10 * SEC);
        assert!(sig.fired);
        assert_eq!(sig.side, Some(Side::Buy));
        assert!(!sig.is_long_cascade);
    }

    #[test]
    fn two_sided_flush_without_dominance_stays_silent() {
        let mut e = LiquidationEngine::default();
        e.ingest(4_000_000.0, true, 10 * SEC);
        e.ingest(3_500_000.0, false, 10 * SEC);
        // Both sides spiked but neither dominates 1.5x.
        assert!(!e.evaluate(10 * SEC).fired);
    }

    #[test]
    fn window_elapse_resets_the_accumulator() {
        let mut e = LiquidationEngine::default();
        e.ingest(5_000_000.0, true, 10 * SEC);
        assert!(e.evaluate(10 * SEC).fired);

        // Window passes with no further prints; decay clears the spike.
        e.decay(20 * SEC);
        assert!(!e.evaluate(20 * SEC).fired);
        assert!((e.long_intensity()).abs() < f64::EPSILON);

        // A fresh print after the gap starts a new window, not a carry-over.
        e.ingest(1_000_000.0, true, 21 * SEC);
        assert!((e.long_intensity() - 1_000_000.0).abs() < f64::EPSILON);
    }
}
