// =============================================================================
// OFI engine — order-flow imbalance z-score with acceleration trigger
// =============================================================================
//
// Per trade, delta = signed size (buy positive). An EWMA of delta feeds a
// bounded ring window; mean and stddev over the window turn the current EWMA
// into a z-score, and the change between consecutive z-scores is the
// acceleration. The engine fires only when both |zscore| and |accel| clear
// their thresholds, which filters steady one-sided flow and keys on flow that
// is *getting* one-sided.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;

use crate::types::Side;

/// Signal emitted by [`OfiEngine::evaluate`].
#[derive(Debug, Clone, Serialize)]
pub struct OfiSignal {
    pub fired: bool,
    pub side: Option<Side>,
    pub confidence: f64,
    pub zscore: f64,
    pub accel: f64,
    pub ts_ns: u64,
}

#[derive(Debug, Clone)]
pub struct OfiConfig {
    /// EWMA smoothing factor applied per trade.
    pub alpha: f64,
    /// Ring window of EWMA samples used for the z-score statistics.
    pub window: usize,
    /// Minimum samples before any signal may be emitted (warm-up).
    pub min_samples: usize,
    pub zscore_threshold: f64,
    pub accel_threshold: f64,
}

impl Default for OfiConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            window: 200,
            min_samples: 100,
            zscore_threshold: 1.5,
            accel_threshold: 0.2,
        }
    }
}

pub struct OfiEngine {
    cfg: OfiConfig,
    ema: f64,
    window: VecDeque<f64>,
    zscore: f64,
    accel: f64,
    last_ts_ns: u64,
}

impl OfiEngine {
    pub fn new(cfg: OfiConfig) -> Self {
        let capacity = cfg.window;
        Self {
            cfg,
            ema: 0.0,
            window: VecDeque::with_capacity(capacity),
            zscore: 0.0,
            accel: 0.0,
            last_ts_ns: 0,
        }
    }

    /// Feed one trade print.
    pub fn ingest(&mut self, qty: f64, is_buy: bool, ts_ns: u64) {
        let delta = if is_buy { qty } else { -qty };

        self.ema = self.cfg.alpha * delta + (1.0 - self.cfg.alpha) * self.ema;

        if self.window.len() == self.cfg.window {
            self.window.pop_front();
        }
        self.window.push_back(self.ema);
        self.last_ts_ns = ts_ns;

        if self.window.len() < self.cfg.min_samples {
            self.zscore = 0.0;
            self.accel = 0.0;
            return;
        }

        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let var = self
            .window
            .iter()
            .map(|x| {
                let d = x - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let stddev = var.sqrt();

        let prev_z = self.zscore;
        self.zscore = if stddev > 1e-10 {
            (self.ema - mean) / stddev
        } else {
            0.0
        };
        self.accel = self.zscore - prev_z;
    }

    pub fn evaluate(&self, now_ns: u64) -> OfiSignal {
        let mut sig = OfiSignal {
            fired: false,
            side: None,
            confidence: 0.0,
            zscore: self.zscore,
            accel: self.accel,
            ts_ns: now_ns,
        };

        if self.window.len() < self.cfg.min_samples {
            return sig;
        }

        if self.accel.abs() > self.cfg.accel_threshold
            && self.zscore.abs() > self.cfg.zscore_threshold
        {
            sig.fired = true;
            sig.side = Some(if self.zscore > 0.0 { Side::Buy } else { Side::Sell });
            sig.confidence = (self.zscore.abs() / 3.0).min(1.0);
        }

        sig
    }

    pub fn zscore(&self) -> f64 {
        self.zscore
    }

    pub fn accel(&self) -> f64 {
        self.accel
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }
}

impl Default for OfiEngine {
    fn default() -> Self {
        Self::new(OfiConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_min(min_samples: usize) -> OfiEngine {
        OfiEngine::new(OfiConfig {
            min_samples,
            ..OfiConfig::default()
        })
    }

    #[test]
    fn silent_before_warmup() {
        let mut e = OfiEngine::default();
        for i in 0..99 {
            e.ingest(5.0, true, i);
        }
        let sig = e.evaluate(100);
        assert!(!sig.fired);
        assert!((sig.zscore).abs() < f64::EPSILON);
    }

    #[test]
    fn balanced_flow_never_fires() {
        // Alternating equal-size buys and sells: flow is flat, z-score stays
        // near zero, nothing fires.
        let mut e = engine_with_min(20);
        for i in 0..200u64 {
            e.ingest(1.0, i % 2 == 0, i);
        }
        let sig = e.evaluate(200);
        assert!(!sig.fired);
        assert!(sig.zscore.abs() < 1.0);
    }

    #[test]
    fn sudden_buy_burst_fires_buy() {
        let mut e = engine_with_min(20);
        // Establish a balanced baseline.
        for i in 0..150u64 {
            e.ingest(1.0, i % 2 == 0, i);
        }
        // Aggressive one-sided burst.
        let mut fired_buy = false;
        for i in 150..190u64 {
            e.ingest(8.0, true, i);
            let sig = e.evaluate(i);
            if sig.fired {
                assert_eq!(sig.side, Some(Side::Buy));
                assert!(sig.confidence > 0.0 && sig.confidence <= 1.0);
                fired_buy = true;
                break;
            }
        }
        assert!(fired_buy, "buy burst should trigger the OFI engine");
    }

    #[test]
    fn zero_variance_window_yields_zero_zscore() {
        let mut e = engine_with_min(10);
        // Identical deltas converge the EWMA; the stddev guard must keep the
        // z-score finite.
        for i in 0..500u64 {
            e.ingest(1.0, true, i);
        }
        assert!(e.zscore().is_finite());
    }
}
