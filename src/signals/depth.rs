// =============================================================================
// Depth engine — liquidity-vacuum detector
// =============================================================================
//
// A very slow EWMA of each side's aggregated top-of-book depth forms the
// baseline. The instantaneous ratio of current depth to baseline, taken as
// the worse of the two sides, measures how hollow the book is. A collapse
// begins when the ratio drops under the threshold and must persist for the
// minimum vacuum duration before the engine fires. The signal is
// directionless: the arbiter uses it as a gate, never as a vote.
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DepthSignal {
    pub fired: bool,
    pub confidence: f64,
    pub depth_ratio: f64,
    pub vacuum_duration_ns: u64,
    pub ts_ns: u64,
}

#[derive(Debug, Clone)]
pub struct DepthConfig {
    /// Baseline EWMA smoothing. Deliberately tiny so the baseline moves over
    /// minutes, not ticks.
    pub baseline_alpha: f64,
    /// Ratio under which the book counts as collapsed.
    pub collapse_threshold: f64,
    /// Collapse must persist this long before the engine fires.
    pub min_vacuum_duration_ns: u64,
    /// Updates before the engine may fire.
    pub warmup_updates: u64,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            baseline_alpha: 0.005,
            collapse_threshold: 0.65,
            min_vacuum_duration_ns: 300_000_000,
            warmup_updates: 100,
        }
    }
}

pub struct DepthEngine {
    cfg: DepthConfig,
    baseline_bid: f64,
    baseline_ask: f64,
    depth_ratio: f64,
    in_collapse: bool,
    collapse_start_ns: u64,
    collapse_duration_ns: u64,
    updates: u64,
}

impl DepthEngine {
    pub fn new(cfg: DepthConfig) -> Self {
        Self {
            cfg,
            baseline_bid: 0.0,
            baseline_ask: 0.0,
            depth_ratio: 1.0,
            in_collapse: false,
            collapse_start_ns: 0,
            collapse_duration_ns: 0,
            updates: 0,
        }
    }

    /// Feed aggregated per-side depth.
    pub fn ingest(&mut self, bid_depth: f64, ask_depth: f64, ts_ns: u64) {
        if self.baseline_bid == 0.0 && bid_depth > 0.0 {
            self.baseline_bid = bid_depth;
            self.baseline_ask = ask_depth;
        }

        let a = self.cfg.baseline_alpha;
        self.baseline_bid = (1.0 - a) * self.baseline_bid + a * bid_depth;
        self.baseline_ask = (1.0 - a) * self.baseline_ask + a * ask_depth;

        let bid_ratio = if self.baseline_bid > 0.0 {
            bid_depth / self.baseline_bid
        } else {
            1.0
        };
        let ask_ratio = if self.baseline_ask > 0.0 {
            ask_depth / self.baseline_ask
        } else {
            1.0
        };
        self.depth_ratio = bid_ratio.min(ask_ratio);

        let collapsed_now = self.depth_ratio < self.cfg.collapse_threshold;
        if collapsed_now && !self.in_collapse {
            self.in_collapse = true;
            self.collapse_start_ns = ts_ns;
        } else if !collapsed_now && self.in_collapse {
            self.in_collapse = false;
            self.collapse_start_ns = 0;
        }

        self.collapse_duration_ns = if self.in_collapse {
            ts_ns.saturating_sub(self.collapse_start_ns)
        } else {
            0
        };

        self.updates += 1;
    }

    pub fn evaluate(&self, now_ns: u64) -> DepthSignal {
        let mut sig = DepthSignal {
            fired: false,
            confidence: 0.0,
            depth_ratio: self.depth_ratio,
            vacuum_duration_ns: self.collapse_duration_ns,
            ts_ns: now_ns,
        };

        if self.updates < self.cfg.warmup_updates {
            return sig;
        }

        if self.in_collapse && self.collapse_duration_ns >= self.cfg.min_vacuum_duration_ns {
            sig.fired = true;
            sig.confidence = ((1.0 - self.depth_ratio) / 0.4).min(1.0);
        }

        sig
    }

    pub fn depth_ratio(&self) -> f64 {
        self.depth_ratio
    }

    pub fn in_collapse(&self) -> bool {
        self.in_collapse
    }
}

impl Default for DepthEngine {
    fn default() -> Self {
        Self::new(DepthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn warmed_engine() -> DepthEngine {
        let mut e = DepthEngine::new(DepthConfig {
            warmup_updates: 10,
            ..DepthConfig::default()
        });
        for i in 0..50u64 {
            e.ingest(100.0, 100.0, i * MS);
        }
        e
    }

    #[test]
    fn healthy_book_never_fires() {
        let e = warmed_engine();
        let sig = e.evaluate(100 * MS);
        assert!(!sig.fired);
        assert!((e.depth_ratio() - 1.0).abs() < 0.05);
    }

    #[test]
    fn brief_collapse_does_not_fire() {
        let mut e = warmed_engine();
        // 100 ms of collapse only — under the 300 ms vacuum requirement.
        e.ingest(30.0, 100.0, 1_000 * MS);
        e.ingest(30.0, 100.0, 1_100 * MS);
        let sig = e.evaluate(1_100 * MS);
        assert!(e.in_collapse());
        assert!(!sig.fired);
    }

    #[test]
    fn sustained_collapse_fires_with_confidence() {
        let mut e = warmed_engine();
        // Bid side drops to ~40% of baseline and stays there for 500 ms.
        let start = 1_000 * MS;
        for i in 0..6u64 {
            e.ingest(40.0, 100.0, start + i * 100 * MS);
        }
        let sig = e.evaluate(start + 500 * MS);
        assert!(sig.fired);
        assert!(sig.confidence > 0.0 && sig.confidence <= 1.0);
        assert!(sig.vacuum_duration_ns >= 300 * MS);
    }

    #[test]
    fn recovery_resets_the_vacuum_timer() {
        let mut e = warmed_engine();
        let start = 1_000 * MS;
        e.ingest(40.0, 100.0, start);
        e.ingest(40.0, 100.0, start + 200 * MS);
        // Book refills; collapse state must clear.
        e.ingest(100.0, 100.0, start + 250 * MS);
        assert!(!e.in_collapse());
        // A fresh dip starts the clock from zero.
        e.ingest(40.0, 100.0, start + 300 * MS);
        let sig = e.evaluate(start + 300 * MS);
        assert!(!sig.fired);
    }
}
