// =============================================================================
// Regime classifier — per-symbol market-condition state
// =============================================================================
//
// Inputs, all rolling: spread level, spread dispersion, top-of-book flip
// rate, and venue latency jitter. Each input contributes one stress point
// when it breaches its threshold; two or more points classify Toxic, one
// classifies Transition, none Stable. Before the warm-up sample count the
// regime is Unknown.
//
// Toxic latches: once a symbol has been Toxic it can only come back through
// Transition, and only after the latch cooldown has elapsed — a symbol never
// snaps straight from Toxic to Stable on one clean tick.
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Regime {
    Unknown,
    Stable,
    Transition,
    Toxic,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Stable => write!(f, "STABLE"),
            Self::Transition => write!(f, "TRANSITION"),
            Self::Toxic => write!(f, "TOXIC"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// EWMA smoothing for spread level and dispersion.
    pub alpha: f64,
    /// Spread EWMA above this many bps is stressed.
    pub spread_stress_bps: f64,
    /// Spread stddev above this many bps is stressed.
    pub dispersion_stress_bps: f64,
    /// Book flips per second above this rate are stressed.
    pub flip_rate_stress: f64,
    /// Venue jitter above this many ms is stressed.
    pub jitter_stress_ms: f64,
    /// Ticks before any classification.
    pub warmup_ticks: u64,
    /// How long a Toxic symbol stays latched in Transition.
    pub toxic_latch_ns: u64,
    /// Window for the flip counter.
    pub flip_window_ns: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            spread_stress_bps: 8.0,
            dispersion_stress_bps: 4.0,
            flip_rate_stress: 3.0,
            jitter_stress_ms: 5.0,
            warmup_ticks: 100,
            toxic_latch_ns: 60_000_000_000,
            flip_window_ns: 10_000_000_000,
        }
    }
}

pub struct RegimeClassifier {
    cfg: RegimeConfig,
    spread_ema: f64,
    spread_var_ema: f64,
    last_best_bid: f64,
    last_best_ask: f64,
    flip_count: u32,
    flip_window_start_ns: u64,
    flip_rate: f64,
    jitter_ms: f64,
    ticks: u64,
    latched_until_ns: u64,
    current: Regime,
}

impl RegimeClassifier {
    pub fn new(cfg: RegimeConfig) -> Self {
        Self {
            cfg,
            spread_ema: 0.0,
            spread_var_ema: 0.0,
            last_best_bid: 0.0,
            last_best_ask: 0.0,
            flip_count: 0,
            flip_window_start_ns: 0,
            flip_rate: 0.0,
            jitter_ms: 0.0,
            ticks: 0,
            latched_until_ns: 0,
            current: Regime::Unknown,
        }
    }

    /// Feed one top-of-book observation.
    pub fn on_tick(&mut self, bid: f64, ask: f64, spread_bps: f64, ts_ns: u64) {
        self.ticks += 1;

        let a = self.cfg.alpha;
        if self.ticks == 1 {
            self.spread_ema = spread_bps;
        } else {
            let dev = spread_bps - self.spread_ema;
            self.spread_ema += a * dev;
            self.spread_var_ema = (1.0 - a) * self.spread_var_ema + a * dev * dev;
        }

        // Top-of-book flip: either best price changed.
        if self.last_best_bid > 0.0
            && (bid != self.last_best_bid || ask != self.last_best_ask)
        {
            self.flip_count += 1;
        }
        self.last_best_bid = bid;
        self.last_best_ask = ask;

        if self.flip_window_start_ns == 0 {
            self.flip_window_start_ns = ts_ns;
        }
        let window = ts_ns.saturating_sub(self.flip_window_start_ns);
        if window >= self.cfg.flip_window_ns {
            self.flip_rate = self.flip_count as f64 / (window as f64 * 1e-9);
            self.flip_count = 0;
            self.flip_window_start_ns = ts_ns;
        }
    }

    /// Latency jitter is fed from the physics detector.
    pub fn set_jitter_ms(&mut self, jitter_ms: f64) {
        self.jitter_ms = jitter_ms;
    }

    /// Classify the current regime and update the latch.
    pub fn classify(&mut self, now_ns: u64) -> Regime {
        if self.ticks < self.cfg.warmup_ticks {
            self.current = Regime::Unknown;
            return self.current;
        }

        let mut stress = 0u32;
        if self.spread_ema > self.cfg.spread_stress_bps {
            stress += 1;
        }
        if self.spread_var_ema.sqrt() > self.cfg.dispersion_stress_bps {
            stress += 1;
        }
        if self.flip_rate > self.cfg.flip_rate_stress {
            stress += 1;
        }
        if self.jitter_ms > self.cfg.jitter_stress_ms {
            stress += 1;
        }

        let raw = match stress {
            0 => Regime::Stable,
            1 => Regime::Transition,
            _ => Regime::Toxic,
        };

        if raw == Regime::Toxic {
            self.latched_until_ns = now_ns + self.cfg.toxic_latch_ns;
            self.current = Regime::Toxic;
        } else if now_ns < self.latched_until_ns {
            // Conditions cleared but the latch holds the symbol in
            // Transition until the cooldown elapses.
            self.current = Regime::Transition;
        } else {
            self.current = raw;
        }

        self.current
    }

    pub fn current(&self) -> Regime {
        self.current
    }

    pub fn spread_ema_bps(&self) -> f64 {
        self.spread_ema
    }

    pub fn spread_dispersion_bps(&self) -> f64 {
        self.spread_var_ema.sqrt()
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn feed_calm(c: &mut RegimeClassifier, n: u64, start_ns: u64) {
        for i in 0..n {
            c.on_tick(100.0, 100.01, 1.0, start_ns + i * SEC / 10);
        }
    }

    #[test]
    fn unknown_before_warmup() {
        let mut c = RegimeClassifier::default();
        feed_calm(&mut c, 50, 0);
        assert_eq!(c.classify(5 * SEC), Regime::Unknown);
    }

    #[test]
    fn calm_market_classifies_stable() {
        let mut c = RegimeClassifier::default();
        feed_calm(&mut c, 150, 0);
        assert_eq!(c.classify(15 * SEC), Regime::Stable);
    }

    #[test]
    fn single_stress_factor_is_transition() {
        let mut c = RegimeClassifier::default();
        feed_calm(&mut c, 150, 0);
        c.set_jitter_ms(20.0);
        assert_eq!(c.classify(15 * SEC), Regime::Transition);
    }

    #[test]
    fn toxic_latches_into_transition() {
        let mut c = RegimeClassifier::new(RegimeConfig {
            warmup_ticks: 10,
            toxic_latch_ns: 60 * SEC,
            ..RegimeConfig::default()
        });
        // Wide, jittery market: two stress factors.
        for i in 0..50u64 {
            c.on_tick(100.0, 100.2, 20.0, i * SEC / 10);
        }
        c.set_jitter_ms(20.0);
        assert_eq!(c.classify(5 * SEC), Regime::Toxic);

        // Conditions fully recover, but the latch holds Transition.
        for i in 0..400u64 {
            c.on_tick(100.0, 100.01, 1.0, 6 * SEC + i * SEC / 10);
        }
        c.set_jitter_ms(0.1);
        assert_eq!(c.classify(30 * SEC), Regime::Transition);

        // After the latch expires the symbol may return to Stable.
        assert_eq!(c.classify(120 * SEC), Regime::Stable);
    }
}
