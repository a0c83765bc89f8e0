// =============================================================================
// Expectancy slope guard — catches edge decay before the level turns negative
// =============================================================================
//
// Tracks the EWMA of the difference between successive slow-expectancy
// readings. The slope matters more than the level: a still-positive
// expectancy that is sliding is acted on before it flips. Thresholds are
// asset-specific; crypto pauses fastest, forex tolerates the most drift.
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SlopeThresholds {
    /// Below this slope: pause new entries (0x).
    pub pause: f64,
    /// Below this slope: half size.
    pub half: f64,
    /// Below this slope: 0.8x.
    pub decay: f64,
}

impl SlopeThresholds {
    pub fn crypto() -> Self {
        Self {
            pause: -0.02,
            half: -0.015,
            decay: 0.0,
        }
    }

    pub fn gold() -> Self {
        Self {
            pause: -0.04,
            half: -0.02,
            decay: 0.0,
        }
    }

    pub fn silver() -> Self {
        Self {
            pause: -0.03,
            half: -0.02,
            decay: 0.0,
        }
    }

    pub fn indices() -> Self {
        Self {
            pause: -0.05,
            half: -0.03,
            decay: 0.0,
        }
    }

    pub fn forex() -> Self {
        Self {
            pause: -0.06,
            half: -0.04,
            decay: 0.0,
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

/// EMA smoothing applied to the raw slope.
const SLOPE_ALPHA: f64 = 0.2;
/// Updates required before the guard acts.
const MIN_UPDATES: u32 = 5;

pub struct SlopeGuard {
    thresholds: SlopeThresholds,
    last_expectancy: f64,
    slope_ema: f64,
    updates: u32,
}

impl SlopeGuard {
    pub fn for_symbol(symbol: &str) -> Self {
        Self {
            thresholds: SlopeThresholds::for_symbol(symbol),
            last_expectancy: 0.0,
            slope_ema: 0.0,
            updates: 0,
        }
    }

    /// Feed the latest slow-horizon expectancy reading.
    pub fn update(&mut self, current_expectancy: f64) {
        if self.updates == 0 {
            self.last_expectancy = current_expectancy;
            self.updates = 1;
            return;
        }

        let raw = current_expectancy - self.last_expectancy;
        self.slope_ema = SLOPE_ALPHA * raw + (1.0 - SLOPE_ALPHA) * self.slope_ema;
        self.last_expectancy = current_expectancy;
        self.updates += 1;
    }

    pub fn size_multiplier(&self) -> f64 {
        if self.updates < MIN_UPDATES {
            return 1.0;
        }
        if self.slope_ema < self.thresholds.pause {
            0.0
        } else if self.slope_ema < self.thresholds.half {
            0.5
        } else if self.slope_ema < self.thresholds.decay {
            0.8
        } else {
            1.0
        }
    }

    pub fn is_paused(&self) -> bool {
        self.updates >= MIN_UPDATES && self.slope_ema < self.thresholds.pause
    }

    pub fn slope(&self) -> f64 {
        self.slope_ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_data_before_acting() {
        let mut g = SlopeGuard::for_symbol("BTCUSDT");
        g.update(1.0);
        g.update(0.5);
        // Only two updates; full size regardless of slope.
        assert!((g.size_multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn steady_expectancy_keeps_full_size() {
        let mut g = SlopeGuard::for_symbol("BTCUSDT");
        for _ in 0..20 {
            g.update(0.8);
        }
        assert!((g.size_multiplier() - 1.0).abs() < f64::EPSILON);
        assert!(!g.is_paused());
    }

    #[test]
    fn steep_decay_pauses_crypto() {
        let mut g = SlopeGuard::for_symbol("BTCUSDT");
        let mut e = 1.0;
        for _ in 0..20 {
            g.update(e);
            e -= 0.1; // -0.1 bps per reading, far below the -0.02 pause line
        }
        assert!(g.is_paused());
        assert!((g.size_multiplier()).abs() < f64::EPSILON);
    }

    #[test]
    fn mild_decay_shaves_size() {
        let mut g = SlopeGuard::for_symbol("BTCUSDT");
        let mut e = 1.0;
        for _ in 0..30 {
            g.update(e);
            e -= 0.005; // between decay (0.0) and half (-0.015)
        }
        assert!((g.size_multiplier() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn forex_tolerates_what_pauses_crypto() {
        let mut crypto = SlopeGuard::for_symbol("BTCUSDT");
        let mut fx = SlopeGuard::for_symbol("EURUSD");
        let mut e = 1.0;
        for _ in 0..30 {
            crypto.update(e);
            fx.update(e);
            e -= 0.05;
        }
        assert!(crypto.is_paused());
        assert!(!fx.is_paused());
        assert!((fx.size_multiplier() - 0.5).abs() < f64::EPSILON);
    }
}
