// =============================================================================
// Impulse engine — price displacement + velocity trigger
// =============================================================================
//
// Displacement is measured against a window anchor that re-anchors when the
// window ages out. Velocity is an EWMA of per-tick price change in bps per
// second. The engine fires only when displacement and velocity both clear
// their thresholds AND agree in sign: a large move that is already stalling
// does not fire.
// =============================================================================

use serde::Serialize;

use crate::types::Side;

#[derive(Debug, Clone, Serialize)]
pub struct ImpulseSignal {
    pub fired: bool,
    pub side: Option<Side>,
    pub confidence: f64,
    pub displacement_bps: f64,
    pub velocity_bps_s: f64,
    pub ts_ns: u64,
}

#[derive(Debug, Clone)]
pub struct ImpulseConfig {
    pub window_ns: u64,
    pub min_displacement_bps: f64,
    pub min_velocity_bps_s: f64,
    /// Ticks before the engine may fire.
    pub warmup_ticks: u64,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            window_ns: 500_000_000,
            min_displacement_bps: 5.0,
            min_velocity_bps_s: 10.0,
            warmup_ticks: 100,
        }
    }
}

pub struct ImpulseEngine {
    cfg: ImpulseConfig,
    last_price: f64,
    last_ts_ns: u64,
    anchor_price: f64,
    anchor_ts_ns: u64,
    displacement_bps: f64,
    velocity_bps_s: f64,
    ticks: u64,
}

impl ImpulseEngine {
    pub fn new(cfg: ImpulseConfig) -> Self {
        Self {
            cfg,
            last_price: 0.0,
            last_ts_ns: 0,
            anchor_price: 0.0,
            anchor_ts_ns: 0,
            displacement_bps: 0.0,
            velocity_bps_s: 0.0,
            ticks: 0,
        }
    }

    /// Feed one price observation (mid or last trade).
    pub fn ingest(&mut self, price: f64, ts_ns: u64) {
        if price <= 0.0 {
            return;
        }
        self.ticks += 1;

        if self.last_price == 0.0 {
            self.last_price = price;
            self.last_ts_ns = ts_ns;
            self.anchor_price = price;
            self.anchor_ts_ns = ts_ns;
            return;
        }

        // Re-anchor once the window has aged out.
        if ts_ns.saturating_sub(self.anchor_ts_ns) > self.cfg.window_ns {
            self.anchor_price = price;
            self.anchor_ts_ns = ts_ns;
        }

        if self.anchor_price > 0.0 {
            self.displacement_bps =
                (price - self.anchor_price) / self.anchor_price * 10_000.0;
        }

        let dt_s = ts_ns.saturating_sub(self.last_ts_ns) as f64 * 1e-9;
        if dt_s > 0.0 && self.last_price > 0.0 {
            let change_bps = (price - self.last_price) / self.last_price * 10_000.0;
            let instant = change_bps / dt_s;
            self.velocity_bps_s = 0.7 * self.velocity_bps_s + 0.3 * instant;
        }

        self.last_price = price;
        self.last_ts_ns = ts_ns;
    }

    pub fn evaluate(&self, now_ns: u64) -> ImpulseSignal {
        let mut sig = ImpulseSignal {
            fired: false,
            side: None,
            confidence: 0.0,
            displacement_bps: self.displacement_bps,
            velocity_bps_s: self.velocity_bps_s,
            ts_ns: now_ns,
        };

        if self.ticks < self.cfg.warmup_ticks {
            return sig;
        }

        let disp = self.displacement_bps;
        let vel = self.velocity_bps_s;
        let displacement_ok = disp.abs() >= self.cfg.min_displacement_bps;
        let velocity_ok = vel.abs() >= self.cfg.min_velocity_bps_s;
        let same_direction = (disp > 0.0 && vel > 0.0) || (disp < 0.0 && vel < 0.0);

        if displacement_ok && velocity_ok && same_direction {
            sig.fired = true;
            sig.side = Some(if disp > 0.0 { Side::Buy } else { Side::Sell });
            sig.confidence =
                (disp.abs() / (self.cfg.min_displacement_bps * 2.0)).min(1.0);
        }

        sig
    }

    pub fn displacement_bps(&self) -> f64 {
        self.displacement_bps
    }

    pub fn velocity_bps_s(&self) -> f64 {
        self.velocity_bps_s
    }
}

impl Default for ImpulseEngine {
    fn default() -> Self {
        Self::new(ImpulseConfig::default())
    }
}
