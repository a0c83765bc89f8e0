// =============================================================================
// Capital ramp governor — capital follows proof, not hope
// =============================================================================
//
// Four levels, each a hard cap on per-trade risk:
//
//   Micro  0.25R → Small 0.5R → Normal 1.0R → Scaled 2.0R
//
// Promotion requires the configured count of profitable days and moves
// exactly ONE level per end-of-day evaluation, never more, even when the
// counter would satisfy a higher level. A drawdown beyond the revert
// threshold demotes one level and resets the profitable-day counter. There
// is no manual override; the level only ever changes inside `end_of_day`.
// =============================================================================

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RampLevel {
    Micro,
    Small,
    Normal,
    Scaled,
}

impl RampLevel {
    pub fn max_risk_r(self) -> f64 {
        match self {
            Self::Micro => 0.25,
            Self::Small => 0.5,
            Self::Normal => 1.0,
            Self::Scaled => 2.0,
        }
    }

    fn promoted(self) -> Self {
        match self {
            Self::Micro => Self::Small,
            Self::Small => Self::Normal,
            Self::Normal | Self::Scaled => Self::Scaled,
        }
    }

    fn demoted(self) -> Self {
        match self {
            Self::Micro | Self::Small => Self::Micro,
            Self::Normal => Self::Small,
            Self::Scaled => Self::Normal,
        }
    }
}

impl std::fmt::Display for RampLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Micro => "MICRO(0.25R)",
            Self::Small => "SMALL(0.5R)",
            Self::Normal => "NORMAL(1.0R)",
            Self::Scaled => "SCALED(2.0R)",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct RampConfig {
    /// Profitable days required to leave Micro.
    pub days_for_small: u32,
    /// Profitable days required to reach Normal.
    pub days_for_normal: u32,
    /// Profitable days required to reach Scaled.
    pub days_for_scaled: u32,
    /// Drawdown from peak equity (in R) that triggers demotion.
    pub revert_drawdown_r: f64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            days_for_small: 7,
            days_for_normal: 14,
            days_for_scaled: 30,
            revert_drawdown_r: 1.5,
        }
    }
}

pub struct CapitalRamp {
    cfg: RampConfig,
    level: RampLevel,
    profitable_days: u32,
    total_days: u32,
    peak_equity: f64,
    /// One R in quote currency, used to express drawdown in R units.
    risk_unit: f64,
}

impl CapitalRamp {
    pub fn new(cfg: RampConfig, starting_equity: f64, risk_unit: f64) -> Self {
        Self {
            cfg,
            level: RampLevel::Micro,
            profitable_days: 0,
            total_days: 0,
            peak_equity: starting_equity,
            risk_unit,
        }
    }

    /// End-of-day evaluation: the only place the level can change.
    pub fn end_of_day(&mut self, daily_pnl_r: f64, equity: f64) {
        self.total_days += 1;

        if daily_pnl_r > 0.0 {
            self.profitable_days += 1;
        }
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        // Demotion check first: a drawdown day cannot also promote.
        let drawdown_r = if self.risk_unit > 0.0 {
            (self.peak_equity - equity) / self.risk_unit
        } else {
            0.0
        };
        if drawdown_r >= self.cfg.revert_drawdown_r {
            let old = self.level;
            self.level = self.level.demoted();
            self.profitable_days = 0;
            warn!(
                from = %old,
                to = %self.level,
                drawdown_r,
                "capital ramp reverted"
            );
            return;
        }

        // Promotion: exactly one level per end-of-day.
        let target = if self.profitable_days >= self.cfg.days_for_scaled {
            RampLevel::Scaled
        } else if self.profitable_days >= self.cfg.days_for_normal {
            RampLevel::Normal
        } else if self.profitable_days >= self.cfg.days_for_small {
            RampLevel::Small
        } else {
            RampLevel::Micro
        };

        if target > self.level {
            let old = self.level;
            self.level = self.level.promoted();
            info!(
                from = %old,
                to = %self.level,
                profitable_days = self.profitable_days,
                "capital ramp promoted"
            );
        }
    }

    pub fn level(&self) -> RampLevel {
        self.level
    }

    /// The gate-chain multiplier: 0.25 / 0.5 / 1.0 / 2.0.
    pub fn size_multiplier(&self) -> f64 {
        self.level.max_risk_r()
    }

    pub fn profitable_days(&self) -> u32 {
        self.profitable_days
    }

    pub fn total_days(&self) -> u32 {
        self.total_days
    }
}
