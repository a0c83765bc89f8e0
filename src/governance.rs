// =============================================================================
// Governance controller — session-level capital protection and the kill
// =============================================================================
//
// Aggregates daily and weekly PnL in R units against their loss limits,
// rolls sessions on the UTC date, and owns the global kill flag. The kill is
// sticky: once raised — by a limit breach or by the operator — only an
// operator reset clears it. Raising the kill triggers the emergency flatten
// path in the coordinator (cancel every live order, close every position).
//
// Date strings come from the engine clock's anchored UTC derivation, so the
// same causal log rolls sessions identically in replay.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub daily_loss_limit_r: f64,
    pub weekly_loss_limit_r: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_r: 5.0,
            weekly_loss_limit_r: 12.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GovernanceSnapshot {
    pub killed: bool,
    pub kill_reason: Option<String>,
    pub daily_pnl_r: f64,
    pub weekly_pnl_r: f64,
    pub session_date: String,
    pub sessions_elapsed: u32,
}

struct Inner {
    daily_pnl_r: f64,
    weekly_pnl_r: f64,
    session_date: String,
    sessions_elapsed: u32,
    days_into_week: u32,
    kill_reason: Option<String>,
}

pub struct GovernanceController {
    cfg: GovernanceConfig,
    killed: AtomicBool,
    inner: RwLock<Inner>,
}

/// End-of-day outcome handed to the capital ramp.
#[derive(Debug, Clone, Copy)]
pub struct SessionClose {
    pub daily_pnl_r: f64,
}

impl GovernanceController {
    pub fn new(cfg: GovernanceConfig, session_date: String) -> Self {
        Self {
            cfg,
            killed: AtomicBool::new(false),
            inner: RwLock::new(Inner {
                daily_pnl_r: 0.0,
                weekly_pnl_r: 0.0,
                session_date,
                sessions_elapsed: 0,
                days_into_week: 0,
                kill_reason: None,
            }),
        }
    }

    /// Record a closed trade's PnL in R and run the limit checks.
    pub fn record_trade_pnl_r(&self, pnl_r: f64) {
        let mut inner = self.inner.write();
        inner.daily_pnl_r += pnl_r;
        inner.weekly_pnl_r += pnl_r;

        if inner.daily_pnl_r <= -self.cfg.daily_loss_limit_r {
            let reason = format!(
                "daily loss limit: {:.2}R <= -{:.2}R",
                inner.daily_pnl_r, self.cfg.daily_loss_limit_r
            );
            drop(inner);
            self.kill(&reason);
        } else if inner.weekly_pnl_r <= -self.cfg.weekly_loss_limit_r {
            let reason = format!(
                "weekly loss limit: {:.2}R <= -{:.2}R",
                inner.weekly_pnl_r, self.cfg.weekly_loss_limit_r
            );
            drop(inner);
            self.kill(&reason);
        }
    }

    /// Roll the session when the UTC date changes. Returns the closed
    /// session's numbers when a roll happened, for the capital ramp's
    /// end-of-day hook.
    pub fn roll_session(&self, today: &str) -> Option<SessionClose> {
        let mut inner = self.inner.write();
        if inner.session_date == today {
            return None;
        }

        let close = SessionClose {
            daily_pnl_r: inner.daily_pnl_r,
        };

        info!(
            closed = %inner.session_date,
            new = %today,
            daily_pnl_r = inner.daily_pnl_r,
            weekly_pnl_r = inner.weekly_pnl_r,
            "session rolled"
        );

        inner.session_date = today.to_string();
        inner.sessions_elapsed += 1;
        inner.days_into_week += 1;
        inner.daily_pnl_r = 0.0;

        if inner.days_into_week >= 7 {
            inner.days_into_week = 0;
            inner.weekly_pnl_r = 0.0;
        }

        Some(close)
    }

    /// Raise the global kill. Sticky until `operator_reset`.
    pub fn kill(&self, reason: &str) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            warn!(reason, "GLOBAL KILL raised");
            self.inner.write().kill_reason = Some(reason.to_string());
        }
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Operator-only: clear the kill after investigation.
    pub fn operator_reset(&self) {
        if self.killed.swap(false, Ordering::SeqCst) {
            self.inner.write().kill_reason = None;
            info!("global kill cleared by operator");
        }
    }

    pub fn daily_pnl_r(&self) -> f64 {
        self.inner.read().daily_pnl_r
    }

    pub fn snapshot(&self) -> GovernanceSnapshot {
        let inner = self.inner.read();
        GovernanceSnapshot {
            killed: self.is_killed(),
            kill_reason: inner.kill_reason.clone(),
            daily_pnl_r: inner.daily_pnl_r,
            weekly_pnl_r: inner.weekly_pnl_r,
            session_date: inner.session_date.clone(),
            sessions_elapsed: inner.sessions_elapsed,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> GovernanceController {
        GovernanceController::new(GovernanceConfig::default(), "2025-06-01".to_string())
    }

    #[test]
    fn daily_limit_raises_the_kill() {
        let g = controller();
        g.record_trade_pnl_r(-2.0);
        assert!(!g.is_killed());
        g.record_trade_pnl_r(-3.5);
        assert!(g.is_killed());
        assert!(g
            .snapshot()
            .kill_reason
            .unwrap()
            .contains("daily loss limit"));
    }

    #[test]
    fn weekly_limit_survives_daily_resets() {
        let g = controller();
        // Three days each losing 4R: never hits the 5R daily limit, but the
        // 12R weekly limit trips during day three.
        g.record_trade_pnl_r(-4.0);
        g.roll_session("2025-06-02");
        g.record_trade_pnl_r(-4.0);
        g.roll_session("2025-06-03");
        g.record_trade_pnl_r(-4.0);
        assert!(g.is_killed());
    }

    #[test]
    fn session_roll_returns_the_closed_day() {
        let g = controller();
        g.record_trade_pnl_r(1.5);

        // Same date: no roll.
        assert!(g.roll_session("2025-06-01").is_none());

        let close = g.roll_session("2025-06-02").unwrap();
        assert!((close.daily_pnl_r - 1.5).abs() < f64::EPSILON);
        assert!(g.daily_pnl_r().abs() < f64::EPSILON);
    }

    #[test]
    fn weekly_counter_resets_after_seven_sessions() {
        let g = controller();
        let dates = [
            "2025-06-02",
            "2025-06-03",
            "2025-06-04",
            "2025-06-05",
            "2025-06-06",
            "2025-06-07",
            "2025-06-08",
        ];
        g.record_trade_pnl_r(-2.0);
        for d in dates {
            g.roll_session(d);
            g.record_trade_pnl_r(-1.0);
        }
        // The week rolled once, so the weekly total restarted mid-sequence
        // and never reached -12R.
        assert!(!g.is_killed());
    }

    #[test]
    fn kill_is_sticky_until_operator_reset() {
        let g = controller();
        g.kill("manual");
        assert!(g.is_killed());
        // A profitable trade does not clear it.
        g.record_trade_pnl_r(10.0);
        assert!(g.is_killed());
        g.operator_reset();
        assert!(!g.is_killed());
    }
}
