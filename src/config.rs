// =============================================================================
// Engine configuration — startup options, latched before trading begins
// =============================================================================
//
// Loaded from a JSON file, then overridden by BOREALIS_* environment
// variables. Every field carries a serde default so that older config files
// keep loading as fields are added. `mode`, the capital ramp schedule, and
// the correlation-group caps are startup-only: nothing mutates them at
// runtime.
//
// Persistence uses the atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::RunMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."`)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_leader_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_base_capital() -> f64 {
    10_000.0
}

fn default_per_trade_risk_cap_r() -> f64 {
    0.005
}

fn default_max_concurrent_positions() -> u32 {
    6
}

fn default_max_group_positions() -> u32 {
    3
}

fn default_max_portfolio_risk_r() -> f64 {
    3.0
}

fn default_max_group_risk_r() -> f64 {
    1.5
}

fn default_daily_loss_limit_r() -> f64 {
    5.0
}

fn default_weekly_loss_limit_r() -> f64 {
    12.0
}

fn default_causal_log_path() -> String {
    "borealis_session".to_string()
}

fn default_attribution_csv_path() -> String {
    "borealis_attribution.csv".to_string()
}

fn default_telemetry_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_replay_divergence_threshold() -> u64 {
    0
}

fn default_order_qty() -> f64 {
    0.001
}

fn default_venue_endpoints() -> Vec<VenueEndpoint> {
    vec![VenueEndpoint {
        name: "binance".to_string(),
        url: "wss://stream.binance.com:9443".to_string(),
    }]
}

// =============================================================================
// Venue endpoint
// =============================================================================

/// One upstream market-data endpoint. The intake adapter is the only code
/// that knows what lives behind the URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueEndpoint {
    pub name: String,
    pub url: String,
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level startup configuration for the Borealis decision core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run mode. Required; latched by the mode guard before anything trades.
    pub mode: Option<RunMode>,

    // --- Symbols -------------------------------------------------------------
    /// Symbols the engine watches. One lane task per symbol.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// The leader symbol driving the cascade arbiter. Followers are blocked
    /// through the signal bridge when the leader fires.
    #[serde(default = "default_leader_symbol")]
    pub leader_symbol: String,

    /// Symbols with hostile microstructure: maker is forced off for these
    /// regardless of execution physics.
    #[serde(default)]
    pub hostile_symbols: Vec<String>,

    // --- Capital & risk ------------------------------------------------------
    #[serde(default = "default_base_capital")]
    pub base_capital: f64,

    /// One R as a fraction of base capital (0.005 = 50 bps of capital at
    /// risk per trade before ramp scaling).
    #[serde(default = "default_per_trade_risk_cap_r")]
    pub per_trade_risk_cap_r: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    /// Maximum positions per correlation group.
    #[serde(default = "default_max_group_positions")]
    pub max_group_positions: u32,

    #[serde(default = "default_max_portfolio_risk_r")]
    pub max_portfolio_risk_r: f64,

    #[serde(default = "default_max_group_risk_r")]
    pub max_group_risk_r: f64,

    #[serde(default = "default_daily_loss_limit_r")]
    pub daily_loss_limit_r: f64,

    #[serde(default = "default_weekly_loss_limit_r")]
    pub weekly_loss_limit_r: f64,

    // --- Execution -----------------------------------------------------------
    /// Base order quantity handed to the risk authority as requested size.
    #[serde(default = "default_order_qty")]
    pub base_order_qty: f64,

    // --- Persistence & IO ----------------------------------------------------
    /// Base path for the causal log; `.bin` and `.jsonl` are appended.
    #[serde(default = "default_causal_log_path")]
    pub causal_log_path: String,

    #[serde(default = "default_attribution_csv_path")]
    pub attribution_csv_path: String,

    /// Binary causal log to feed back through the core. Required in Replay.
    #[serde(default)]
    pub replay_input_path: Option<String>,

    /// Replay decision mismatches tolerated before exit code 3.
    #[serde(default = "default_replay_divergence_threshold")]
    pub replay_divergence_threshold: u64,

    #[serde(default = "default_venue_endpoints")]
    pub venue_endpoints: Vec<VenueEndpoint>,

    #[serde(default = "default_telemetry_bind_addr")]
    pub telemetry_bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: None,
            symbols: default_symbols(),
            leader_symbol: default_leader_symbol(),
            hostile_symbols: Vec::new(),
            base_capital: default_base_capital(),
            per_trade_risk_cap_r: default_per_trade_risk_cap_r(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_group_positions: default_max_group_positions(),
            max_portfolio_risk_r: default_max_portfolio_risk_r(),
            max_group_risk_r: default_max_group_risk_r(),
            daily_loss_limit_r: default_daily_loss_limit_r(),
            weekly_loss_limit_r: default_weekly_loss_limit_r(),
            base_order_qty: default_order_qty(),
            causal_log_path: default_causal_log_path(),
            attribution_csv_path: default_attribution_csv_path(),
            replay_input_path: None,
            replay_divergence_threshold: default_replay_divergence_threshold(),
            venue_endpoints: default_venue_endpoints(),
            telemetry_bind_addr: default_telemetry_bind_addr(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.apply_env_overrides();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            mode = ?config.mode,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Environment overrides applied after file load (and to the default
    /// config when no file exists).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("BOREALIS_MODE") {
            match mode.parse::<RunMode>() {
                Ok(m) => self.mode = Some(m),
                Err(e) => warn!(error = %e, "ignoring invalid BOREALIS_MODE"),
            }
        }
        if let Ok(syms) = std::env::var("BOREALIS_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(addr) = std::env::var("BOREALIS_BIND_ADDR") {
            self.telemetry_bind_addr = addr;
        }
        if let Ok(path) = std::env::var("BOREALIS_CAUSAL_LOG") {
            self.causal_log_path = path;
        }
        if let Ok(path) = std::env::var("BOREALIS_REPLAY_INPUT") {
            self.replay_input_path = Some(path);
        }
    }

    /// Validate the startup invariants.
    ///
    /// Returns `Config` errors (exit 1) for malformed values and a
    /// `ModeViolation` (exit 2) when the mode contract is broken, e.g.
    /// Replay without a replay input.
    pub fn validate(&self) -> EngineResult<RunMode> {
        let mode = self
            .mode
            .ok_or_else(|| EngineError::Config("mode is required (live|shadow|replay)".into()))?;

        if self.symbols.is_empty() {
            return Err(EngineError::Config("at least one symbol is required".into()));
        }
        if !self.symbols.contains(&self.leader_symbol) {
            return Err(EngineError::Config(format!(
                "leader symbol {} is not in the symbol list",
                self.leader_symbol
            )));
        }
        if self.base_capital <= 0.0 {
            return Err(EngineError::Config("base_capital must be positive".into()));
        }
        if self.per_trade_risk_cap_r <= 0.0 {
            return Err(EngineError::Config(
                "per_trade_risk_cap_r must be positive".into(),
            ));
        }
        if self.daily_loss_limit_r <= 0.0 || self.weekly_loss_limit_r <= 0.0 {
            return Err(EngineError::Config("loss limits must be positive".into()));
        }

        if mode == RunMode::Replay && self.replay_input_path.is_none() {
            return Err(EngineError::ModeViolation {
                required: RunMode::Replay,
                actual: mode,
            });
        }

        Ok(mode)
    }

    /// One R expressed in quote currency.
    pub fn risk_unit(&self) -> f64 {
        self.base_capital * self.per_trade_risk_cap_r
    }

    /// Persist using an atomic tmp + rename write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_mode() {
        let cfg = EngineConfig::default();
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn replay_without_input_is_mode_violation() {
        let mut cfg = EngineConfig::default();
        cfg.mode = Some(RunMode::Replay);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, EngineError::ModeViolation { .. }));
        assert_eq!(err.exit_code(), 2);

        cfg.replay_input_path = Some("session.bin".into());
        assert_eq!(cfg.validate().unwrap(), RunMode::Replay);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "mode": "Shadow", "symbols": ["ETHUSDT"], "leader_symbol": "ETHUSDT" }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, Some(RunMode::Shadow));
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.max_concurrent_positions, 6);
        assert!((cfg.daily_loss_limit_r - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.validate().unwrap(), RunMode::Shadow);
    }

    #[test]
    fn leader_must_be_a_configured_symbol() {
        let mut cfg = EngineConfig::default();
        cfg.mode = Some(RunMode::Shadow);
        cfg.leader_symbol = "DOGEUSDT".into();
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn risk_unit_is_capital_fraction() {
        let mut cfg = EngineConfig::default();
        cfg.base_capital = 20_000.0;
        cfg.per_trade_risk_cap_r = 0.01;
        assert!((cfg.risk_unit() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let mut cfg = EngineConfig::default();
        cfg.mode = Some(RunMode::Live);
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg2.mode, Some(RunMode::Live));
    }
}
