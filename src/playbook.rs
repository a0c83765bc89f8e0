// =============================================================================
// Capability matrix & per-symbol playbooks
// =============================================================================
//
// The capability matrix translates execution physics into allowed behaviour;
// it exists to stop fantasy tactics that cannot work on the measured link.
// The playbook carries the tuned execution parameters per symbol, then gets
// adjusted for the physics class: WAN disables everything advanced and
// doubles the minimum edge, NEAR_COLO relaxes timings by ~1.5x and drops
// queue estimation and edge collapse, COLO runs the full book.
//
// Symbols on the hostile list never quote maker, whatever the physics says.
// =============================================================================

use serde::Serialize;

use crate::physics::PhysicsClass;

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Capabilities {
    pub allow_maker: bool,
    pub allow_queue_estimation: bool,
    pub allow_micro_repost: bool,
    pub allow_spread_capture: bool,
    pub allow_edge_collapse: bool,
    pub allow_clock_sync: bool,
    pub physics: PhysicsClass,
}

/// Derive the capability set for a physics class, applying the spike
/// downgrade first when the venue is spiking.
pub fn capabilities_for(physics: PhysicsClass, spiking: bool) -> Capabilities {
    let effective = if spiking { physics.downgraded() } else { physics };

    match effective {
        PhysicsClass::Colo => Capabilities {
            allow_maker: true,
            allow_queue_estimation: true,
            allow_micro_repost: true,
            allow_spread_capture: true,
            allow_edge_collapse: true,
            allow_clock_sync: true,
            physics: effective,
        },
        PhysicsClass::NearColo => Capabilities {
            allow_maker: true,
            allow_queue_estimation: false,
            allow_micro_repost: true,
            allow_spread_capture: true,
            allow_edge_collapse: false,
            allow_clock_sync: false,
            physics: effective,
        },
        // Unknown is treated as WAN: taker only, no advanced tactics.
        PhysicsClass::Wan | PhysicsClass::Unknown => Capabilities {
            allow_maker: false,
            allow_queue_estimation: false,
            allow_micro_repost: false,
            allow_spread_capture: false,
            allow_edge_collapse: false,
            allow_clock_sync: false,
            physics: effective,
        },
    }
}

/// Hostile-microstructure override: forces maker off regardless of physics.
pub fn apply_symbol_overrides(
    mut caps: Capabilities,
    symbol: &str,
    hostile_symbols: &[String],
) -> Capabilities {
    if hostile_symbols.iter().any(|s| s == symbol) {
        caps.allow_maker = false;
        caps.allow_spread_capture = false;
    }
    caps
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Playbook {
    pub maker_timeout_ms: f64,
    pub repost_interval_ms: f64,
    pub min_edge_bps: f64,
    pub target_edge_bps: f64,
    pub prefer_maker: bool,
    pub size_multiplier: f64,
}

impl Default for Playbook {
    fn default() -> Self {
        Self {
            maker_timeout_ms: 5.0,
            repost_interval_ms: 3.0,
            min_edge_bps: 1.5,
            target_edge_bps: 3.0,
            prefer_maker: true,
            size_multiplier: 1.0,
        }
    }
}

/// Base playbook for a symbol, tuned for colo conditions.
pub fn playbook_for_symbol(symbol: &str) -> Playbook {
    match symbol {
        "XAUUSD" => Playbook {
            maker_timeout_ms: 3.0,
            repost_interval_ms: 2.0,
            min_edge_bps: 0.8,
            target_edge_bps: 2.0,
            prefer_maker: true,
            size_multiplier: 1.0,
        },
        "XAGUSD" => Playbook {
            maker_timeout_ms: 3.5,
            repost_interval_ms: 2.5,
            min_edge_bps: 1.0,
            target_edge_bps: 2.5,
            prefer_maker: true,
            size_multiplier: 1.0,
        },
        "NAS100" | "US30" => Playbook {
            maker_timeout_ms: 2.5,
            repost_interval_ms: 1.8,
            min_edge_bps: 0.9,
            target_edge_bps: 2.0,
            prefer_maker: true,
            size_multiplier: 1.0,
        },
        "BTCUSDT" => Playbook {
            maker_timeout_ms: 1.2,
            repost_interval_ms: 1.0,
            min_edge_bps: 1.4,
            target_edge_bps: 3.0,
            prefer_maker: false,
            size_multiplier: 1.0,
        },
        "ETHUSDT" => Playbook {
            maker_timeout_ms: 1.5,
            repost_interval_ms: 1.2,
            min_edge_bps: 1.5,
            target_edge_bps: 3.5,
            prefer_maker: false,
            size_multiplier: 1.0,
        },
        "SOLUSDT" => Playbook {
            maker_timeout_ms: 1.8,
            repost_interval_ms: 1.5,
            min_edge_bps: 2.0,
            target_edge_bps: 4.0,
            prefer_maker: false,
            size_multiplier: 0.8,
        },
        _ => Playbook::default(),
    }
}

/// Adjust a base playbook for the measured physics.
pub fn adjust_for_physics(base: Playbook, physics: PhysicsClass) -> Playbook {
    let mut p = base;
    match physics {
        PhysicsClass::Colo => p,
        PhysicsClass::NearColo => {
            p.maker_timeout_ms *= 1.5;
            p.repost_interval_ms *= 1.5;
            p
        }
        PhysicsClass::Wan | PhysicsClass::Unknown => {
            p.maker_timeout_ms *= 4.0;
            p.repost_interval_ms *= 4.0;
            p.min_edge_bps *= 2.0;
            p.target_edge_bps *= 2.0;
            p.prefer_maker = false;
            p
        }
    }
}

/// Convenience: capabilities + adjusted playbook in one resolution.
pub fn resolve(
    symbol: &str,
    physics: PhysicsClass,
    spiking: bool,
    hostile_symbols: &[String],
) -> (Capabilities, Playbook) {
    let caps = apply_symbol_overrides(capabilities_for(physics, spiking), symbol, hostile_symbols);
    let playbook = adjust_for_physics(playbook_for_symbol(symbol), caps.physics);
    (caps, playbook)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colo_enables_everything() {
        let caps = capabilities_for(PhysicsClass::Colo, false);
        assert!(caps.allow_maker);
        assert!(caps.allow_queue_estimation);
        assert!(caps.allow_micro_repost);
        assert!(caps.allow_edge_collapse);
        assert!(caps.allow_clock_sync);
    }

    #[test]
    fn near_colo_drops_queue_estimation_and_edge_collapse() {
        let caps = capabilities_for(PhysicsClass::NearColo, false);
        assert!(caps.allow_maker);
        assert!(!caps.allow_queue_estimation);
        assert!(!caps.allow_edge_collapse);
    }

    #[test]
    fn wan_is_taker_only() {
        let caps = capabilities_for(PhysicsClass::Wan, false);
        assert!(!caps.allow_maker);
        assert!(!caps.allow_micro_repost);
        assert!(!caps.allow_spread_capture);
    }

    #[test]
    fn unknown_is_treated_as_wan() {
        let caps = capabilities_for(PhysicsClass::Unknown, false);
        assert!(!caps.allow_maker);
    }

    #[test]
    fn spike_downgrades_colo_to_near_colo() {
        // During the spike window a colo link runs near-colo tactics: maker
        // stays on, queue estimation and edge collapse go dark.
        let caps = capabilities_for(PhysicsClass::Colo, true);
        assert_eq!(caps.physics, PhysicsClass::NearColo);
        assert!(caps.allow_maker);
        assert!(!caps.allow_queue_estimation);
        assert!(!caps.allow_edge_collapse);
    }

    #[test]
    fn wan_doubles_min_edge() {
        let base = playbook_for_symbol("BTCUSDT");
        let wan = adjust_for_physics(base, PhysicsClass::Wan);
        assert!((wan.min_edge_bps - base.min_edge_bps * 2.0).abs() < f64::EPSILON);
        assert!(!wan.prefer_maker);
    }

    #[test]
    fn near_colo_relaxes_timings() {
        let base = playbook_for_symbol("XAUUSD");
        let nc = adjust_for_physics(base, PhysicsClass::NearColo);
        assert!((nc.maker_timeout_ms - base.maker_timeout_ms * 1.5).abs() < f64::EPSILON);
        assert!((nc.min_edge_bps - base.min_edge_bps).abs() < f64::EPSILON);
    }

    #[test]
    fn hostile_symbol_never_quotes_maker() {
        let hostile = vec!["SOLUSDT".to_string()];
        let (caps, _) = resolve("SOLUSDT", PhysicsClass::Colo, false, &hostile);
        assert!(!caps.allow_maker);
        // Other capabilities survive.
        assert!(caps.allow_queue_estimation);
    }
}
