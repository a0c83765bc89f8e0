// =============================================================================
// Normalised market events
// =============================================================================
//
// Immutable value records produced by the intake adapters. Each record is
// stamped at intake with the monotonic ingest time, a fresh event id, and the
// FNV-1a hash of its symbol. The hash is the routing key on every hot path:
// a receiver that sees a hash it does not own drops the event and bumps the
// misroute counter. It never reinterprets it.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Symbol hashing
// ---------------------------------------------------------------------------

/// FNV-1a 32-bit. Deterministic, cross-platform stable, negligible collision
/// risk for a universe of well under a thousand symbols.
pub fn fnv1a32(s: &str) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for b in s.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

/// Top-of-book update.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    pub event_id: u64,
    pub symbol: String,
    pub symbol_hash: u32,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub ts_ns: u64,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid > 0.0 {
            (self.ask - self.bid) / mid * 10_000.0
        } else {
            0.0
        }
    }
}

/// Executed trade print.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub event_id: u64,
    pub symbol: String,
    pub symbol_hash: u32,
    pub price: f64,
    pub qty: f64,
    pub is_buy: bool,
    pub ts_ns: u64,
}

/// Aggregated top-N depth per side. The intake adapter sums raw ladder levels
/// into these two figures; the depth engine never sees individual levels.
#[derive(Debug, Clone, Serialize)]
pub struct DepthUpdate {
    pub event_id: u64,
    pub symbol: String,
    pub symbol_hash: u32,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub ts_ns: u64,
}

/// Forced liquidation print.
#[derive(Debug, Clone, Serialize)]
pub struct Liquidation {
    pub event_id: u64,
    pub symbol: String,
    pub symbol_hash: u32,
    pub price: f64,
    pub qty: f64,
    pub notional: f64,
    /// True when a long position was liquidated (forced sell flow).
    pub is_long: bool,
    pub ts_ns: u64,
}

/// Sum type over the four intake records.
#[derive(Debug, Clone, Serialize)]
pub enum MarketEvent {
    Tick(Tick),
    Trade(Trade),
    Depth(DepthUpdate),
    Liquidation(Liquidation),
}

impl MarketEvent {
    pub fn event_id(&self) -> u64 {
        match self {
            Self::Tick(e) => e.event_id,
            Self::Trade(e) => e.event_id,
            Self::Depth(e) => e.event_id,
            Self::Liquidation(e) => e.event_id,
        }
    }

    pub fn symbol_hash(&self) -> u32 {
        match self {
            Self::Tick(e) => e.symbol_hash,
            Self::Trade(e) => e.symbol_hash,
            Self::Depth(e) => e.symbol_hash,
            Self::Liquidation(e) => e.symbol_hash,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Tick(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Depth(e) => &e.symbol,
            Self::Liquidation(e) => &e.symbol,
        }
    }

    pub fn ts_ns(&self) -> u64 {
        match self {
            Self::Tick(e) => e.ts_ns,
            Self::Trade(e) => e.ts_ns,
            Self::Depth(e) => e.ts_ns,
            Self::Liquidation(e) => e.ts_ns,
        }
    }
}

// ---------------------------------------------------------------------------
// Intake statistics
// ---------------------------------------------------------------------------

/// Global intake counters, read by telemetry.
#[derive(Debug, Default)]
pub struct IntakeStats {
    pub accepted: AtomicU64,
    pub dropped_misroute: AtomicU64,
    pub dropped_parse: AtomicU64,
}

impl IntakeStats {
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn misroute_count(&self) -> u64 {
        self.dropped_misroute.load(Ordering::Relaxed)
    }

    pub fn parse_failure_count(&self) -> u64 {
        self.dropped_parse.load(Ordering::Relaxed)
    }
}

/// Lane-side routing check. Returns true when the event belongs to the lane;
/// a mismatch drops the event, counts it, and raises an alert log line.
pub fn verify_route(event: &MarketEvent, lane_hash: u32, stats: &IntakeStats) -> bool {
    let got = event.symbol_hash();
    let expected = fnv1a32(event.symbol());

    if got != expected || got != lane_hash {
        stats.dropped_misroute.fetch_add(1, Ordering::Relaxed);
        warn!(
            symbol = %event.symbol(),
            expected = format!("{expected:#010x}"),
            got = format!("{got:#010x}"),
            lane = format!("{lane_hash:#010x}"),
            "misrouted event dropped"
        );
        return false;
    }

    stats.accepted.fetch_add(1, Ordering::Relaxed);
    true
}
