// =============================================================================
// Engine clock — single monotonic time source + event id allocator
// =============================================================================
//
// All ordering and correctness decisions use `now_ns()`. The wall clock is
// only consulted once, at session start, to capture an anchor that maps
// monotonic nanoseconds to UTC for human-facing purposes (time buckets, CSV
// rows). The anchor is written into the causal log so that a replay derives
// the exact same UTC hours from the recorded timestamps without ever touching
// a real-time clock API.
//
// In Replay mode the clock is driven entirely by the log: `advance_to` is
// called with each replayed event's timestamp and `now_ns` returns the last
// value fed in. Constructing a replay clock performs no clock reads at all.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{TimeZone, Timelike, Utc};

/// Nanoseconds offset applied to the session-local monotonic base so that a
/// valid timestamp is never zero (zero means "unset" in several records).
const START_OFFSET_NS: u64 = 1_000_000_000;

enum TimeSource {
    /// Live / Shadow: monotonic reads off a session base instant.
    Wall { base: Instant },
    /// Replay: time only moves when the log feeds it.
    Driven { now_ns: AtomicU64 },
}

pub struct EngineClock {
    source: TimeSource,
    /// UTC milliseconds matching `now_ns() == START_OFFSET_NS`.
    wall_anchor_ms: i64,
    next_event_id: AtomicU64,
}

impl EngineClock {
    /// Clock for Live and Shadow modes. Reads the wall clock exactly once to
    /// capture the UTC anchor.
    pub fn wall() -> Self {
        Self {
            source: TimeSource::Wall {
                base: Instant::now(),
            },
            wall_anchor_ms: Utc::now().timestamp_millis(),
            next_event_id: AtomicU64::new(1),
        }
    }

    /// Clock for Replay mode. `wall_anchor_ms` comes from the session-start
    /// record of the log being replayed; no real-time API is touched.
    pub fn replay(wall_anchor_ms: i64) -> Self {
        Self {
            source: TimeSource::Driven {
                now_ns: AtomicU64::new(START_OFFSET_NS),
            },
            wall_anchor_ms,
            next_event_id: AtomicU64::new(1),
        }
    }

    /// Current engine time in monotonic nanoseconds.
    pub fn now_ns(&self) -> u64 {
        match &self.source {
            TimeSource::Wall { base } => base.elapsed().as_nanos() as u64 + START_OFFSET_NS,
            TimeSource::Driven { now_ns } => now_ns.load(Ordering::Acquire),
        }
    }

    /// Replay driver: move time forward to a replayed event's timestamp.
    /// Time never moves backward; stale timestamps are ignored.
    pub fn advance_to(&self, ts_ns: u64) {
        if let TimeSource::Driven { now_ns } = &self.source {
            now_ns.fetch_max(ts_ns, Ordering::AcqRel);
        }
    }

    pub fn is_driven(&self) -> bool {
        matches!(self.source, TimeSource::Driven { .. })
    }

    /// Globally unique, monotonically increasing event id.
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Anchor written into the causal log's session-start record.
    pub fn wall_anchor_ms(&self) -> i64 {
        self.wall_anchor_ms
    }

    /// UTC milliseconds corresponding to an engine timestamp.
    pub fn wall_ms_for(&self, ts_ns: u64) -> i64 {
        let delta_ns = ts_ns as i64 - START_OFFSET_NS as i64;
        self.wall_anchor_ms + delta_ns / 1_000_000
    }

    /// UTC hour (0-23) for an engine timestamp. Derived from the recorded
    /// anchor, so live and replay agree bit-for-bit.
    pub fn utc_hour_for(&self, ts_ns: u64) -> u32 {
        let ms = self.wall_ms_for(ts_ns);
        match Utc.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.hour(),
            None => 0,
        }
    }

    /// UTC calendar date string (YYYY-MM-DD) for an engine timestamp.
    pub fn utc_date_for(&self, ts_ns: u64) -> String {
        let ms = self.wall_ms_for(ts_ns);
        match Utc.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.format("%Y-%m-%d").to_string(),
            None => "1970-01-01".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_monotonic() {
        let clock = EngineClock::wall();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
        assert!(a >= START_OFFSET_NS);
    }

    #[test]
    fn event_ids_are_unique_and_increasing() {
        let clock = EngineClock::wall();
        let a = clock.next_event_id();
        let b = clock.next_event_id();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn driven_clock_never_moves_backward() {
        let clock = EngineClock::replay(0);
        clock.advance_to(5_000_000_000);
        clock.advance_to(3_000_000_000);
        assert_eq!(clock.now_ns(), 5_000_000_000);
    }

    #[test]
    fn utc_hour_derivation_matches_anchor() {
        // Anchor at exactly 2025-06-01 14:00:00 UTC.
        let anchor_ms = Utc
            .with_ymd_and_hms(2025, 6, 1, 14, 0, 0)
            .unwrap()
            .timestamp_millis();
        let clock = EngineClock::replay(anchor_ms);

        // START_OFFSET_NS maps to the anchor itself.
        assert_eq!(clock.utc_hour_for(START_OFFSET_NS), 14);
        // Two hours of engine time later.
        let two_hours = START_OFFSET_NS + 2 * 3600 * 1_000_000_000;
        assert_eq!(clock.utc_hour_for(two_hours), 16);
        assert_eq!(clock.utc_date_for(two_hours), "2025-06-01");
    }
}
