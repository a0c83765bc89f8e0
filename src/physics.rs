// =============================================================================
// Execution-physics detector — latency is ground truth, not configuration
// =============================================================================
//
// Classifies the link to each venue from measured acknowledgement latency:
//
//   COLO       p95 < 1.5 ms and jitter < 0.3 ms (same datacenter)
//   NEAR_COLO  p95 < 8.0 ms and jitter < 2.0 ms (same metro)
//   WAN        everything else
//   UNKNOWN    under 10 samples (treated as WAN by consumers)
//
// High-confidence classification above WAN requires 200 samples; below that
// a NEAR_COLO-looking link is still treated as WAN. Physics cannot be faked
// by config.
//
// A fresh sample above 2x the current p95 marks the venue as spiking for
// five seconds; the capability matrix downgrades one class for the duration.
// Tracking is per venue so one degraded venue cannot poison the rest.
// =============================================================================

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PhysicsClass {
    Unknown,
    Wan,
    NearColo,
    Colo,
}

impl PhysicsClass {
    /// One step towards WAN, used during spike windows.
    pub fn downgraded(self) -> Self {
        match self {
            Self::Colo => Self::NearColo,
            Self::NearColo => Self::Wan,
            Self::Wan | Self::Unknown => Self::Wan,
        }
    }
}

impl std::fmt::Display for PhysicsClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Wan => "WAN",
            Self::NearColo => "NEAR_COLO",
            Self::Colo => "COLO",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct PhysicsThresholds {
    pub colo_p95_ms: f64,
    pub colo_jitter_ms: f64,
    pub near_colo_p95_ms: f64,
    pub near_colo_jitter_ms: f64,
    pub min_samples: usize,
    pub high_confidence_samples: usize,
}

impl Default for PhysicsThresholds {
    fn default() -> Self {
        Self {
            colo_p95_ms: 1.5,
            colo_jitter_ms: 0.3,
            near_colo_p95_ms: 8.0,
            near_colo_jitter_ms: 2.0,
            min_samples: 10,
            high_confidence_samples: 200,
        }
    }
}

pub fn classify(
    p95_ms: f64,
    jitter_ms: f64,
    samples: usize,
    thresh: &PhysicsThresholds,
) -> PhysicsClass {
    if samples < thresh.min_samples {
        return PhysicsClass::Unknown;
    }

    let high_confidence = samples >= thresh.high_confidence_samples;

    if p95_ms < thresh.colo_p95_ms && jitter_ms < thresh.colo_jitter_ms {
        if high_confidence {
            return PhysicsClass::Colo;
        }
        return PhysicsClass::Wan;
    }

    if p95_ms < thresh.near_colo_p95_ms && jitter_ms < thresh.near_colo_jitter_ms {
        if high_confidence {
            return PhysicsClass::NearColo;
        }
        return PhysicsClass::Wan;
    }

    PhysicsClass::Wan
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PhysicsSnapshot {
    pub class: PhysicsClass,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub jitter_ms: f64,
    pub stddev_ms: f64,
    pub samples: usize,
    pub spiking: bool,
}

impl Default for PhysicsSnapshot {
    fn default() -> Self {
        Self {
            class: PhysicsClass::Unknown,
            p50_ms: 0.0,
            p95_ms: 0.0,
            jitter_ms: 0.0,
            stddev_ms: 0.0,
            samples: 0,
            spiking: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-venue detector
// ---------------------------------------------------------------------------

const MAX_SAMPLES: usize = 1000;
const SPIKE_WINDOW_NS: u64 = 5_000_000_000;
/// Samples required before spike detection arms.
const SPIKE_MIN_SAMPLES: usize = 50;

pub struct PhysicsDetector {
    thresh: PhysicsThresholds,
    acks_ms: VecDeque<f64>,
    spike_until_ns: u64,
    last_p95_ms: f64,
}

impl PhysicsDetector {
    pub fn new(thresh: PhysicsThresholds) -> Self {
        Self {
            thresh,
            acks_ms: VecDeque::with_capacity(MAX_SAMPLES),
            spike_until_ns: 0,
            last_p95_ms: 0.0,
        }
    }

    /// Record one acknowledgement round trip.
    pub fn record_ack(&mut self, ack_ms: f64, now_ns: u64) {
        // Spike check against the p95 as of *before* this sample.
        if self.acks_ms.len() >= SPIKE_MIN_SAMPLES
            && self.last_p95_ms > 0.0
            && ack_ms > self.last_p95_ms * 2.0
        {
            self.spike_until_ns = now_ns + SPIKE_WINDOW_NS;
            warn!(
                ack_ms,
                p95_ms = self.last_p95_ms,
                "latency spike detected, downgrading tactics for 5s"
            );
        }

        if self.acks_ms.len() == MAX_SAMPLES {
            self.acks_ms.pop_front();
        }
        self.acks_ms.push_back(ack_ms);
    }

    pub fn is_spiking(&self, now_ns: u64) -> bool {
        now_ns < self.spike_until_ns
    }

    pub fn snapshot(&mut self, now_ns: u64) -> PhysicsSnapshot {
        let n = self.acks_ms.len();
        if n == 0 {
            return PhysicsSnapshot::default();
        }

        let mut sorted: Vec<f64> = self.acks_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let p50 = sorted[n * 50 / 100];
        let p95 = sorted[(n * 95 / 100).min(n - 1)];
        let jitter = p95 - p50;

        let mean = sorted.iter().sum::<f64>() / n as f64;
        let var = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;

        self.last_p95_ms = p95;

        PhysicsSnapshot {
            class: classify(p95, jitter, n, &self.thresh),
            p50_ms: p50,
            p95_ms: p95,
            jitter_ms: jitter,
            stddev_ms: var.sqrt(),
            samples: n,
            spiking: self.is_spiking(now_ns),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.acks_ms.len()
    }
}

impl Default for PhysicsDetector {
    fn default() -> Self {
        Self::new(PhysicsThresholds::default())
    }
}

// ---------------------------------------------------------------------------
// Multi-venue tracker
// ---------------------------------------------------------------------------

/// Per-venue physics. One degraded venue must not poison the global view, so
/// every venue keeps its own detector and consumers ask per venue (or for
/// the conservative worst case).
#[derive(Default)]
pub struct VenuePhysics {
    venues: RwLock<HashMap<String, PhysicsDetector>>,
}

impl VenuePhysics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ack(&self, venue: &str, ack_ms: f64, now_ns: u64) {
        let mut venues = self.venues.write();
        venues
            .entry(venue.to_string())
            .or_default()
            .record_ack(ack_ms, now_ns);
    }

    pub fn snapshot_for(&self, venue: &str, now_ns: u64) -> PhysicsSnapshot {
        let mut venues = self.venues.write();
        venues
            .get_mut(venue)
            .map(|d| d.snapshot(now_ns))
            .unwrap_or_default()
    }

    /// Worst class across all venues, spike downgrades applied.
    pub fn conservative_class(&self, now_ns: u64) -> PhysicsClass {
        let mut venues = self.venues.write();
        let mut worst = PhysicsClass::Colo;
        let mut any = false;
        for det in venues.values_mut() {
            any = true;
            let snap = det.snapshot(now_ns);
            let mut class = snap.class;
            if snap.spiking {
                class = class.downgraded();
            }
            if class < worst {
                worst = class;
            }
        }
        if any {
            worst
        } else {
            PhysicsClass::Unknown
        }
    }

    pub fn all_snapshots(&self, now_ns: u64) -> HashMap<String, PhysicsSnapshot> {
        let mut venues = self.venues.write();
        venues
            .iter_mut()
            .map(|(name, det)| (name.clone(), det.snapshot(now_ns)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn feed(det: &mut PhysicsDetector, n: usize, ms: f64) {
        for i in 0..n {
            det.record_ack(ms, i as u64 * 1_000_000);
        }
    }

    #[test]
    fn under_ten_samples_is_unknown() {
        let mut det = PhysicsDetector::default();
        feed(&mut det, 9, 0.5);
        assert_eq!(det.snapshot(SEC).class, PhysicsClass::Unknown);
    }

    #[test]
    fn low_sample_count_never_exceeds_wan() {
        let mut det = PhysicsDetector::default();
        // Colo-grade latency but only 150 samples: confidence too low.
        feed(&mut det, 150, 0.5);
        assert_eq!(det.snapshot(SEC).class, PhysicsClass::Wan);
    }

    #[test]
    fn colo_grade_latency_classifies_colo_at_high_confidence() {
        let mut det = PhysicsDetector::default();
        feed(&mut det, 300, 0.8);
        let snap = det.snapshot(SEC);
        assert_eq!(snap.class, PhysicsClass::Colo);
        assert!(snap.jitter_ms < 0.3);
    }

    #[test]
    fn metro_latency_classifies_near_colo() {
        let mut det = PhysicsDetector::default();
        // ~4 ms with ~1 ms of spread.
        for i in 0..300usize {
            let ms = 3.5 + (i % 10) as f64 * 0.1;
            det.record_ack(ms, i as u64 * 1_000_000);
        }
        assert_eq!(det.snapshot(SEC).class, PhysicsClass::NearColo);
    }

    #[test]
    fn wide_area_latency_classifies_wan() {
        let mut det = PhysicsDetector::default();
        for i in 0..300usize {
            let ms = 30.0 + (i % 20) as f64;
            det.record_ack(ms, i as u64 * 1_000_000);
        }
        assert_eq!(det.snapshot(SEC).class, PhysicsClass::Wan);
    }

    #[test]
    fn spike_marks_venue_for_five_seconds() {
        let mut det = PhysicsDetector::default();
        feed(&mut det, 300, 0.8);
        let _ = det.snapshot(SEC); // establish p95

        // One sample over 2x p95.
        det.record_ack(2.0, 10 * SEC);
        assert!(det.is_spiking(11 * SEC));
        assert!(det.is_spiking(14 * SEC));
        // Window is 5 s.
        assert!(!det.is_spiking(16 * SEC));

        // The class itself is unchanged by one outlier.
        assert_eq!(det.snapshot(11 * SEC).class, PhysicsClass::Colo);
    }

    #[test]
    fn one_bad_venue_does_not_poison_the_other() {
        let vp = VenuePhysics::new();
        for i in 0..300u64 {
            vp.record_ack("fast", 0.8, i * 1_000_000);
            vp.record_ack("slow", 50.0, i * 1_000_000);
        }
        assert_eq!(vp.snapshot_for("fast", SEC).class, PhysicsClass::Colo);
        assert_eq!(vp.snapshot_for("slow", SEC).class, PhysicsClass::Wan);
        assert_eq!(vp.conservative_class(SEC), PhysicsClass::Wan);
    }
}
