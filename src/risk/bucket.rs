// =============================================================================
// Time-bucket quality guard — session bleed prevention
// =============================================================================
//
// UTC hours group into seven session buckets. Each bucket keeps a slow
// baseline of its own expectancy and compares every finished session against
// it: "barely positive" is still capital drag when the bucket used to do
// better. A session below 40% of baseline counts as bad; two consecutive bad
// sessions disable the bucket outright.
// =============================================================================

use serde::Serialize;
use tracing::info;

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeBucket {
    AsiaEarly,
    AsiaLate,
    LondonOpen,
    LondonMain,
    UsOverlap,
    UsMain,
    UsClose,
}

pub const BUCKET_COUNT: usize = 7;

pub fn bucket_for_hour(utc_hour: u32) -> TimeBucket {
    match utc_hour {
        0..=3 => TimeBucket::AsiaEarly,
        4..=7 => TimeBucket::AsiaLate,
        8..=9 => TimeBucket::LondonOpen,
        10..=11 => TimeBucket::LondonMain,
        12..=15 => TimeBucket::UsOverlap,
        16..=19 => TimeBucket::UsMain,
        _ => TimeBucket::UsClose,
    }
}

impl TimeBucket {
    fn index(self) -> usize {
        match self {
            Self::AsiaEarly => 0,
            Self::AsiaLate => 1,
            Self::LondonOpen => 2,
            Self::LondonMain => 3,
            Self::UsOverlap => 4,
            Self::UsMain => 5,
            Self::UsClose => 6,
        }
    }
}

impl std::fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AsiaEarly => "ASIA_EARLY",
            Self::AsiaLate => "ASIA_LATE",
            Self::LondonOpen => "LONDON_OPEN",
            Self::LondonMain => "LONDON_MAIN",
            Self::UsOverlap => "US_OVERLAP",
            Self::UsMain => "US_MAIN",
            Self::UsClose => "US_CLOSE",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Per-bucket guard
// ---------------------------------------------------------------------------

/// Slow baseline adaptation rate.
const BASELINE_ALPHA: f64 = 0.01;
/// A session under this fraction of baseline is bad.
const BAD_THRESHOLD: f64 = 0.4;
/// Sessions before the guard acts.
const MIN_UPDATES: u32 = 3;

#[derive(Debug, Clone, Default)]
struct BucketQuality {
    baseline: f64,
    current: f64,
    bad_sessions: u32,
    updates: u32,
}

impl BucketQuality {
    fn update(&mut self, session_expectancy: f64) {
        self.current = session_expectancy;
        self.updates += 1;

        if self.baseline == 0.0 && session_expectancy != 0.0 {
            self.baseline = session_expectancy;
            return;
        }

        self.baseline =
            (1.0 - BASELINE_ALPHA) * self.baseline + BASELINE_ALPHA * session_expectancy;

        if self.baseline > 0.0 && session_expectancy < self.baseline * BAD_THRESHOLD {
            self.bad_sessions += 1;
        } else {
            self.bad_sessions = 0;
        }
    }

    fn quality_ratio(&self) -> f64 {
        if self.baseline <= 0.0 || self.current >= self.baseline {
            1.0
        } else {
            self.current / self.baseline
        }
    }

    fn size_multiplier(&self) -> f64 {
        if self.updates < MIN_UPDATES {
            return 1.0;
        }
        if self.bad_sessions >= 2 {
            return 0.0;
        }
        if self.bad_sessions == 1 {
            return 0.5;
        }

        let q = self.quality_ratio();
        if q >= 1.0 {
            1.0
        } else if q >= 0.7 {
            0.7
        } else if q >= 0.4 {
            0.4
        } else {
            0.0
        }
    }

    fn is_disabled(&self) -> bool {
        self.updates >= MIN_UPDATES && self.bad_sessions >= 2
    }
}

// ---------------------------------------------------------------------------
// Per-symbol manager
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BucketQualityManager {
    buckets: [BucketQuality; BUCKET_COUNT],
}

impl BucketQualityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a finished session's expectancy for its bucket.
    pub fn update(&mut self, bucket: TimeBucket, session_expectancy: f64) {
        let guard = &mut self.buckets[bucket.index()];
        let old_mult = guard.size_multiplier();
        guard.update(session_expectancy);
        let new_mult = guard.size_multiplier();

        if (old_mult - new_mult).abs() > f64::EPSILON {
            info!(
                bucket = %bucket,
                quality = guard.quality_ratio(),
                bad_sessions = guard.bad_sessions,
                multiplier = new_mult,
                disabled = guard.is_disabled(),
                "time bucket quality changed"
            );
        }
    }

    pub fn size_multiplier(&self, utc_hour: u32) -> f64 {
        self.buckets[bucket_for_hour(utc_hour).index()].size_multiplier()
    }

    pub fn is_disabled(&self, bucket: TimeBucket) -> bool {
        self.buckets[bucket.index()].is_disabled()
    }

    pub fn quality_ratio(&self, bucket: TimeBucket) -> f64 {
        self.buckets[bucket.index()].quality_ratio()
    }
}
