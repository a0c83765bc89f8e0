// =============================================================================
// Replay engine — deterministic re-execution from the binary log
// =============================================================================
//
// Loads a session's binary causal log and hands the events back in recorded
// order. The replay driver feeds the market events through the same
// pipeline that ran live and compares every regenerated risk decision with
// the recorded one. The contract is exact: `(allow, size_multiplier)` must
// match bit for bit; any mismatch counts as a divergence, and above the
// configured threshold the process exits with code 3.
//
// Re-emitting a loaded log must produce a byte-identical file — the events
// round-trip losslessly by construction.
// =============================================================================

use std::path::Path;

use tracing::info;

use crate::causal::events::{CausalEvent, EventKind, Payload};
use crate::error::{EngineError, EngineResult};

pub struct ReplayEngine {
    events: Vec<CausalEvent>,
}

impl ReplayEngine {
    /// Load and decode the whole binary log.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        let mut events = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let (event, consumed) = CausalEvent::decode(&data[offset..])?;
            offset += consumed;
            events.push(event);
        }

        info!(
            path = %path.as_ref().display(),
            events = events.len(),
            "replay log loaded"
        );

        Ok(Self { events })
    }

    pub fn events(&self) -> &[CausalEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events
            .iter()
            .filter(|e| e.header.kind == kind)
            .count()
    }

    /// The session-start record; a log without one cannot be replayed
    /// deterministically (the UTC anchor is missing).
    pub fn session_start(&self) -> EngineResult<(i64, u8)> {
        match self.events.first() {
            Some(CausalEvent {
                payload:
                    Payload::SessionStart {
                        wall_anchor_ms,
                        mode,
                    },
                ..
            }) => Ok((*wall_anchor_ms, *mode)),
            _ => Err(EngineError::Invariant(
                "replay log has no session-start record".to_string(),
            )),
        }
    }

    /// Re-encode every event. Byte-identical to the original file.
    pub fn re_emit(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for event in &self.events {
            out.extend(event.encode());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Decision comparison
// ---------------------------------------------------------------------------

/// One live-vs-replay decision pair on the contract fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionRecord {
    pub allow: bool,
    pub final_size: f64,
}

/// Count mismatching decision pairs. Bitwise comparison on the size: the
/// replay contract tolerates no epsilon.
pub fn count_divergences(recorded: &[DecisionRecord], replayed: &[DecisionRecord]) -> u64 {
    let mut mismatches = recorded.len().abs_diff(replayed.len()) as u64;
    for (a, b) in recorded.iter().zip(replayed.iter()) {
        if a.allow != b.allow || a.final_size.to_bits() != b.final_size.to_bits() {
            mismatches += 1;
        }
    }
    mismatches
}

/// Enforce the replay contract.
pub fn check_divergences(
    recorded: &[DecisionRecord],
    replayed: &[DecisionRecord],
    threshold: u64,
) -> EngineResult<u64> {
    let count = count_divergences(recorded, replayed);
    if count > threshold {
        return Err(EngineError::ReplayDivergence { count, threshold });
    }
    Ok(count)
}
