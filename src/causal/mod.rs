// =============================================================================
// Causal log — append-only record of everything the core saw and decided
// =============================================================================

pub mod events;
pub mod recorder;
pub mod replay;

pub use events::{CausalEvent, EventHeader, EventKind, Payload};
pub use recorder::Recorder;
pub use replay::{check_divergences, DecisionRecord, ReplayEngine};
