//! rollcall-core — Recognition matching and presence tracking engine.
//!
//! Takes face embeddings produced by an external detector, matches them
//! against the employee roster, refines stored embeddings against drift,
//! and decides when an entry or exit event should be committed.

pub mod gate;
pub mod matcher;
pub mod persistence;
pub mod pipeline;
pub mod presence;
pub mod store;
pub mod types;
pub mod updater;

#[cfg(test)]
pub(crate) mod testing;

pub use gate::{GateOutcome, LogGate};
pub use matcher::{CosineMatcher, MatchOutcome, Matcher};
pub use persistence::{Persistence, PersistenceError};
pub use pipeline::{manual_log, CoreError, FrameReport, Pipeline, PipelineSettings, Recognition};
pub use presence::{PresenceDelta, PresenceTracker};
pub use store::EmbeddingStore;
pub use types::{AccessEvent, BoundingBox, Detection, Embedding, EmbeddingError, EmployeeRecord, EventKind};
pub use updater::{AdaptiveUpdater, Refinement};
