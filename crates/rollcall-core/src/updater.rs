//! Anchor-weighted embedding refinement.
//!
//! The working embedding of a recognized employee is pulled slightly
//! towards what the camera currently sees, while staying dominated by the
//! registration-time anchor:
//!
//! ```text
//! refined = normalize(w * anchor + (1 - w) * mean(history))
//! ```
//!
//! `history` is a bounded FIFO of recent unit-length observations.

use crate::persistence::{Persistence, PersistenceError};
use crate::store::EmbeddingStore;
use crate::types::{Embedding, EmbeddingError, EmployeeRecord};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
pub const DEFAULT_ANCHOR_WEIGHT: f32 = 0.95;

/// A computed but not yet committed embedding update.
#[derive(Debug, Clone)]
pub struct Refinement {
    pub institute_id: String,
    pub embedding: Embedding,
    pub history: VecDeque<Embedding>,
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveUpdater {
    history_capacity: usize,
    anchor_weight: f32,
}

impl Default for AdaptiveUpdater {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_ANCHOR_WEIGHT)
    }
}

impl AdaptiveUpdater {
    pub fn new(history_capacity: usize, anchor_weight: f32) -> Self {
        Self {
            history_capacity: history_capacity.max(1),
            anchor_weight: anchor_weight.clamp(0.0, 1.0),
        }
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Compute the refined embedding for `record` after observing `observed`.
    ///
    /// Pure: the record is not touched.
    pub fn refine(&self, record: &EmployeeRecord, observed: &Embedding) -> Result<Refinement, EmbeddingError> {
        let observed = observed.normalized()?;
        let anchor = record.anchor();
        if observed.dim() != anchor.dim() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: anchor.dim(),
                actual: observed.dim(),
            });
        }

        let mut history = record.history().clone();
        history.push_back(observed);
        while history.len() > self.history_capacity {
            history.pop_front();
        }

        let n = history.len() as f32;
        let mut mean = vec![0.0f32; anchor.dim()];
        for sample in &history {
            for (acc, v) in mean.iter_mut().zip(&sample.values) {
                *acc += v / n;
            }
        }

        let w = self.anchor_weight;
        let blended: Vec<f32> = anchor
            .values
            .iter()
            .zip(&mean)
            .map(|(a, m)| w * a + (1.0 - w) * m)
            .collect();

        // The blend can only vanish if the history points exactly away from
        // the anchor; fall back to the anchor itself.
        let embedding = match Embedding::new(blended).normalized() {
            Ok(e) => e,
            Err(EmbeddingError::ZeroNorm) => anchor.clone(),
            Err(e) => return Err(e),
        };

        Ok(Refinement {
            institute_id: record.institute_id().to_string(),
            embedding,
            history,
        })
    }

    /// Write the refinement through to persistence, then to the roster.
    ///
    /// The roster is left untouched if the write fails.
    pub fn commit<P: Persistence>(
        &self,
        store: &mut EmbeddingStore,
        persistence: &P,
        refinement: Refinement,
    ) -> Result<bool, PersistenceError> {
        let Some(record) = store.get_mut(&refinement.institute_id) else {
            return Ok(false);
        };
        persistence.update_embedding(&refinement.institute_id, &refinement.embedding)?;
        record.replace_embedding(refinement.embedding, refinement.history);
        Ok(true)
    }

    /// Discard accumulated drift: working embedding back to the anchor,
    /// history back to just the anchor. Persisted the same way as an update.
    ///
    /// Returns `Ok(false)` if the id is not on the roster.
    pub fn reset<P: Persistence>(
        &self,
        store: &mut EmbeddingStore,
        persistence: &P,
        institute_id: &str,
    ) -> Result<bool, PersistenceError> {
        let Some(record) = store.get(institute_id) else {
            return Ok(false);
        };
        let refinement = Refinement {
            institute_id: institute_id.to_string(),
            embedding: record.anchor().clone(),
            history: VecDeque::from([record.anchor().clone()]),
        };
        tracing::info!(institute_id, "resetting embedding drift to anchor");
        self.commit(store, persistence, refinement)
    }
}
