use crate::store::EmbeddingStore;
use crate::types::{Embedding, EmployeeRecord};

/// Result of matching one observed embedding against the roster.
#[derive(Debug, Clone, Copy)]
pub enum MatchOutcome<'a> {
    Matched {
        record: &'a EmployeeRecord,
        /// Cosine similarity of the best match, strictly above the threshold.
        similarity: f32,
    },
    /// Best similarity did not exceed the threshold, or the roster is empty.
    NoMatch { best_similarity: Option<f32> },
}

impl<'a> MatchOutcome<'a> {
    pub fn record(&self) -> Option<&'a EmployeeRecord> {
        match self {
            MatchOutcome::Matched { record, .. } => Some(record),
            MatchOutcome::NoMatch { .. } => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Strategy for picking the roster entry an observed face belongs to.
pub trait Matcher {
    fn best_match<'a>(&self, probe: &Embedding, roster: &'a EmbeddingStore, threshold: f32) -> MatchOutcome<'a>;
}

/// Nearest neighbour by cosine similarity, accepted only when the
/// similarity is strictly greater than the threshold.
///
/// Ties resolve to the lowest institute id: the roster iterates in id
/// order and a later entry only wins on a strictly higher score.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match<'a>(&self, probe: &Embedding, roster: &'a EmbeddingStore, threshold: f32) -> MatchOutcome<'a> {
        let mut best: Option<(&'a EmployeeRecord, f32)> = None;

        for record in roster.iter() {
            let sim = probe.similarity(record.embedding());
            let is_better = match best {
                None => !sim.is_nan(),
                Some((_, best_sim)) => sim > best_sim,
            };
            if is_better {
                best = Some((record, sim));
            }
        }

        match best {
            Some((record, similarity)) if similarity > threshold => MatchOutcome::Matched { record, similarity },
            Some((_, similarity)) => MatchOutcome::NoMatch {
                best_similarity: Some(similarity),
            },
            None => MatchOutcome::NoMatch { best_similarity: None },
        }
    }
}
