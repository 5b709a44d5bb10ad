//! Frame-over-frame presence tracking.
//!
//! With the default grace of zero frames the present set is replaced
//! wholesale every frame: one missed detection is a departure and the next
//! sighting is a fresh arrival. A non-zero grace keeps an id present until
//! it has been missing for more than `grace_frames` consecutive frames.

use std::collections::{BTreeMap, BTreeSet};

/// Transitions produced by one frame. The two sets are disjoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceDelta {
    pub arrivals: BTreeSet<String>,
    pub departures: BTreeSet<String>,
}

#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    grace_frames: u32,
    /// Present ids and how many consecutive frames each has been missed.
    present: BTreeMap<String, u32>,
}

impl PresenceTracker {
    pub fn new(grace_frames: u32) -> Self {
        Self {
            grace_frames,
            present: BTreeMap::new(),
        }
    }

    /// Feed the ids recognized in the current frame.
    pub fn update(&mut self, seen: &BTreeSet<String>) -> PresenceDelta {
        let mut delta = PresenceDelta::default();

        for id in seen {
            if self.present.insert(id.clone(), 0).is_none() {
                delta.arrivals.insert(id.clone());
            }
        }

        let grace = self.grace_frames;
        self.present.retain(|id, missed| {
            if seen.contains(id) {
                return true;
            }
            *missed += 1;
            if *missed > grace {
                delta.departures.insert(id.clone());
                false
            } else {
                true
            }
        });

        if !delta.arrivals.is_empty() || !delta.departures.is_empty() {
            tracing::debug!(
                arrivals = ?delta.arrivals,
                departures = ?delta.departures,
                present = self.present.len(),
                "presence changed"
            );
        }

        delta
    }

    pub fn is_present(&self, institute_id: &str) -> bool {
        self.present.contains_key(institute_id)
    }

    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.present.keys().map(String::as_str)
    }

    pub fn forget(&mut self, institute_id: &str) {
        self.present.remove(institute_id);
    }
}
