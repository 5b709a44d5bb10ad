//! Per-frame decision pipeline.
//!
//! [`Pipeline`] owns every piece of mutable recognition state (roster,
//! presence, cooldowns) together with the persistence handle. It performs
//! matching, embedding refinement, presence tracking and event gating, and
//! returns a [`FrameReport`] describing what happened. Rendering and
//! acknowledgment are left to the caller.

use crate::gate::{GateOutcome, LogGate, DEFAULT_COOLDOWN_SECS};
use crate::matcher::{CosineMatcher, MatchOutcome, Matcher};
use crate::persistence::{Persistence, PersistenceError};
use crate::presence::PresenceTracker;
use crate::store::EmbeddingStore;
use crate::types::{AccessEvent, BoundingBox, Detection, EmbeddingError, EventKind};
use crate::updater::{AdaptiveUpdater, DEFAULT_ANCHOR_WEIGHT, DEFAULT_HISTORY_CAPACITY};
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeSet;
use thiserror::Error;

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("unknown employee: {0}")]
    UnknownEmployee(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Minimum cosine similarity, exclusive, for a detection to match.
    pub detection_threshold: f32,
    pub history_capacity: usize,
    pub anchor_weight: f32,
    pub cooldown: Duration,
    /// Consecutive missed frames tolerated before a departure. Zero gives
    /// immediate departure on the first missed frame.
    pub departure_grace_frames: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            anchor_weight: DEFAULT_ANCHOR_WEIGHT,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
            departure_grace_frames: 0,
        }
    }
}

/// An accepted match, kept for overlay rendering.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub bbox: BoundingBox,
    pub institute_id: String,
    pub name: String,
    pub similarity: f32,
}

/// Everything one frame produced.
#[derive(Debug, Default, Clone)]
pub struct FrameReport {
    pub recognitions: Vec<Recognition>,
    /// Detections that did not clear the threshold.
    pub unmatched: usize,
    pub arrivals: BTreeSet<String>,
    pub departures: BTreeSet<String>,
    pub events: Vec<AccessEvent>,
    pub suppressed: Vec<String>,
}

pub struct Pipeline<P, M = CosineMatcher> {
    persistence: P,
    matcher: M,
    settings: PipelineSettings,
    store: EmbeddingStore,
    updater: AdaptiveUpdater,
    presence: PresenceTracker,
    gate: LogGate,
}

impl<P: Persistence> Pipeline<P, CosineMatcher> {
    /// Build the pipeline with a full roster read.
    pub fn load(persistence: P, settings: PipelineSettings) -> Result<Self, CoreError> {
        Self::with_matcher(persistence, CosineMatcher, settings)
    }
}

impl<P: Persistence, M: Matcher> Pipeline<P, M> {
    pub fn with_matcher(persistence: P, matcher: M, settings: PipelineSettings) -> Result<Self, CoreError> {
        let store = EmbeddingStore::load(&persistence)?;
        Ok(Self {
            updater: AdaptiveUpdater::new(settings.history_capacity, settings.anchor_weight),
            presence: PresenceTracker::new(settings.departure_grace_frames),
            gate: LogGate::new(settings.cooldown),
            persistence,
            matcher,
            settings,
            store,
        })
    }

    pub fn roster(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn gate(&self) -> &LogGate {
        &self.gate
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Replace the roster with a fresh read. Presence and cooldowns are kept;
    /// ids that left the roster are dropped from presence.
    pub fn reload(&mut self) -> Result<usize, CoreError> {
        self.store = EmbeddingStore::load(&self.persistence)?;
        let stale: Vec<String> = self
            .presence
            .present()
            .filter(|id| self.store.get(id).is_none())
            .map(str::to_string)
            .collect();
        for id in &stale {
            self.presence.forget(id);
        }
        Ok(self.store.len())
    }

    /// Run matching, refinement, presence and gating for one frame.
    ///
    /// A persistence failure aborts the rest of the frame and is returned
    /// as is. Arrivals not yet gated when that happens are dropped from
    /// presence so they arrive again on the next frame.
    pub fn process_frame(&mut self, detections: &[Detection], now: NaiveDateTime) -> Result<FrameReport, CoreError> {
        let mut report = FrameReport::default();
        let mut seen = BTreeSet::new();

        for detection in detections {
            let outcome = self
                .matcher
                .best_match(&detection.embedding, &self.store, self.settings.detection_threshold);

            let (refinement, recognition) = match outcome {
                MatchOutcome::Matched { record, similarity } => {
                    let refinement = self.updater.refine(record, &detection.embedding)?;
                    let recognition = Recognition {
                        bbox: detection.bbox,
                        institute_id: record.institute_id().to_string(),
                        name: record.name().to_string(),
                        similarity,
                    };
                    (refinement, recognition)
                }
                MatchOutcome::NoMatch { best_similarity } => {
                    tracing::trace!(?best_similarity, "detection below threshold");
                    report.unmatched += 1;
                    continue;
                }
            };

            self.updater.commit(&mut self.store, &self.persistence, refinement)?;
            seen.insert(recognition.institute_id.clone());
            report.recognitions.push(recognition);
        }

        let delta = self.presence.update(&seen);

        let mut pending = delta.arrivals.iter();
        while let Some(id) = pending.next() {
            let Some(record) = self.store.get(id) else {
                continue;
            };
            match self.gate.on_arrival(record, now, &self.persistence) {
                Ok(GateOutcome::Committed(event)) => report.events.push(event),
                Ok(GateOutcome::DuplicateSuppressed { institute_id, .. }) => report.suppressed.push(institute_id),
                Err(err) => {
                    // Ungated arrivals must arrive again on the next frame.
                    let ungated: Vec<&String> = std::iter::once(id).chain(pending).collect();
                    tracing::warn!(?ungated, error = %err, "arrival gating aborted");
                    for id in ungated {
                        self.presence.forget(id);
                    }
                    return Err(err.into());
                }
            }
        }

        report.arrivals = delta.arrivals;
        report.departures = delta.departures;
        Ok(report)
    }

    /// Operator recovery action: drop accumulated drift for one employee.
    pub fn reset_drift(&mut self, institute_id: &str) -> Result<(), CoreError> {
        if self.updater.reset(&mut self.store, &self.persistence, institute_id)? {
            Ok(())
        } else {
            Err(CoreError::UnknownEmployee(institute_id.to_string()))
        }
    }

    /// Record an operator-entered event. Bypasses presence and cooldown.
    pub fn manual_log(&self, institute_id: &str, kind: EventKind, at: NaiveDateTime) -> Result<AccessEvent, CoreError> {
        manual_log(&self.persistence, institute_id, kind, at)
    }
}

/// Record an operator-entered event against a single roster row, without
/// loading the rest of the roster.
pub fn manual_log<P: Persistence>(
    persistence: &P,
    institute_id: &str,
    kind: EventKind,
    at: NaiveDateTime,
) -> Result<AccessEvent, CoreError> {
    let record = persistence
        .lookup_by_institute_id(institute_id)?
        .ok_or_else(|| CoreError::UnknownEmployee(institute_id.to_string()))?;

    let event = AccessEvent {
        employee_id: record.employee_id(),
        institute_id: record.institute_id().to_string(),
        name: record.name().to_string(),
        kind,
        timestamp: at,
    };
    persistence.append_log(&event)?;
    tracing::info!(institute_id, kind = %kind, %at, "manual access log added");
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, record, MemoryPersistence};
    use crate::types::Embedding;

    fn det(values: &[f32]) -> Detection {
        Detection {
            bbox: BoundingBox { x: 10.0, y: 20.0, width: 50.0, height: 60.0 },
            confidence: 0.9,
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn roster() -> MemoryPersistence {
        MemoryPersistence::with_roster(vec![record(1, "A", &[1.0, 0.0, 0.0]), record(2, "B", &[0.0, 1.0, 0.0])])
    }

    #[test]
    fn test_first_sighting_logs_entry() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();

        let report = pipeline.process_frame(&[det(&[0.95, 0.05, 0.0])], at(0)).unwrap();
        assert_eq!(report.recognitions.len(), 1);
        assert_eq!(report.recognitions[0].institute_id, "A");
        assert_eq!(report.arrivals.len(), 1);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].kind, EventKind::Entry);
        assert_eq!(p.updates.borrow().len(), 1);
        assert_eq!(p.logs.borrow().len(), 1);
    }

    #[test]
    fn test_unmatched_detection_has_no_effect() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();

        let report = pipeline.process_frame(&[det(&[0.0, 0.0, 1.0])], at(0)).unwrap();
        assert_eq!(report.unmatched, 1);
        assert!(report.recognitions.is_empty());
        assert!(report.events.is_empty());
        assert!(p.updates.borrow().is_empty());
        assert!(p.logs.borrow().is_empty());
    }

    #[test]
    fn test_continuous_presence_logs_once() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        for secs in 0..120 {
            pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(secs)).unwrap();
        }
        assert_eq!(p.logs.borrow().len(), 1);
        assert_eq!(p.updates.borrow().len(), 120);
    }

    #[test]
    fn test_flicker_within_cooldown_is_suppressed() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(0)).unwrap();
        let gone = pipeline.process_frame(&[], at(1)).unwrap();
        assert!(gone.departures.contains("A"));

        let back = pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(2)).unwrap();
        assert!(back.arrivals.contains("A"));
        assert!(back.events.is_empty());
        assert_eq!(back.suppressed, vec!["A".to_string()]);

        pipeline.process_frame(&[], at(3)).unwrap();
        let later = pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(75)).unwrap();
        assert_eq!(later.events.len(), 1);
        assert_eq!(later.events[0].kind, EventKind::Exit);
    }

    #[test]
    fn test_roster_embeddings_stay_unit_length() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        for secs in 0..30 {
            let wobble = (secs as f32 * 0.37).sin() * 0.3;
            pipeline
                .process_frame(&[det(&[1.0, wobble, 0.1]), det(&[wobble, 3.0, 0.0])], at(secs))
                .unwrap();
            for rec in pipeline.roster().iter() {
                assert!((rec.embedding().norm() - 1.0).abs() < 1e-5);
                assert!(rec.history().len() <= 10);
            }
        }
    }

    #[test]
    fn test_persistence_failure_surfaces() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        p.fail_writes.set(true);
        let err = pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(0)).unwrap_err();
        assert!(matches!(err, CoreError::Persistence(ref e) if e.operation == "update_embedding"));
        assert!(pipeline.gate().last_logged("A").is_none());
    }

    #[test]
    fn test_failed_log_write_rearrives_every_ungated_id() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        let both = [det(&[1.0, 0.0, 0.0]), det(&[0.0, 1.0, 0.0])];

        p.failing_appends.set(1);
        let err = pipeline.process_frame(&both, at(0)).unwrap_err();
        assert!(matches!(err, CoreError::Persistence(ref e) if e.operation == "append_log"));
        assert!(!pipeline.presence().is_present("A"));
        assert!(!pipeline.presence().is_present("B"));

        let retry = pipeline.process_frame(&both, at(1)).unwrap();
        assert_eq!(retry.arrivals.len(), 2);
        assert_eq!(retry.events.len(), 2);

        for secs in 2..120 {
            pipeline.process_frame(&both, at(secs)).unwrap();
        }
        let logged: Vec<String> = p.logs.borrow().iter().map(|e| e.institute_id.clone()).collect();
        assert_eq!(logged, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_failure_after_commit_keeps_committed_arrival() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        let both = [det(&[1.0, 0.0, 0.0]), det(&[0.0, 1.0, 0.0])];

        p.failing_appends.set(1);
        p.skip_appends_before_failure.set(1);
        assert!(pipeline.process_frame(&both, at(0)).is_err());
        assert!(pipeline.presence().is_present("A"));
        assert!(!pipeline.presence().is_present("B"));

        let retry = pipeline.process_frame(&both, at(1)).unwrap();
        assert!(retry.arrivals.contains("B"));
        assert!(!retry.arrivals.contains("A"));
        assert_eq!(p.logs.borrow().len(), 2);
    }

    #[test]
    fn test_grace_frames_prevent_rearrival() {
        let p = roster();
        let settings = PipelineSettings {
            departure_grace_frames: 3,
            cooldown: Duration::zero(),
            ..Default::default()
        };
        let mut pipeline = Pipeline::load(&p, settings).unwrap();
        pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(0)).unwrap();
        pipeline.process_frame(&[], at(1)).unwrap();
        let back = pipeline.process_frame(&[det(&[1.0, 0.0, 0.0])], at(2)).unwrap();
        assert!(back.arrivals.is_empty());
        assert_eq!(p.logs.borrow().len(), 1);
    }

    #[test]
    fn test_reset_drift() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        pipeline.process_frame(&[det(&[0.8, 0.5, 0.0])], at(0)).unwrap();
        assert_ne!(pipeline.roster().get("A").unwrap().embedding(), pipeline.roster().get("A").unwrap().anchor());

        pipeline.reset_drift("A").unwrap();
        let rec = pipeline.roster().get("A").unwrap();
        assert_eq!(rec.embedding(), rec.anchor());

        assert!(matches!(pipeline.reset_drift("nobody"), Err(CoreError::UnknownEmployee(ref id)) if id == "nobody"));
    }

    #[test]
    fn test_manual_log() {
        let p = roster();
        let pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        let ev = pipeline.manual_log("B", EventKind::Exit, at(-60)).unwrap();
        assert_eq!(ev.employee_id, 2);
        assert_eq!(p.logs.borrow().as_slice(), &[ev]);

        let err = pipeline.manual_log("Z", EventKind::Entry, at(0)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEmployee(_)));
        assert_eq!(p.logs.borrow().len(), 1);
    }

    #[test]
    fn test_reload_picks_up_new_employee() {
        let p = roster();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        assert!(!pipeline.process_frame(&[det(&[0.0, 0.0, 1.0])], at(0)).unwrap().arrivals.contains("C"));

        p.roster.borrow_mut().push(record(3, "C", &[0.0, 0.0, 1.0]));
        assert_eq!(pipeline.reload().unwrap(), 3);
        let report = pipeline.process_frame(&[det(&[0.0, 0.0, 1.0])], at(1)).unwrap();
        assert!(report.arrivals.contains("C"));
    }

    #[test]
    fn test_empty_roster_never_matches() {
        let p = MemoryPersistence::default();
        let mut pipeline = Pipeline::load(&p, PipelineSettings::default()).unwrap();
        let report = pipeline.process_frame(&[det(&[1.0, 0.0]), det(&[0.0, 0.0])], at(0)).unwrap();
        assert_eq!(report.unmatched, 2);
        assert!(report.events.is_empty());
    }
}
