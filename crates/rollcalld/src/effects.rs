//! Side effects driven by frame reports: overlay output and acknowledgment.
//!
//! Nothing here feeds back into recognition state.

use rollcall_core::{AccessEvent, BoundingBox, FrameReport};
use serde::Serialize;
use std::io::Write;

/// Receives per-frame overlays and pipeline failures.
pub trait Presenter {
    fn render(&mut self, frame: u64, report: &FrameReport);
    fn report_error(&mut self, frame: u64, error: &str);
}

/// Notified once for every committed event.
pub trait Acknowledger {
    fn acknowledge(&mut self, event: &AccessEvent);
}

#[derive(Serialize)]
struct Overlay<'a> {
    bbox: BoundingBox,
    label: &'a str,
    institute_id: &'a str,
    score: f32,
}

#[derive(Serialize)]
struct FrameLine<'a> {
    frame: u64,
    overlays: Vec<Overlay<'a>>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    events: &'a [AccessEvent],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    departures: Vec<&'a str>,
}

fn is_empty_slice<T>(s: &&[T]) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    frame: u64,
    error: &'a str,
}

/// Writes one JSON object per frame to a line-oriented sink (stdout).
pub struct JsonPresenter<W: Write> {
    out: W,
}

impl<W: Write> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, value: &impl Serialize) {
        let result = serde_json::to_writer(&mut self.out, value)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to write presentation output");
        }
    }
}

impl<W: Write> Presenter for JsonPresenter<W> {
    fn render(&mut self, frame: u64, report: &FrameReport) {
        let line = FrameLine {
            frame,
            overlays: report
                .recognitions
                .iter()
                .map(|r| Overlay {
                    bbox: r.bbox,
                    label: &r.name,
                    institute_id: &r.institute_id,
                    score: r.similarity,
                })
                .collect(),
            events: &report.events,
            departures: report.departures.iter().map(String::as_str).collect(),
        };
        self.write_line(&line);
    }

    fn report_error(&mut self, frame: u64, error: &str) {
        self.write_line(&ErrorLine { frame, error });
    }
}

/// Logs each committed event and optionally rings the terminal bell.
pub struct BellAcknowledger {
    bell: bool,
}

impl BellAcknowledger {
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

impl Acknowledger for BellAcknowledger {
    fn acknowledge(&mut self, event: &AccessEvent) {
        tracing::info!(
            institute_id = %event.institute_id,
            name = %event.name,
            kind = %event.kind,
            "{} logged for {}",
            event.kind,
            event.name
        );
        if self.bell {
            let mut err = std::io::stderr();
            let _ = err.write_all(b"\x07").and_then(|_| err.flush());
        }
    }
}
