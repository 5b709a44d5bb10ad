//! Detection feed: newline-delimited JSON written by the external vision
//! process on our stdin.
//!
//! ```text
//! {"op":"frame","detections":[{"bbox":{"x":0,"y":0,"width":80,"height":96},"confidence":0.91,"embedding":[...]}]}
//! {"op":"reload"}
//! {"op":"reset_drift","institute_id":"E-001"}
//! {"op":"quit"}
//! ```

use chrono::NaiveDateTime;
use rollcall_core::Detection;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FeedMessage {
    Frame {
        #[serde(default)]
        detections: Vec<Detection>,
        /// Capture time; defaults to the local clock on arrival.
        #[serde(default)]
        timestamp: Option<NaiveDateTime>,
    },
    Reload,
    ResetDrift {
        institute_id: String,
    },
    Quit,
}

/// Strip the line terminator from one raw feed line and check it is UTF-8.
pub fn decode_line(raw: &[u8]) -> Result<&str, std::str::Utf8Error> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw)
}

/// Parse one feed line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<FeedMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Keep only faces the detector is confident about.
pub fn filter_confident(detections: Vec<Detection>, min_confidence: f32) -> Vec<Detection> {
    let before = detections.len();
    let kept: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence > min_confidence)
        .collect();
    if kept.len() != before {
        tracing::trace!(dropped = before - kept.len(), "low-confidence detections dropped");
    }
    kept
}
