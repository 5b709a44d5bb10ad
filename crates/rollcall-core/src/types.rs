use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has zero norm and cannot be normalized")]
    ZeroNorm,
    #[error("no embedding samples supplied")]
    NoSamples,
    #[error("embedding byte length {0} is not a multiple of 4")]
    InvalidByteLength(usize),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face identity vector produced by the external detector model.
///
/// Vectors coming off the detector are not required to be unit length;
/// everything held by the roster is normalized on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Zero vectors and vectors of different
    /// dimension are treated as dissimilar (0.0) rather than compared on
    /// a truncated prefix.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Return a unit-length copy of this embedding.
    pub fn normalized(&self) -> Result<Embedding, EmbeddingError> {
        let norm = self.norm();
        if !norm.is_finite() || norm <= 0.0 {
            return Err(EmbeddingError::ZeroNorm);
        }
        Ok(Embedding {
            values: self.values.iter().map(|v| v / norm).collect(),
        })
    }

    /// Average several samples of the same face and normalize the result.
    ///
    /// Used at registration, where one embedding is extracted per photo.
    pub fn mean_normalized(samples: &[Embedding]) -> Result<Embedding, EmbeddingError> {
        let first = samples.first().ok_or(EmbeddingError::NoSamples)?;
        let dim = first.dim();
        let mut sum = vec![0.0f32; dim];

        for sample in samples {
            if sample.dim() != dim {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dim,
                    actual: sample.dim(),
                });
            }
            for (acc, v) in sum.iter_mut().zip(&sample.values) {
                *acc += v;
            }
        }

        let n = samples.len() as f32;
        Embedding::new(sum.into_iter().map(|v| v / n).collect()).normalized()
    }

    /// Little-endian `f32` byte layout used by the roster table.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Embedding, EmbeddingError> {
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::InvalidByteLength(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Embedding { values })
    }
}

/// One face reported by the external detector for a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub embedding: Embedding,
}

/// A registered employee as held in the in-memory roster.
///
/// `embedding`, `anchor` and every history entry are unit length.
/// Only the adaptive updater replaces the working embedding.
#[derive(Debug, Clone)]
pub struct EmployeeRecord {
    employee_id: i64,
    institute_id: String,
    name: String,
    embedding: Embedding,
    anchor: Embedding,
    history: VecDeque<Embedding>,
}

impl EmployeeRecord {
    /// Build a roster record. Both vectors are normalized; the history
    /// starts out holding the anchor.
    pub fn new(
        employee_id: i64,
        institute_id: impl Into<String>,
        name: impl Into<String>,
        embedding: Embedding,
        anchor: Embedding,
    ) -> Result<Self, EmbeddingError> {
        let embedding = embedding.normalized()?;
        let anchor = anchor.normalized()?;
        if embedding.dim() != anchor.dim() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: anchor.dim(),
                actual: embedding.dim(),
            });
        }
        let history = VecDeque::from([anchor.clone()]);
        Ok(Self {
            employee_id,
            institute_id: institute_id.into(),
            name: name.into(),
            embedding,
            anchor,
            history,
        })
    }

    /// Database row id, used as the foreign key of log rows.
    pub fn employee_id(&self) -> i64 {
        self.employee_id
    }

    pub fn institute_id(&self) -> &str {
        &self.institute_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn anchor(&self) -> &Embedding {
        &self.anchor
    }

    pub fn history(&self) -> &VecDeque<Embedding> {
        &self.history
    }

    pub(crate) fn replace_embedding(&mut self, embedding: Embedding, history: VecDeque<Embedding>) {
        self.embedding = embedding;
        self.history = history;
    }
}

/// Direction of an access log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Entry,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entry => "entry",
            EventKind::Exit => "exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entry" => Ok(EventKind::Entry),
            "exit" => Ok(EventKind::Exit),
            other => Err(format!("unknown event kind '{other}' (expected entry or exit)")),
        }
    }
}

/// A committed entry/exit event, handed to persistence and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub employee_id: i64,
    pub institute_id: String,
    pub name: String,
    pub kind: EventKind,
    pub timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_ignores_scale() {
        let a = emb(&[3.0, 4.0]);
        let b = emb(&[30.0, 40.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        assert_eq!(emb(&[1.0, 0.0]).similarity(&emb(&[1.0, 0.0, 0.0])), 0.0);
    }

    #[test]
    fn test_normalized_unit_length() {
        let n = emb(&[3.0, 4.0]).normalized().unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-6);
        assert!((n.values[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_zero_vector_rejected() {
        assert_eq!(emb(&[0.0, 0.0]).normalized(), Err(EmbeddingError::ZeroNorm));
    }

    #[test]
    fn test_mean_normalized() {
        let mean = Embedding::mean_normalized(&[emb(&[1.0, 0.0]), emb(&[0.0, 1.0])]).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((mean.values[0] - expected).abs() < 1e-6);
        assert!((mean.values[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mean_normalized_rejects_mixed_dims() {
        let err = Embedding::mean_normalized(&[emb(&[1.0, 0.0]), emb(&[1.0])]).unwrap_err();
        assert_eq!(err, EmbeddingError::DimensionMismatch { expected: 2, actual: 1 });
        assert_eq!(Embedding::mean_normalized(&[]), Err(EmbeddingError::NoSamples));
    }

    #[test]
    fn test_bytes_little_endian_layout() {
        let e = emb(&[1.0, -2.5]);
        let bytes = e.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(Embedding::from_bytes(&bytes).unwrap(), e);
    }

    #[test]
    fn test_from_bytes_rejects_ragged_length() {
        assert_eq!(
            Embedding::from_bytes(&[0u8; 5]),
            Err(EmbeddingError::InvalidByteLength(5))
        );
    }

    #[test]
    fn test_record_seeds_history_with_anchor() {
        let rec = EmployeeRecord::new(1, "E1", "Ada", emb(&[0.0, 2.0]), emb(&[2.0, 0.0])).unwrap();
        assert_eq!(rec.history().len(), 1);
        assert_eq!(rec.history()[0], emb(&[1.0, 0.0]));
        assert!((rec.embedding().norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_event_kind_parse_and_display() {
        assert_eq!("Entry".parse::<EventKind>().unwrap(), EventKind::Entry);
        assert_eq!(EventKind::Exit.to_string(), "exit");
        assert!("leave".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let json = serde_json::to_string(&emb(&[0.5, 1.0])).unwrap();
        assert_eq!(json, "[0.5,1.0]");
    }
}
