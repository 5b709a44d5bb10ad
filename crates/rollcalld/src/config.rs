use anyhow::Context;
use rollcall_core::PipelineSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Defaults, overlaid by an optional TOML file named in `ROLLCALL_CONFIG`,
/// overlaid by individual `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity a detection must exceed to match a roster entry.
    pub detection_threshold: f32,
    /// Detector confidence a face must exceed before it is matched at all.
    pub face_detection_confidence: f32,
    /// Minimum seconds between two logged events for the same employee.
    pub log_cooldown_secs: u64,
    /// Number of recent observations kept per employee.
    pub history_capacity: usize,
    /// Weight of the registration anchor in the refined embedding.
    pub anchor_weight: f32,
    /// Consecutive missed frames before someone counts as gone.
    pub departure_grace_frames: u32,
    /// Ring the terminal bell when an event is committed.
    pub acknowledge_bell: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: rollcall_store::default_db_path(),
            detection_threshold: 0.6,
            face_detection_confidence: 0.6,
            log_cooldown_secs: 60,
            history_capacity: 10,
            anchor_weight: 0.95,
            departure_grace_frames: 0,
            acknowledge_bell: true,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and `ROLLCALL_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let base = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply environment-style overrides. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "ROLLCALL_DETECTION_THRESHOLD", &mut self.detection_threshold);
        override_parsed(
            &lookup,
            "ROLLCALL_FACE_DETECTION_CONFIDENCE",
            &mut self.face_detection_confidence,
        );
        override_parsed(&lookup, "ROLLCALL_LOG_COOLDOWN_SECS", &mut self.log_cooldown_secs);
        override_parsed(&lookup, "ROLLCALL_HISTORY_CAPACITY", &mut self.history_capacity);
        override_parsed(&lookup, "ROLLCALL_ANCHOR_WEIGHT", &mut self.anchor_weight);
        override_parsed(&lookup, "ROLLCALL_DEPARTURE_GRACE_FRAMES", &mut self.departure_grace_frames);
        if let Some(v) = lookup("ROLLCALL_ACK_BELL") {
            self.acknowledge_bell = v != "0";
        }
        self
    }

    pub fn pipeline_settings(&self) -> anyhow::Result<PipelineSettings> {
        let cooldown = i64::try_from(self.log_cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .with_context(|| format!("log_cooldown_secs {} is out of range", self.log_cooldown_secs))?;
        Ok(PipelineSettings {
            detection_threshold: self.detection_threshold,
            history_capacity: self.history_capacity,
            anchor_weight: self.anchor_weight,
            cooldown,
            departure_grace_frames: self.departure_grace_frames,
        })
    }
}

fn override_parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = lookup(key) {
        match value.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %value, "ignoring unparseable config override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.detection_threshold, 0.6);
        assert_eq!(c.face_detection_confidence, 0.6);
        assert_eq!(c.log_cooldown_secs, 60);
        assert_eq!(c.history_capacity, 10);
        assert_eq!(c.departure_grace_frames, 0);
        assert!(c.db_path.ends_with("rollcall/employees.db"));
    }

    #[test]
    fn test_env_overrides() {
        let c = Config::default().with_overrides(lookup(&[
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/test.db"),
            ("ROLLCALL_DETECTION_THRESHOLD", "0.55"),
            ("ROLLCALL_DEPARTURE_GRACE_FRAMES", "5"),
            ("ROLLCALL_ACK_BELL", "0"),
        ]));
        assert_eq!(c.db_path, PathBuf::from("/var/lib/rollcall/test.db"));
        assert_eq!(c.detection_threshold, 0.55);
        assert_eq!(c.departure_grace_frames, 5);
        assert!(!c.acknowledge_bell);
    }

    #[test]
    fn test_bad_override_keeps_previous_value() {
        let c = Config::default().with_overrides(lookup(&[("ROLLCALL_LOG_COOLDOWN_SECS", "soon")]));
        assert_eq!(c.log_cooldown_secs, 60);
    }

    #[test]
    fn test_toml_partial_file() {
        let c: Config = toml::from_str("log_cooldown_secs = 120\nanchor_weight = 0.9\n").unwrap();
        assert_eq!(c.log_cooldown_secs, 120);
        assert_eq!(c.anchor_weight, 0.9);
        assert_eq!(c.history_capacity, 10);
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        assert!(toml::from_str::<Config>("detection_treshold = 0.7\n").is_err());
    }

    #[test]
    fn test_pipeline_settings() {
        let c = Config {
            log_cooldown_secs: 90,
            ..Config::default()
        };
        let s = c.pipeline_settings().unwrap();
        assert_eq!(s.cooldown, chrono::Duration::seconds(90));
        assert_eq!(s.detection_threshold, 0.6);
    }

    #[test]
    fn test_oversized_cooldown_rejected() {
        for secs in [u64::MAX, i64::MAX as u64] {
            let value = secs.to_string();
            let c = Config::default().with_overrides(lookup(&[("ROLLCALL_LOG_COOLDOWN_SECS", value.as_str())]));
            assert_eq!(c.log_cooldown_secs, secs);
            let err = c.pipeline_settings().unwrap_err();
            assert!(err.to_string().contains("out of range"), "got {err}");
        }
    }
}
