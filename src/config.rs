use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::link_builder::MAX_LOCAL_DISTANCE;
use crate::parse_state::DEFAULT_SNAPSHOT_LOG_WINDOW;

/// Tunables for one parser. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
  /// Furthest a phrasal dependent may sit from its head
  pub max_local_distance: usize,
  /// Log entries kept in each per-position snapshot
  pub snapshot_log_window: usize,
  pub capture_snapshots: bool,
  /// Competing hypotheses kept alive at once
  pub max_hypotheses: usize,
  /// Fork the parse when equally ranked constructions compete for a token
  pub fork_on_ambiguity: bool,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      max_local_distance: MAX_LOCAL_DISTANCE,
      snapshot_log_window: DEFAULT_SNAPSHOT_LOG_WINDOW,
      capture_snapshots: true,
      max_hypotheses: 4,
      fork_on_ambiguity: true,
    }
  }
}

impl ParserConfig {
  pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(s)?)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    Self::from_json_str(&fs::read_to_string(path)?)
  }
}

#[test]
fn test_partial_config() {
  let c = ParserConfig::from_json_str(r#"{"max_hypotheses": 1, "capture_snapshots": false}"#).unwrap();
  assert_eq!(c.max_hypotheses, 1);
  assert!(!c.capture_snapshots);
  assert_eq!(c.max_local_distance, 5);
  assert_eq!(c.snapshot_log_window, 10);
  assert!(ParserConfig::from_json_str("42").is_err());
  assert!(ParserConfig::from_json_str(r#"{"max_hypotheses": "many"}"#).is_err());
}
