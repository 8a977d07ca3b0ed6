use crate::construction::ConstructionType;
use crate::parse_state::ParseStatus;
use crate::token_graph::NodeId;

/// Illegal transitions on a ghost node's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GhostError {
  #[error("ghost {0} is already fulfilled")]
  AlreadyFulfilled(NodeId),

  #[error("ghost {0} has expired")]
  Expired(NodeId),
}

/// Misuse of the token graph. These indicate a corrupted or inconsistent graph
/// and are never absorbed silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
  #[error("node not found: {0}")]
  NodeNotFound(NodeId),

  #[error("node already present: {0}")]
  DuplicateNode(NodeId),

  #[error("node {0} is not a ghost")]
  NotAGhost(NodeId),

  #[error("node {0} is not a real node")]
  NotReal(NodeId),

  #[error(transparent)]
  Ghost(#[from] GhostError),
}

/// Configuration errors, raised while a grammar is compiled and never at parse time.
#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
  #[error("priority {priority} is outside the {construction_type} band {min}..={max}")]
  PriorityOutOfRange {
    construction_type: ConstructionType,
    priority: u16,
    min: u16,
    max: u16,
  },

  #[error("unknown construction type: {0}")]
  UnknownConstructionType(String),

  #[error("bad pattern in construction {construction}: {message}")]
  Pattern {
    construction: String,
    message: String,
  },

  #[error("construction {construction} marks {label} mandatory but never produces it")]
  UnproducedMandatoryElement { construction: String, label: String },

  #[error("duplicate construction: {0}")]
  DuplicateConstruction(String),

  #[error("grammar not found: {0}")]
  GrammarNotFound(String),

  #[error("grammar io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("grammar json error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Errors raised by the parse-state orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("parse state is already {0}")]
  Finished(ParseStatus),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("parse state serialization: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A parser configuration file that could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("config io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("config json error: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Ghost(#[from] GhostError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Grammar(#[from] GrammarError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
