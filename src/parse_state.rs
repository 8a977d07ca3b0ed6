//! Per-sentence parse state: the token graph, ghost bookkeeping, alternatives,
//! the reconfiguration log and per-position snapshots.
//!
//! Mutators that change the graph's structure hand back the
//! `ReconfigurationOperation` describing the change instead of logging it;
//! whoever drives the parse appends them with `record`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::alternative::Alternative;
use crate::construction::Construction;
use crate::error::{GraphError, StateError};
use crate::ghost::{GhostManager, GhostRequest, GhostSummary};
use crate::reconfiguration::{ReconfigurationOperation, subgraph_snapshot};
use crate::token::Token;
use crate::token_graph::{
  EdgeId, GraphNode, NodeId, TokenGraph, TokenGraphSnapshot, TokenGraphStatistics,
};
use crate::type_graph::TypeGraph;

pub const DEFAULT_SNAPSHOT_LOG_WINDOW: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
  Parsing,
  Complete,
  Failed,
}

impl fmt::Display for ParseStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Parsing => "parsing",
      Self::Complete => "complete",
      Self::Failed => "failed",
    };
    write!(f, "{}", s)
  }
}

/// Debug view of the state at one position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
  pub position: usize,
  pub token: Option<Token>,
  pub token_graph: TokenGraphSnapshot,
  pub ghosts: GhostSummary,
  /// The last few log entries only; the full history stays in the log
  pub recent_operations: Vec<ReconfigurationOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseStateStatistics {
  pub status: ParseStatus,
  pub position: usize,
  pub tokens: usize,
  pub graph: TokenGraphStatistics,
  pub ghosts: GhostSummary,
  pub alternatives: usize,
  pub active_alternatives: usize,
  pub confirmed_nodes: usize,
  pub confirmed_edges: usize,
  pub reconfigurations: usize,
  pub snapshots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseState {
  pub id: u32,
  sentence: String,
  tokens: Vec<Token>,
  /// Shared and read-only across every clone of this state
  #[serde(skip)]
  type_graph: Rc<TypeGraph>,
  token_graph: TokenGraph,
  ghost_manager: GhostManager,
  alternatives: Vec<Alternative>,
  confirmed_nodes: Vec<NodeId>,
  confirmed_edges: Vec<EdgeId>,
  reconfiguration_log: Vec<ReconfigurationOperation>,
  snapshots: BTreeMap<usize, StateSnapshot>,
  current_position: usize,
  status: ParseStatus,
  metadata: BTreeMap<String, Value>,
  snapshot_log_window: usize,
  next_alternative_id: u32,
}

impl ParseState {
  pub fn new(sentence: &str, tokens: Vec<Token>, type_graph: Rc<TypeGraph>) -> Self {
    Self {
      id: 0,
      sentence: sentence.to_string(),
      tokens,
      type_graph,
      token_graph: TokenGraph::new(),
      ghost_manager: GhostManager::new(),
      alternatives: Vec::new(),
      confirmed_nodes: Vec::new(),
      confirmed_edges: Vec::new(),
      reconfiguration_log: Vec::new(),
      snapshots: BTreeMap::new(),
      current_position: 0,
      status: ParseStatus::Parsing,
      metadata: BTreeMap::new(),
      snapshot_log_window: DEFAULT_SNAPSHOT_LOG_WINDOW,
      next_alternative_id: 0,
    }
  }

  pub fn with_snapshot_log_window(mut self, window: usize) -> Self {
    self.snapshot_log_window = window;
    self
  }

  /// An independent copy for exploring a competing hypothesis. Everything but
  /// the type graph is deep-copied.
  pub fn fork(&self, id: u32) -> Self {
    let mut forked = self.clone();
    forked.id = id;
    forked
      .metadata
      .insert("forkedFrom".into(), json!(self.id));
    forked
  }

  pub fn sentence(&self) -> &str {
    &self.sentence
  }

  pub fn tokens(&self) -> &[Token] {
    &self.tokens
  }

  pub fn type_graph(&self) -> &Rc<TypeGraph> {
    &self.type_graph
  }

  pub fn token_graph(&self) -> &TokenGraph {
    &self.token_graph
  }

  pub fn ghost_manager(&self) -> &GhostManager {
    &self.ghost_manager
  }

  pub fn alternatives(&self) -> &[Alternative] {
    &self.alternatives
  }

  pub fn active_alternatives(&self) -> impl Iterator<Item = &Alternative> {
    self.alternatives.iter().filter(|a| a.is_active())
  }

  pub fn alternative(&self, id: u32) -> Option<&Alternative> {
    self.alternatives.iter().find(|a| a.id == id)
  }

  pub fn alternative_mut(&mut self, id: u32) -> Option<&mut Alternative> {
    self.alternatives.iter_mut().find(|a| a.id == id)
  }

  pub fn confirmed_nodes(&self) -> &[NodeId] {
    &self.confirmed_nodes
  }

  pub fn confirmed_edges(&self) -> &[EdgeId] {
    &self.confirmed_edges
  }

  pub fn reconfiguration_log(&self) -> &[ReconfigurationOperation] {
    &self.reconfiguration_log
  }

  pub fn snapshots(&self) -> &BTreeMap<usize, StateSnapshot> {
    &self.snapshots
  }

  pub fn snapshot(&self, position: usize) -> Option<&StateSnapshot> {
    self.snapshots.get(&position)
  }

  pub fn current_position(&self) -> usize {
    self.current_position
  }

  pub fn current_token(&self) -> Option<&Token> {
    self.tokens.get(self.current_position)
  }

  pub fn status(&self) -> ParseStatus {
    self.status
  }

  pub fn metadata(&self) -> &BTreeMap<String, Value> {
    &self.metadata
  }

  pub fn is_parsing(&self) -> bool {
    self.status == ParseStatus::Parsing
  }

  pub fn is_complete(&self) -> bool {
    self.status == ParseStatus::Complete
  }

  pub fn is_failed(&self) -> bool {
    self.status == ParseStatus::Failed
  }

  pub fn failure_reason(&self) -> Option<&str> {
    self.metadata.get("failureReason").and_then(Value::as_str)
  }

  fn ensure_parsing(&self) -> Result<(), StateError> {
    if self.is_parsing() {
      Ok(())
    } else {
      Err(StateError::Finished(self.status))
    }
  }

  /// Moves to the next position. Positions only ever increase.
  pub fn advance(&mut self) -> Result<usize, StateError> {
    self.ensure_parsing()?;
    self.current_position += 1;
    Ok(self.current_position)
  }

  /// Appends to the reconfiguration log. The only way entries get there.
  pub fn record(&mut self, op: ReconfigurationOperation) -> Result<(), StateError> {
    self.ensure_parsing()?;
    tracing::trace!(operation = %op, "reconfiguration");
    self.reconfiguration_log.push(op);
    Ok(())
  }

  pub fn record_all<I>(&mut self, ops: I) -> Result<(), StateError>
  where
    I: IntoIterator<Item = ReconfigurationOperation>,
  {
    for op in ops {
      self.record(op)?;
    }
    Ok(())
  }

  /// Adds the token at the current position as a real node; its id is its position
  pub fn add_current_token(&mut self) -> Result<NodeId, StateError> {
    self.ensure_parsing()?;
    let position = self.current_position;
    let token = self
      .tokens
      .get(position)
      .cloned()
      .ok_or(GraphError::NodeNotFound(NodeId(position as i64)))?;
    Ok(self.token_graph.add_real_node(NodeId(position as i64), position, token)?)
  }

  /// Mutable access to a real node's CE labels
  pub fn label_node(
    &mut self,
    node: NodeId,
    labels: &crate::construction::CeLabels,
  ) -> Result<(), StateError> {
    self.ensure_parsing()?;
    let ce = self
      .token_graph
      .node_mut(node)
      .ok_or(GraphError::NodeNotFound(node))?
      .ce_labels_mut()
      .ok_or(GraphError::NotReal(node))?;
    for (level, label) in labels.iter() {
      ce.set(level, label);
    }
    Ok(())
  }

  pub fn create_ghost(
    &mut self,
    request: GhostRequest,
  ) -> Result<(NodeId, ReconfigurationOperation), StateError> {
    self.ensure_parsing()?;
    let ghost_type = request.ghost_type.clone();
    let construction = request.construction;
    let expected_ce = request.expected_ce.as_ref().map(|(_, l)| l.clone());
    let id = self
      .ghost_manager
      .create_ghost(&mut self.token_graph, request)?;

    let op = ReconfigurationOperation::ghost_created(
      self.current_position,
      id,
      &ghost_type,
      construction,
      expected_ce.as_deref(),
    );
    Ok((id, op))
  }

  /// Fulfils `ghost` with `real`: merge, relink and the ghost's lifecycle
  /// transition, as one step. Returns the three records describing it.
  pub fn fulfill_ghost(
    &mut self,
    ghost: NodeId,
    real: NodeId,
  ) -> Result<Vec<ReconfigurationOperation>, StateError> {
    self.ensure_parsing()?;
    let ghost_type = self
      .token_graph
      .ghost(ghost)
      .ok_or(GraphError::NotAGhost(ghost))?
      .ghost_type
      .clone();
    let before = subgraph_snapshot(&self.token_graph, &[ghost, real]);

    let outcome = self
      .ghost_manager
      .fulfill_ghost(&mut self.token_graph, ghost, real)?;

    let after = subgraph_snapshot(&self.token_graph, &[ghost, real]);
    let position = self.current_position;
    self
      .confirmed_edges
      .retain(|e| !outcome.dropped_edges.contains(e));

    // an alternative that was waiting on this ghost now has the element realized
    for alt in self.alternatives.iter_mut() {
      if let Some(element) = alt
        .ghosts
        .iter()
        .find(|(_, g)| **g == ghost)
        .map(|(e, _)| *e)
      {
        if !alt.matched.iter().any(|(e, _)| *e == element) {
          alt.matched.push((element, real));
          alt.matched.sort_by_key(|(e, _)| *e);
        }
      }
    }

    Ok(vec![
      ReconfigurationOperation::ghost_fulfilled(position, ghost, real, &ghost_type),
      ReconfigurationOperation::nodes_merged(position, ghost, real)
        .with_before(before)
        .with_after(after),
      ReconfigurationOperation::edges_relinked(position, ghost, real, outcome.relinked_edges)
        .with_dropped_edges(&outcome.dropped_edges),
    ])
  }

  pub fn start_alternative(&mut self, construction: &Construction) -> Result<u32, StateError> {
    self.ensure_parsing()?;
    let id = self.next_alternative_id;
    self.next_alternative_id += 1;
    self
      .alternatives
      .push(Alternative::new(id, construction, self.current_position));
    tracing::debug!(alternative = id, construction = %construction.name, "alternative started");
    Ok(id)
  }

  pub fn complete_alternative(&mut self, id: u32) -> Result<Option<ReconfigurationOperation>, StateError> {
    self.ensure_parsing()?;
    let position = self.current_position;
    let Some(alt) = self.alternative_mut(id) else {
      return Ok(None);
    };
    alt.complete();
    Ok(Some(ReconfigurationOperation::construction_completed(
      position,
      alt.id,
      alt.construction_id,
      &alt.construction_name,
      alt.nodes(),
    )))
  }

  /// Abandons an alternative; ghosts it was still waiting on expire with it
  pub fn abandon_alternative(
    &mut self,
    id: u32,
    cause: &str,
  ) -> Result<Option<ReconfigurationOperation>, StateError> {
    self.ensure_parsing()?;
    let position = self.current_position;
    let Some(alt) = self.alternative_mut(id) else {
      return Ok(None);
    };
    alt.abandon();
    let construction_id = alt.construction_id;

    let pending = self
      .ghost_manager
      .ghosts_of_alternative(id)
      .iter()
      .copied()
      .filter(|g| self.token_graph.ghost(*g).is_some_and(|g| g.is_pending()))
      .collect::<Vec<_>>();
    for g in pending {
      self.ghost_manager.expire_ghost(&mut self.token_graph, g)?;
    }

    tracing::debug!(alternative = id, cause, "alternative abandoned");
    Ok(Some(ReconfigurationOperation::alternative_abandoned(
      position,
      id,
      construction_id,
      cause,
    )))
  }

  /// Pending ghosts the node at `node` could fulfil, oldest first
  pub fn fulfillable_ghosts(&self, node: NodeId) -> Vec<NodeId> {
    self.ghost_manager.fulfillable_by(&self.token_graph, node)
  }

  pub fn confirm_node(&mut self, node: NodeId) -> Result<(), StateError> {
    self.ensure_parsing()?;
    if !self.confirmed_nodes.contains(&node) {
      self.confirmed_nodes.push(node);
    }
    Ok(())
  }

  /// Adds and confirms a dependency edge. `None` if the pair is already linked
  /// or the edge would be a self loop.
  pub fn link(
    &mut self,
    head: NodeId,
    dependent: NodeId,
    relation: &str,
  ) -> Result<Option<EdgeId>, StateError> {
    self.ensure_parsing()?;
    if self.token_graph.connected(head, dependent) {
      return Ok(None);
    }
    let edge = self.token_graph.add_edge(head, dependent, relation)?;
    if let Some(e) = edge {
      self.confirmed_edges.push(e);
    }
    Ok(edge)
  }

  pub fn annotate_edge(&mut self, edge: EdgeId, key: &str, value: Value) -> Result<bool, StateError> {
    self.ensure_parsing()?;
    Ok(self.token_graph.set_edge_metadata(edge, key, value))
  }

  /// Records the state at the current position: token, graph, ghost summary
  /// and the last `snapshot_log_window` log entries
  pub fn capture_snapshot(&mut self) -> Result<(), StateError> {
    self.ensure_parsing()?;
    let position = self.current_position;
    let start = self
      .reconfiguration_log
      .len()
      .saturating_sub(self.snapshot_log_window);
    let snapshot = StateSnapshot {
      position,
      token: self.tokens.get(position).cloned(),
      token_graph: self.token_graph.clone().into(),
      ghosts: self.ghost_manager.summary(),
      recent_operations: self.reconfiguration_log[start..].to_vec(),
    };
    self.snapshots.insert(position, snapshot);
    Ok(())
  }

  /// Finishes the parse. Ghosts never fulfilled by now are expired first.
  pub fn mark_complete(&mut self) -> Result<Vec<NodeId>, StateError> {
    self.ensure_parsing()?;
    let expired = self
      .ghost_manager
      .expire_pending_ghosts(&mut self.token_graph);
    self.status = ParseStatus::Complete;
    tracing::info!(
      state = self.id,
      nodes = self.token_graph.node_count(),
      edges = self.token_graph.edge_count(),
      expired = expired.len(),
      "parse complete"
    );
    Ok(expired)
  }

  /// Fails the parse, keeping all graph state for inspection
  pub fn mark_failed(&mut self, reason: &str) -> Result<(), StateError> {
    self.ensure_parsing()?;
    self.status = ParseStatus::Failed;
    self
      .metadata
      .insert("failureReason".into(), json!(reason));
    self
      .metadata
      .insert("failedAtPosition".into(), json!(self.current_position));
    tracing::warn!(state = self.id, position = self.current_position, reason, "parse failed");
    Ok(())
  }

  /// Ghosts not fulfilled, whether still pending or already expired
  pub fn unfulfilled_ghosts(&self) -> Vec<&crate::ghost::GhostNode> {
    self.token_graph.unfulfilled_ghosts()
  }

  /// Confirmed nodes at positions `<= position`
  pub fn confirmed_up_to(&self, position: usize) -> Vec<NodeId> {
    self
      .confirmed_nodes
      .iter()
      .copied()
      .filter(|id| {
        self
          .token_graph
          .node(*id)
          .is_some_and(|n| n.position() <= position)
      })
      .collect()
  }

  pub fn statistics(&self) -> ParseStateStatistics {
    ParseStateStatistics {
      status: self.status,
      position: self.current_position,
      tokens: self.tokens.len(),
      graph: self.token_graph.statistics(),
      ghosts: self.ghost_manager.summary(),
      alternatives: self.alternatives.len(),
      active_alternatives: self.active_alternatives().count(),
      confirmed_nodes: self.confirmed_nodes.len(),
      confirmed_edges: self.confirmed_edges.len(),
      reconfigurations: self.reconfiguration_log.len(),
      snapshots: self.snapshots.len(),
    }
  }

  pub fn to_value(&self) -> Result<Value, StateError> {
    Ok(serde_json::to_value(self)?)
  }

  /// Restores a state serialized with `to_value`, attaching the shared type graph
  pub fn from_value(value: Value, type_graph: Rc<TypeGraph>) -> Result<Self, StateError> {
    let mut state: Self = serde_json::from_value(value)?;
    state.type_graph = type_graph;
    Ok(state)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::construction::{CeLevel, GhostType};
  use crate::features::ExpectedFeatures;
  use crate::ghost::GhostState;
  use crate::reconfiguration::OperationType;

  fn state() -> ParseState {
    let tokens = vec![
      Token::new("comemos", "comer", "VERB"),
      Token::new("nós", "nós", "PRON"),
    ];
    ParseState::new("comemos nós", tokens, Rc::new(TypeGraph::new()))
  }

  fn subject_request(position: usize) -> GhostRequest {
    GhostRequest {
      ghost_type: GhostType::DroppedSubject,
      position,
      construction: Some(1),
      alternative: None,
      expected_ce: Some((Some(CeLevel::Clausal), "Arg".into())),
      expected_pos: Some("PRON".into()),
      expected_features: ExpectedFeatures::new(),
    }
  }

  #[test]
  fn test_mark_complete_expires_pending_ghosts() {
    let mut s = state();
    let (ghost, op) = s.create_ghost(subject_request(0)).unwrap();
    s.record(op).unwrap();

    let expired = s.mark_complete().unwrap();
    assert_eq!(expired, vec![ghost]);
    assert!(s.is_complete());

    let unfulfilled = s.unfulfilled_ghosts();
    assert_eq!(unfulfilled.len(), 1);
    assert_eq!(unfulfilled[0].id, ghost);
    assert_eq!(unfulfilled[0].state, GhostState::Expired);

    assert!(matches!(s.advance(), Err(StateError::Finished(ParseStatus::Complete))));
    assert!(s.mark_failed("late").is_err());
  }

  #[test]
  fn test_finished_state_rejects_mutation() {
    let mut s = state();
    let node = s.add_current_token().unwrap();
    let (_, op) = s.create_ghost(subject_request(0)).unwrap();
    s.record(op.clone()).unwrap();
    s.mark_complete().unwrap();

    let finished = |r: Result<(), StateError>| matches!(r, Err(StateError::Finished(ParseStatus::Complete)));
    assert!(finished(s.record(op.clone())));
    assert!(finished(s.record_all(vec![op])));
    assert!(finished(s.confirm_node(node)));
    assert!(finished(s.capture_snapshot()));
    assert!(s.complete_alternative(0).is_err());
    assert!(s.abandon_alternative(0, "late").is_err());
    assert!(s.annotate_edge(EdgeId(0), "k", json!(1)).is_err());

    assert_eq!(s.reconfiguration_log().len(), 1);
    assert!(s.snapshots().is_empty());
    assert!(s.confirmed_nodes().is_empty());
  }

  #[test]
  fn test_fulfil_through_state_returns_records() {
    let mut s = state();
    let verb = s.add_current_token().unwrap();
    let (ghost, op) = s.create_ghost(subject_request(0)).unwrap();
    s.record(op).unwrap();
    s.link(verb, ghost, "nsubj").unwrap();

    s.advance().unwrap();
    let subj = s.add_current_token().unwrap();
    let ops = s.fulfill_ghost(ghost, subj).unwrap();
    let kinds = ops.iter().map(|o| o.operation_type).collect::<Vec<_>>();
    assert_eq!(
      kinds,
      vec![
        OperationType::GhostFulfilled,
        OperationType::NodesMerged,
        OperationType::EdgesRelinked
      ]
    );
    assert!(ops[1].before.is_some() && ops[1].after.is_some());
    assert_eq!(ops[2].affected_edges.len(), 1);
    // nothing is logged until the caller records it
    assert_eq!(s.reconfiguration_log().len(), 1);
    s.record_all(ops).unwrap();
    assert_eq!(s.reconfiguration_log().len(), 4);

    assert!(s.token_graph().edge_between(verb, subj).is_some());
  }

  #[test]
  fn test_fork_is_deep() {
    let mut s = state();
    s.add_current_token().unwrap();
    let mut fork = s.fork(1);

    let (ghost, op) = fork.create_ghost(subject_request(0)).unwrap();
    fork.record(op).unwrap();
    fork.mark_failed("testing").unwrap();

    assert!(s.token_graph().node(ghost).is_none());
    assert!(s.reconfiguration_log().is_empty());
    assert!(s.is_parsing());
    assert!(Rc::ptr_eq(s.type_graph(), fork.type_graph()));
    assert_eq!(fork.metadata()["forkedFrom"], json!(0));
  }

  #[test]
  fn test_snapshot_window() {
    let mut s = state().with_snapshot_log_window(10);
    for _ in 0..12 {
      let (_, op) = s.create_ghost(subject_request(0)).unwrap();
      s.record(op).unwrap();
    }
    s.capture_snapshot().unwrap();
    let snap = s.snapshot(0).unwrap();
    assert_eq!(snap.recent_operations.len(), 10);
    assert_eq!(snap.recent_operations[0], s.reconfiguration_log()[2]);
    assert_eq!(snap.ghosts.created, 12);
    assert_eq!(s.reconfiguration_log().len(), 12);
  }

  #[test]
  fn test_mark_failed_keeps_graph() {
    let mut s = state();
    s.add_current_token().unwrap();
    s.mark_failed("tagger gave up").unwrap();
    assert!(s.is_failed());
    assert_eq!(s.failure_reason(), Some("tagger gave up"));
    assert_eq!(s.token_graph().node_count(), 1);
  }

  #[test]
  fn test_value_roundtrip() {
    let mut s = state();
    s.add_current_token().unwrap();
    let (_, op) = s.create_ghost(subject_request(0)).unwrap();
    s.record(op).unwrap();
    s.capture_snapshot().unwrap();

    let tg = Rc::new(TypeGraph::new());
    let restored = ParseState::from_value(s.to_value().unwrap(), tg.clone()).unwrap();
    assert_eq!(restored.statistics(), s.statistics());
    assert_eq!(restored.reconfiguration_log(), s.reconfiguration_log());
    assert!(Rc::ptr_eq(restored.type_graph(), &tg));
  }
}
