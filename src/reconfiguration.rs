//! The audit trail. Every structural change to a token graph is paired with
//! exactly one operation record; records are never mutated once built.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::construction::GhostType;
use crate::token_graph::{EdgeId, NodeId, TokenGraph};
use crate::utils::now_millis;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
  GhostCreated,
  GhostFulfilled,
  NodesMerged,
  EdgesRelinked,
  AlternativeReevaluated,
  MweAggregated,
  ConstructionCompleted,
  AlternativeAbandoned,
}

impl OperationType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::GhostCreated => "ghost_created",
      Self::GhostFulfilled => "ghost_fulfilled",
      Self::NodesMerged => "nodes_merged",
      Self::EdgesRelinked => "edges_relinked",
      Self::AlternativeReevaluated => "alternative_reevaluated",
      Self::MweAggregated => "mwe_aggregated",
      Self::ConstructionCompleted => "construction_completed",
      Self::AlternativeAbandoned => "alternative_abandoned",
    }
  }
}

impl fmt::Display for OperationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconfigurationOperation {
  pub operation_type: OperationType,
  pub position: usize,
  #[serde(default)]
  pub affected_nodes: Vec<NodeId>,
  #[serde(default)]
  pub affected_edges: Vec<EdgeId>,
  #[serde(default)]
  pub affected_alternatives: Vec<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub after: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(default)]
  pub metadata: BTreeMap<String, Value>,
  /// Milliseconds since the unix epoch
  pub timestamp: u64,
}

fn metadata(pairs: Value) -> BTreeMap<String, Value> {
  match pairs {
    Value::Object(map) => map.into_iter().collect(),
    _ => BTreeMap::new(),
  }
}

impl ReconfigurationOperation {
  fn new(operation_type: OperationType, position: usize, reason: String) -> Self {
    Self {
      operation_type,
      position,
      affected_nodes: Vec::new(),
      affected_edges: Vec::new(),
      affected_alternatives: Vec::new(),
      before: None,
      after: None,
      reason: Some(reason),
      metadata: BTreeMap::new(),
      timestamp: now_millis(),
    }
  }

  pub fn ghost_created(
    position: usize,
    ghost: NodeId,
    ghost_type: &GhostType,
    construction_id: Option<u32>,
    expected_ce: Option<&str>,
  ) -> Self {
    let mut op = Self::new(
      OperationType::GhostCreated,
      position,
      format!("mandatory element not realized, created {} ghost", ghost_type),
    );
    op.affected_nodes = vec![ghost];
    op.metadata = metadata(json!({
      "ghostType": ghost_type.to_string(),
      "constructionId": construction_id,
      "expectedCE": expected_ce,
    }));
    op
  }

  pub fn ghost_fulfilled(position: usize, ghost: NodeId, real: NodeId, ghost_type: &GhostType) -> Self {
    let mut op = Self::new(
      OperationType::GhostFulfilled,
      position,
      format!("{} ghost fulfilled by token {}", ghost_type, real),
    );
    op.affected_nodes = vec![ghost, real];
    op.metadata = metadata(json!({
      "ghostType": ghost_type.to_string(),
      "ghostId": ghost,
      "fulfilledBy": real,
    }));
    op
  }

  pub fn nodes_merged(position: usize, ghost: NodeId, real: NodeId) -> Self {
    let mut op = Self::new(
      OperationType::NodesMerged,
      position,
      format!("ghost {} merged into node {}", ghost, real),
    );
    op.affected_nodes = vec![ghost, real];
    op.metadata = metadata(json!({
      "ghostId": ghost,
      "realId": real,
    }));
    op
  }

  pub fn edges_relinked(position: usize, from: NodeId, to: NodeId, edges: Vec<EdgeId>) -> Self {
    let mut op = Self::new(
      OperationType::EdgesRelinked,
      position,
      format!("edges redirected from {} to {}", from, to),
    );
    op.affected_nodes = vec![from, to];
    op.metadata = metadata(json!({
      "from": from,
      "to": to,
      "edgeCount": edges.len(),
    }));
    op.affected_edges = edges;
    op
  }

  /// Notes edges a merge removed instead of relinking
  pub fn with_dropped_edges(mut self, dropped: &[EdgeId]) -> Self {
    if !dropped.is_empty() {
      self.metadata.insert("droppedEdges".to_string(), json!(dropped));
    }
    self
  }

  pub fn alternative_reevaluated(position: usize, alternative: u32, construction_id: u32, cause: &str) -> Self {
    let mut op = Self::new(
      OperationType::AlternativeReevaluated,
      position,
      format!("alternative {} reevaluated: {}", alternative, cause),
    );
    op.affected_alternatives = vec![alternative];
    op.metadata = metadata(json!({
      "constructionId": construction_id,
      "cause": cause,
    }));
    op
  }

  pub fn mwe_aggregated(position: usize, construction_id: u32, name: &str, nodes: Vec<NodeId>) -> Self {
    let mut op = Self::new(
      OperationType::MweAggregated,
      position,
      format!("multi-word expression {} aggregated", name),
    );
    op.metadata = metadata(json!({
      "constructionId": construction_id,
      "name": name,
      "length": nodes.len(),
    }));
    op.affected_nodes = nodes;
    op
  }

  pub fn construction_completed(
    position: usize,
    alternative: u32,
    construction_id: u32,
    name: &str,
    nodes: Vec<NodeId>,
  ) -> Self {
    let mut op = Self::new(
      OperationType::ConstructionCompleted,
      position,
      format!("construction {} completed", name),
    );
    op.affected_alternatives = vec![alternative];
    op.metadata = metadata(json!({
      "constructionId": construction_id,
      "name": name,
      "span": nodes.len(),
    }));
    op.affected_nodes = nodes;
    op
  }

  pub fn alternative_abandoned(position: usize, alternative: u32, construction_id: u32, cause: &str) -> Self {
    let mut op = Self::new(
      OperationType::AlternativeAbandoned,
      position,
      format!("alternative {} abandoned: {}", alternative, cause),
    );
    op.affected_alternatives = vec![alternative];
    op.metadata = metadata(json!({
      "constructionId": construction_id,
      "cause": cause,
    }));
    op
  }

  /// Attach a before-snapshot of the affected subgraph
  pub fn with_before(mut self, before: Value) -> Self {
    self.before = Some(before);
    self
  }

  pub fn with_after(mut self, after: Value) -> Self {
    self.after = Some(after);
    self
  }

  /// Time since the operation was recorded, against `now` (ms since epoch) or the clock
  pub fn elapsed(&self, now: Option<u64>) -> Duration {
    let now = now.unwrap_or_else(now_millis);
    Duration::from_millis(now.saturating_sub(self.timestamp))
  }
}

impl fmt::Display for ReconfigurationOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "@{} {}", self.position, self.operation_type)?;
    if !self.affected_nodes.is_empty() {
      let nodes = self.affected_nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>();
      write!(f, " nodes=[{}]", nodes.join(","))?;
    }
    if !self.affected_edges.is_empty() {
      let edges = self.affected_edges.iter().map(|e| e.to_string()).collect::<Vec<_>>();
      write!(f, " edges=[{}]", edges.join(","))?;
    }
    if let Some(reason) = &self.reason {
      write!(f, " ({})", reason)?;
    }
    Ok(())
  }
}

/// JSON snapshot of the given nodes and every edge touching them, for
/// `with_before`/`with_after`
pub fn subgraph_snapshot(graph: &TokenGraph, nodes: &[NodeId]) -> Value {
  let ns = nodes.iter().filter_map(|id| graph.node(*id)).collect::<Vec<_>>();
  let es = graph.find_edges(|e| nodes.iter().any(|n| e.touches(*n)));
  json!({ "nodes": ns, "edges": es })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ghost_created_metadata_shape() {
    let op = ReconfigurationOperation::ghost_created(3, NodeId(-1), &GhostType::DroppedSubject, Some(7), Some("Arg"));
    assert_eq!(op.operation_type, OperationType::GhostCreated);
    assert_eq!(op.metadata["ghostType"], json!("dropped_subject"));
    assert_eq!(op.metadata["constructionId"], json!(7));
    assert_eq!(op.metadata["expectedCE"], json!("Arg"));
    assert!(op.reason.is_some());

    let without = ReconfigurationOperation::ghost_created(3, NodeId(-2), &GhostType::ImplicitHead, None, None);
    assert_eq!(without.metadata["constructionId"], Value::Null);
    assert!(without.metadata.contains_key("expectedCE"));
  }

  #[test]
  fn test_elapsed_is_a_read() {
    let op = ReconfigurationOperation::nodes_merged(1, NodeId(-1), NodeId(4));
    let at = op.timestamp;
    assert_eq!(op.elapsed(Some(at + 250)), Duration::from_millis(250));
    assert_eq!(op.elapsed(Some(at.saturating_sub(5))), Duration::ZERO);
    assert_eq!(op.timestamp, at);
  }

  #[test]
  fn test_serde_names() {
    let op = ReconfigurationOperation::edges_relinked(2, NodeId(-1), NodeId(2), vec![EdgeId(0), EdgeId(3)]);
    let v = serde_json::to_value(&op).unwrap();
    assert_eq!(v["operation_type"], json!("edges_relinked"));
    assert_eq!(v["affected_edges"], json!([0, 3]));
    let back: ReconfigurationOperation = serde_json::from_value(v).unwrap();
    assert_eq!(back, op);
    assert!(!op.metadata.contains_key("droppedEdges"));

    let dropped = op.clone().with_dropped_edges(&[EdgeId(5)]);
    assert_eq!(dropped.metadata["droppedEdges"], json!([5]));
    assert_eq!(op.to_string(), "@2 edges_relinked nodes=[-1,2] edges=[e0,e3] (edges redirected from -1 to 2)");
  }
}
