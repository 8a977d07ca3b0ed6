//! The runtime parse graph: real and ghost nodes, their positions, and the
//! dependency edges between them. The only holder of node and edge authority.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::construction::{CeLabels, CeLevel, GhostType};
use crate::error::GraphError;
use crate::features::{FeatureExpectation, Features};
use crate::ghost::GhostNode;
use crate::token::Token;

/// Node ids. Real nodes are non-negative, ghosts negative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
  pub fn is_ghost_id(self) -> bool {
    self.0 < 0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Graph-local, monotonically increasing edge ids
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "e{}", self.0)
  }
}

/// Fields shared by real and ghost nodes
pub trait GraphNode {
  fn position(&self) -> usize;

  /// Label at a level; `None` asks for the level-less `ce` slot
  fn ce_label(&self, level: Option<CeLevel>) -> Option<&str>;

  fn pos(&self) -> Option<&str>;

  fn features(&self) -> Option<&Features>;

  fn is_ghost(&self) -> bool;

  /// Match against all four label slots
  fn has_ce_label(&self, label: &str) -> bool {
    CeLevel::ALL
      .into_iter()
      .map(Some)
      .chain(std::iter::once(None))
      .any(|level| self.ce_label(level) == Some(label))
  }
}

/// Bookkeeping left on a real node that absorbed a ghost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInfo {
  pub ghost_id: NodeId,
  pub ghost_type: GhostType,
  pub created_by_construction: Option<u32>,
  pub created_at_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealNode {
  pub token: Token,
  #[serde(default)]
  pub ce: CeLabels,
  /// One entry per ghost absorbed, in merge order
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub merged: Vec<MergeInfo>,
}

impl RealNode {
  pub fn was_ghost(&self) -> bool {
    !self.merged.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
  Real(RealNode),
  Ghost(GhostNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: NodeId,
  pub position: usize,
  pub kind: NodeKind,
}

impl Node {
  pub fn real(id: NodeId, position: usize, token: Token) -> Self {
    Self {
      id,
      position,
      kind: NodeKind::Real(RealNode {
        token,
        ce: CeLabels::default(),
        merged: Vec::new(),
      }),
    }
  }

  pub fn ghost(ghost: GhostNode) -> Self {
    Self {
      id: ghost.id,
      position: ghost.created_at_position,
      kind: NodeKind::Ghost(ghost),
    }
  }

  pub fn as_real(&self) -> Option<&RealNode> {
    match &self.kind {
      NodeKind::Real(r) => Some(r),
      NodeKind::Ghost(_) => None,
    }
  }

  pub fn as_real_mut(&mut self) -> Option<&mut RealNode> {
    match &mut self.kind {
      NodeKind::Real(r) => Some(r),
      NodeKind::Ghost(_) => None,
    }
  }

  pub fn as_ghost(&self) -> Option<&GhostNode> {
    match &self.kind {
      NodeKind::Ghost(g) => Some(g),
      NodeKind::Real(_) => None,
    }
  }

  pub fn as_ghost_mut(&mut self) -> Option<&mut GhostNode> {
    match &mut self.kind {
      NodeKind::Ghost(g) => Some(g),
      NodeKind::Real(_) => None,
    }
  }

  pub fn ce_labels_mut(&mut self) -> Option<&mut CeLabels> {
    self.as_real_mut().map(|r| &mut r.ce)
  }

  /// Surface word, or a `∅` placeholder for ghosts
  pub fn word(&self) -> &str {
    match &self.kind {
      NodeKind::Real(r) => &r.token.word,
      NodeKind::Ghost(_) => "∅",
    }
  }

  pub fn lemma(&self) -> Option<&str> {
    self.as_real().map(|r| r.token.lemma.as_str())
  }

  pub fn feature(&self, name: &str) -> Option<&str> {
    self.features().and_then(|fs| fs.get(name)).map(String::as_str)
  }
}

impl GraphNode for Node {
  fn position(&self) -> usize {
    self.position
  }

  fn ce_label(&self, level: Option<CeLevel>) -> Option<&str> {
    match &self.kind {
      NodeKind::Real(r) => match level {
        Some(level) => r.ce.get(level),
        None => r.ce.ce.as_deref(),
      },
      NodeKind::Ghost(g) => g.ce_label(level),
    }
  }

  fn pos(&self) -> Option<&str> {
    match &self.kind {
      NodeKind::Real(r) => Some(&r.token.pos),
      NodeKind::Ghost(g) => g.pos(),
    }
  }

  fn features(&self) -> Option<&Features> {
    match &self.kind {
      NodeKind::Real(r) => Some(&r.token.features),
      NodeKind::Ghost(_) => None,
    }
  }

  fn is_ghost(&self) -> bool {
    matches!(self.kind, NodeKind::Ghost(_))
  }
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      NodeKind::Real(r) => write!(
        f,
        "{} @{} {}/{} {}",
        self.id, self.position, r.token.word, r.token.pos, r.ce
      ),
      NodeKind::Ghost(g) => write!(f, "{}", g),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub id: EdgeId,
  pub source: NodeId,
  pub target: NodeId,
  pub relation: String,
  #[serde(default)]
  pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Edge {
  pub fn touches(&self, node: NodeId) -> bool {
    self.source == node || self.target == node
  }
}

/// Result of merging a ghost into a real node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
  pub ghost: NodeId,
  pub merged: NodeId,
  pub relinked_edges: Vec<EdgeId>,
  /// Ghost edges removed because relinking would have made them self-loops
  /// or repeated an existing (source, target) pair
  pub dropped_edges: Vec<EdgeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenGraphStatistics {
  pub nodes: usize,
  pub real_nodes: usize,
  pub ghost_nodes: usize,
  pub unfulfilled_ghosts: usize,
  pub fulfilled_ghosts: usize,
  pub edges: usize,
  pub positions: usize,
  pub average_nodes_per_position: f64,
}

/// Serialized form: plain node and edge lists, indices are rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGraphSnapshot {
  pub nodes: Vec<Node>,
  pub edges: Vec<Edge>,
  pub next_edge_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "TokenGraphSnapshot", from = "TokenGraphSnapshot")]
pub struct TokenGraph {
  nodes: BTreeMap<NodeId, Node>,
  real: BTreeSet<NodeId>,
  ghosts: BTreeSet<NodeId>,
  by_position: BTreeMap<usize, Vec<NodeId>>,
  edges: BTreeMap<EdgeId, Edge>,
  next_edge_id: u32,
}

impl From<TokenGraph> for TokenGraphSnapshot {
  fn from(g: TokenGraph) -> Self {
    Self {
      nodes: g.nodes.into_values().collect(),
      edges: g.edges.into_values().collect(),
      next_edge_id: g.next_edge_id,
    }
  }
}

impl From<TokenGraphSnapshot> for TokenGraph {
  fn from(s: TokenGraphSnapshot) -> Self {
    let mut g = Self::new();
    for node in s.nodes {
      g.insert(node);
    }
    for edge in s.edges {
      g.next_edge_id = g.next_edge_id.max(edge.id.0 + 1);
      g.edges.insert(edge.id, edge);
    }
    g.next_edge_id = g.next_edge_id.max(s.next_edge_id);
    g
  }
}

impl TokenGraph {
  pub fn new() -> Self {
    Default::default()
  }

  fn insert(&mut self, node: Node) {
    let id = node.id;
    if node.is_ghost() {
      self.ghosts.insert(id);
    } else {
      self.real.insert(id);
    }
    self.by_position.entry(node.position).or_default().push(id);
    self.nodes.insert(id, node);
  }

  pub fn add_real_node(
    &mut self,
    id: NodeId,
    position: usize,
    token: Token,
  ) -> Result<NodeId, GraphError> {
    if self.nodes.contains_key(&id) {
      return Err(GraphError::DuplicateNode(id));
    }
    self.insert(Node::real(id, position, token));
    tracing::debug!(node = %id, position, "real node added");
    Ok(id)
  }

  pub fn add_ghost_node(&mut self, ghost: GhostNode) -> Result<NodeId, GraphError> {
    let id = ghost.id;
    if self.nodes.contains_key(&id) {
      return Err(GraphError::DuplicateNode(id));
    }
    self.insert(Node::ghost(ghost));
    Ok(id)
  }

  /// Adds `source -> target`. Returns `None` (and changes nothing) for self
  /// loops and for pairs that already have an edge in this direction.
  pub fn add_edge(
    &mut self,
    source: NodeId,
    target: NodeId,
    relation: &str,
  ) -> Result<Option<EdgeId>, GraphError> {
    for id in [source, target] {
      if !self.nodes.contains_key(&id) {
        return Err(GraphError::NodeNotFound(id));
      }
    }
    if source == target || self.edge_between(source, target).is_some() {
      return Ok(None);
    }

    let id = EdgeId(self.next_edge_id);
    self.next_edge_id += 1;
    self.edges.insert(
      id,
      Edge {
        id,
        source,
        target,
        relation: relation.to_string(),
        metadata: BTreeMap::new(),
      },
    );
    tracing::debug!(edge = %id, %source, %target, relation, "edge added");
    Ok(Some(id))
  }

  pub fn set_edge_metadata(&mut self, edge: EdgeId, key: &str, value: serde_json::Value) -> bool {
    match self.edges.get_mut(&edge) {
      Some(e) => {
        e.metadata.insert(key.to_string(), value);
        true
      }
      None => false,
    }
  }

  /// Absorbs a ghost into a real node and redirects every edge of the ghost to
  /// the real node. The merged record is the ghost's data overridden by the
  /// real node's; the ghost entry stays in the graph, flagged fulfilled.
  pub fn merge_nodes(&mut self, ghost_id: NodeId, real_id: NodeId) -> Result<MergeOutcome, GraphError> {
    let real_position = self
      .nodes
      .get(&real_id)
      .ok_or(GraphError::NodeNotFound(real_id))?
      .position;
    let ghost_node = self
      .nodes
      .get(&ghost_id)
      .ok_or(GraphError::NodeNotFound(ghost_id))?;
    let ghost = ghost_node.as_ghost().ok_or(GraphError::NotAGhost(ghost_id))?;
    if self.nodes[&real_id].is_ghost() {
      return Err(GraphError::NotReal(real_id));
    }

    let mut ghost_labels = CeLabels::default();
    if let Some(ce) = &ghost.expected_ce {
      ghost_labels.set(ghost.expected_ce_level, ce);
    }
    let ghost_features = ghost
      .expected_features
      .iter()
      .filter_map(|(name, e)| match e {
        FeatureExpectation::One(v) => Some((name.clone(), v.clone())),
        FeatureExpectation::AnyOf(_) => None,
      })
      .collect::<Vec<_>>();
    let info = MergeInfo {
      ghost_id,
      ghost_type: ghost.ghost_type.clone(),
      created_by_construction: ghost.created_by_construction,
      created_at_position: ghost.created_at_position,
    };

    // the fulfil transition is the only fallible step, so do it before touching the real node
    if let Some(g) = self.ghost_mut(ghost_id) {
      g.fulfill(real_id, real_position)?;
    }

    if let Some(real) = self.nodes.get_mut(&real_id).and_then(Node::as_real_mut) {
      real.ce.fill_from(&ghost_labels);
      for (name, value) in ghost_features {
        real.token.features.entry(name).or_insert(value);
      }
      real.merged.push(info);
    }

    let dropped_edges = self.collapsing_edges(ghost_id, real_id);
    for id in dropped_edges.iter() {
      self.edges.remove(id);
    }
    let relinked_edges = self.relink_edges(ghost_id, real_id);
    tracing::debug!(
      ghost = %ghost_id,
      real = %real_id,
      relinked = relinked_edges.len(),
      dropped = dropped_edges.len(),
      "nodes merged"
    );

    Ok(MergeOutcome {
      ghost: ghost_id,
      merged: real_id,
      relinked_edges,
      dropped_edges,
    })
  }

  /// Edges of `from` that relinking onto `to` would turn into a self-loop or a
  /// second edge for an existing (source, target) pair. The lowest edge id
  /// wins among relinked edges that collide with each other.
  fn collapsing_edges(&self, from: NodeId, to: NodeId) -> Vec<EdgeId> {
    let rewrite = |n: NodeId| if n == from { to } else { n };
    let mut pairs = self
      .edges
      .values()
      .filter(|e| !e.touches(from))
      .map(|e| (e.source, e.target))
      .collect::<BTreeSet<_>>();

    let mut collapsing = Vec::new();
    for edge in self.edges.values().filter(|e| e.touches(from)) {
      let pair = (rewrite(edge.source), rewrite(edge.target));
      if pair.0 == pair.1 || !pairs.insert(pair) {
        collapsing.push(edge.id);
      }
    }
    collapsing
  }

  /// Rewrites every edge endpoint equal to `from` to `to`. Returns the ids of
  /// the rewritten edges.
  pub fn relink_edges(&mut self, from: NodeId, to: NodeId) -> Vec<EdgeId> {
    let mut affected = Vec::new();
    for edge in self.edges.values_mut() {
      if !edge.touches(from) {
        continue;
      }
      if edge.source == from {
        edge.source = to;
      }
      if edge.target == from {
        edge.target = to;
      }
      affected.push(edge.id);
    }
    affected
  }

  /// Removes a node and every edge incident to it. False if it wasn't there.
  pub fn remove_node(&mut self, id: NodeId) -> bool {
    let Some(node) = self.nodes.remove(&id) else {
      return false;
    };

    self.real.remove(&id);
    self.ghosts.remove(&id);
    if let Some(slot) = self.by_position.get_mut(&node.position) {
      slot.retain(|n| *n != id);
      if slot.is_empty() {
        self.by_position.remove(&node.position);
      }
    }
    self.edges.retain(|_, e| !e.touches(id));
    true
  }

  pub fn has_node(&self, id: NodeId) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(&id)
  }

  pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
    self.nodes.get_mut(&id)
  }

  pub fn ghost(&self, id: NodeId) -> Option<&GhostNode> {
    self.nodes.get(&id).and_then(Node::as_ghost)
  }

  pub fn ghost_mut(&mut self, id: NodeId) -> Option<&mut GhostNode> {
    self.nodes.get_mut(&id).and_then(Node::as_ghost_mut)
  }

  pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
    self.edges.get(&id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  pub fn real_nodes(&self) -> impl Iterator<Item = &Node> {
    self.real.iter().filter_map(|id| self.nodes.get(id))
  }

  pub fn ghost_nodes(&self) -> impl Iterator<Item = &GhostNode> {
    self.ghosts.iter().filter_map(|id| self.ghost(*id))
  }

  pub fn edges(&self) -> impl Iterator<Item = &Edge> {
    self.edges.values()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }

  pub fn nodes_at_position(&self, position: usize) -> Vec<&Node> {
    self
      .by_position
      .get(&position)
      .into_iter()
      .flatten()
      .filter_map(|id| self.nodes.get(id))
      .collect()
  }

  pub fn unfulfilled_ghosts(&self) -> Vec<&GhostNode> {
    self.ghost_nodes().filter(|g| !g.is_fulfilled()).collect()
  }

  pub fn fulfilled_ghosts(&self) -> Vec<&GhostNode> {
    self.ghost_nodes().filter(|g| g.is_fulfilled()).collect()
  }

  pub fn incoming_edges(&self, id: NodeId) -> Vec<&Edge> {
    self.edges.values().filter(|e| e.target == id).collect()
  }

  pub fn outgoing_edges(&self, id: NodeId) -> Vec<&Edge> {
    self.edges.values().filter(|e| e.source == id).collect()
  }

  /// The edge `source -> target`, if any
  pub fn edge_between(&self, source: NodeId, target: NodeId) -> Option<&Edge> {
    self
      .edges
      .values()
      .find(|e| e.source == source && e.target == target)
  }

  /// An edge between the two nodes in either direction
  pub fn connected(&self, a: NodeId, b: NodeId) -> bool {
    self.edge_between(a, b).is_some() || self.edge_between(b, a).is_some()
  }

  pub fn find_nodes<F>(&self, predicate: F) -> Vec<&Node>
  where
    F: Fn(&Node) -> bool,
  {
    self.nodes.values().filter(|n| predicate(*n)).collect()
  }

  pub fn find_edges<F>(&self, predicate: F) -> Vec<&Edge>
  where
    F: Fn(&Edge) -> bool,
  {
    self.edges.values().filter(|e| predicate(*e)).collect()
  }

  pub fn statistics(&self) -> TokenGraphStatistics {
    let fulfilled = self.fulfilled_ghosts().len();
    let positions = self.by_position.len();
    TokenGraphStatistics {
      nodes: self.nodes.len(),
      real_nodes: self.real.len(),
      ghost_nodes: self.ghosts.len(),
      unfulfilled_ghosts: self.ghosts.len() - fulfilled,
      fulfilled_ghosts: fulfilled,
      edges: self.edges.len(),
      positions,
      average_nodes_per_position: if positions == 0 {
        0.0
      } else {
        self.nodes.len() as f64 / positions as f64
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ghost::GhostState;
  use proptest::prelude::*;

  fn graph_with_ghost() -> (TokenGraph, NodeId, NodeId) {
    let mut g = TokenGraph::new();
    let verb = g
      .add_real_node(NodeId(1), 1, Token::new("come", "comer", "VERB"))
      .unwrap();
    let mut ghost = GhostNode::new(NodeId(-1), GhostType::DroppedSubject, 1)
      .expecting_ce(Some(CeLevel::Clausal), "Arg");
    ghost.activate();
    let ghost = g.add_ghost_node(ghost).unwrap();
    g.add_edge(verb, ghost, "nsubj").unwrap();
    (g, verb, ghost)
  }

  #[test]
  fn test_positions_hold_many_nodes() {
    let (g, verb, ghost) = graph_with_ghost();
    let at_1 = g.nodes_at_position(1).iter().map(|n| n.id).collect::<Vec<_>>();
    assert_eq!(at_1, vec![verb, ghost]);
    assert!(g.nodes_at_position(7).is_empty());
    assert_eq!(g.unfulfilled_ghosts().len(), 1);
  }

  #[test]
  fn test_add_edge_idempotent_no_self_loops() {
    let (mut g, verb, ghost) = graph_with_ghost();
    assert_eq!(g.add_edge(verb, ghost, "nsubj").unwrap(), None);
    assert_eq!(g.add_edge(verb, verb, "dep").unwrap(), None);
    assert_eq!(
      g.add_edge(verb, NodeId(99), "dep"),
      Err(GraphError::NodeNotFound(NodeId(99)))
    );
    assert_eq!(g.edge_count(), 1);
    assert!(g.connected(ghost, verb));
  }

  #[test]
  fn test_merge_relinks_and_keeps_ghost() {
    let (mut g, verb, ghost) = graph_with_ghost();
    let subj = g
      .add_real_node(NodeId(2), 2, Token::new("eu", "eu", "PRON"))
      .unwrap();

    let outcome = g.merge_nodes(ghost, subj).unwrap();
    assert_eq!(outcome.merged, subj);
    assert_eq!(outcome.relinked_edges.len(), 1);

    // no edge still references the ghost, the verb now points at the real subject
    assert!(g.edges().all(|e| !e.touches(ghost)));
    assert_eq!(g.edge_between(verb, subj).unwrap().relation, "nsubj");

    // ghost entry retained as history
    let kept = g.ghost(ghost).unwrap();
    assert_eq!(kept.state, GhostState::Fulfilled);
    assert_eq!(kept.fulfilled_by, Some(subj));
    assert_eq!(g.fulfilled_ghosts().len(), 1);

    let real = g.node(subj).unwrap().as_real().unwrap();
    assert!(real.was_ghost());
    assert_eq!(real.ce.clausal.as_deref(), Some("Arg"));
    assert_eq!(real.merged[0].ghost_id, ghost);
    assert!(outcome.dropped_edges.is_empty());
  }

  #[test]
  fn test_merge_drops_collapsing_edges() {
    let (mut g, verb, ghost) = graph_with_ghost();
    let subj = g
      .add_real_node(NodeId(2), 2, Token::new("eu", "eu", "PRON"))
      .unwrap();
    let kept = g.add_edge(verb, subj, "nsubj").unwrap().unwrap();
    let looping = g.add_edge(subj, ghost, "dep").unwrap().unwrap();
    let duplicate = g.edge_between(verb, ghost).unwrap().id;

    let outcome = g.merge_nodes(ghost, subj).unwrap();
    assert!(outcome.relinked_edges.is_empty());
    assert_eq!(outcome.dropped_edges, vec![duplicate, looping]);

    assert_eq!(g.edge_count(), 1);
    assert_eq!(g.edge_between(verb, subj).unwrap().id, kept);
    assert!(g.edges().all(|e| e.source != e.target));
  }

  #[test]
  fn test_two_ghosts_merge_into_one_node() {
    let (mut g, verb, first) = graph_with_ghost();
    let mut second = GhostNode::new(NodeId(-2), GhostType::ImplicitHead, 1);
    second.activate();
    let second = g.add_ghost_node(second).unwrap();
    let noun = g
      .add_real_node(NodeId(2), 2, Token::new("pão", "pão", "NOUN"))
      .unwrap();

    g.merge_nodes(first, noun).unwrap();
    g.merge_nodes(second, noun).unwrap();
    let real = g.node(noun).unwrap().as_real().unwrap();
    let absorbed = real.merged.iter().map(|m| m.ghost_id).collect::<Vec<_>>();
    assert_eq!(absorbed, vec![first, second]);
    assert!(g.edge_between(verb, noun).is_some());
  }

  #[test]
  fn test_real_labels_win_on_merge() {
    let (mut g, _, ghost) = graph_with_ghost();
    let subj = g
      .add_real_node(NodeId(2), 2, Token::new("eu", "eu", "PRON"))
      .unwrap();
    g.node_mut(subj).unwrap().ce_labels_mut().unwrap().clausal = Some("Subj".into());
    g.merge_nodes(ghost, subj).unwrap();
    assert_eq!(g.node(subj).unwrap().ce_label(Some(CeLevel::Clausal)), Some("Subj"));
  }

  #[test]
  fn test_merge_errors() {
    let (mut g, verb, ghost) = graph_with_ghost();
    assert_eq!(
      g.merge_nodes(NodeId(-9), verb),
      Err(GraphError::NodeNotFound(NodeId(-9)))
    );
    assert_eq!(
      g.merge_nodes(ghost, NodeId(9)),
      Err(GraphError::NodeNotFound(NodeId(9)))
    );
    assert_eq!(g.merge_nodes(verb, verb), Err(GraphError::NotAGhost(verb)));

    g.merge_nodes(ghost, verb).unwrap();
    assert!(matches!(
      g.merge_nodes(ghost, verb),
      Err(GraphError::Ghost(crate::error::GhostError::AlreadyFulfilled(_)))
    ));
  }

  #[test]
  fn test_remove_node_cascades() {
    let (mut g, verb, ghost) = graph_with_ghost();
    assert!(g.remove_node(verb));
    assert!(!g.has_node(verb));
    assert_eq!(g.edge_count(), 0);
    assert!(!g.remove_node(verb));
    assert_eq!(g.nodes_at_position(1).len(), 1);
    assert!(g.has_node(ghost));
  }

  #[test]
  fn test_statistics_and_serde() {
    let (g, _, _) = graph_with_ghost();
    let stats = g.statistics();
    assert_eq!(stats.nodes, 2);
    assert_eq!(stats.ghost_nodes, 1);
    assert_eq!(stats.positions, 1);
    assert_eq!(stats.average_nodes_per_position, 2.0);

    let json = serde_json::to_value(&g).unwrap();
    let back: TokenGraph = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(serde_json::to_value(&back).unwrap(), json);
    assert_eq!(back.statistics(), stats);
    assert_eq!(back.unfulfilled_ghosts().len(), 1);
  }

  /// Random graphs over a fixed set of nodes: (edges as index pairs, node to operate on)
  fn arb_graph() -> impl Strategy<Value = (Vec<(usize, usize)>, usize)> {
    (prop::collection::vec((0usize..6, 0usize..6), 0..20), 0usize..6)
  }

  fn build(edges: &[(usize, usize)]) -> (TokenGraph, Vec<NodeId>) {
    let mut g = TokenGraph::new();
    let mut ids = Vec::new();
    for i in 0..5 {
      ids.push(
        g.add_real_node(NodeId(i as i64), i, Token::new("w", "w", "X"))
          .unwrap(),
      );
    }
    let mut ghost = GhostNode::new(NodeId(-1), GhostType::ElidedArgument, 0);
    ghost.activate();
    ids.push(g.add_ghost_node(ghost).unwrap());
    for (s, t) in edges {
      g.add_edge(ids[*s], ids[*t], "dep").unwrap();
    }
    (g, ids)
  }

  proptest! {
    #[test]
    fn prop_remove_node_cascade((edges, victim) in arb_graph()) {
      let (mut g, ids) = build(&edges);
      let n = ids[victim];
      prop_assert!(g.remove_node(n));
      prop_assert!(!g.has_node(n));
      prop_assert!(g.edges().all(|e| e.source != n && e.target != n));
    }

    #[test]
    fn prop_merge_relink_closure((edges, real) in arb_graph()) {
      let real = real % 5;
      let (mut g, ids) = build(&edges);
      let ghost = ids[5];
      let real = ids[real];
      let before = g
        .edges()
        .filter(|e| e.touches(ghost))
        .map(|e| e.id)
        .collect::<Vec<_>>();

      let outcome = g.merge_nodes(ghost, real).unwrap();
      let mut accounted = outcome
        .relinked_edges
        .iter()
        .chain(outcome.dropped_edges.iter())
        .copied()
        .collect::<Vec<_>>();
      accounted.sort();
      prop_assert_eq!(&accounted, &before);

      let around_real = g
        .incoming_edges(real)
        .into_iter()
        .chain(g.outgoing_edges(real))
        .map(|e| e.id)
        .collect::<Vec<_>>();
      for id in outcome.relinked_edges.iter() {
        prop_assert!(around_real.contains(id));
      }
      prop_assert!(g.edges().all(|e| !e.touches(ghost)));
    }

    #[test]
    fn prop_merge_keeps_edge_invariants((edges, real) in arb_graph(), other in 0usize..5) {
      let real = real % 5;
      let (mut g, ids) = build(&edges);
      let (ghost, real, other) = (ids[5], ids[real], ids[other]);
      // ghost and real node share neighbours and point at each other
      for (s, t) in [(other, ghost), (other, real), (real, ghost), (ghost, real), (ghost, other)] {
        g.add_edge(s, t, "dep").unwrap();
      }
      let before = g
        .edges()
        .filter(|e| e.touches(ghost))
        .map(|e| e.id)
        .collect::<BTreeSet<_>>();

      let outcome = g.merge_nodes(ghost, real).unwrap();
      let accounted = outcome
        .relinked_edges
        .iter()
        .chain(outcome.dropped_edges.iter())
        .copied()
        .collect::<BTreeSet<_>>();
      prop_assert_eq!(accounted, before);
      prop_assert_eq!(
        outcome.relinked_edges.len() + outcome.dropped_edges.len(),
        outcome.relinked_edges.iter().chain(outcome.dropped_edges.iter()).collect::<BTreeSet<_>>().len()
      );

      prop_assert!(g.edges().all(|e| e.source != e.target));
      let pairs = g.edges().map(|e| (e.source, e.target)).collect::<BTreeSet<_>>();
      prop_assert_eq!(pairs.len(), g.edge_count());
      prop_assert!(g.edges().all(|e| !e.touches(ghost)));
    }
  }
}
