//! Ghost nodes: mandatory elements a construction needs but the token stream
//! has not (yet) realized. Dropped subjects, implicit heads, elided arguments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::construction::{CeLevel, GhostType};
use crate::error::{GhostError, GraphError};
use crate::features::{ExpectedFeatures, Features, features_satisfy};
use crate::token_graph::{GraphNode, MergeOutcome, NodeId, TokenGraph};

/// `Created -> Pending -> {Fulfilled | Expired}`. Both terminal states are final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GhostState {
  Created,
  Pending,
  Fulfilled,
  Expired,
}

impl GhostState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Fulfilled | Self::Expired)
  }
}

impl fmt::Display for GhostState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Created => "created",
      Self::Pending => "pending",
      Self::Fulfilled => "fulfilled",
      Self::Expired => "expired",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostNode {
  pub id: NodeId,
  pub ghost_type: GhostType,
  pub state: GhostState,
  pub created_at_position: usize,
  #[serde(default)]
  pub created_by_alternative: Option<u32>,
  #[serde(default)]
  pub created_by_construction: Option<u32>,
  #[serde(default)]
  pub expected_ce: Option<String>,
  /// Level the expected CE is produced at; `None` for level-less labels
  #[serde(default)]
  pub expected_ce_level: Option<CeLevel>,
  #[serde(default)]
  pub expected_pos: Option<String>,
  #[serde(default)]
  pub expected_features: ExpectedFeatures,
  #[serde(default)]
  pub fulfilled_by: Option<NodeId>,
  #[serde(default)]
  pub fulfilled_at_position: Option<usize>,
  #[serde(default)]
  pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GhostNode {
  pub fn new(id: NodeId, ghost_type: GhostType, created_at_position: usize) -> Self {
    Self {
      id,
      ghost_type,
      state: GhostState::Created,
      created_at_position,
      created_by_alternative: None,
      created_by_construction: None,
      expected_ce: None,
      expected_ce_level: None,
      expected_pos: None,
      expected_features: ExpectedFeatures::new(),
      fulfilled_by: None,
      fulfilled_at_position: None,
      metadata: BTreeMap::new(),
    }
  }

  pub fn expecting_ce(mut self, level: Option<CeLevel>, label: &str) -> Self {
    self.expected_ce_level = level;
    self.expected_ce = Some(label.to_string());
    self
  }

  pub fn expecting_pos(mut self, pos: &str) -> Self {
    self.expected_pos = Some(pos.to_string());
    self
  }

  pub fn expecting_features(mut self, features: ExpectedFeatures) -> Self {
    self.expected_features = features;
    self
  }

  pub fn created_by(mut self, construction: Option<u32>, alternative: Option<u32>) -> Self {
    self.created_by_construction = construction;
    self.created_by_alternative = alternative;
    self
  }

  pub fn is_fulfilled(&self) -> bool {
    self.state == GhostState::Fulfilled
  }

  pub fn is_pending(&self) -> bool {
    !self.state.is_terminal()
  }

  /// `Created -> Pending`; a no-op in any other state
  pub fn activate(&mut self) {
    if self.state == GhostState::Created {
      self.state = GhostState::Pending;
    }
  }

  /// Every constraint the ghost sets must hold on the candidate. Unset
  /// constraints hold vacuously. Terminal ghosts accept nothing.
  pub fn can_be_fulfilled_by(&self, candidate: &impl GraphNode) -> bool {
    if self.state.is_terminal() || candidate.is_ghost() {
      return false;
    }

    if let Some(pos) = &self.expected_pos {
      if candidate.pos() != Some(pos.as_str()) {
        return false;
      }
    }

    if !self.expected_features.is_empty() {
      let empty = Features::new();
      let actual = candidate.features().unwrap_or(&empty);
      if !features_satisfy(&self.expected_features, actual) {
        return false;
      }
    }

    if let Some(ce) = &self.expected_ce {
      if !candidate.has_ce_label(ce) {
        return false;
      }
    }

    true
  }

  pub fn fulfill(&mut self, real_id: NodeId, position: usize) -> Result<(), GhostError> {
    match self.state {
      GhostState::Fulfilled => Err(GhostError::AlreadyFulfilled(self.id)),
      GhostState::Expired => Err(GhostError::Expired(self.id)),
      _ => {
        self.state = GhostState::Fulfilled;
        self.fulfilled_by = Some(real_id);
        self.fulfilled_at_position = Some(position);
        Ok(())
      }
    }
  }

  pub fn expire(&mut self) -> Result<(), GhostError> {
    match self.state {
      GhostState::Fulfilled => Err(GhostError::AlreadyFulfilled(self.id)),
      GhostState::Expired => Err(GhostError::Expired(self.id)),
      _ => {
        self.state = GhostState::Expired;
        Ok(())
      }
    }
  }
}

impl GraphNode for GhostNode {
  fn position(&self) -> usize {
    self.created_at_position
  }

  fn ce_label(&self, level: Option<CeLevel>) -> Option<&str> {
    if level == self.expected_ce_level {
      self.expected_ce.as_deref()
    } else {
      None
    }
  }

  fn pos(&self) -> Option<&str> {
    self.expected_pos.as_deref()
  }

  fn features(&self) -> Option<&Features> {
    None
  }

  fn is_ghost(&self) -> bool {
    true
  }
}

impl fmt::Display for GhostNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ghost {} <{}> @{} {}", self.id, self.ghost_type, self.created_at_position, self.state)?;
    if let Some(ce) = &self.expected_ce {
      write!(f, " ce={}", ce)?;
    }
    if let Some(pos) = &self.expected_pos {
      write!(f, " pos={}", pos)?;
    }
    if let Some(by) = self.fulfilled_by {
      write!(f, " by={}", by)?;
    }
    Ok(())
  }
}

/// Everything needed to create a ghost; the manager assigns the id
#[derive(Debug, Clone)]
pub struct GhostRequest {
  pub ghost_type: GhostType,
  pub position: usize,
  pub construction: Option<u32>,
  pub alternative: Option<u32>,
  pub expected_ce: Option<(Option<CeLevel>, String)>,
  pub expected_pos: Option<String>,
  pub expected_features: ExpectedFeatures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostSummary {
  pub created: usize,
  pub pending: usize,
  pub fulfilled: usize,
  pub expired: usize,
}

/// Lifecycle bookkeeping for the ghosts of one parse. The ghost records
/// themselves live in the token graph; the manager allocates their ids, indexes
/// them by creator and drives their transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostManager {
  next_id: i64,
  by_construction: BTreeMap<u32, Vec<NodeId>>,
  by_alternative: BTreeMap<u32, Vec<NodeId>>,
  created: usize,
  fulfilled: usize,
  expired: usize,
}

impl Default for GhostManager {
  fn default() -> Self {
    Self {
      next_id: -1,
      by_construction: BTreeMap::new(),
      by_alternative: BTreeMap::new(),
      created: 0,
      fulfilled: 0,
      expired: 0,
    }
  }
}

impl GhostManager {
  pub fn new() -> Self {
    Default::default()
  }

  fn allocate_id(&mut self) -> NodeId {
    let id = NodeId(self.next_id);
    self.next_id -= 1;
    id
  }

  /// Was the ghost allocated by this manager? Ghosts added to the graph some
  /// other way are transitioned but not counted.
  fn owns(&self, ghost: NodeId) -> bool {
    ghost.0 < 0 && ghost.0 > self.next_id
  }

  /// Creates a pending ghost and inserts it into the graph
  pub fn create_ghost(
    &mut self,
    graph: &mut TokenGraph,
    request: GhostRequest,
  ) -> Result<NodeId, GraphError> {
    let id = self.allocate_id();
    let mut ghost = GhostNode::new(id, request.ghost_type, request.position)
      .created_by(request.construction, request.alternative)
      .expecting_features(request.expected_features);
    if let Some((level, label)) = &request.expected_ce {
      ghost = ghost.expecting_ce(*level, label);
    }
    if let Some(pos) = &request.expected_pos {
      ghost = ghost.expecting_pos(pos);
    }
    ghost.activate();

    graph.add_ghost_node(ghost)?;

    if let Some(c) = request.construction {
      self.by_construction.entry(c).or_default().push(id);
    }
    if let Some(a) = request.alternative {
      self.by_alternative.entry(a).or_default().push(id);
    }
    self.created += 1;

    tracing::debug!(ghost = %id, position = request.position, "ghost created");
    Ok(id)
  }

  /// Pending ghosts created before `node`'s position that `node` can fulfil,
  /// oldest first
  pub fn fulfillable_by(&self, graph: &TokenGraph, node: NodeId) -> Vec<NodeId> {
    let Some(candidate) = graph.node(node) else {
      return Vec::new();
    };
    let mut ghosts = graph
      .unfulfilled_ghosts()
      .into_iter()
      .filter(|g| g.is_pending())
      .filter(|g| g.created_at_position < candidate.position())
      .filter(|g| g.can_be_fulfilled_by(candidate))
      .collect::<Vec<_>>();
    ghosts.sort_by_key(|g| (g.created_at_position, std::cmp::Reverse(g.id)));
    ghosts.into_iter().map(|g| g.id).collect()
  }

  pub fn find_fulfillable(&self, graph: &TokenGraph, node: NodeId) -> Option<NodeId> {
    self.fulfillable_by(graph, node).first().copied()
  }

  /// Merges the ghost into the real node (relinking its edges)
  pub fn fulfill_ghost(
    &mut self,
    graph: &mut TokenGraph,
    ghost: NodeId,
    real: NodeId,
  ) -> Result<MergeOutcome, GraphError> {
    let outcome = graph.merge_nodes(ghost, real)?;
    if self.owns(ghost) {
      self.fulfilled += 1;
    }
    tracing::debug!(%ghost, %real, relinked = outcome.relinked_edges.len(), "ghost fulfilled");
    Ok(outcome)
  }

  /// Expires one pending ghost
  pub fn expire_ghost(&mut self, graph: &mut TokenGraph, ghost: NodeId) -> Result<(), GraphError> {
    graph
      .ghost_mut(ghost)
      .ok_or(GraphError::NodeNotFound(ghost))?
      .expire()?;
    if self.owns(ghost) {
      self.expired += 1;
    }
    Ok(())
  }

  /// Expires every ghost still pending, returning their ids
  pub fn expire_pending_ghosts(&mut self, graph: &mut TokenGraph) -> Vec<NodeId> {
    let pending = graph
      .unfulfilled_ghosts()
      .into_iter()
      .filter(|g| g.is_pending())
      .map(|g| g.id)
      .collect::<Vec<_>>();

    let mut expired = Vec::with_capacity(pending.len());
    for id in pending {
      if self.expire_ghost(graph, id).is_ok() {
        expired.push(id);
      }
    }
    if !expired.is_empty() {
      tracing::debug!(count = expired.len(), "expired pending ghosts");
    }
    expired
  }

  pub fn ghosts_of_construction(&self, construction: u32) -> &[NodeId] {
    self
      .by_construction
      .get(&construction)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  pub fn ghosts_of_alternative(&self, alternative: u32) -> &[NodeId] {
    self
      .by_alternative
      .get(&alternative)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  pub fn summary(&self) -> GhostSummary {
    GhostSummary {
      created: self.created,
      pending: self
        .created
        .saturating_sub(self.fulfilled)
        .saturating_sub(self.expired),
      fulfilled: self.fulfilled,
      expired: self.expired,
    }
  }
}
