use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::construction::Construction;
use crate::token_graph::NodeId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlternativeStatus {
  Active,
  Completed,
  Abandoned,
}

/// One construction match in progress: which pattern elements have been
/// realized by which node, and which are stood in for by ghosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
  pub id: u32,
  pub construction_id: u32,
  pub construction_name: String,
  pub start_position: usize,
  /// Next pattern element to match
  pub cursor: usize,
  /// (element index, node) for every realized element
  pub matched: Vec<(usize, NodeId)>,
  /// Ghosts standing in for mandatory elements, by element index
  pub ghosts: BTreeMap<usize, NodeId>,
  pub status: AlternativeStatus,
}

impl Alternative {
  pub fn new(id: u32, construction: &Construction, start_position: usize) -> Self {
    Self {
      id,
      construction_id: construction.id,
      construction_name: construction.name.clone(),
      start_position,
      cursor: 0,
      matched: Vec::new(),
      ghosts: BTreeMap::new(),
      status: AlternativeStatus::Active,
    }
  }

  pub fn is_active(&self) -> bool {
    self.status == AlternativeStatus::Active
  }

  pub fn record_match(&mut self, element: usize, node: NodeId) {
    self.matched.push((element, node));
    self.cursor = element + 1;
  }

  /// Element index a node realized, if it is part of this match
  pub fn element_of(&self, node: NodeId) -> Option<usize> {
    self
      .matched
      .iter()
      .find(|(_, n)| *n == node)
      .map(|(e, _)| *e)
      .or_else(|| {
        self
          .ghosts
          .iter()
          .find(|(_, g)| **g == node)
          .map(|(e, _)| *e)
      })
  }

  /// Realized nodes plus still-standing ghosts, in element order
  pub fn nodes(&self) -> Vec<NodeId> {
    let mut by_element = self.matched.clone();
    by_element.extend(
      self
        .ghosts
        .iter()
        .filter(|(e, _)| !self.matched.iter().any(|(m, _)| m == *e))
        .map(|(e, g)| (*e, *g)),
    );
    by_element.sort_by_key(|(e, _)| *e);
    by_element.into_iter().map(|(_, n)| n).collect()
  }

  pub fn complete(&mut self) {
    self.status = AlternativeStatus::Completed;
  }

  pub fn abandon(&mut self) {
    self.status = AlternativeStatus::Abandoned;
  }
}

impl fmt::Display for Alternative {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "alt {} {} @{} cursor={} {:?}",
      self.id, self.construction_name, self.start_position, self.cursor, self.status
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::construction::row;

  #[test]
  fn test_nodes_in_element_order() {
    let c = Construction::compile(row(1, "np", "phrasal", 60, "{DET}:Mod {ADJ}?:Mod {NOUN}:Head")).unwrap();
    let mut alt = Alternative::new(0, &c, 0);
    alt.ghosts.insert(2, NodeId(-1));
    alt.record_match(0, NodeId(0));
    assert_eq!(alt.cursor, 1);
    assert_eq!(alt.nodes(), vec![NodeId(0), NodeId(-1)]);

    alt.record_match(2, NodeId(3));
    assert_eq!(alt.nodes(), vec![NodeId(0), NodeId(3)]);
    assert_eq!(alt.element_of(NodeId(-1)), Some(2));
    assert_eq!(alt.element_of(NodeId(3)), Some(2));
    assert_eq!(alt.element_of(NodeId(9)), None);
  }
}
