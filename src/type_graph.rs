//! The static construction ontology: which constructions produce and require
//! which CE labels. Built once per grammar and never mutated afterwards.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use crate::construction::{CeLevel, Construction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeNode {
  Construction {
    id: String,
    construction_id: u32,
    name: String,
  },
  CeLabel {
    id: String,
    /// `None` for labels without a level (MWE outputs)
    level: Option<CeLevel>,
    label: String,
  },
}

impl TypeNode {
  pub fn id(&self) -> &str {
    match self {
      Self::Construction { id, .. } => id,
      Self::CeLabel { id, .. } => id,
    }
  }

  pub fn construction_id(&self) -> Option<u32> {
    match self {
      Self::Construction {
        construction_id, ..
      } => Some(*construction_id),
      _ => None,
    }
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
  Produces,
  Requires,
  Inherits,
  ConflictsWith,
}

impl fmt::Display for Relationship {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Produces => "produces",
      Self::Requires => "requires",
      Self::Inherits => "inherits",
      Self::ConflictsWith => "conflicts_with",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeEdge {
  pub source: String,
  pub target: String,
  pub relationship: Relationship,
  pub mandatory: bool,
}

pub fn construction_node_id(construction_id: u32) -> String {
  format!("construction_{}", construction_id)
}

pub fn ce_node_id(level: Option<CeLevel>, label: &str) -> String {
  match level {
    Some(level) => format!("ce_{}_{}", level, label),
    None => format!("ce_ce_{}", label),
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeGraphStatistics {
  pub constructions: usize,
  pub ce_labels: usize,
  pub edges: usize,
  pub mandatory_edges: usize,
}

/// Induced subgraph returned by `subgraph_for_construction`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeSubgraph {
  pub nodes: Vec<TypeNode>,
  pub edges: Vec<TypeEdge>,
}

#[derive(Debug, Default)]
pub struct TypeGraph {
  nodes: BTreeMap<String, TypeNode>,
  edges: Vec<TypeEdge>,
  outgoing: HashMap<String, Vec<usize>>,
  incoming: HashMap<String, Vec<usize>>,
  mandatory: HashMap<u32, HashSet<String>>,
}

impl TypeGraph {
  pub fn new() -> Self {
    Default::default()
  }

  /// Builds the ontology from compiled constructions. `inherits` and
  /// `conflicts_with` name other constructions; unknown names are ignored.
  pub fn from_constructions<'a, I>(constructions: I) -> Self
  where
    I: IntoIterator<Item = &'a Construction>,
  {
    let constructions = constructions.into_iter().collect::<Vec<_>>();
    let mut g = Self::new();

    for c in constructions.iter() {
      g.add_node(TypeNode::Construction {
        id: construction_node_id(c.id),
        construction_id: c.id,
        name: c.name.clone(),
      });
    }

    for c in constructions.iter() {
      let cid = construction_node_id(c.id);

      for (out_level, label) in c.produced() {
        let ce = g.ensure_ce_node(out_level, &label);
        let mandatory = c.is_mandatory(&label) && c.produced_level(&label) == Some(out_level);
        g.add_edge(&cid, &ce, Relationship::Produces, mandatory);
      }

      // required at the level the construction produces the label, so every
      // requires edge has a produces edge beside it
      for label in c.mandatory_elements.keys() {
        let Some(level) = c.produced_level(label) else {
          continue;
        };
        let ce = g.ensure_ce_node(level, label);
        g.add_edge(&cid, &ce, Relationship::Requires, true);
        g.mandatory.entry(c.id).or_default().insert(label.clone());
      }

      let by_name = |name: &str| constructions.iter().find(|o| o.name == name).map(|o| o.id);
      if let Some(parent) = c.inherits.as_deref().and_then(by_name) {
        g.add_edge(&cid, &construction_node_id(parent), Relationship::Inherits, false);
      }
      for other in c.conflicts_with.iter().filter_map(|n| by_name(n.as_str())) {
        g.add_edge(&cid, &construction_node_id(other), Relationship::ConflictsWith, false);
      }
    }

    g
  }

  fn add_node(&mut self, node: TypeNode) {
    self.nodes.insert(node.id().to_string(), node);
  }

  fn ensure_ce_node(&mut self, level: Option<CeLevel>, label: &str) -> String {
    let id = ce_node_id(level, label);
    if !self.nodes.contains_key(&id) {
      self.add_node(TypeNode::CeLabel {
        id: id.clone(),
        level,
        label: label.to_string(),
      });
    }
    id
  }

  fn add_edge(&mut self, source: &str, target: &str, relationship: Relationship, mandatory: bool) {
    let exists = self.outgoing.get(source).is_some_and(|es| {
      es.iter()
        .any(|&i| self.edges[i].target == target && self.edges[i].relationship == relationship)
    });
    if exists {
      return;
    }

    let idx = self.edges.len();
    self.edges.push(TypeEdge {
      source: source.to_string(),
      target: target.to_string(),
      relationship,
      mandatory,
    });
    self.outgoing.entry(source.to_string()).or_default().push(idx);
    self.incoming.entry(target.to_string()).or_default().push(idx);
  }

  pub fn node(&self, id: &str) -> Option<&TypeNode> {
    self.nodes.get(id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &TypeNode> {
    self.nodes.values()
  }

  pub fn edges(&self) -> &[TypeEdge] {
    &self.edges
  }

  fn outgoing_edges(&self, id: &str) -> impl Iterator<Item = &TypeEdge> {
    self
      .outgoing
      .get(id)
      .into_iter()
      .flatten()
      .map(|&i| &self.edges[i])
  }

  fn incoming_edges(&self, id: &str) -> impl Iterator<Item = &TypeEdge> {
    self
      .incoming
      .get(id)
      .into_iter()
      .flatten()
      .map(|&i| &self.edges[i])
  }

  /// Construction nodes with a `produces` edge to the CE label. Without a level
  /// every level's node for that label matches.
  pub fn constructions_producing(&self, label: &str, level: Option<CeLevel>) -> Vec<&TypeNode> {
    let targets: Vec<String> = match level {
      Some(level) => vec![ce_node_id(Some(level), label)],
      None => self
        .nodes
        .values()
        .filter(|n| matches!(n, TypeNode::CeLabel { label: l, .. } if l == label))
        .map(|n| n.id().to_string())
        .collect(),
    };

    let mut seen = HashSet::new();
    targets
      .iter()
      .flat_map(|t| self.incoming_edges(t))
      .filter(|e| e.relationship == Relationship::Produces)
      .filter(|e| seen.insert(e.source.clone()))
      .filter_map(|e| self.nodes.get(&e.source))
      .collect()
  }

  /// CE labels the construction has `requires` edges to
  pub fn required_ces(&self, construction_id: u32) -> Vec<&str> {
    self
      .outgoing_edges(&construction_node_id(construction_id))
      .filter(|e| e.relationship == Relationship::Requires)
      .filter_map(|e| match self.nodes.get(&e.target) {
        Some(TypeNode::CeLabel { label, .. }) => Some(label.as_str()),
        _ => None,
      })
      .collect()
  }

  pub fn is_mandatory(&self, construction_id: u32, label: &str) -> bool {
    self
      .mandatory
      .get(&construction_id)
      .is_some_and(|labels| labels.contains(label))
  }

  /// Bidirectional BFS from the construction node, at most `max_depth` hops.
  /// Returns the induced subgraph, empty if the construction is unknown.
  pub fn subgraph_for_construction(&self, construction_id: u32, max_depth: usize) -> TypeSubgraph {
    let start = construction_node_id(construction_id);
    if !self.nodes.contains_key(&start) {
      return TypeSubgraph::default();
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.clone());
    queue.push_back((start, 0));

    while let Some((id, depth)) = queue.pop_front() {
      if depth >= max_depth {
        continue;
      }
      let neighbours = self
        .outgoing_edges(&id)
        .map(|e| e.target.clone())
        .chain(self.incoming_edges(&id).map(|e| e.source.clone()))
        .collect::<Vec<_>>();
      for n in neighbours {
        if visited.insert(n.clone()) {
          queue.push_back((n, depth + 1));
        }
      }
    }

    TypeSubgraph {
      nodes: self
        .nodes
        .values()
        .filter(|n| visited.contains(n.id()))
        .cloned()
        .collect(),
      edges: self
        .edges
        .iter()
        .filter(|e| visited.contains(&e.source) && visited.contains(&e.target))
        .cloned()
        .collect(),
    }
  }

  pub fn statistics(&self) -> TypeGraphStatistics {
    let constructions = self
      .nodes
      .values()
      .filter(|n| matches!(n, TypeNode::Construction { .. }))
      .count();
    TypeGraphStatistics {
      constructions,
      ce_labels: self.nodes.len() - constructions,
      edges: self.edges.len(),
      mandatory_edges: self.edges.iter().filter(|e| e.mandatory).count(),
    }
  }
}

impl fmt::Display for TypeGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for e in self.edges.iter() {
      write!(f, "{} -{}-> {}", e.source, e.relationship, e.target)?;
      if e.mandatory {
        write!(f, " (mandatory)")?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::construction::{GhostType, MandatoryElement, row};

  fn grammar() -> Vec<Construction> {
    let mut np = row(1, "np", "phrasal", 60, "{DET}?:Mod {NOUN}:Head");
    np.clausal_ce = Some("Arg".into());
    np.mandatory_elements.insert(
      "Head".into(),
      MandatoryElement {
        ghost_type: GhostType::ImplicitHead,
        expected_pos: Some("NOUN".into()),
        expected_features: Default::default(),
      },
    );
    let mut sp = row(2, "subj_pred", "clausal", 30, "{PRON}:Arg {VERB}:Pred");
    sp.mandatory_elements.insert(
      "Arg".into(),
      MandatoryElement {
        ghost_type: GhostType::DroppedSubject,
        expected_pos: None,
        expected_features: Default::default(),
      },
    );
    sp.conflicts_with = vec!["np".into()];
    let mut pp = row(3, "pp", "phrasal", 55, "{ADP}:Adp {NOUN}:Head");
    pp.inherits = Some("np".into());

    vec![np, sp, pp]
      .into_iter()
      .map(|r| Construction::compile(r).unwrap())
      .collect()
  }

  #[test]
  fn test_producing_and_required() {
    let cs = grammar();
    let g = TypeGraph::from_constructions(&cs);

    let heads = g.constructions_producing("Head", Some(CeLevel::Phrasal));
    let mut ids = heads.iter().filter_map(|n| n.construction_id()).collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);

    // np produces Arg at the clausal level, subj_pred produces it from its pattern
    let args = g.constructions_producing("Arg", None);
    assert_eq!(args.len(), 2);
    assert!(g.constructions_producing("Arg", Some(CeLevel::Phrasal)).is_empty());

    assert_eq!(g.required_ces(2), vec!["Arg"]);
    assert!(g.is_mandatory(2, "Arg"));
    assert!(!g.is_mandatory(2, "Pred"));
    assert!(g.required_ces(99).is_empty());
  }

  #[test]
  fn test_mandatory_labels_are_produced() {
    // a phrasal construction whose mandatory label only exists as its clausal output
    let mut arg_np = row(4, "arg_np", "phrasal", 50, "{DET}:Mod {NOUN}:Head");
    arg_np.clausal_ce = Some("Arg".into());
    arg_np.mandatory_elements.insert(
      "Arg".into(),
      MandatoryElement {
        ghost_type: GhostType::ImplicitHead,
        expected_pos: None,
        expected_features: Default::default(),
      },
    );
    let mut cs = grammar();
    cs.push(Construction::compile(arg_np).unwrap());
    let g = TypeGraph::from_constructions(&cs);

    for req in g.edges().iter().filter(|e| e.relationship == Relationship::Requires) {
      assert!(
        g.edges().iter().any(|e| e.relationship == Relationship::Produces
          && e.source == req.source
          && e.target == req.target
          && e.mandatory),
        "{} requires {} without producing it",
        req.source,
        req.target
      );
    }
    assert!(g.node("ce_phrasal_Arg").is_none());
    assert!(g.is_mandatory(4, "Arg"));
    assert_eq!(g.required_ces(4), vec!["Arg"]);
  }

  #[test]
  fn test_subgraph_bfs() {
    let cs = grammar();
    let g = TypeGraph::from_constructions(&cs);

    let sub0 = g.subgraph_for_construction(3, 0);
    assert_eq!(sub0.nodes.len(), 1);
    assert!(sub0.edges.is_empty());

    let sub1 = g.subgraph_for_construction(3, 1);
    let ids = sub1.nodes.iter().map(|n| n.id()).collect::<Vec<_>>();
    assert!(ids.contains(&"construction_1"));
    assert!(ids.contains(&"ce_phrasal_Adp"));
    assert!(ids.contains(&"ce_phrasal_Head"));
    assert!(
      sub1
        .edges
        .iter()
        .any(|e| e.relationship == Relationship::Inherits)
    );

    assert!(g.subgraph_for_construction(42, 3).nodes.is_empty());
  }

  #[test]
  fn test_statistics() {
    let cs = grammar();
    let g = TypeGraph::from_constructions(&cs);
    let stats = g.statistics();
    assert_eq!(stats.constructions, 3);
    assert!(stats.mandatory_edges >= 4);
    assert!(g.to_string().contains("construction_2 -conflicts_with-> construction_1"));
  }
}
