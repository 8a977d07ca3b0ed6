//! Renderings of a finished parse: Graphviz, a replay of the reconfiguration
//! log, and an indented dependency tree.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write;

use crate::ghost::GhostState;
use crate::reconfiguration::ReconfigurationOperation;
use crate::token_graph::{GraphNode, Node, NodeId, TokenGraph};

fn dot_id(id: NodeId) -> String {
  if id.is_ghost_id() {
    format!("g{}", -id.0)
  } else {
    format!("n{}", id.0)
  }
}

fn escape(s: &str) -> String {
  s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz source for the graph. Ghosts are dashed; a fulfilled ghost gets a
/// dotted arrow to the node that realized it.
pub fn to_dot(graph: &TokenGraph) -> String {
  let mut out = String::from("digraph parse {\n  rankdir=LR;\n  node [shape=box];\n");

  for node in graph.nodes() {
    let _ = match (node.as_real(), node.as_ghost()) {
      (Some(real), _) => writeln!(
        out,
        "  {} [label=\"{}\\n{} @{}\"];",
        dot_id(node.id),
        escape(&real.token.word),
        escape(&real.token.pos),
        node.position
      ),
      (None, Some(ghost)) => writeln!(
        out,
        "  {} [label=\"∅ {}\\n{}\" style=dashed];",
        dot_id(node.id),
        escape(&ghost.ghost_type.to_string()),
        ghost.state
      ),
      (None, None) => Ok(()),
    };
  }

  for edge in graph.edges() {
    let _ = writeln!(
      out,
      "  {} -> {} [label=\"{}\"];",
      dot_id(edge.source),
      dot_id(edge.target),
      escape(&edge.relation)
    );
  }

  for ghost in graph.fulfilled_ghosts() {
    if let Some(by) = ghost.fulfilled_by {
      let _ = writeln!(out, "  {} -> {} [style=dotted];", dot_id(ghost.id), dot_id(by));
    }
  }

  out.push_str("}\n");
  out
}

/// One line per operation, grouped by position, with times relative to the
/// first operation
pub fn log_timeline(log: &[ReconfigurationOperation]) -> String {
  let mut out = String::new();
  let Some(start) = log.iter().map(|op| op.timestamp).min() else {
    return out;
  };

  let mut position = None;
  for op in log {
    if position != Some(op.position) {
      position = Some(op.position);
      let _ = writeln!(out, "position {}:", op.position);
    }
    let _ = writeln!(out, "  +{:>5}ms {}", op.timestamp.saturating_sub(start), op);
  }
  out
}

#[derive(Debug, PartialEq, Clone)]
pub struct DepNode {
  pub id: NodeId,
  pub word: String,
  pub position: usize,
  /// Relation to the governor; `None` for roots
  pub relation: Option<String>,
  pub is_ghost: bool,
}

impl DepNode {
  fn from_node(node: &Node, relation: Option<&str>) -> Self {
    Self {
      id: node.id,
      word: node.word().to_string(),
      position: node.position,
      relation: relation.map(str::to_string),
      is_ghost: node.is_ghost(),
    }
  }
}

impl fmt::Display for DepNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}: {}@{}",
      self.relation.as_deref().unwrap_or("root"),
      self.word,
      self.position
    )
  }
}

/// Dependency tree read off the graph's edges, governors above dependents
#[derive(Debug, PartialEq, Clone)]
pub enum DepTree {
  Head(DepNode, Vec<DepTree>),
  Leaf(DepNode),
}

impl DepTree {
  /// Every tree in the graph, one per root, in position order. Roots are nodes
  /// without a governor; fulfilled ghosts and edgeless ghosts are left out.
  pub fn from_graph(graph: &TokenGraph) -> Vec<DepTree> {
    let mut seen = BTreeSet::new();
    let mut roots = graph
      .nodes()
      .filter(|n| graph.incoming_edges(n.id).is_empty())
      .filter(|n| match n.as_ghost() {
        Some(g) => g.state != GhostState::Fulfilled && !graph.outgoing_edges(n.id).is_empty(),
        None => true,
      })
      .collect::<Vec<_>>();
    roots.sort_by_key(|n| (n.position, n.id));

    roots
      .into_iter()
      .map(|n| Self::build(graph, n, None, &mut seen))
      .collect()
  }

  fn build(graph: &TokenGraph, node: &Node, relation: Option<&str>, seen: &mut BTreeSet<NodeId>) -> DepTree {
    let dep = DepNode::from_node(node, relation);
    if !seen.insert(node.id) {
      return Self::Leaf(dep);
    }

    let mut outgoing = graph.outgoing_edges(node.id);
    outgoing.sort_by_key(|e| {
      graph
        .node(e.target)
        .map(|n| (n.position, n.id))
        .unwrap_or((usize::MAX, e.target))
    });

    let children = outgoing
      .into_iter()
      .filter_map(|e| {
        graph
          .node(e.target)
          .map(|child| Self::build(graph, child, Some(e.relation.as_str()), seen))
      })
      .collect::<Vec<_>>();

    if children.is_empty() {
      Self::Leaf(dep)
    } else {
      Self::Head(dep, children)
    }
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  pub fn node(&self) -> &DepNode {
    match self {
      Self::Head(n, _) | Self::Leaf(n) => n,
    }
  }

  pub fn children(&self) -> &[DepTree] {
    match self {
      Self::Head(_, cs) => cs,
      Self::Leaf(_) => &[],
    }
  }

  /// Nodes in the tree, counting the root
  pub fn len(&self) -> usize {
    1 + self.children().iter().map(DepTree::len).sum::<usize>()
  }
}

impl fmt::Display for DepTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(n) => write!(f, "{}", n),
      Self::Head(n, children) => {
        write!(f, "({}", n)?;
        for child in children.iter() {
          let rendered = child.to_string();
          for line in rendered.lines() {
            write!(f, "\n  {}", line)?;
          }
        }
        write!(f, ")")
      }
    }
  }
}
