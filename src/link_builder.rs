//! Turns CE annotations on confirmed nodes into dependency edges.
//!
//! For a newly confirmed node the builder looks both ways: for heads it could
//! attach to, and for already-confirmed nodes that could attach to it. A pair
//! is linked when its CE labels fit one of the fixed level patterns, the
//! features the attachment needs agree, and a relation can be named for it.
//! A pair with no nameable relation is skipped, which is not an error.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;

use crate::agreement::{AgreementResult, check_agreement, required_features_for_construction};
use crate::construction::{CeLevel, GhostType};
use crate::error::StateError;
use crate::features::Features;
use crate::parse_state::ParseState;
use crate::token_graph::{EdgeId, GraphNode, Node, NodeId, TokenGraph};

pub const MAX_LOCAL_DISTANCE: usize = 5;

/// Dependent label attaches to head label, at one level
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CePattern {
  pub level: CeLevel,
  pub dependent: &'static str,
  pub head: &'static str,
}

impl CePattern {
  const fn new(level: CeLevel, dependent: &'static str, head: &'static str) -> Self {
    Self {
      level,
      dependent,
      head,
    }
  }

  /// Phrasal attachments are local; the others can span the sentence
  pub fn is_local(&self) -> bool {
    self.level == CeLevel::Phrasal
  }
}

impl fmt::Display for CePattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}→{}", self.level, self.dependent, self.head)
  }
}

pub const PATTERNS: &[CePattern] = &[
  CePattern::new(CeLevel::Phrasal, "Mod", "Head"),
  CePattern::new(CeLevel::Phrasal, "Adp", "Head"),
  CePattern::new(CeLevel::Clausal, "Arg", "Pred"),
  CePattern::new(CeLevel::Clausal, "CPP", "Pred"),
  CePattern::new(CeLevel::Clausal, "FPM", "Pred"),
  CePattern::new(CeLevel::Clausal, "Gen", "Arg"),
  CePattern::new(CeLevel::Sentential, "Rel", "Main"),
  CePattern::new(CeLevel::Sentential, "Comp", "Main"),
  CePattern::new(CeLevel::Sentential, "Adv", "Main"),
];

/// Verbs whose complement clause shares their subject (xcomp rather than ccomp)
const SUBJECT_CONTROL_VERBS: &[&str] = &[
  "querer", "tentar", "conseguir", "poder", "dever", "precisar", "começar", "decidir",
  "prometer", "esperar", "want", "try", "decide", "begin", "start", "need", "hope", "promise",
];

/// An edge the builder would add: `head -> dependent`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkProposal {
  pub head: NodeId,
  pub dependent: NodeId,
  pub relation: String,
  pub pattern: CePattern,
  pub distance: usize,
  pub agreement: AgreementResult,
}

impl fmt::Display for LinkProposal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} -{}-> {} ({}, d={})",
      self.head, self.relation, self.dependent, self.pattern, self.distance
    )
  }
}

#[derive(Debug, Clone)]
pub struct LinkBuilder {
  max_local_distance: usize,
  control_verbs: BTreeSet<String>,
}

impl Default for LinkBuilder {
  fn default() -> Self {
    Self::new(MAX_LOCAL_DISTANCE)
  }
}

impl LinkBuilder {
  pub fn new(max_local_distance: usize) -> Self {
    Self {
      max_local_distance,
      control_verbs: SUBJECT_CONTROL_VERBS.iter().map(|v| v.to_string()).collect(),
    }
  }

  /// Adds lemmas to the subject-control lexicon
  pub fn with_control_verbs<I, S>(mut self, verbs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.control_verbs.extend(verbs.into_iter().map(Into::into));
    self
  }

  pub fn is_control_verb(&self, lemma: &str) -> bool {
    self.control_verbs.contains(lemma)
  }

  /// Edges `node` should take part in, closest first. Nothing is changed.
  pub fn link_node(&self, state: &ParseState, node: NodeId) -> Vec<LinkProposal> {
    let graph = state.token_graph();
    let Some(n) = graph.node(node) else {
      return Vec::new();
    };

    let mut pairs = Vec::new();
    for id in state.confirmed_up_to(n.position().max(state.current_position())) {
      if id == node {
        continue;
      }
      let Some(c) = graph.node(id) else { continue };
      // a merged or expired ghost has handed its edges on already
      if c.as_ghost().is_some_and(|g| !g.is_pending()) {
        continue;
      }
      let distance = n.position().abs_diff(c.position());

      for pattern in PATTERNS {
        if pattern.is_local() && distance > self.max_local_distance {
          continue;
        }
        // node as dependent, candidate as head
        if has_label(n, pattern.level, pattern.dependent) && has_label(c, pattern.level, pattern.head) {
          pairs.push((distance, *pattern, c, n));
        }
        // node as head, candidate as dependent
        if has_label(n, pattern.level, pattern.head) && has_label(c, pattern.level, pattern.dependent) {
          pairs.push((distance, *pattern, n, c));
        }
      }
    }
    pairs.sort_by_key(|(distance, pattern, head, dependent)| {
      (*distance, pattern.level, head.position(), dependent.position())
    });

    let mut attached = BTreeSet::new();
    let mut assigned: Vec<(NodeId, &'static str)> = Vec::new();
    let mut proposals = Vec::new();
    for (distance, pattern, head, dependent) in pairs {
      if head.id == dependent.id
        || attached.contains(&dependent.id)
        || graph.connected(head.id, dependent.id)
        || !graph.incoming_edges(dependent.id).is_empty()
      {
        continue;
      }

      let Some(relation) = self.relation_for(graph, &assigned, &pattern, head, dependent) else {
        tracing::trace!(%pattern, head = %head.id, dependent = %dependent.id, "no relation for pattern");
        continue;
      };

      let agreement = match agreement_kind(&pattern, dependent, relation) {
        Some(kind) => check_agreement(
          features_of(head),
          features_of(dependent),
          required_features_for_construction(kind),
        ),
        None => AgreementResult {
          agrees: true,
          mismatches: Vec::new(),
        },
      };
      if !agreement.agrees {
        tracing::trace!(%pattern, head = %head.id, dependent = %dependent.id, %agreement, "agreement blocks link");
        continue;
      }

      attached.insert(dependent.id);
      assigned.push((head.id, relation));
      proposals.push(LinkProposal {
        head: head.id,
        dependent: dependent.id,
        relation: relation.to_string(),
        pattern,
        distance,
        agreement,
      });
    }
    proposals
  }

  /// Adds the edges proposed for `node`, returning the ids of the new edges
  pub fn build_links(&self, state: &mut ParseState, node: NodeId) -> Result<Vec<EdgeId>, StateError> {
    let mut created = Vec::new();
    for proposal in self.link_node(state, node) {
      if let Some(edge) = state.link(proposal.head, proposal.dependent, &proposal.relation)? {
        state.annotate_edge(edge, "pattern", json!(proposal.pattern.to_string()))?;
        state.annotate_edge(edge, "distance", json!(proposal.distance))?;
        tracing::debug!(%edge, link = %proposal, "link built");
        created.push(edge);
      }
    }
    Ok(created)
  }

  /// CE + POS + position heuristics; `None` means no attachment rule applies.
  /// `assigned` holds relations already proposed in this pass.
  fn relation_for(
    &self,
    graph: &TokenGraph,
    assigned: &[(NodeId, &str)],
    pattern: &CePattern,
    head: &Node,
    dependent: &Node,
  ) -> Option<&'static str> {
    let dep_pos = dependent.pos().unwrap_or("");
    match (pattern.dependent, pattern.head) {
      ("Mod", "Head") => match dep_pos {
        "DET" => Some("det"),
        "ADJ" => Some("amod"),
        "NUM" => Some("nummod"),
        "ADV" => Some("advmod"),
        "NOUN" | "PROPN" | "PRON" => Some("nmod"),
        "VERB" => Some("acl"),
        _ => None,
      },
      ("Adp", "Head") => (dep_pos == "ADP").then_some("case"),
      ("Arg", "Pred") => Some(argument_relation(graph, assigned, head, dependent)),
      ("CPP", "Pred") => Some("obl"),
      ("FPM", "Pred") => Some(if dep_pos == "ADV" { "advmod" } else { "obl" }),
      ("Gen", "Arg") => Some("nmod"),
      ("Rel", "Main") => Some("acl:relcl"),
      ("Comp", "Main") => {
        let control = head.lemma().is_some_and(|l| self.is_control_verb(l));
        Some(if control { "xcomp" } else { "ccomp" })
      }
      ("Adv", "Main") => Some("advcl"),
      _ => None,
    }
  }
}

/// Case feature first, then position: before the predicate is the subject,
/// after it the first bare argument is the object and a second one the
/// indirect object. Arguments carrying a preposition are oblique.
fn argument_relation(
  graph: &TokenGraph,
  assigned: &[(NodeId, &str)],
  head: &Node,
  dependent: &Node,
) -> &'static str {
  if let Some(ghost) = dependent.as_ghost() {
    if ghost.ghost_type == GhostType::DroppedSubject {
      return "nsubj";
    }
  }
  match dependent.feature("Case") {
    Some("Nom") => return "nsubj",
    Some("Acc") => return "obj",
    Some("Dat") => return "iobj",
    _ => {}
  }

  let has_relation = |rel: &str| {
    graph
      .outgoing_edges(head.id)
      .iter()
      .any(|e| e.relation == rel)
      || assigned.iter().any(|(h, r)| *h == head.id && *r == rel)
  };
  let has_case_marker = graph
    .outgoing_edges(dependent.id)
    .iter()
    .any(|e| e.relation == "case")
    || assigned.iter().any(|(h, r)| *h == dependent.id && *r == "case");

  if has_case_marker {
    "obl"
  } else if dependent.position() < head.position() {
    if has_relation("nsubj") { "obl" } else { "nsubj" }
  } else if has_relation("obj") {
    "iobj"
  } else {
    "obj"
  }
}

/// Which agreement table entry gates a relation, if any
fn agreement_kind(pattern: &CePattern, dependent: &Node, relation: &str) -> Option<&'static str> {
  match (pattern.level, relation) {
    (CeLevel::Phrasal, "det") => Some("det_noun"),
    (CeLevel::Phrasal, "amod") => Some("adj_noun"),
    (CeLevel::Clausal, "nsubj") if !dependent.is_ghost() => Some("subject_verb"),
    _ => None,
  }
}

fn has_label(node: &Node, level: CeLevel, label: &str) -> bool {
  node.ce_label(Some(level)) == Some(label)
}

fn features_of(node: &Node) -> &Features {
  static EMPTY: Features = Features::new();
  node.features().unwrap_or(&EMPTY)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::construction::CeLabels;
  use crate::token::Token;
  use crate::type_graph::TypeGraph;
  use proptest::prelude::*;
  use std::rc::Rc;

  /// Adds each token as a confirmed node at its position, with the given labels
  fn state_with(tokens: Vec<(Token, CeLabels)>) -> ParseState {
    let words = tokens.iter().map(|(t, _)| t.word.clone()).collect::<Vec<_>>();
    let (toks, labels): (Vec<_>, Vec<_>) = tokens.into_iter().unzip();
    let mut state = ParseState::new(&words.join(" "), toks, Rc::new(TypeGraph::new()));
    for (idx, l) in labels.iter().enumerate() {
      if idx > 0 {
        state.advance().unwrap();
      }
      let id = state.add_current_token().unwrap();
      state.label_node(id, l).unwrap();
      state.confirm_node(id).unwrap();
    }
    state
  }

  fn phrasal(label: &str) -> CeLabels {
    let mut l = CeLabels::default();
    l.set(Some(CeLevel::Phrasal), label);
    l
  }

  fn clausal(label: &str) -> CeLabels {
    let mut l = CeLabels::default();
    l.set(Some(CeLevel::Clausal), label);
    l
  }

  #[test]
  fn test_amod_from_mod_head() {
    let mut state = state_with(vec![
      (Token::new("a", "o", "DET"), CeLabels::default()),
      (
        Token::new("bela", "belo", "ADJ").with_features("Gender=Fem|Number=Sing"),
        phrasal("Mod"),
      ),
      (
        Token::new("casa", "casa", "NOUN").with_features("Gender=Fem|Number=Sing"),
        phrasal("Head"),
      ),
    ]);

    let edges = LinkBuilder::default().build_links(&mut state, NodeId(2)).unwrap();
    assert_eq!(edges.len(), 1);
    let edge = state.token_graph().edge(edges[0]).unwrap();
    assert_eq!(edge.relation, "amod");
    assert_eq!(edge.source, NodeId(2));
    assert_eq!(edge.target, NodeId(1));
    assert_eq!(edge.metadata["pattern"], json!("phrasal:Mod→Head"));

    // already linked
    assert!(LinkBuilder::default().build_links(&mut state, NodeId(1)).unwrap().is_empty());
  }

  #[test]
  fn test_gender_mismatch_blocks_link() {
    let mut state = state_with(vec![
      (
        Token::new("belo", "belo", "ADJ").with_features("Gender=Masc|Number=Sing"),
        phrasal("Mod"),
      ),
      (
        Token::new("casa", "casa", "NOUN").with_features("Gender=Fem|Number=Sing"),
        phrasal("Head"),
      ),
    ]);
    assert!(LinkBuilder::default().link_node(&state, NodeId(1)).is_empty());
    assert!(LinkBuilder::default().build_links(&mut state, NodeId(1)).unwrap().is_empty());
    assert_eq!(state.token_graph().edge_count(), 0);
  }

  #[test]
  fn test_common_gender_links() {
    let state = state_with(vec![
      (
        Token::new("o", "o", "DET").with_features("Gender=Masc|Number=Sing"),
        phrasal("Mod"),
      ),
      (
        Token::new("estudante", "estudante", "NOUN").with_features("Gender=Com|Number=Sing"),
        phrasal("Head"),
      ),
    ]);
    let proposals = LinkBuilder::default().link_node(&state, NodeId(1));
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].relation, "det");
  }

  #[test]
  fn test_local_patterns_are_bounded() {
    let mut tokens = vec![(Token::new("velho", "velho", "ADJ"), phrasal("Mod"))];
    for _ in 0..5 {
      tokens.push((Token::new("e", "e", "CCONJ"), CeLabels::default()));
    }
    tokens.push((Token::new("casa", "casa", "NOUN"), phrasal("Head")));
    let state = state_with(tokens);
    assert!(LinkBuilder::default().link_node(&state, NodeId(6)).is_empty());
    assert_eq!(LinkBuilder::new(6).link_node(&state, NodeId(6)).len(), 1);
  }

  #[test]
  fn test_arguments_by_position() {
    let mut state = state_with(vec![
      (
        Token::new("eu", "eu", "PRON").with_features("Number=Sing|Person=1"),
        clausal("Arg"),
      ),
      (
        Token::new("como", "comer", "VERB").with_features("Number=Sing|Person=1"),
        clausal("Pred"),
      ),
      (Token::new("pão", "pão", "NOUN"), clausal("Arg")),
    ]);
    let lb = LinkBuilder::default();
    lb.build_links(&mut state, NodeId(1)).unwrap();
    lb.build_links(&mut state, NodeId(2)).unwrap();

    let g = state.token_graph();
    assert_eq!(g.edge_between(NodeId(1), NodeId(0)).unwrap().relation, "nsubj");
    assert_eq!(g.edge_between(NodeId(1), NodeId(2)).unwrap().relation, "obj");
  }

  #[test]
  fn test_subject_verb_disagreement() {
    let state = state_with(vec![
      (
        Token::new("eu", "eu", "PRON").with_features("Number=Sing|Person=1"),
        clausal("Arg"),
      ),
      (
        Token::new("comemos", "comer", "VERB").with_features("Number=Plur|Person=1"),
        clausal("Pred"),
      ),
    ]);
    assert!(LinkBuilder::default().link_node(&state, NodeId(1)).is_empty());
  }

  #[test]
  fn test_control_verbs_take_xcomp() {
    let mut main = CeLabels::default();
    main.set(Some(CeLevel::Sentential), "Main");
    let mut comp = CeLabels::default();
    comp.set(Some(CeLevel::Sentential), "Comp");

    let state = state_with(vec![
      (Token::new("quero", "querer", "VERB"), main.clone()),
      (Token::new("comer", "comer", "VERB"), comp.clone()),
    ]);
    assert_eq!(LinkBuilder::default().link_node(&state, NodeId(1))[0].relation, "xcomp");

    let state = state_with(vec![
      (Token::new("disse", "dizer", "VERB"), main),
      (Token::new("saiu", "sair", "VERB"), comp),
    ]);
    assert_eq!(LinkBuilder::default().link_node(&state, NodeId(1))[0].relation, "ccomp");
  }

  fn arb_token() -> impl Strategy<Value = (Token, CeLabels)> {
    let pos = prop_oneof![
      Just("DET"),
      Just("ADJ"),
      Just("NOUN"),
      Just("VERB"),
      Just("ADP"),
      Just("PRON")
    ];
    let label = prop_oneof![
      Just(None),
      Just(Some((CeLevel::Phrasal, "Mod"))),
      Just(Some((CeLevel::Phrasal, "Head"))),
      Just(Some((CeLevel::Phrasal, "Adp"))),
      Just(Some((CeLevel::Clausal, "Arg"))),
      Just(Some((CeLevel::Clausal, "Pred"))),
      Just(Some((CeLevel::Sentential, "Comp"))),
      Just(Some((CeLevel::Sentential, "Main"))),
    ];
    (pos, label, label_strategy_gender()).prop_map(|(pos, label, gender)| {
      let mut labels = CeLabels::default();
      if let Some((level, l)) = label {
        labels.set(Some(level), l);
      }
      (Token::new("w", "w", pos).with_features(gender), labels)
    })
  }

  fn label_strategy_gender() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("Gender=Masc"), Just("Gender=Fem"), Just("Gender=Com"), Just("_")]
  }

  proptest! {
    #[test]
    fn prop_no_duplicate_edges(tokens in prop::collection::vec(arb_token(), 1..10)) {
      let n = tokens.len();
      let mut state = state_with(tokens);
      let lb = LinkBuilder::default();
      for _ in 0..2 {
        for i in 0..n {
          lb.build_links(&mut state, NodeId(i as i64)).unwrap();
        }
      }

      let mut seen = BTreeSet::new();
      for e in state.token_graph().edges() {
        prop_assert!(e.source != e.target);
        prop_assert!(seen.insert((e.source, e.target)));
      }
    }
  }
}
