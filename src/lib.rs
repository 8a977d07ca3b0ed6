#[macro_use]
extern crate lazy_static;

pub mod agreement;
pub mod alternative;
pub mod config;
pub mod construction;
pub mod error;
pub mod export;
pub mod features;
pub mod ghost;
pub mod grammar_source;
pub mod link_builder;
pub mod parse_state;
pub mod parser;
pub mod pattern;
pub mod reconfiguration;
pub mod registry;
pub mod token;
pub mod token_graph;
pub mod type_graph;
pub mod utils;

use serde::Deserialize;

pub use crate::config::ParserConfig;
pub use crate::construction::{CeLevel, Construction, ConstructionType, GhostType};
pub use crate::error::{Error, Result};
pub use crate::grammar_source::{GrammarSource, InMemoryGrammarSource, JsonGrammarSource};
pub use crate::link_builder::LinkBuilder;
pub use crate::parse_state::{ParseState, ParseStatus};
pub use crate::parser::{IncrementalParser, ParseOutcome};
pub use crate::registry::ConstructionRegistry;
pub use crate::token::Token;
pub use crate::token_graph::{NodeId, TokenGraph};

/// A tagged sentence as handed over by the upstream tagger
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaggedSentence {
  #[serde(default)]
  pub sentence: String,
  pub tokens: Vec<Token>,
}

impl TaggedSentence {
  pub fn from_json_str(s: &str) -> Result<Self> {
    let mut tagged: Self = serde_json::from_str(s).map_err(error::ConfigError::from)?;
    if tagged.sentence.is_empty() {
      tagged.sentence = tagged
        .tokens
        .iter()
        .map(|t| t.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    }
    Ok(tagged)
  }
}

impl ConstructionRegistry {
  /// Loads `grammar_id` from `source` into a fresh registry
  pub fn from_source(grammar_id: &str, source: &dyn GrammarSource) -> Result<Self> {
    let mut registry = Self::new();
    registry.load_constructions(grammar_id, source)?;
    Ok(registry)
  }

  pub fn parse(&self, tagged: TaggedSentence) -> ParseOutcome {
    IncrementalParser::new(self, ParserConfig::default()).parse(&tagged.sentence, tagged.tokens)
  }
}

#[test]
fn test_bundled_grammar_prodrop() {
  let source = InMemoryGrammarSource::from_json_str(include_str!("../grammars/pt.json")).unwrap();
  let registry = ConstructionRegistry::from_source("pt", &source).unwrap();
  assert_eq!(registry.len(), 8);

  let tagged = TaggedSentence::from_json_str(include_str!("../demos/comemos-o-pao.json")).unwrap();
  let outcome = registry.parse(tagged);
  let best = &outcome.best;
  assert!(best.is_complete());

  let g = best.token_graph();
  let relation = |head: i64, dep: i64| g.edge_between(NodeId(head), NodeId(dep)).map(|e| e.relation.as_str());
  assert_eq!(relation(0, -1), Some("nsubj"));
  assert_eq!(relation(2, 1), Some("det"));
  assert_eq!(relation(0, 2), Some("obj"));
  assert_eq!(best.ghost_manager().summary().fulfilled, 1);
}

#[test]
fn test_bundled_grammar_mwe_and_pp() {
  let source = InMemoryGrammarSource::from_json_str(include_str!("../grammars/pt.json")).unwrap();
  let registry = ConstructionRegistry::from_source("pt", &source).unwrap();

  let tagged = TaggedSentence::from_json_str(
    r#"{"tokens": [
      {"word": "saiu", "lemma": "sair", "pos": "VERB", "features": {"Number": "Sing", "Person": "3"}},
      {"word": "por", "lemma": "por", "pos": "ADP"},
      {"word": "causa", "lemma": "causa", "pos": "NOUN", "features": {"Gender": "Fem", "Number": "Sing"}},
      {"word": "de", "lemma": "de", "pos": "ADP"},
      {"word": "Maria", "lemma": "Maria", "pos": "PROPN", "features": {"Gender": "Fem", "Number": "Sing"}}
    ]}"#,
  )
  .unwrap();
  assert_eq!(tagged.sentence, "saiu por causa de Maria");

  let best = registry.parse(tagged).best;
  let g = best.token_graph();
  assert_eq!(g.edge_between(NodeId(1), NodeId(2)).unwrap().relation, "fixed");
  assert_eq!(g.edge_between(NodeId(1), NodeId(3)).unwrap().relation, "fixed");
  // the whole expression is Maria's case marker, Maria an oblique of the verb
  assert_eq!(g.edge_between(NodeId(4), NodeId(1)).unwrap().relation, "case");
  assert_eq!(g.edge_between(NodeId(0), NodeId(4)).unwrap().relation, "obl");
  assert!(g.incoming_edges(NodeId(2)).iter().all(|e| e.relation == "fixed"));
}
