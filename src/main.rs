use cxgparse::export::DepTree;
use cxgparse::{ConstructionRegistry, InMemoryGrammarSource, TaggedSentence};

const GRAMMAR: &str = include_str!("../grammars/pt.json");

// "(we) eat the bread": the subject is dropped, the verb's agreement carries it
const SENTENCE: &str = r#"{
  "tokens": [
    {"word": "comemos", "lemma": "comer", "pos": "VERB", "features": {"Number": "Plur", "Person": "1"}},
    {"word": "o", "lemma": "o", "pos": "DET", "features": {"Gender": "Masc", "Number": "Sing"}},
    {"word": "pão", "lemma": "pão", "pos": "NOUN", "features": {"Gender": "Masc", "Number": "Sing"}}
  ]
}"#;

fn main() -> Result<(), cxgparse::Error> {
  let source = InMemoryGrammarSource::from_json_str(GRAMMAR)?;
  let registry = ConstructionRegistry::from_source("pt", &source)?;
  print!("{}", registry);

  let tagged = TaggedSentence::from_json_str(SENTENCE)?;
  println!("\n{}", tagged.sentence);
  let outcome = registry.parse(tagged);

  println!(
    "Kept {} hypothes{}",
    outcome.len(),
    if outcome.len() == 1 { "is" } else { "es" }
  );
  for t in DepTree::from_graph(outcome.best.token_graph()) {
    println!("{}", t);
  }
  for ghost in outcome.best.token_graph().ghost_nodes() {
    println!("{}", ghost);
  }

  Ok(())
}
