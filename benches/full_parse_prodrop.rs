use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cxgparse::{ConstructionRegistry, InMemoryGrammarSource, ParseOutcome, TaggedSentence};

const GRAMMAR_SRC: &str = include_str!("../grammars/pt.json");
const PRODROP_SRC: &str = include_str!("../demos/comemos-o-pao.json");

const MWE_SRC: &str = r#"{"tokens": [
  {"word": "saiu", "lemma": "sair", "pos": "VERB", "features": {"Number": "Sing", "Person": "3"}},
  {"word": "cedo", "lemma": "cedo", "pos": "ADV"},
  {"word": "por", "lemma": "por", "pos": "ADP"},
  {"word": "causa", "lemma": "causa", "pos": "NOUN", "features": {"Gender": "Fem", "Number": "Sing"}},
  {"word": "de", "lemma": "de", "pos": "ADP"},
  {"word": "a", "lemma": "o", "pos": "DET", "features": {"Gender": "Fem", "Number": "Sing"}},
  {"word": "chuva", "lemma": "chuva", "pos": "NOUN", "features": {"Gender": "Fem", "Number": "Sing"}},
  {"word": "forte", "lemma": "forte", "pos": "ADJ", "features": {"Number": "Sing"}}
]}"#;

fn parse(registry: &ConstructionRegistry, input: &TaggedSentence) -> ParseOutcome {
  registry.parse(input.clone())
}

fn criterion_benchmark(c: &mut Criterion) {
  let source = InMemoryGrammarSource::from_json_str(GRAMMAR_SRC).unwrap();
  let registry = ConstructionRegistry::from_source("pt", &source).unwrap();
  let prodrop = TaggedSentence::from_json_str(PRODROP_SRC).unwrap();
  let mwe = TaggedSentence::from_json_str(MWE_SRC).unwrap();

  c.bench_function("parse dropped subject", |b| {
    b.iter(|| parse(black_box(&registry), black_box(&prodrop)))
  });

  c.bench_function("parse mwe with pp", |b| {
    b.iter(|| parse(black_box(&registry), black_box(&mwe)))
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
