use serde::{Deserialize, Serialize};

use crate::features::{Features, parse_ud_features};

/// A pre-tagged input token, as produced by the upstream UD tagger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
  pub word: String,
  #[serde(default)]
  pub lemma: String,
  pub pos: String,
  #[serde(default)]
  pub features: Features,
  /// Head index suggested by the tagger, if any. Carried through, never trusted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dependency_head: Option<usize>,
}

impl Token {
  pub fn new(word: &str, lemma: &str, pos: &str) -> Self {
    Self {
      word: word.to_string(),
      lemma: lemma.to_string(),
      pos: pos.to_string(),
      features: Features::new(),
      dependency_head: None,
    }
  }

  /// Builder-style UD feature string: `Token::new(..).with_features("Number=Sing")`
  pub fn with_features(mut self, ud: &str) -> Self {
    self.features = parse_ud_features(ud);
    self
  }

  pub fn feature(&self, name: &str) -> Option<&str> {
    self.features.get(name).map(String::as_str)
  }

  /// Lemma if the tagger gave one, else the lowercased word
  pub fn lemma_or_word(&self) -> String {
    if self.lemma.is_empty() {
      self.word.to_lowercase()
    } else {
      self.lemma.clone()
    }
  }
}

/// Reads a tab-separated token list, one token per line: `word lemma POS feats`.
/// Blank lines and `#` comments are skipped; missing columns default to empty.
pub fn tokens_from_tsv(s: &str) -> Vec<Token> {
  s.lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.starts_with('#'))
    .map(|line| {
      let mut cols = line.split('\t');
      let word = cols.next().unwrap_or_default();
      let lemma = cols.next().unwrap_or_default();
      let pos = cols.next().unwrap_or_default();
      let feats = cols.next().unwrap_or_default();
      Token::new(word, lemma, pos).with_features(feats)
    })
    .collect()
}

#[test]
fn test_tokens_from_tsv() {
  let tokens = tokens_from_tsv("# comment\ncasa\tcasa\tNOUN\tGender=Fem|Number=Sing\n\nlinda\tlindo\tADJ\n");
  assert_eq!(tokens.len(), 2);
  assert_eq!(tokens[0].feature("Gender"), Some("Fem"));
  assert_eq!(tokens[1].pos, "ADJ");
  assert!(tokens[1].features.is_empty());
}

#[test]
fn test_token_deserialize_defaults() {
  let t: Token = serde_json::from_str(r#"{"word": "Comemos", "pos": "VERB"}"#).unwrap();
  assert_eq!(t.lemma_or_word(), "comemos");
  assert_eq!(t.dependency_head, None);
}
