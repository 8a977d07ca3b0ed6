//! Where construction rows come from. The store's schema belongs to whoever
//! owns the grammar; the parser only reads rows for one grammar id at a time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::construction::ConstructionRow;
use crate::error::GrammarError;

pub trait GrammarSource {
  /// All rows of a grammar, in store order
  fn construction_rows(&self, grammar_id: &str) -> Result<Vec<ConstructionRow>, GrammarError>;
}

/// On-disk layout: `{"grammars": [{"grammar_id": "pt", "constructions": [..]}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrammarFile {
  pub grammars: Vec<GrammarEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarEntry {
  pub grammar_id: String,
  #[serde(default)]
  pub constructions: Vec<ConstructionRow>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGrammarSource {
  grammars: BTreeMap<String, Vec<ConstructionRow>>,
}

impl InMemoryGrammarSource {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn with_grammar(mut self, grammar_id: &str, rows: Vec<ConstructionRow>) -> Self {
    self.grammars.insert(grammar_id.to_string(), rows);
    self
  }

  pub fn from_json_str(s: &str) -> Result<Self, GrammarError> {
    let file: GrammarFile = serde_json::from_str(s)?;
    Ok(file.into())
  }

  pub fn grammar_ids(&self) -> impl Iterator<Item = &str> {
    self.grammars.keys().map(String::as_str)
  }
}

impl From<GrammarFile> for InMemoryGrammarSource {
  fn from(file: GrammarFile) -> Self {
    Self {
      grammars: file
        .grammars
        .into_iter()
        .map(|g| (g.grammar_id, g.constructions))
        .collect(),
    }
  }
}

impl GrammarSource for InMemoryGrammarSource {
  fn construction_rows(&self, grammar_id: &str) -> Result<Vec<ConstructionRow>, GrammarError> {
    self
      .grammars
      .get(grammar_id)
      .cloned()
      .ok_or_else(|| GrammarError::GrammarNotFound(grammar_id.to_string()))
  }
}

/// A `GrammarFile` on disk, read on every request
#[derive(Debug, Clone)]
pub struct JsonGrammarSource {
  path: PathBuf,
}

impl JsonGrammarSource {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl GrammarSource for JsonGrammarSource {
  fn construction_rows(&self, grammar_id: &str) -> Result<Vec<ConstructionRow>, GrammarError> {
    let text = fs::read_to_string(&self.path)?;
    tracing::debug!(path = %self.path.display(), grammar_id, "reading grammar file");
    InMemoryGrammarSource::from_json_str(&text)?.construction_rows(grammar_id)
  }
}
