use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::construction::{Construction, ConstructionType};
use crate::error::GrammarError;
use crate::grammar_source::GrammarSource;
use crate::token::Token;
use crate::type_graph::TypeGraph;

/// The compiled constructions of one grammar, indexed for lookup while parsing.
/// Owned by the caller and loaded once; every index holds the same `Rc`s.
#[derive(Debug, Default)]
pub struct ConstructionRegistry {
  grammar_id: Option<String>,
  /// Descending priority, ties by ascending id
  constructions: Vec<Rc<Construction>>,
  by_id: HashMap<u32, Rc<Construction>>,
  by_name: HashMap<String, Rc<Construction>>,
  by_type: HashMap<ConstructionType, Vec<Rc<Construction>>>,
  /// Constructions with at least one entry point, in priority order
  token_triggered: Vec<Rc<Construction>>,
  type_graph: Rc<TypeGraph>,
}

impl fmt::Display for ConstructionRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "//** grammar: {}",
      self.grammar_id.as_deref().unwrap_or("(none)")
    )?;
    for ty in ConstructionType::ALL {
      writeln!(f, "//** {}: {}", ty, self.of_type(ty).len())?;
    }
    for c in self.constructions.iter() {
      writeln!(f, "{}", c)?;
    }
    Ok(())
  }
}

impl ConstructionRegistry {
  pub fn new() -> Self {
    Default::default()
  }

  /// Loads and compiles a grammar. A registry that is already loaded ignores
  /// further calls.
  pub fn load_constructions(
    &mut self,
    grammar_id: &str,
    source: &dyn GrammarSource,
  ) -> Result<(), GrammarError> {
    if let Some(loaded) = &self.grammar_id {
      if loaded != grammar_id {
        tracing::warn!(loaded = %loaded, requested = grammar_id, "registry already holds a grammar");
      }
      return Ok(());
    }

    let mut constructions = Vec::new();
    for row in source.construction_rows(grammar_id)? {
      if !row.enabled {
        tracing::debug!(construction = %row.name, "skipping disabled construction");
        continue;
      }
      constructions.push(Construction::compile(row)?);
    }
    constructions.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    let mut by_type: HashMap<ConstructionType, Vec<Rc<Construction>>> = HashMap::new();
    let mut rcs = Vec::with_capacity(constructions.len());
    for c in constructions {
      let c = Rc::new(c);
      if by_id.insert(c.id, c.clone()).is_some() {
        return Err(GrammarError::DuplicateConstruction(format!("#{}", c.id)));
      }
      if by_name.insert(c.name.clone(), c.clone()).is_some() {
        return Err(GrammarError::DuplicateConstruction(c.name.clone()));
      }
      by_type.entry(c.construction_type).or_default().push(c.clone());
      rcs.push(c);
    }

    self.type_graph = Rc::new(TypeGraph::from_constructions(rcs.iter().map(|c| c.as_ref())));
    self.token_triggered = rcs
      .iter()
      .filter(|c| !c.pattern.is_empty())
      .cloned()
      .collect();
    self.constructions = rcs;
    self.by_id = by_id;
    self.by_name = by_name;
    self.by_type = by_type;
    self.grammar_id = Some(grammar_id.to_string());

    tracing::info!(
      grammar_id,
      constructions = self.constructions.len(),
      "grammar loaded"
    );
    Ok(())
  }

  /// Constructions `token` can start, highest priority first. The order is
  /// the tie-break whenever several constructions match the same token.
  pub fn constructions_for_token(&self, token: &Token) -> Vec<&Rc<Construction>> {
    self
      .token_triggered
      .iter()
      .filter(|c| c.entry_for(token).is_some())
      .collect()
  }

  pub fn get(&self, id: u32) -> Option<&Rc<Construction>> {
    self.by_id.get(&id)
  }

  pub fn by_name(&self, name: &str) -> Option<&Rc<Construction>> {
    self.by_name.get(name)
  }

  pub fn of_type(&self, ty: ConstructionType) -> &[Rc<Construction>] {
    self.by_type.get(&ty).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn iter(&self) -> impl Iterator<Item = &Rc<Construction>> {
    self.constructions.iter()
  }

  pub fn type_graph(&self) -> &Rc<TypeGraph> {
    &self.type_graph
  }

  pub fn grammar_id(&self) -> Option<&str> {
    self.grammar_id.as_deref()
  }

  pub fn is_loaded(&self) -> bool {
    self.grammar_id.is_some()
  }

  pub fn len(&self) -> usize {
    self.constructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.constructions.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::construction::row;
  use crate::grammar_source::InMemoryGrammarSource;

  fn source() -> InMemoryGrammarSource {
    let mut disabled = row(9, "off", "phrasal", 99, "{NOUN}:Head");
    disabled.enabled = false;
    InMemoryGrammarSource::new().with_grammar(
      "pt",
      vec![
        row(3, "subj_pred", "clausal", 30, "{PRON|NOUN}:Arg {VERB}:Pred"),
        row(1, "np", "phrasal", 60, "{DET}:Mod {NOUN}:Head"),
        row(2, "bare_np", "phrasal", 60, "{NOUN}:Head"),
        row(4, "por_causa_de", "mwe", 150, r#""por" "causa" "de""#),
        disabled,
      ],
    )
  }

  #[test]
  fn test_load_orders_by_priority() {
    let mut r = ConstructionRegistry::new();
    r.load_constructions("pt", &source()).unwrap();
    assert!(r.is_loaded());
    assert_eq!(r.len(), 4);
    let names = r.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["por_causa_de", "np", "bare_np", "subj_pred"]);

    let noun = Token::new("casa", "casa", "NOUN");
    let triggered = r
      .constructions_for_token(&noun)
      .into_iter()
      .map(|c| c.id)
      .collect::<Vec<_>>();
    assert_eq!(triggered, vec![2, 3]);

    assert_eq!(r.of_type(ConstructionType::Phrasal).len(), 2);
    assert!(r.by_name("off").is_none());
    assert_eq!(r.get(4).unwrap().name, "por_causa_de");
    assert!(Rc::ptr_eq(r.get(1).unwrap(), r.by_name("np").unwrap()));
    assert_eq!(r.type_graph().statistics().constructions, 4);
  }

  #[test]
  fn test_load_is_idempotent() {
    let mut r = ConstructionRegistry::new();
    r.load_constructions("pt", &source()).unwrap();
    let tg = r.type_graph().clone();
    r.load_constructions("pt", &InMemoryGrammarSource::new()).unwrap();
    assert_eq!(r.len(), 4);
    assert!(Rc::ptr_eq(&tg, r.type_graph()));
  }

  #[test]
  fn test_load_errors() {
    let mut r = ConstructionRegistry::new();
    assert!(matches!(
      r.load_constructions("en", &source()),
      Err(GrammarError::GrammarNotFound(_))
    ));
    assert!(!r.is_loaded());

    let dup = InMemoryGrammarSource::new().with_grammar(
      "dup",
      vec![
        row(1, "np", "phrasal", 60, "{NOUN}:Head"),
        row(2, "np", "phrasal", 61, "{NOUN}:Head"),
      ],
    );
    assert!(matches!(
      r.load_constructions("dup", &dup),
      Err(GrammarError::DuplicateConstruction(n)) if n == "np"
    ));

    let bad = InMemoryGrammarSource::new()
      .with_grammar("bad", vec![row(1, "s", "sentential", 40, "{VERB}:Main")]);
    assert!(matches!(
      r.load_constructions("bad", &bad),
      Err(GrammarError::PriorityOutOfRange { .. })
    ));
  }
}
