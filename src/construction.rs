use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::GrammarError;
use crate::features::ExpectedFeatures;
use crate::pattern::{Pattern, PatternElement};
use crate::token::Token;

/// Element labels that mark the head of a construction
pub const HEAD_LABELS: &[&str] = &["Head", "Pred", "Main"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructionType {
  Mwe,
  Phrasal,
  Clausal,
  Sentential,
}

impl ConstructionType {
  pub const ALL: [Self; 4] = [Self::Mwe, Self::Phrasal, Self::Clausal, Self::Sentential];

  /// The numeric priority band a construction of this type must fall in
  pub fn priority_band(self) -> RangeInclusive<u16> {
    match self {
      Self::Sentential => 1..=19,
      Self::Clausal => 20..=49,
      Self::Phrasal => 50..=99,
      Self::Mwe => 100..=199,
    }
  }

  /// CE level at which the construction's element labels are produced.
  /// MWEs aggregate tokens below the phrasal level and produce no leveled label.
  pub fn ce_level(self) -> Option<CeLevel> {
    match self {
      Self::Mwe => None,
      Self::Phrasal => Some(CeLevel::Phrasal),
      Self::Clausal => Some(CeLevel::Clausal),
      Self::Sentential => Some(CeLevel::Sentential),
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Mwe => "mwe",
      Self::Phrasal => "phrasal",
      Self::Clausal => "clausal",
      Self::Sentential => "sentential",
    }
  }
}

impl fmt::Display for ConstructionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for ConstructionType {
  type Err = GrammarError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| GrammarError::UnknownConstructionType(s.to_string()))
  }
}

/// Fails with `PriorityOutOfRange` if `priority` is outside the band of `construction_type`
pub fn validate_priority_range(
  construction_type: ConstructionType,
  priority: u16,
) -> Result<(), GrammarError> {
  let band = construction_type.priority_band();
  if band.contains(&priority) {
    Ok(())
  } else {
    Err(GrammarError::PriorityOutOfRange {
      construction_type,
      priority,
      min: *band.start(),
      max: *band.end(),
    })
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeLevel {
  Phrasal,
  Clausal,
  Sentential,
}

impl CeLevel {
  pub const ALL: [Self; 3] = [Self::Phrasal, Self::Clausal, Self::Sentential];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Phrasal => "phrasal",
      Self::Clausal => "clausal",
      Self::Sentential => "sentential",
    }
  }
}

impl fmt::Display for CeLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// CE labels carried by a node, one slot per level plus the level-less `ce`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeLabels {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phrasal: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub clausal: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sentential: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ce: Option<String>,
}

impl CeLabels {
  pub fn get(&self, level: CeLevel) -> Option<&str> {
    match level {
      CeLevel::Phrasal => self.phrasal.as_deref(),
      CeLevel::Clausal => self.clausal.as_deref(),
      CeLevel::Sentential => self.sentential.as_deref(),
    }
  }

  pub fn slot_mut(&mut self, level: Option<CeLevel>) -> &mut Option<String> {
    match level {
      Some(CeLevel::Phrasal) => &mut self.phrasal,
      Some(CeLevel::Clausal) => &mut self.clausal,
      Some(CeLevel::Sentential) => &mut self.sentential,
      None => &mut self.ce,
    }
  }

  pub fn set(&mut self, level: Option<CeLevel>, label: &str) {
    *self.slot_mut(level) = Some(label.to_string());
  }

  /// True if any of the four slots holds `label`
  pub fn contains(&self, label: &str) -> bool {
    self.iter().any(|(_, l)| l == label)
  }

  /// (level, label) pairs; the level-less slot reports `None`
  pub fn iter(&self) -> impl Iterator<Item = (Option<CeLevel>, &str)> {
    [
      (Some(CeLevel::Phrasal), self.phrasal.as_deref()),
      (Some(CeLevel::Clausal), self.clausal.as_deref()),
      (Some(CeLevel::Sentential), self.sentential.as_deref()),
      (None, self.ce.as_deref()),
    ]
    .into_iter()
    .filter_map(|(level, label)| label.map(|l| (level, l)))
  }

  pub fn is_empty(&self) -> bool {
    self.iter().next().is_none()
  }

  /// Fill empty slots from `other`, keeping our own labels on collision
  pub fn fill_from(&mut self, other: &CeLabels) {
    for (level, label) in other.iter() {
      let slot = self.slot_mut(level);
      if slot.is_none() {
        *slot = Some(label.to_string());
      }
    }
  }
}

impl fmt::Display for CeLabels {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts = self
      .iter()
      .map(|(level, label)| match level {
        Some(level) => format!("{}:{}", level, label),
        None => format!("ce:{}", label),
      })
      .collect::<Vec<_>>();
    write!(f, "[{}]", parts.join(" "))
  }
}

/// Kinds of mandatory-but-unrealized element a ghost can stand for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostType {
  DroppedSubject,
  ImplicitHead,
  ElidedArgument,
  ElidedPredicate,
  Other(String),
}

impl fmt::Display for GhostType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::DroppedSubject => write!(f, "dropped_subject"),
      Self::ImplicitHead => write!(f, "implicit_head"),
      Self::ElidedArgument => write!(f, "elided_argument"),
      Self::ElidedPredicate => write!(f, "elided_predicate"),
      Self::Other(s) => write!(f, "{}", s),
    }
  }
}

fn default_ghost_type() -> GhostType {
  GhostType::ElidedArgument
}

/// What a construction demands of an element it cannot do without
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandatoryElement {
  #[serde(default = "default_ghost_type")]
  pub ghost_type: GhostType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expected_pos: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub expected_features: ExpectedFeatures,
}

/// A construction row as stored in the external grammar store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructionRow {
  pub id: u32,
  pub name: String,
  #[serde(rename = "type")]
  pub construction_type: String,
  pub priority: u16,
  pub pattern: String,
  #[serde(default)]
  pub phrasal_ce: Option<String>,
  #[serde(default)]
  pub clausal_ce: Option<String>,
  #[serde(default)]
  pub sentential_ce: Option<String>,
  #[serde(default)]
  pub mandatory_elements: BTreeMap<String, MandatoryElement>,
  #[serde(default)]
  pub inherits: Option<String>,
  #[serde(default)]
  pub conflicts_with: Vec<String>,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

fn default_enabled() -> bool {
  true
}

/// A compiled, immutable grammar rule
#[derive(Debug, Clone, PartialEq)]
pub struct Construction {
  pub id: u32,
  pub name: String,
  pub construction_type: ConstructionType,
  pub priority: u16,
  pub pattern: Pattern,
  pub phrasal_ce: Option<String>,
  pub clausal_ce: Option<String>,
  pub sentential_ce: Option<String>,
  pub mandatory_elements: BTreeMap<String, MandatoryElement>,
  pub inherits: Option<String>,
  pub conflicts_with: Vec<String>,
}

impl Construction {
  /// Validates and compiles a grammar row. All configuration errors surface here.
  pub fn compile(row: ConstructionRow) -> Result<Self, GrammarError> {
    let construction_type: ConstructionType = row.construction_type.parse()?;
    validate_priority_range(construction_type, row.priority)?;

    let pattern: Pattern = row.pattern.parse().map_err(|message| GrammarError::Pattern {
      construction: row.name.clone(),
      message,
    })?;

    let c = Self {
      id: row.id,
      name: row.name,
      construction_type,
      priority: row.priority,
      pattern,
      phrasal_ce: row.phrasal_ce,
      clausal_ce: row.clausal_ce,
      sentential_ce: row.sentential_ce,
      mandatory_elements: row.mandatory_elements,
      inherits: row.inherits,
      conflicts_with: row.conflicts_with,
    };

    for label in c.mandatory_elements.keys() {
      if !c.produces(label) {
        return Err(GrammarError::UnproducedMandatoryElement {
          construction: c.name.clone(),
          label: label.clone(),
        });
      }
    }

    Ok(c)
  }

  /// The construction's own outputs, as a label set
  pub fn output_labels(&self) -> CeLabels {
    CeLabels {
      phrasal: self.phrasal_ce.clone(),
      clausal: self.clausal_ce.clone(),
      sentential: self.sentential_ce.clone(),
      ce: None,
    }
  }

  /// Every (level, label) this construction produces: declared outputs plus
  /// element labels at the construction's own level
  pub fn produced(&self) -> Vec<(Option<CeLevel>, String)> {
    let mut out = self
      .output_labels()
      .iter()
      .map(|(level, label)| (level, label.to_string()))
      .collect::<Vec<_>>();

    let level = self.construction_type.ce_level();
    for label in self.pattern.labels() {
      if !out.iter().any(|(l, s)| *l == level && s == label) {
        out.push((level, label.to_string()));
      }
    }

    out
  }

  pub fn produces(&self, label: &str) -> bool {
    self.produced().iter().any(|(_, l)| l == label)
  }

  /// Level `label` is produced at, the construction's own level first
  pub fn produced_level(&self, label: &str) -> Option<Option<CeLevel>> {
    let produced = self.produced();
    let own = self.construction_type.ce_level();
    if produced.iter().any(|(l, s)| *l == own && s == label) {
      return Some(own);
    }
    produced.into_iter().find(|(_, s)| s == label).map(|(l, _)| l)
  }

  pub fn is_mandatory(&self, label: &str) -> bool {
    self.mandatory_elements.contains_key(label)
  }

  /// Mandatory spec of the element at `idx`, if its label is mandatory
  pub fn mandatory_element_at(&self, idx: usize) -> Option<(&str, &MandatoryElement)> {
    let label = self.pattern.get(idx)?.label.as_deref()?;
    self
      .mandatory_elements
      .get_key_value(label)
      .map(|(k, v)| (k.as_str(), v))
  }

  /// Element may be skipped without abandoning the match: optional, or
  /// mandatory (in which case a ghost stands in for it)
  pub fn is_skippable(&self, idx: usize) -> bool {
    match self.pattern.get(idx) {
      Some(e) => e.optional || self.mandatory_element_at(idx).is_some(),
      None => false,
    }
  }

  /// Element indices the construction can be entered at: the first element, or
  /// any later one whose predecessors can all be skipped
  pub fn entry_points(&self) -> Vec<usize> {
    let mut points = Vec::new();
    for idx in 0..self.pattern.len() {
      points.push(idx);
      if !self.is_skippable(idx) {
        break;
      }
    }
    points
  }

  /// First element index at which `token` can start this construction
  pub fn entry_for(&self, token: &Token) -> Option<usize> {
    self
      .entry_points()
      .into_iter()
      .find(|&idx| self.pattern.elements[idx].matches(token))
  }

  /// The element carrying the construction's own outputs: the first one
  /// labelled as a head, else the only element
  pub fn head_element(&self) -> Option<usize> {
    let by_label = self.pattern.elements.iter().position(|e| {
      e.label
        .as_deref()
        .is_some_and(|l| HEAD_LABELS.contains(&l))
    });
    match by_label {
      Some(idx) => Some(idx),
      None if self.pattern.len() == 1 => Some(0),
      None => None,
    }
  }

  /// Labels a token receives when matched by element `idx`: the element's own
  /// label at the construction's level, plus the declared outputs on the head
  pub fn labels_for_element(&self, idx: usize) -> CeLabels {
    let mut labels = if self.head_element() == Some(idx) {
      self.output_labels()
    } else {
      CeLabels::default()
    };
    if let Some(PatternElement {
      label: Some(label), ..
    }) = self.pattern.get(idx)
    {
      labels.set(self.construction_type.ce_level(), label);
    }
    labels
  }
}

impl fmt::Display for Construction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "#{} {} ({} {}) -> {}",
      self.id, self.name, self.construction_type, self.priority, self.pattern
    )
  }
}

#[cfg(test)]
pub(crate) fn row(id: u32, name: &str, ty: &str, priority: u16, pattern: &str) -> ConstructionRow {
  ConstructionRow {
    id,
    name: name.to_string(),
    construction_type: ty.to_string(),
    priority,
    pattern: pattern.to_string(),
    phrasal_ce: None,
    clausal_ce: None,
    sentential_ce: None,
    mandatory_elements: BTreeMap::new(),
    inherits: None,
    conflicts_with: Vec::new(),
    enabled: true,
  }
}
