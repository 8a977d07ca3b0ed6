use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::utils::{multi_values_intersect, split_multi_value};

/// Morphological features as the tagger hands them over: `Gender -> Fem`.
/// Values may be comma-separated when the tagger is undecided ("Masc,Fem").
pub type Features = BTreeMap<String, String>;

/// Parses UD-style features: `Gender=Fem|Number=Sing`. `_` and the empty string
/// are the empty feature set. Malformed pairs (no `=`) are skipped.
pub fn parse_ud_features(s: &str) -> Features {
  let s = s.trim();
  if s.is_empty() || s == "_" {
    return Features::new();
  }

  s.split('|')
    .filter_map(|pair| {
      let (name, value) = pair.split_once('=')?;
      let (name, value) = (name.trim(), value.trim());
      if name.is_empty() || value.is_empty() {
        None
      } else {
        Some((name.to_string(), value.to_string()))
      }
    })
    .collect()
}

/// Displays features in UD form, `_` when empty
pub struct UdFeatures<'a>(pub &'a Features);

impl fmt::Display for UdFeatures<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      return write!(f, "_");
    }
    for (idx, (name, value)) in self.0.iter().enumerate() {
      if idx > 0 {
        write!(f, "|")?;
      }
      write!(f, "{}={}", name, value)?;
    }
    Ok(())
  }
}

/// What a ghost expects of a single feature: one value, or any of several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureExpectation {
  One(String),
  AnyOf(Vec<String>),
}

impl FeatureExpectation {
  /// Does an actual (possibly multi-valued) feature value satisfy this expectation?
  pub fn accepts(&self, actual: &str) -> bool {
    match self {
      Self::One(expected) => multi_values_intersect(expected, actual),
      Self::AnyOf(options) => options.iter().any(|o| multi_values_intersect(o, actual)),
    }
  }

  pub fn values(&self) -> Vec<&str> {
    match self {
      Self::One(v) => split_multi_value(v).collect(),
      Self::AnyOf(vs) => vs.iter().flat_map(|v| split_multi_value(v)).collect(),
    }
  }
}

impl From<&str> for FeatureExpectation {
  fn from(s: &str) -> Self {
    Self::One(s.to_string())
  }
}

impl fmt::Display for FeatureExpectation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.values().join("/"))
  }
}

pub type ExpectedFeatures = BTreeMap<String, FeatureExpectation>;

/// Subset match: every expected feature must be present on `actual` with an
/// accepted value.
pub fn features_satisfy(expected: &ExpectedFeatures, actual: &Features) -> bool {
  expected.iter().all(|(name, expectation)| {
    actual
      .get(name)
      .map(|value| expectation.accepts(value))
      .unwrap_or(false)
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_ud_features() {
    let fs = parse_ud_features("Gender=Fem|Number=Sing|bogus");
    assert_eq!(fs.len(), 2);
    assert_eq!(fs["Gender"], "Fem");
    assert_eq!(UdFeatures(&fs).to_string(), "Gender=Fem|Number=Sing");
    assert!(parse_ud_features("_").is_empty());
  }

  #[test]
  fn test_expectation_multi_valued() {
    let mut expected = ExpectedFeatures::new();
    expected.insert(
      "Gender".into(),
      FeatureExpectation::AnyOf(vec!["Masc".into(), "Fem".into()]),
    );

    let mut actual = Features::new();
    actual.insert("Gender".into(), "Fem".into());
    assert!(features_satisfy(&expected, &actual));

    actual.insert("Gender".into(), "Neut".into());
    assert!(!features_satisfy(&expected, &actual));

    actual.remove("Gender");
    assert!(!features_satisfy(&expected, &actual));
  }

  #[test]
  fn test_expectation_deserializes_untagged() {
    let one: FeatureExpectation = serde_json::from_str(r#""Sing""#).unwrap();
    let many: FeatureExpectation = serde_json::from_str(r#"["Masc", "Fem"]"#).unwrap();
    assert_eq!(one, FeatureExpectation::One("Sing".into()));
    assert_eq!(many.values(), vec!["Masc", "Fem"]);
  }
}
