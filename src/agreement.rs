//! Morphological agreement between two nodes. Features are optional: a value
//! missing on either side never counts as a mismatch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::Features;
use crate::utils::{multi_values_intersect, split_multi_value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
  pub feature: String,
  pub source_value: String,
  pub target_value: String,
}

impl fmt::Display for Mismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {} ≠ {}", self.feature, self.source_value, self.target_value)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgreementResult {
  pub agrees: bool,
  pub mismatches: Vec<Mismatch>,
}

impl fmt::Display for AgreementResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.agrees {
      return write!(f, "agrees");
    }
    let ms = self.mismatches.iter().map(|m| m.to_string()).collect::<Vec<_>>();
    write!(f, "disagrees ({})", ms.join(", "))
  }
}

/// Feature-specific compatibility beyond value equality
fn compatible(feature: &str, a: &str, b: &str) -> bool {
  match feature {
    // common gender agrees with either
    "Gender" => {
      let is_com = |v: &str| split_multi_value(v).any(|x| x == "Com");
      is_com(a) || is_com(b)
    }
    // TODO: collective nouns ("a equipe venceram") take plural verbs in some dialects
    "Number" => false,
    _ => false,
  }
}

pub fn values_agree(feature: &str, a: &str, b: &str) -> bool {
  a == b || multi_values_intersect(a, b) || compatible(feature, a, b)
}

/// Checks each required feature on both sides
pub fn check_agreement<S: AsRef<str>>(
  source: &Features,
  target: &Features,
  required: &[S],
) -> AgreementResult {
  let mismatches = required
    .iter()
    .filter_map(|feature| {
      let feature: &str = feature.as_ref();
      let (s, t) = (source.get(feature)?, target.get(feature)?);
      if values_agree(feature, s, t) {
        None
      } else {
        Some(Mismatch {
          feature: feature.to_string(),
          source_value: s.clone(),
          target_value: t.clone(),
        })
      }
    })
    .collect::<Vec<_>>();

  AgreementResult {
    agrees: mismatches.is_empty(),
    mismatches,
  }
}

/// Features that must agree for a kind of attachment. Unknown kinds require nothing.
pub fn required_features_for_construction(kind: &str) -> &'static [&'static str] {
  match kind {
    "NP" | "det_noun" | "adj_noun" | "pred_adj" | "relative" => &["Gender", "Number"],
    "subject_verb" => &["Number", "Person"],
    _ => &[],
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::features::parse_ud_features;

  #[test]
  fn test_multi_valued_gender() {
    let r = check_agreement(
      &parse_ud_features("Gender=Masc,Fem"),
      &parse_ud_features("Gender=Masc"),
      &["Gender"],
    );
    assert!(r.agrees);

    let r = check_agreement(
      &parse_ud_features("Gender=Masc"),
      &parse_ud_features("Gender=Fem"),
      &["Gender"],
    );
    assert!(!r.agrees);
    assert_eq!(
      r.mismatches,
      vec![Mismatch {
        feature: "Gender".into(),
        source_value: "Masc".into(),
        target_value: "Fem".into(),
      }]
    );
  }

  #[test]
  fn test_common_gender() {
    let com = parse_ud_features("Gender=Com");
    let fem = parse_ud_features("Gender=Fem");
    assert!(check_agreement(&com, &fem, &["Gender"]).agrees);
    assert!(check_agreement(&fem, &com, &["Gender"]).agrees);
  }

  #[test]
  fn test_number_is_strict() {
    let sing = parse_ud_features("Number=Sing|Person=3");
    let plur = parse_ud_features("Number=Plur|Person=3");
    let r = check_agreement(&sing, &plur, required_features_for_construction("subject_verb"));
    assert!(!r.agrees);
    assert_eq!(r.mismatches.len(), 1);
    assert_eq!(r.to_string(), "disagrees (Number: Sing ≠ Plur)");
  }

  #[test]
  fn test_missing_values_agree() {
    let r = check_agreement(
      &parse_ud_features("Gender=Fem"),
      &parse_ud_features("Number=Plur"),
      required_features_for_construction("NP"),
    );
    assert!(r.agrees);
    assert!(required_features_for_construction("nonsense").is_empty());
  }
}
