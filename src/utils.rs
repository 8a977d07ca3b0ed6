use std::time::{SystemTime, UNIX_EPOCH};

/// Splits a multi-valued morphological feature ("Masc,Fem") into its values.
/// Surrounding whitespace is dropped, as are empty segments.
///
/// ```
/// let values = cxgparse::utils::split_multi_value("Masc, Fem,").collect::<Vec<_>>();
/// assert_eq!(values, vec!["Masc", "Fem"]);
/// ```
pub fn split_multi_value(value: &str) -> impl Iterator<Item = &str> {
  value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

/// True if any value of `a` equals any value of `b`, treating both as
/// comma-separated value lists.
pub fn multi_values_intersect(a: &str, b: &str) -> bool {
  split_multi_value(a).any(|x| split_multi_value(b).any(|y| x == y))
}

/// Milliseconds since the unix epoch. Clocks set before 1970 read as 0.
pub fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

#[test]
fn test_multi_values_intersect() {
  assert!(multi_values_intersect("Masc,Fem", "Masc"));
  assert!(multi_values_intersect("Sing", "Plur,Sing"));
  assert!(!multi_values_intersect("Masc", "Fem"));
  assert!(!multi_values_intersect("", "Fem"));
}
