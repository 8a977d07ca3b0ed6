use regex::Regex;
/// Simple recursive-descent parsing of construction patterns
use std::fmt;

use crate::token::Token;

/// How a single pattern element recognises a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
  /// `{NOUN|PROPN}`: any of the listed UD POS tags
  Pos(Vec<String>),
  /// `"de"`: the surface form, compared case-insensitively
  Literal(String),
  /// `<ser>`: the lemma
  Lemma(String),
  /// `_`: anything
  Any,
}

impl Matcher {
  pub fn matches(&self, token: &Token) -> bool {
    match self {
      Self::Pos(tags) => tags.iter().any(|t| *t == token.pos),
      Self::Literal(w) => token.word.to_lowercase() == *w,
      Self::Lemma(l) => token.lemma_or_word().to_lowercase() == *l,
      Self::Any => true,
    }
  }

  /// The single POS this matcher expects, used to constrain ghosts
  pub fn single_pos(&self) -> Option<&str> {
    match self {
      Self::Pos(tags) if tags.len() == 1 => Some(&tags[0]),
      _ => None,
    }
  }
}

impl fmt::Display for Matcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Pos(tags) => write!(f, "{{{}}}", tags.join("|")),
      Self::Literal(w) => write!(f, "\"{}\"", w),
      Self::Lemma(l) => write!(f, "<{}>", l),
      Self::Any => write!(f, "_"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternElement {
  pub matcher: Matcher,
  pub optional: bool,
  /// CE label the element produces at its construction's level
  pub label: Option<String>,
}

impl PatternElement {
  pub fn matches(&self, token: &Token) -> bool {
    self.matcher.matches(token)
  }
}

impl fmt::Display for PatternElement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.matcher)?;
    if self.optional {
      write!(f, "?")?;
    }
    if let Some(label) = &self.label {
      write!(f, ":{}", label)?;
    }
    Ok(())
  }
}

/// A compiled construction pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
  pub elements: Vec<PatternElement>,
}

impl Pattern {
  pub fn len(&self) -> usize {
    self.elements.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, idx: usize) -> Option<&PatternElement> {
    self.elements.get(idx)
  }

  /// Labels produced by the elements themselves, in pattern order
  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.elements.iter().filter_map(|e| e.label.as_deref())
  }

  /// Index of the element carrying `label`, if any
  pub fn position_of_label(&self, label: &str) -> Option<usize> {
    self.elements.iter().position(|e| e.label.as_deref() == Some(label))
  }
}

impl fmt::Display for Pattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, e) in self.elements.iter().enumerate() {
      if idx > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", e)?;
    }
    Ok(())
  }
}

impl std::str::FromStr for Pattern {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (elements, rest) = parse_elements(s)?;
    debug_assert!(rest.is_empty());

    if elements.is_empty() {
      Err("empty pattern".into())
    } else {
      Ok(Self { elements })
    }
  }
}

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), String>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Try to consume a regex, returning None if it doesn't match
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  if let Some(m) = re.find(s) {
    if m.start() > 0 {
      return (None, s);
    }
    let (_, rest) = s.split_at(m.end());
    (Some(m.as_str()), rest)
  } else {
    (None, s)
  }
}

/// Try to consume a regex, failing if it doesn't match
fn needed_re<'a>(re: &'static Regex, s: &'a str) -> ParseResult<'a, &'a str> {
  if let (Some(c), rest) = optional_re(re, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {:?}", re, s))
  }
}

/// Try to consume a char, returning None if it doesn't match
fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

/// Try to consume a char, failing if it doesn't match
fn needed_char(c: char, s: &str) -> ParseResult<'_, char> {
  if let (Some(c), rest) = optional_char(c, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {:?}", c, s))
  }
}

/// Skips whitespace and // comments
fn skip_whitespace(s: &str) -> &str {
  regex_static!(WHITESPACE_OR_COMMENT, r"(\s|//[^\n]*)+");
  optional_re(&WHITESPACE_OR_COMMENT, s).1
}

/// POS tags and CE labels: letters, numbers, - and _
fn parse_name(s: &str) -> ParseResult<'_, &str> {
  regex_static!(NAME, r"[\p{L}0-9\-_]+");
  needed_re(&NAME, s).map_err(|e| format!("name: {}", e))
}

/// `{NOUN|PROPN}`
fn parse_pos_set(s: &str) -> ParseResult<'_, Matcher> {
  let (_, mut rem) = needed_char('{', s)?;
  let mut tags = Vec::new();
  loop {
    rem = skip_whitespace(rem);
    let (tag, s) = parse_name(rem).map_err(|e| format!("pos tag: {}", e))?;
    tags.push(tag.to_string());
    let s = skip_whitespace(s);
    if let (Some(_), s) = optional_char('|', s) {
      rem = s;
      continue;
    }
    let (_, s) = needed_char('}', s)?;
    return Ok((Matcher::Pos(tags), s));
  }
}

/// `"a partir"` or `<lemma>`, lowercased
fn parse_quoted(s: &str, open: char, close: char) -> ParseResult<'_, String> {
  let (_, s) = needed_char(open, s)?;
  match s.find(close) {
    Some(0) => Err(format!("empty {}{} at {:?}", open, close, s)),
    Some(end) => Ok((s[..end].to_lowercase(), &s[end + close.len_utf8()..])),
    None => Err(format!("unterminated {} at {:?}", open, s)),
  }
}

fn parse_matcher(s: &str) -> ParseResult<'_, Matcher> {
  match s.chars().next() {
    Some('{') => parse_pos_set(s),
    Some('"') => parse_quoted(s, '"', '"').map(|(w, s)| (Matcher::Literal(w), s)),
    Some('<') => parse_quoted(s, '<', '>').map(|(l, s)| (Matcher::Lemma(l), s)),
    Some('_') => Ok((Matcher::Any, &s[1..])),
    _ => Err(format!("expected {{POS}}, \"word\", <lemma> or _ at {:?}", s)),
  }
}

/// matcher, optional `?`, optional `:Label`
fn parse_element(s: &str) -> ParseResult<'_, PatternElement> {
  let (matcher, s) = parse_matcher(s)?;
  let (q, s) = optional_char('?', s);
  let (colon, s) = optional_char(':', s);
  let (label, s) = if colon.is_some() {
    let (label, s) = parse_name(s).map_err(|e| format!("label: {}", e))?;
    (Some(label.to_string()), s)
  } else {
    (None, s)
  };

  Ok((
    PatternElement {
      matcher,
      optional: q.is_some(),
      label,
    },
    s,
  ))
}

fn parse_elements(s: &str) -> ParseResult<'_, Vec<PatternElement>> {
  let mut elements = Vec::new();
  let mut rem = s;
  loop {
    rem = skip_whitespace(rem);
    if rem.is_empty() {
      return Ok((elements, rem));
    }
    let (element, s) = parse_element(rem)?;
    elements.push(element);
    rem = s;
  }
}
