//! The incremental driver. Tokens are consumed left to right; at each position
//! every live hypothesis absorbs the token, advances the construction matches
//! it has in progress, starts the constructions the token triggers, lets the
//! token fulfil ghosts left by earlier positions and links it into the graph.
//!
//! Hypotheses are independent `ParseState`s. Constructions of the same type and
//! priority competing for one token fork the state, one hypothesis per
//! construction, bounded by `max_hypotheses`.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::ops::Range;
use std::rc::Rc;

use crate::config::ParserConfig;
use crate::construction::{Construction, ConstructionType, GhostType};
use crate::error::StateError;
use crate::ghost::GhostRequest;
use crate::link_builder::LinkBuilder;
use crate::parse_state::ParseState;
use crate::reconfiguration::ReconfigurationOperation;
use crate::registry::ConstructionRegistry;
use crate::token::Token;
use crate::token_graph::NodeId;

/// Features a dropped subject inherits from the predicate that licenses it
const SUBJECT_AGREEMENT_FEATURES: &[&str] = &["Number", "Person"];

/// Every hypothesis left at the end of a sentence, best first
#[derive(Debug, Clone)]
pub struct ParseOutcome {
  pub best: ParseState,
  pub others: Vec<ParseState>,
}

impl ParseOutcome {
  pub fn hypotheses(&self) -> impl Iterator<Item = &ParseState> {
    std::iter::once(&self.best).chain(self.others.iter())
  }

  pub fn len(&self) -> usize {
    1 + self.others.len()
  }

  pub fn is_empty(&self) -> bool {
    false
  }
}

/// Lower sorts first: finished cleanly, fewest expired ghosts, most edges
fn rank(state: &ParseState) -> (bool, usize, Reverse<usize>, u32) {
  (
    state.is_failed(),
    state.ghost_manager().summary().expired,
    Reverse(state.token_graph().edge_count()),
    state.id,
  )
}

pub struct IncrementalParser<'r> {
  registry: &'r ConstructionRegistry,
  config: ParserConfig,
  link_builder: LinkBuilder,
}

impl<'r> IncrementalParser<'r> {
  pub fn new(registry: &'r ConstructionRegistry, config: ParserConfig) -> Self {
    let link_builder = LinkBuilder::new(config.max_local_distance);
    Self {
      registry,
      config,
      link_builder,
    }
  }

  pub fn with_link_builder(mut self, link_builder: LinkBuilder) -> Self {
    self.link_builder = link_builder;
    self
  }

  pub fn config(&self) -> &ParserConfig {
    &self.config
  }

  pub fn parse(&self, sentence: &str, tokens: Vec<Token>) -> ParseOutcome {
    let len = tokens.len();
    let initial = ParseState::new(sentence, tokens, self.registry.type_graph().clone())
      .with_snapshot_log_window(self.config.snapshot_log_window);
    let mut next_id = 1;
    let mut beam = vec![initial];

    let span = tracing::debug_span!("parse", sentence, tokens = len);
    let _enter = span.enter();

    for position in 0..len {
      let mut stepped = Vec::with_capacity(beam.len());
      for state in beam {
        if state.is_parsing() {
          stepped.extend(self.step(state, &mut next_id));
        } else {
          stepped.push(state);
        }
      }

      stepped.sort_by_key(rank);
      if stepped.len() > self.config.max_hypotheses.max(1) {
        tracing::debug!(
          position,
          dropped = stepped.len() - self.config.max_hypotheses.max(1),
          "pruning hypotheses"
        );
        stepped.truncate(self.config.max_hypotheses.max(1));
      }

      if position + 1 < len {
        for state in stepped.iter_mut().filter(|s| s.is_parsing()) {
          if let Err(e) = state.advance() {
            fail(state, &e);
          }
        }
      }
      beam = stepped;
    }

    for state in beam.iter_mut().filter(|s| s.is_parsing()) {
      if let Err(e) = self.finish(state) {
        fail(state, &e);
      }
    }

    beam.sort_by_key(rank);
    let mut beam = beam.into_iter();
    // the beam never empties: a state is only ever replaced by its forks
    let best = match beam.next() {
      Some(best) => best,
      None => unreachable!("parse beam is never empty"),
    };
    ParseOutcome {
      best,
      others: beam.collect(),
    }
  }

  /// Processes the current token on one hypothesis. Returns it, or it and its forks.
  fn step(&self, mut state: ParseState, next_id: &mut u32) -> Vec<ParseState> {
    let (node, consumed) = match self.absorb(&mut state) {
      Ok(absorbed) => absorbed,
      Err(e) => {
        fail(&mut state, &e);
        return vec![state];
      }
    };

    let Some(token) = state.current_token().cloned() else {
      return vec![state];
    };
    let triggered = self
      .registry
      .constructions_for_token(&token)
      .into_iter()
      .filter(|c| !consumed.contains(&c.id))
      .filter_map(|c| c.entry_for(&token).map(|entry| (c.clone(), entry)))
      .collect::<Vec<_>>();

    let contested = if self.config.fork_on_ambiguity {
      contested_group(&triggered)
    } else {
      Vec::new()
    };

    let mut variants = Vec::new();
    if contested.len() > 1 {
      let mut hypotheses = vec![state];
      for _ in 1..contested.len() {
        let forked = hypotheses[0].fork(*next_id);
        *next_id += 1;
        hypotheses.push(forked);
      }

      for (hypothesis, chosen) in hypotheses.into_iter().zip(contested.iter()) {
        let starts = triggered
          .iter()
          .enumerate()
          .filter(|(i, _)| !contested.contains(i) || *i == *chosen)
          .map(|(_, t)| t.clone())
          .collect::<Vec<_>>();
        let rivals = contested
          .iter()
          .filter(|i| **i != *chosen)
          .map(|i| triggered[*i].0.name.as_str())
          .collect::<Vec<_>>()
          .join(", ");
        tracing::debug!(
          hypothesis = hypothesis.id,
          construction = %triggered[*chosen].0.name,
          rivals = %rivals,
          "forking on equal priority"
        );
        variants.push((hypothesis, starts, Some(rivals)));
      }
    } else {
      variants.push((state, triggered, None));
    }

    variants
      .into_iter()
      .map(|(mut hypothesis, starts, rivals)| {
        if let Err(e) = self.settle(&mut hypothesis, node, &starts, rivals.as_deref()) {
          fail(&mut hypothesis, &e);
        }
        hypothesis
      })
      .collect()
  }

  /// Adds the token's node and advances the matches in progress. Returns the
  /// node and the constructions that consumed it.
  fn absorb(&self, state: &mut ParseState) -> Result<(NodeId, BTreeSet<u32>), StateError> {
    let node = state.add_current_token()?;
    let Some(token) = state.current_token().cloned() else {
      return Ok((node, BTreeSet::new()));
    };

    let mut consumed = BTreeSet::new();
    let active = state.active_alternatives().map(|a| a.id).collect::<Vec<_>>();
    for alt_id in active {
      let Some((construction_id, cursor)) = state
        .alternative(alt_id)
        .map(|a| (a.construction_id, a.cursor))
      else {
        continue;
      };
      let Some(c) = self.registry.get(construction_id).cloned() else {
        continue;
      };

      match next_match(&c, cursor, &token) {
        Some(idx) => {
          self.elide(state, &c, alt_id, cursor..idx)?;
          self.realize(state, &c, alt_id, idx, node)?;
          consumed.insert(c.id);
          if idx + 1 == c.pattern.len() {
            self.complete(state, &c, alt_id)?;
          }
        }
        // clauses tolerate intervening material, phrases and MWEs are contiguous
        None if tolerates_gaps(c.construction_type) => {}
        None => {
          if (cursor..c.pattern.len()).all(|i| c.is_skippable(i)) {
            self.elide(state, &c, alt_id, cursor..c.pattern.len())?;
            self.complete(state, &c, alt_id)?;
          } else {
            let cause = format!("{} does not continue {}", token.word, c.name);
            self.abandon(state, &c, alt_id, &cause)?;
          }
        }
      }
    }
    Ok((node, consumed))
  }

  /// Starts the chosen constructions at the token, fulfils earlier ghosts the
  /// token can stand for, then confirms, links and snapshots.
  fn settle(
    &self,
    state: &mut ParseState,
    node: NodeId,
    starts: &[(Rc<Construction>, usize)],
    rivals: Option<&str>,
  ) -> Result<(), StateError> {
    for (c, entry) in starts {
      let alt_id = self.start(state, c, *entry, node)?;
      if let Some(rivals) = rivals {
        state.record(ReconfigurationOperation::alternative_reevaluated(
          state.current_position(),
          alt_id,
          c.id,
          &format!("chosen over {} at equal priority", rivals),
        ))?;
      }
    }

    self.fulfil_earlier_ghosts(state, node)?;

    state.confirm_node(node)?;
    if self.held_by_mwe(state, node) {
      tracing::trace!(%node, "linking deferred until the multiword expression resolves");
    } else {
      self.link_builder.build_links(state, node)?;
    }
    if self.config.capture_snapshots {
      state.capture_snapshot()?;
    }
    Ok(())
  }

  fn start(
    &self,
    state: &mut ParseState,
    c: &Rc<Construction>,
    entry: usize,
    node: NodeId,
  ) -> Result<u32, StateError> {
    let alt_id = state.start_alternative(c)?;
    if entry > 0 {
      self.elide(state, c, alt_id, 0..entry)?;
    }
    self.realize(state, c, alt_id, entry, node)?;

    // mandatory elements still to come are predicted now
    for idx in entry + 1..c.pattern.len() {
      self.ghost_for(state, c, alt_id, idx)?;
    }

    if entry + 1 == c.pattern.len() {
      self.complete(state, c, alt_id)?;
    }
    Ok(alt_id)
  }

  /// Element `idx` of the alternative is realized by `node`
  fn realize(
    &self,
    state: &mut ParseState,
    c: &Construction,
    alt_id: u32,
    idx: usize,
    node: NodeId,
  ) -> Result<(), StateError> {
    state.label_node(node, &c.labels_for_element(idx))?;
    let Some(alt) = state.alternative_mut(alt_id) else {
      return Ok(());
    };
    alt.record_match(idx, node);
    let predicted = alt.ghosts.get(&idx).copied();

    if let Some(ghost) = predicted {
      let fits = match (state.token_graph().ghost(ghost), state.token_graph().node(node)) {
        (Some(g), Some(n)) => g.can_be_fulfilled_by(n),
        _ => false,
      };
      if fits {
        let ops = state.fulfill_ghost(ghost, node)?;
        state.record_all(ops)?;
      }
    }
    Ok(())
  }

  /// Skips elements in `range`, standing ghosts in for the mandatory ones
  fn elide(
    &self,
    state: &mut ParseState,
    c: &Construction,
    alt_id: u32,
    range: Range<usize>,
  ) -> Result<(), StateError> {
    if range.is_empty() {
      return Ok(());
    }
    for idx in range.clone() {
      self.ghost_for(state, c, alt_id, idx)?;
    }
    if let Some(alt) = state.alternative_mut(alt_id) {
      alt.cursor = alt.cursor.max(range.end);
    }
    state.record(ReconfigurationOperation::alternative_reevaluated(
      state.current_position(),
      alt_id,
      c.id,
      &format!("elements {}..{} of {} not realized", range.start, range.end, c.name),
    ))?;
    Ok(())
  }

  /// Creates the ghost for element `idx` if it is mandatory and has none yet
  fn ghost_for(
    &self,
    state: &mut ParseState,
    c: &Construction,
    alt_id: u32,
    idx: usize,
  ) -> Result<(), StateError> {
    let Some((label, mandatory)) = c.mandatory_element_at(idx) else {
      return Ok(());
    };
    let already = state
      .alternative(alt_id)
      .is_some_and(|a| a.ghosts.contains_key(&idx) || a.matched.iter().any(|(e, _)| *e == idx));
    if already {
      return Ok(());
    }

    let mut expected_features = mandatory.expected_features.clone();
    if mandatory.ghost_type == GhostType::DroppedSubject {
      if let Some(token) = state.current_token() {
        for feature in SUBJECT_AGREEMENT_FEATURES {
          if let Some(value) = token.feature(feature) {
            expected_features
              .entry(feature.to_string())
              .or_insert_with(|| value.into());
          }
        }
      }
    }

    let element = &c.pattern.elements[idx];
    let request = GhostRequest {
      ghost_type: mandatory.ghost_type.clone(),
      position: state.current_position(),
      construction: Some(c.id),
      alternative: Some(alt_id),
      expected_ce: Some((c.construction_type.ce_level(), label.to_string())),
      expected_pos: mandatory
        .expected_pos
        .clone()
        .or_else(|| element.matcher.single_pos().map(str::to_string)),
      expected_features,
    };
    let (ghost, op) = state.create_ghost(request)?;
    state.record(op)?;
    if let Some(alt) = state.alternative_mut(alt_id) {
      alt.ghosts.insert(idx, ghost);
    }
    state.confirm_node(ghost)?;
    Ok(())
  }

  fn complete(&self, state: &mut ParseState, c: &Construction, alt_id: u32) -> Result<(), StateError> {
    let Some(op) = state.complete_alternative(alt_id)? else {
      return Ok(());
    };
    let nodes = op.affected_nodes.clone();
    state.record(op)?;
    tracing::debug!(construction = %c.name, span = nodes.len(), "construction completed");

    if c.construction_type == ConstructionType::Mwe {
      let real = nodes
        .iter()
        .copied()
        .filter(|n| !n.is_ghost_id())
        .collect::<Vec<_>>();
      if let Some((first, rest)) = real.split_first() {
        for n in rest {
          state.link(*first, *n, "fixed")?;
        }
      }
      let first = real.first().copied();
      state.record(ReconfigurationOperation::mwe_aggregated(
        state.current_position(),
        c.id,
        &c.name,
        real,
      ))?;
      // the expression attaches to the rest of the sentence through its first token
      if let Some(first) = first {
        self.link_builder.build_links(state, first)?;
      }
    }
    Ok(())
  }

  /// Abandons a match. Tokens an abandoned MWE was holding back get linked now.
  fn abandon(&self, state: &mut ParseState, c: &Construction, alt_id: u32, cause: &str) -> Result<(), StateError> {
    let held = state.alternative(alt_id).map(|a| a.nodes()).unwrap_or_default();
    if let Some(op) = state.abandon_alternative(alt_id, cause)? {
      state.record(op)?;
    }
    if c.construction_type == ConstructionType::Mwe {
      for node in held.into_iter().filter(|n| !n.is_ghost_id()) {
        if !self.held_by_mwe(state, node) {
          self.link_builder.build_links(state, node)?;
        }
      }
    }
    Ok(())
  }

  /// Is the node part of a multiword expression still being matched?
  fn held_by_mwe(&self, state: &ParseState, node: NodeId) -> bool {
    state.active_alternatives().any(|a| {
      a.element_of(node).is_some()
        && self
          .registry
          .get(a.construction_id)
          .is_some_and(|c| c.construction_type == ConstructionType::Mwe)
    })
  }

  /// The token may realize a ghost some earlier position left pending. It
  /// fulfils at most one, the oldest, and never one its own match accounts for.
  fn fulfil_earlier_ghosts(&self, state: &mut ParseState, node: NodeId) -> Result<(), StateError> {
    let already = state
      .token_graph()
      .node(node)
      .and_then(|n| n.as_real())
      .is_some_and(|r| r.was_ghost());
    if already {
      return Ok(());
    }

    let candidate = state.fulfillable_ghosts(node).into_iter().find(|ghost| {
      let owner = state
        .token_graph()
        .ghost(*ghost)
        .and_then(|g| g.created_by_alternative)
        .and_then(|a| state.alternative(a));
      !owner.is_some_and(|a| a.matched.iter().any(|(_, n)| *n == node))
    });

    if let Some(ghost) = candidate {
      let ops = state.fulfill_ghost(ghost, node)?;
      state.record_all(ops)?;
    }
    Ok(())
  }

  /// End of sentence: open matches either close with ghosts for what is left or
  /// are abandoned, then the state completes and unfulfilled ghosts expire.
  fn finish(&self, state: &mut ParseState) -> Result<(), StateError> {
    let active = state.active_alternatives().map(|a| a.id).collect::<Vec<_>>();
    for alt_id in active {
      let Some((construction_id, cursor)) = state
        .alternative(alt_id)
        .map(|a| (a.construction_id, a.cursor))
      else {
        continue;
      };
      let Some(c) = self.registry.get(construction_id).cloned() else {
        continue;
      };
      if (cursor..c.pattern.len()).all(|i| c.is_skippable(i)) {
        self.elide(state, &c, alt_id, cursor..c.pattern.len())?;
        self.complete(state, &c, alt_id)?;
      } else {
        self.abandon(state, &c, alt_id, "sentence ended")?;
      }
    }
    state.mark_complete()?;
    Ok(())
  }
}

/// First element at or after `cursor` the token matches, provided every
/// element skipped on the way can be skipped
fn next_match(c: &Construction, cursor: usize, token: &Token) -> Option<usize> {
  for idx in cursor..c.pattern.len() {
    if c.pattern.elements[idx].matches(token) {
      return Some(idx);
    }
    if !c.is_skippable(idx) {
      return None;
    }
  }
  None
}

fn tolerates_gaps(ty: ConstructionType) -> bool {
  matches!(ty, ConstructionType::Clausal | ConstructionType::Sentential)
}

/// Indices into `triggered` of the highest-ranked group of two or more
/// constructions sharing type and priority
fn contested_group(triggered: &[(Rc<Construction>, usize)]) -> Vec<usize> {
  for (i, (c, _)) in triggered.iter().enumerate() {
    let group = triggered
      .iter()
      .enumerate()
      .skip(i)
      .filter(|(_, (o, _))| o.construction_type == c.construction_type && o.priority == c.priority)
      .map(|(j, _)| j)
      .collect::<Vec<_>>();
    if group.len() > 1 {
      return group;
    }
  }
  Vec::new()
}

fn fail(state: &mut ParseState, error: &StateError) {
  if state.mark_failed(&error.to_string()).is_err() {
    tracing::warn!(state = state.id, %error, "error on a finished parse state");
  }
}
