use std::fs;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cxgparse::export::{DepTree, log_timeline, to_dot};
use cxgparse::{
  ConstructionRegistry, IncrementalParser, JsonGrammarSource, ParseState, ParserConfig, TaggedSentence,
};

type Err = Box<dyn std::error::Error + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
  /// Dependency tree, one root per line
  Tree,
  /// Graphviz source of the token graph
  Dot,
  /// The full parse state as JSON
  Json,
  /// Reconfiguration log, grouped by position
  Log,
  /// Parse statistics as JSON
  Stats,
}

/// Incremental construction-grammar dependency parser
#[derive(Parser)]
#[command(name = "cxgparse", version)]
struct Cli {
  /// Grammar file (`{"grammars": [..]}`)
  #[arg(short, long)]
  grammar: PathBuf,

  /// Grammar to load from the file
  #[arg(long, default_value = "pt")]
  grammar_id: String,

  /// Parser configuration (JSON); missing fields take defaults
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[arg(short, long, default_value = "tree", value_enum)]
  format: Format,

  /// Print every surviving hypothesis, not just the best
  #[arg(long)]
  all: bool,

  /// More logging (-v, -vv); RUST_LOG overrides
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,

  /// Tagged sentence (`{"tokens": [..]}`). Without one, sentences are read
  /// from stdin, one JSON object per line.
  tokens: Option<PathBuf>,
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "cxgparse=debug",
    _ => "cxgparse=trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn render(state: &ParseState, format: Format) -> Result<String, Err> {
  Ok(match format {
    Format::Tree => DepTree::from_graph(state.token_graph())
      .iter()
      .map(|t| t.to_string())
      .collect::<Vec<_>>()
      .join("\n"),
    Format::Dot => to_dot(state.token_graph()),
    Format::Json => serde_json::to_string_pretty(&state.to_value()?)?,
    Format::Log => log_timeline(state.reconfiguration_log()),
    Format::Stats => serde_json::to_string_pretty(&state.statistics())?,
  })
}

fn parse(parser: &IncrementalParser, input: &str, opts: &Cli) -> Result<bool, Err> {
  let tagged = TaggedSentence::from_json_str(input)?;
  let outcome = parser.parse(&tagged.sentence, tagged.tokens);
  tracing::debug!(sentence = %tagged.sentence, hypotheses = outcome.len(), "sentence parsed");

  if matches!(opts.format, Format::Tree) {
    println!(
      "Kept {} hypothes{}",
      outcome.len(),
      if outcome.len() == 1 { "is" } else { "es" }
    );
  }

  let shown = if opts.all { outcome.len() } else { 1 };
  for state in outcome.hypotheses().take(shown) {
    if let Some(reason) = state.failure_reason() {
      eprintln!("hypothesis {} failed: {}", state.id, reason);
    }
    println!("{}", render(state, opts.format)?);
  }

  Ok(!outcome.best.is_failed())
}

fn main() -> Result<(), Err> {
  let opts = Cli::parse();
  init_tracing(opts.verbose);

  let config = match &opts.config {
    Some(path) => ParserConfig::from_file(path)?,
    None => ParserConfig::default(),
  };
  let registry = ConstructionRegistry::from_source(&opts.grammar_id, &JsonGrammarSource::new(&opts.grammar))?;
  tracing::info!(
    grammar = %opts.grammar.display(),
    grammar_id = %opts.grammar_id,
    constructions = registry.len(),
    "grammar ready"
  );
  let parser = IncrementalParser::new(&registry, config);

  if let Some(path) = &opts.tokens {
    let input = fs::read_to_string(path)?;
    if !parse(&parser, &input, &opts)? {
      process::exit(1);
    }
    return Ok(());
  }

  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    input.clear();
    match io::stdin().read_line(&mut input) {
      // ctrl+d
      Ok(0) => return Ok(()),
      Ok(_) if input.trim().is_empty() => continue,
      Ok(_) => {
        if let Err(e) = parse(&parser, input.trim(), &opts) {
          eprintln!("{}", e);
        }
      }
      Err(e) => return Err(e.into()),
    }
  }
}
