//! kbqa CLI: question answering over a knowledge base.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use kbqa::config::QaConfig;
use kbqa::disambig::DisambiguatorRegistry;
use kbqa::extract::TripleExtractor;
use kbqa::extract::fewshot::{self, ExampleIndex};
use kbqa::kb::Value;
use kbqa::kb::memory::MemoryKb;
use kbqa::llm::build_model;
use kbqa::pipeline::{QaPipeline, few_shot_from_config};

const DEFAULT_CONFIG: &str = "kbqa.toml";

#[derive(Parser)]
#[command(name = "kbqa", version, about = "Question answering over a knowledge base")]
struct Cli {
    /// Configuration file (defaults to ./kbqa.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a JSON knowledge base.
    Query {
        question: String,

        /// Knowledge base file.
        #[arg(long)]
        kb: PathBuf,

        /// Disambiguation strategy, overriding the configuration.
        #[arg(long)]
        strategy: Option<String>,

        /// Always disambiguate properties per linked item.
        #[arg(long)]
        no_fast_path: bool,

        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,

        /// Maximum answers to print.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print the triple patterns extracted from a question.
    Extract { question: String },

    /// Embed an example file into a reusable few-shot index.
    IndexExamples {
        /// Examples (`.jsonl`, `.json`, `.csv`, `.tsv`).
        #[arg(long)]
        examples: PathBuf,

        /// Where to write the index.
        #[arg(long)]
        output: PathBuf,
    },

    /// List the registered disambiguation strategies.
    Strategies,

    /// Write a default configuration file.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<QaConfig> {
    let mut config = match path {
        Some(path) => QaConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => QaConfig::load(Path::new(DEFAULT_CONFIG))?,
        None => QaConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Query {
            question,
            kb,
            strategy,
            no_fast_path,
            json,
            limit,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(strategy) = strategy {
                config.disambiguation.strategy = strategy;
            }
            if no_fast_path {
                config.resolution.fast_path = false;
            }

            let kb = Arc::new(MemoryKb::load(&kb)?);
            let pipeline = QaPipeline::from_config(&config, kb)?;
            let outcome = pipeline.query(&question)?;

            if json {
                let statements = pipeline
                    .statements(&outcome)
                    .take(limit)
                    .collect::<Result<Vec<_>, _>>()?;
                let out = serde_json::to_string_pretty(&serde_json::json!({
                    "outcome": outcome,
                    "statements": statements,
                }))
                .into_diagnostic()?;
                println!("{out}");
                return Ok(());
            }

            println!("Question: {question}");
            for pattern in &outcome.triple_patterns {
                println!("  pattern: {pattern}");
            }
            for triple in &outcome.label_triples {
                println!("  triple:  {triple}");
            }
            for failure in &outcome.failures {
                println!("  skipped: {} ({})", failure.item, failure.message);
            }
            if outcome.filters.is_empty() {
                println!("No queryable triples.");
                return Ok(());
            }

            println!("Answers:");
            for statement in pipeline.statements(&outcome).take(limit) {
                let statement = statement?;
                let answer = if outcome.triples.iter().any(|t| t.subject.is_none()) {
                    statement.subject.to_string()
                } else {
                    match &statement.value {
                        Value::Entity(entity) => entity.to_string(),
                        Value::Literal { content, .. } => content.clone(),
                    }
                };
                println!("  {answer}");
            }
        }

        Commands::Extract { question } => {
            let config = load_config(cli.config.as_deref())?;
            let model = build_model(&config.model, config.model.extraction_model_name())?;
            let embedder = config.build_embedder()?;
            let extractor =
                TripleExtractor::new(model).with_few_shot(few_shot_from_config(&config, &embedder)?);
            let patterns = config.retry.policy().run("extract", || extractor.extract(&question))?;
            let out = serde_json::to_string_pretty(&patterns).into_diagnostic()?;
            println!("{out}");
        }

        Commands::IndexExamples { examples, output } => {
            let config = load_config(cli.config.as_deref())?;
            let embedder = config.build_embedder()?;
            let loaded = fewshot::load_examples(&examples, None)?;
            let index = ExampleIndex::build(loaded, embedder.as_ref())?;
            index.save(&output)?;
            println!(
                "Indexed {} examples from {} into {}",
                index.len(),
                examples.display(),
                output.display()
            );
        }

        Commands::Strategies => {
            for name in DisambiguatorRegistry::global().names() {
                println!("{name}");
            }
        }

        Commands::InitConfig { output } => {
            if output.exists() {
                miette::bail!("{} already exists", output.display());
            }
            QaConfig::default().save(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}
