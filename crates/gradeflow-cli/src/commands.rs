//! Command definitions and handlers for the gradeflow CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gradeflow_core::{validate, Difficulty, QuestionKey, SchemaKind, UniformRandom, ValidatedPayload};
use gradeflow_runtime::{MemoryStorage, Pipeline, ProviderRegistry, QuestionRequest, RuntimeConfig};

use crate::fixture::Fixture;

/// Grade answers and generate questions with LLM providers.
#[derive(Parser)]
#[command(name = "gradeflow")]
#[command(about = "Grade assessments and generate questions with LLM providers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a raw provider payload against one of the schemas.
    Validate(ValidateArgs),

    /// Load a configuration file and check its provider chain.
    CheckConfig(CheckConfigArgs),

    /// Grade an assessment described by a JSON fixture.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Generate questions for a subject, topic and difficulty.
    #[command(alias = "gen")]
    Generate(GenerateArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PayloadKind {
    Evaluation,
    Objective,
    Subjective,
}

#[derive(Parser)]
pub struct ValidateArgs {
    #[arg(short, long, value_enum)]
    pub kind: PayloadKind,

    /// Upper bound for evaluation scores.
    #[arg(long, default_value_t = 10)]
    pub max_score: u32,

    /// Allowed marks for subjective questions (empty accepts any).
    #[arg(long, value_delimiter = ',', default_values_t = [5, 10, 15])]
    pub marks: Vec<u32>,

    /// File holding the raw payload text.
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct CheckConfigArgs {
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct EvaluateArgs {
    /// Runtime configuration (YAML). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fixture with the assessment, items and answers.
    #[arg(short, long)]
    pub fixture: PathBuf,
}

#[derive(Parser)]
pub struct GenerateArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub topic: String,

    #[arg(long, default_value = "medium")]
    pub difficulty: Difficulty,

    #[arg(long, default_value_t = 5)]
    pub objective: usize,

    #[arg(long, default_value_t = 2)]
    pub subjective: usize,

    /// Also assemble an assessment from the stored pool.
    #[arg(long)]
    pub assemble: bool,

    /// Seed for reproducible assessment selection.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::CheckConfig(args) => run_check_config(args),
        Commands::Evaluate(args) => run_evaluate(args).await,
        Commands::Generate(args) => run_generate(args).await,
    }
}

fn run_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let kind = match args.kind {
        PayloadKind::Evaluation => SchemaKind::Evaluation {
            max_score: args.max_score,
        },
        PayloadKind::Objective => SchemaKind::ObjectiveBatch,
        PayloadKind::Subjective => SchemaKind::SubjectiveBatch {
            allowed_marks: args.marks,
        },
    };

    let payload = validate(&raw, &kind)
        .with_context(|| format!("Payload does not match the {} schema", kind.name()))?;

    match payload {
        ValidatedPayload::Evaluation(evaluation) => print_json(&evaluation),
        ValidatedPayload::ObjectiveBatch(questions) | ValidatedPayload::SubjectiveBatch(questions) => {
            print_json(&questions)
        }
    }
}

#[derive(Serialize)]
struct ProviderCheck<'a> {
    name: &'a str,
    kind: &'a str,
    timeout: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn run_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let config = load_config(Some(&args.file))?;
    let registry = ProviderRegistry::with_defaults();

    let checks: Vec<ProviderCheck<'_>> = config
        .providers
        .iter()
        .map(|entry| {
            let error = registry
                .validate(&entry.kind, &entry.factory_options())
                .err()
                .map(|e| e.to_string());
            ProviderCheck {
                name: &entry.name,
                kind: &entry.kind,
                timeout: humantime::format_duration(entry.timeout).to_string(),
                ok: error.is_none(),
                error,
            }
        })
        .collect();

    print_json(&checks)?;
    if checks.iter().any(|c| !c.ok) {
        bail!("provider chain has invalid entries");
    }
    Ok(())
}

async fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let storage = Arc::new(
        MemoryStorage::new().with_objective_max_score(config.generation.objective_max_score),
    );
    let assessment_id = Fixture::from_file(&args.fixture)?.load_into(&storage);

    let pipeline = Pipeline::builder()
        .config(config)
        .storage(storage)
        .build()
        .context("Failed to build pipeline")?;

    let cancel = cancel_on_ctrl_c();
    let record = pipeline
        .evaluate(&assessment_id, &cancel)
        .await
        .with_context(|| format!("Failed to evaluate assessment '{assessment_id}'"))?;

    info!(
        assessment = %assessment_id,
        percentage = record.overall_percentage,
        partial = record.partial,
        "Evaluation finished"
    );
    print_json(&record)
}

async fn run_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let storage = Arc::new(
        MemoryStorage::new().with_objective_max_score(config.generation.objective_max_score),
    );
    let pipeline = Pipeline::builder()
        .config(config)
        .storage(storage)
        .build()
        .context("Failed to build pipeline")?;

    let request = QuestionRequest::new(
        QuestionKey::new(args.subject, args.topic, args.difficulty),
        args.objective,
        args.subjective,
    );
    let cancel = cancel_on_ctrl_c();

    if args.assemble {
        let strategy = args.seed.map(UniformRandom::seeded).unwrap_or_default();
        let assessment = pipeline
            .assemble_assessment(&request, &strategy, &cancel)
            .await
            .context("Failed to assemble assessment")?;
        return print_json(&assessment);
    }

    let questions = pipeline
        .generate_questions(&request, &cancel)
        .await
        .context("Failed to generate questions")?;
    print_json(&questions)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => {
            let config = RuntimeConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.validate().context("Invalid configuration")?;
            Ok(config)
        }
        None => Ok(RuntimeConfig::default()),
    }
}

/// A token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing with partial results");
            token.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
