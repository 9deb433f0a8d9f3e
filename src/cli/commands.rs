//! CLI command definitions and handlers for vignette.
//!
//! Each subcommand is a thin wrapper over the library: parse arguments,
//! load or build the experiment state, call the core components in order,
//! persist whatever changed. The state file produced by `build-graph` is
//! the handle every later command takes.

use crate::agents::AgentAttributeAssembler;
use crate::experiment::batch::{read_json, write_json};
use crate::experiment::{
    artifact_path, subsample, AgentCheckpoint, BatchExecutor, BatchReport, CombinationExpander,
    CombinationOutcome, ExperimentBatch, ExperimentConfig, RunEvent, RunEventKind,
};
use crate::graph::{CausalGraph, CausalGraphBuilder, VariableElicitor};
use crate::llm::{create_backend, BackendSpec};
use crate::prompts::PromptLibrary;
use crate::scenario::{ScenarioProposer, ScenarioSpec};
use crate::state::{encode_graph, load_state, save_state, ExperimentState, TypeRegistry};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default collaborating model.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Default backend family.
const DEFAULT_FAMILY: &str = "openai";

/// Outcomes proposed when no count is given.
const DEFAULT_OUTCOME_COUNT: usize = 5;

/// Candidate causes proposed by `add-cause` when no cause is named.
const DEFAULT_CANDIDATE_CAUSES: usize = 3;

/// Vignette-study experiment engine.
#[derive(Parser)]
#[command(name = "vignette")]
#[command(about = "Build and run LLM-agent vignette experiments")]
#[command(version)]
#[command(
    long_about = "vignette elicits a causal model for a social scenario, assembles LLM agents that vary along the model's exogenous variables, plays their conversations out, and surveys the outcomes.\n\nExample usage:\n  vignette end-to-end --scenario \"a used car negotiation\" --output ./runs"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Propose the individual human participants for a scenario.
    #[command(alias = "agents")]
    Roles(RolesArgs),

    /// Propose candidate outcome variables for a scenario.
    Outcomes(OutcomesArgs),

    /// Elicit the causal model for a scenario and save the experiment state.
    #[command(alias = "build")]
    BuildGraph(BuildGraphArgs),

    /// Print the saved causal model.
    #[command(alias = "show")]
    ShowGraph(ShowGraphArgs),

    /// Wire a new cause under an existing variable and elicit its node.
    ///
    /// Without --cause the command only proposes candidates and leaves the
    /// model untouched; pass one of them back via --cause to commit it.
    AddCause(AddCauseArgs),

    /// Detach a cause from a variable and drop the cause's node.
    RemoveCause(RemoveCauseArgs),

    /// Replace the induced values of a numeric varied attribute.
    EditValues(EditValuesArgs),

    /// Assemble agents and run the combination batch for a saved model.
    Run(RunArgs),

    /// Build the model and run the batch in one invocation.
    #[command(alias = "e2e")]
    EndToEnd(EndToEndArgs),
}

/// Arguments for `vignette roles`.
#[derive(Parser, Debug)]
pub struct RolesArgs {
    /// Scenario description text.
    #[arg(short = 's', long, conflicts_with = "scenario_file")]
    pub scenario: Option<String>,

    /// YAML scenario file (description, optional roles, optional outcome).
    #[arg(short = 'f', long)]
    pub scenario_file: Option<PathBuf>,

    /// Collaborating model.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Backend family (openai, openrouter).
    #[arg(long, default_value = DEFAULT_FAMILY)]
    pub family: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,

    /// Output JSON instead of one role per line.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `vignette outcomes`.
#[derive(Parser, Debug)]
pub struct OutcomesArgs {
    /// Scenario description text.
    #[arg(short = 's', long, conflicts_with = "scenario_file")]
    pub scenario: Option<String>,

    /// YAML scenario file (description, optional roles, optional outcome).
    #[arg(short = 'f', long)]
    pub scenario_file: Option<PathBuf>,

    /// Comma-separated roles; proposed from the scenario when omitted.
    #[arg(long)]
    pub roles: Option<String>,

    /// Number of outcomes to propose.
    #[arg(short = 'n', long, default_value_t = DEFAULT_OUTCOME_COUNT)]
    pub count: usize,

    /// Collaborating model.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Backend family (openai, openrouter).
    #[arg(long, default_value = DEFAULT_FAMILY)]
    pub family: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,

    /// Output JSON instead of one outcome per line.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `vignette build-graph`.
#[derive(Parser, Debug)]
pub struct BuildGraphArgs {
    /// Scenario description text.
    #[arg(short = 's', long, conflicts_with = "scenario_file")]
    pub scenario: Option<String>,

    /// YAML scenario file (description, optional roles, optional outcome).
    #[arg(short = 'f', long)]
    pub scenario_file: Option<PathBuf>,

    /// Outcome variable to build the model around; proposed when omitted.
    #[arg(long)]
    pub outcome: Option<String>,

    /// Comma-separated roles; proposed from the scenario when omitted.
    #[arg(long)]
    pub roles: Option<String>,

    /// Where to save the experiment state; defaults to
    /// state_<scenario>.json under the output directory.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: Option<PathBuf>,

    /// Output directory for state and checkpoints.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Recursion depth past which each endogenous node gets one cause.
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Causes elicited per endogenous node.
    #[arg(long)]
    pub causes_per_node: Option<usize>,

    /// Collaborating model.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Backend family (openai, openrouter).
    #[arg(long, default_value = DEFAULT_FAMILY)]
    pub family: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

/// Arguments for `vignette show-graph`.
#[derive(Parser, Debug)]
pub struct ShowGraphArgs {
    /// Path to the saved experiment state.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: PathBuf,

    /// Print the sanitized edge structure as JSON.
    #[arg(long)]
    pub edges: bool,

    /// Print the full persisted envelope of the graph.
    #[arg(short = 'j', long, conflicts_with = "edges")]
    pub json: bool,
}

/// Arguments for `vignette add-cause`.
#[derive(Parser, Debug)]
pub struct AddCauseArgs {
    /// Path to the saved experiment state.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: PathBuf,

    /// Variable receiving the new cause.
    pub variable: String,

    /// Cause to wire in; when omitted, candidates are printed instead.
    #[arg(short = 'c', long)]
    pub cause: Option<String>,

    /// Candidate causes to propose when --cause is omitted.
    #[arg(short = 'n', long, default_value_t = DEFAULT_CANDIDATE_CAUSES)]
    pub count: usize,

    /// Model override; defaults to the model saved in the state file.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Family override (openai, openrouter).
    #[arg(long)]
    pub family: Option<String>,

    /// Sampling temperature override.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

/// Arguments for `vignette remove-cause`.
#[derive(Parser, Debug)]
pub struct RemoveCauseArgs {
    /// Path to the saved experiment state.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: PathBuf,

    /// Variable the cause currently feeds.
    pub variable: String,

    /// Cause to detach and remove.
    pub cause: String,
}

/// Arguments for `vignette edit-values`.
#[derive(Parser, Debug)]
pub struct EditValuesArgs {
    /// Path to the saved experiment state.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: PathBuf,

    /// Continuous or count variable whose induced values to replace.
    pub variable: String,

    /// Replacement values, in ascending order.
    #[arg(required = true, num_args = 1..)]
    pub values: Vec<String>,
}

/// Arguments for `vignette run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the saved experiment state.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: PathBuf,

    /// Output directory for checkpoints and results.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Statements allowed per conversation.
    #[arg(long)]
    pub max_interactions: Option<usize>,

    /// Combinations run concurrently.
    #[arg(short = 'p', long)]
    pub parallelism: Option<usize>,

    /// Base seed for schedulers, shuffles, and subsampling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fraction of the expanded combinations to actually run.
    #[arg(long)]
    pub subsample: Option<f64>,

    /// Require the agent checkpoint from an earlier run to exist.
    #[arg(long)]
    pub resume: bool,

    /// Model override; defaults to the model saved in the state file.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Family override (openai, openrouter).
    #[arg(long)]
    pub family: Option<String>,

    /// Sampling temperature override.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

/// Arguments for `vignette end-to-end`.
#[derive(Parser, Debug)]
pub struct EndToEndArgs {
    /// Scenario description text.
    #[arg(short = 's', long, conflicts_with = "scenario_file")]
    pub scenario: Option<String>,

    /// YAML scenario file (description, optional roles, optional outcome).
    #[arg(short = 'f', long)]
    pub scenario_file: Option<PathBuf>,

    /// Outcome variable to build the model around; proposed when omitted.
    #[arg(long)]
    pub outcome: Option<String>,

    /// Comma-separated roles; proposed from the scenario when omitted.
    #[arg(long)]
    pub roles: Option<String>,

    /// Where to save the experiment state; defaults to
    /// state_<scenario>.json under the output directory.
    #[arg(long, env = "VIGNETTE_STATE")]
    pub state: Option<PathBuf>,

    /// Output directory for state, checkpoints, and results.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Recursion depth past which each endogenous node gets one cause.
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Causes elicited per endogenous node.
    #[arg(long)]
    pub causes_per_node: Option<usize>,

    /// Statements allowed per conversation.
    #[arg(long)]
    pub max_interactions: Option<usize>,

    /// Combinations run concurrently.
    #[arg(short = 'p', long)]
    pub parallelism: Option<usize>,

    /// Base seed for schedulers, shuffles, and subsampling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fraction of the expanded combinations to actually run.
    #[arg(long)]
    pub subsample: Option<f64>,

    /// Collaborating model.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Backend family (openai, openrouter).
    #[arg(long, default_value = DEFAULT_FAMILY)]
    pub family: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Directory of prompt templates loaded over the built-ins.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Roles(args) => run_roles_command(args).await?,
        Commands::Outcomes(args) => run_outcomes_command(args).await?,
        Commands::BuildGraph(args) => run_build_graph_command(args).await?,
        Commands::ShowGraph(args) => run_show_graph_command(args)?,
        Commands::AddCause(args) => run_add_cause_command(args).await?,
        Commands::RemoveCause(args) => run_remove_cause_command(args)?,
        Commands::EditValues(args) => run_edit_values_command(args)?,
        Commands::Run(args) => run_run_command(args).await?,
        Commands::EndToEnd(args) => run_end_to_end_command(args).await?,
    }
    Ok(())
}

// ============================================================================
// Command handlers
// ============================================================================

async fn run_roles_command(args: RolesArgs) -> anyhow::Result<()> {
    let scenario = resolve_scenario(args.scenario, args.scenario_file.as_deref(), None)?;
    let spec = build_spec(&args.family, &args.model, args.temperature);
    let backend = create_backend(&spec)?;
    let library = build_library(args.templates.as_deref())?;

    let proposer = ScenarioProposer::new(backend, spec, library, scenario.description.clone());
    let roles = proposer.propose_roles().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&roles)?);
    } else {
        for role in &roles {
            println!("{role}");
        }
    }
    Ok(())
}

async fn run_outcomes_command(args: OutcomesArgs) -> anyhow::Result<()> {
    let scenario = resolve_scenario(
        args.scenario,
        args.scenario_file.as_deref(),
        args.roles.as_deref(),
    )?;
    let spec = build_spec(&args.family, &args.model, args.temperature);
    let backend = create_backend(&spec)?;
    let library = build_library(args.templates.as_deref())?;

    let proposer = ScenarioProposer::new(backend, spec, library, scenario.description.clone());
    let roles = if scenario.roles.is_empty() {
        proposer.propose_roles().await?
    } else {
        scenario.roles.clone()
    };
    let outcomes = proposer.propose_outcomes(&roles, args.count).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!("{outcome}");
        }
    }
    Ok(())
}

async fn run_build_graph_command(args: BuildGraphArgs) -> anyhow::Result<()> {
    let scenario = resolve_scenario(
        args.scenario,
        args.scenario_file.as_deref(),
        args.roles.as_deref(),
    )?;
    let mut config = ExperimentConfig::from_env()?;
    if let Some(value) = args.max_depth {
        config = config.with_max_depth(value);
    }
    if let Some(value) = args.causes_per_node {
        config = config.with_causes_per_node(value);
    }
    if let Some(dir) = args.output {
        config = config.with_output_dir(dir);
    }
    config.validate()?;

    let spec = build_spec(&args.family, &args.model, args.temperature);
    let library = build_library(args.templates.as_deref())?;
    let state = build_state(&scenario, spec, library, args.outcome, &config).await?;

    let state_path = args
        .state
        .unwrap_or_else(|| artifact_path(&config.output_dir, "state", &state.scenario));
    ensure_parent_dir(&state_path)?;
    save_state(&state_path, &state)?;

    print_graph(&state.graph);
    println!("state: {}", state_path.display());
    Ok(())
}

fn run_show_graph_command(args: ShowGraphArgs) -> anyhow::Result<()> {
    let state = load_state(&args.state, &TypeRegistry::builtin())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&encode_graph(&state.graph)?)?);
    } else if args.edges {
        println!(
            "{}",
            serde_json::to_string_pretty(&state.graph.export_edges())?
        );
    } else {
        println!("scenario: {}", state.scenario);
        println!("roles: {}", state.roles.join(", "));
        print_graph(&state.graph);
    }
    Ok(())
}

async fn run_add_cause_command(args: AddCauseArgs) -> anyhow::Result<()> {
    let mut state = load_state(&args.state, &TypeRegistry::builtin())?;
    let spec = override_spec(
        state.backend.clone(),
        args.family.as_deref(),
        args.model.as_deref(),
        args.temperature,
    );
    let backend = create_backend(&spec)?;
    let library = build_library(args.templates.as_deref())?;

    let elicitor = VariableElicitor::new(
        backend,
        spec,
        library,
        state.scenario.clone(),
        state.roles.clone(),
    );
    let builder = CausalGraphBuilder::new(elicitor);
    let variable = normalized(&args.variable);

    match args.cause {
        None => {
            let candidates = builder
                .candidate_causes(&state.graph, &variable, args.count)
                .await?;
            for candidate in &candidates {
                println!("{candidate}");
            }
        }
        Some(cause) => {
            let cause = normalized(&cause);
            state.graph.add_cause(&variable, &cause)?;
            builder.build_added_cause(&mut state.graph, &cause).await?;
            save_state(&args.state, &state)?;
            print_graph(&state.graph);
        }
    }
    Ok(())
}

fn run_remove_cause_command(args: RemoveCauseArgs) -> anyhow::Result<()> {
    let mut state = load_state(&args.state, &TypeRegistry::builtin())?;
    state
        .graph
        .remove_cause(&normalized(&args.variable), &normalized(&args.cause))?;
    save_state(&args.state, &state)?;
    print_graph(&state.graph);
    Ok(())
}

fn run_edit_values_command(args: EditValuesArgs) -> anyhow::Result<()> {
    let mut state = load_state(&args.state, &TypeRegistry::builtin())?;
    state
        .graph
        .edit_variation_values(&normalized(&args.variable), args.values)?;
    save_state(&args.state, &state)?;
    Ok(())
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let state = load_state(&args.state, &TypeRegistry::builtin())?;
    let settings = args.settings();
    execute_batch(&state, &settings).await?;
    Ok(())
}

async fn run_end_to_end_command(args: EndToEndArgs) -> anyhow::Result<()> {
    let scenario = resolve_scenario(
        args.scenario.clone(),
        args.scenario_file.as_deref(),
        args.roles.as_deref(),
    )?;
    let mut config = ExperimentConfig::from_env()?;
    if let Some(value) = args.max_depth {
        config = config.with_max_depth(value);
    }
    if let Some(value) = args.causes_per_node {
        config = config.with_causes_per_node(value);
    }
    if let Some(dir) = args.output.clone() {
        config = config.with_output_dir(dir);
    }
    config.validate()?;

    let spec = build_spec(&args.family, &args.model, args.temperature);
    let library = build_library(args.templates.as_deref())?;
    let state = build_state(&scenario, spec, library, args.outcome.clone(), &config).await?;

    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| artifact_path(&config.output_dir, "state", &state.scenario));
    ensure_parent_dir(&state_path)?;
    save_state(&state_path, &state)?;
    println!("state: {}", state_path.display());

    let settings = args.settings();
    execute_batch(&state, &settings).await?;
    Ok(())
}

// ============================================================================
// Shared plumbing
// ============================================================================

/// Batch options shared by `run` and `end-to-end`.
struct BatchSettings {
    output: Option<PathBuf>,
    max_interactions: Option<usize>,
    parallelism: Option<usize>,
    seed: Option<u64>,
    subsample: Option<f64>,
    family: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    templates: Option<PathBuf>,
    resume: bool,
}

impl RunArgs {
    fn settings(&self) -> BatchSettings {
        BatchSettings {
            output: self.output.clone(),
            max_interactions: self.max_interactions,
            parallelism: self.parallelism,
            seed: self.seed,
            subsample: self.subsample,
            family: self.family.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            templates: self.templates.clone(),
            resume: self.resume,
        }
    }
}

impl EndToEndArgs {
    fn settings(&self) -> BatchSettings {
        BatchSettings {
            output: self.output.clone(),
            max_interactions: self.max_interactions,
            parallelism: self.parallelism,
            seed: self.seed,
            subsample: self.subsample,
            family: Some(self.family.clone()),
            model: Some(self.model.clone()),
            temperature: self.temperature,
            templates: self.templates.clone(),
            resume: false,
        }
    }
}

/// Propose roles and an outcome as needed, then elicit the causal model.
async fn build_state(
    scenario: &ScenarioSpec,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    outcome_override: Option<String>,
    config: &ExperimentConfig,
) -> anyhow::Result<ExperimentState> {
    let backend = create_backend(&spec)?;
    let proposer = ScenarioProposer::new(
        Arc::clone(&backend),
        spec.clone(),
        Arc::clone(&library),
        scenario.description.clone(),
    );

    let roles = if scenario.roles.is_empty() {
        proposer.propose_roles().await?
    } else {
        scenario.roles.clone()
    };
    let outcome = match outcome_override.or_else(|| scenario.outcome.clone()) {
        Some(outcome) => normalized(&outcome),
        None => {
            let proposed = proposer.propose_outcomes(&roles, 1).await?;
            proposed.into_iter().next().ok_or_else(|| {
                anyhow::anyhow!("the collaborator proposed no outcomes for this scenario")
            })?
        }
    };
    info!(%outcome, roles = roles.len(), "building causal model");

    let elicitor = VariableElicitor::new(
        backend,
        spec.clone(),
        library,
        scenario.description.clone(),
        roles.clone(),
    );
    let builder = CausalGraphBuilder::new(elicitor)
        .with_max_depth(config.max_depth)
        .with_causes_per_node(config.causes_per_node);
    let graph = builder.build(&outcome, config.causes_per_node).await?;

    let mut state = ExperimentState::new(scenario.description.clone(), spec);
    state.roles = roles;
    state.graph = graph;
    Ok(state)
}

/// Load or build the agent checkpoint, then execute every combination.
async fn execute_batch(
    state: &ExperimentState,
    settings: &BatchSettings,
) -> anyhow::Result<BatchReport> {
    let mut config = ExperimentConfig::from_env()?;
    if let Some(dir) = settings.output.clone() {
        config = config.with_output_dir(dir);
    }
    if let Some(value) = settings.max_interactions {
        config = config.with_max_interactions(value);
    }
    if let Some(value) = settings.parallelism {
        config = config.with_parallelism(value);
    }
    if let Some(value) = settings.seed {
        config = config.with_seed(value);
    }
    if let Some(value) = settings.subsample {
        config = config.with_subsample_proportion(value);
    }
    config.validate()?;

    let spec = override_spec(
        state.backend.clone(),
        settings.family.as_deref(),
        settings.model.as_deref(),
        settings.temperature,
    );
    let backend = create_backend(&spec)?;
    let library = build_library(settings.templates.as_deref())?;

    fs::create_dir_all(&config.output_dir)?;
    let agent_path = artifact_path(&config.output_dir, "agent", &state.scenario);
    let checkpoint = if settings.resume || agent_path.exists() {
        info!(path = %agent_path.display(), "loading agent checkpoint");
        read_json::<AgentCheckpoint>(&agent_path)?
    } else {
        let assembler = AgentAttributeAssembler::new(
            Arc::clone(&backend),
            spec.clone(),
            Arc::clone(&library),
            state.scenario.clone(),
            state.roles.clone(),
        )
        .with_consistency_passes(config.consistency_passes)
        .with_seed(config.seed);
        let assembled = assembler.assemble(&state.graph).await?;
        let design = assembler.design_interaction().await?;

        let mut combinations = CombinationExpander::new(assembled.clone()).expand()?;
        if config.subsample_proportion < 1.0 {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            combinations = subsample(combinations, config.subsample_proportion, &mut rng)?;
        }

        let checkpoint = AgentCheckpoint {
            assembled,
            design,
            combinations,
        };
        write_json(&agent_path, &checkpoint)?;
        info!(path = %agent_path.display(), "saved agent checkpoint");
        checkpoint
    };

    let batch = ExperimentBatch {
        scenario: state.scenario.clone(),
        graph: state.graph.clone(),
        design: checkpoint.design.clone(),
        combinations: checkpoint.combinations,
    };
    let results_path = artifact_path(&config.output_dir, "results", &batch.scenario);

    let (sender, mut receiver) = mpsc::unbounded_channel::<RunEvent>();
    let progress = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event.kind {
                RunEventKind::StatementMade { speaker, round, .. } => {
                    debug!(%speaker, round, "statement made");
                }
                RunEventKind::JudgmentMade { judge, proceed } => {
                    debug!(%judge, proceed, "judgment made");
                }
                RunEventKind::RunFinished { statements, reason } => {
                    info!(statements, ?reason, "conversation finished");
                }
            }
        }
    });

    let executor = BatchExecutor::new(backend, spec, library, config).with_events(sender);
    let report = executor.execute(&batch).await;
    drop(executor);
    let _ = progress.await;
    let report = report?;

    let completed = report
        .combinations
        .iter()
        .filter(|entry| matches!(entry.outcome, CombinationOutcome::Completed { .. }))
        .count();
    println!(
        "completed {completed} of {} combinations ({} failed)",
        report.combinations.len(),
        report.combinations.len() - completed
    );
    for entry in &report.combinations {
        if let CombinationOutcome::Failed { error } = &entry.outcome {
            println!("combination {} failed: {error}", entry.index);
        }
    }
    println!("results: {}", results_path.display());
    Ok(report)
}

/// Resolve the scenario from inline text or a YAML file, applying a
/// comma-separated roles override when given.
fn resolve_scenario(
    text: Option<String>,
    file: Option<&Path>,
    roles_override: Option<&str>,
) -> anyhow::Result<ScenarioSpec> {
    let mut scenario = match (text, file) {
        (Some(description), None) => ScenarioSpec::new(description),
        (None, Some(path)) => ScenarioSpec::from_yaml_file(path)?,
        (Some(_), Some(_)) => {
            anyhow::bail!("--scenario and --scenario-file are mutually exclusive")
        }
        (None, None) => anyhow::bail!("provide a scenario with --scenario or --scenario-file"),
    };
    if scenario.description.trim().is_empty() {
        anyhow::bail!("the scenario description is empty");
    }
    if let Some(raw) = roles_override {
        scenario.roles = parse_roles(raw);
    }
    Ok(scenario)
}

fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|role| role.trim().to_lowercase())
        .filter(|role| !role.is_empty())
        .collect()
}

fn build_spec(family: &str, model: &str, temperature: Option<f64>) -> BackendSpec {
    let mut spec = BackendSpec::new(family, model);
    if let Some(temperature) = temperature {
        spec = spec.with_temperature(temperature);
    }
    spec
}

fn override_spec(
    mut spec: BackendSpec,
    family: Option<&str>,
    model: Option<&str>,
    temperature: Option<f64>,
) -> BackendSpec {
    if let Some(family) = family {
        spec.family = family.to_string();
    }
    if let Some(model) = model {
        spec.model = model.to_string();
    }
    if let Some(temperature) = temperature {
        spec.temperature = temperature;
    }
    spec
}

fn build_library(templates: Option<&Path>) -> anyhow::Result<Arc<PromptLibrary>> {
    let mut library = PromptLibrary::builtin();
    if let Some(dir) = templates {
        let loaded = library.load_directory(dir)?;
        info!(loaded, dir = %dir.display(), "loaded template overrides");
    }
    Ok(Arc::new(library))
}

fn normalized(name: &str) -> String {
    name.trim().to_lowercase()
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn print_graph(graph: &CausalGraph) {
    for node in graph.variables() {
        println!("{} ({}, {})", node.name, node.kind, node.variable_type);
        if !node.units.is_empty() {
            println!("  units: {}", node.units);
        }
        if !node.causes.is_empty() {
            let causes: Vec<&str> = node.causes.iter().map(String::as_str).collect();
            println!("  causes: {}", causes.join(", "));
        }
        if let Some(variation) = &node.variation {
            println!(
                "  varies {} for {}: {}",
                variation.attribute_name,
                variation.varied_agent,
                variation.attribute_values.join(", ")
            );
        }
    }
}
