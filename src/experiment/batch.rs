//! Checkpointed execution of an experiment across its combinations.
//!
//! A batch leaves three artifacts in the output directory, each named by
//! a slug of the scenario: the agent file (written by the caller once
//! elicitation is done), the history file (per-combination transcripts,
//! rewritten as each conversation finishes), and the results file (the
//! full report). When the history file already holds a combination's
//! transcript the conversation is not re-run; the survey always is.
//! A semaphore caps how many combinations are in flight at once, and a
//! failure inside one combination lands on its report instead of
//! sinking the siblings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{AgentError, AgentRoster, AgentTemplate, AssembledAgents};
use crate::error::SurveyError;
use crate::experiment::combinations::Combination;
use crate::experiment::config::ExperimentConfig;
use crate::experiment::runner::{ConversationHistory, InteractionRunner, RunError, RunEvent};
use crate::experiment::scheduler::{InteractionDesign, SpeakerScheduler};
use crate::graph::{sanitize_name, CausalGraph};
use crate::llm::{BackendSpec, LanguageBackend};
use crate::prompts::PromptLibrary;
use crate::survey::{SurveyEngine, SurveyReport};

/// Failure of one combination's pipeline, or of batch setup.
#[derive(Debug, Error)]
pub enum BatchError {
    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact serialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The concurrency limiter was closed before a permit arrived.
    #[error("Worker permit could not be acquired")]
    LimiterClosed,

    /// Roster construction rejected the combination's templates.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// The conversation failed.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// The survey failed.
    #[error("Survey error: {0}")]
    Survey(#[from] SurveyError),
}

/// Everything a batch run needs: the scenario, the causal model, the
/// interaction design, and the combinations to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBatch {
    pub scenario: String,
    pub graph: CausalGraph,
    pub design: InteractionDesign,
    pub combinations: Vec<Combination>,
}

/// What the elicitation phase produced, saved before any conversation
/// starts so a rerun can skip straight to the simulations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub assembled: AssembledAgents,
    pub design: InteractionDesign,
    pub combinations: Vec<Combination>,
}

/// On-disk shape of the history artifact. Transcripts are keyed by
/// combination index so a partial batch resumes exactly the cells it
/// finished.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryCheckpoint {
    histories: BTreeMap<usize, ConversationHistory>,
}

/// Outcome of one combination, reported in index order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationReport {
    pub index: usize,
    pub assignment: BTreeMap<String, String>,
    pub templates: Vec<AgentTemplate>,
    #[serde(flatten)]
    pub outcome: CombinationOutcome,
}

/// What happened to a combination. A failure is recorded on the report,
/// never raised; the rest of the batch keeps going.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CombinationOutcome {
    Completed {
        history: ConversationHistory,
        survey: SurveyReport,
    },
    Failed {
        error: String,
    },
}

/// The results artifact: the model, one report per combination, and the
/// index-to-assignment map an analyst joins the measurements against.
/// Each invocation gets a fresh `batch_id` so log lines can be matched
/// to the results file that overwrote an earlier run's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub scenario: String,
    pub graph: CausalGraph,
    pub combinations: Vec<CombinationReport>,
    pub assignments: BTreeMap<usize, BTreeMap<String, String>>,
}

/// Path of one batch artifact: `<stage>_<scenario slug>.json` under the
/// output directory.
pub fn artifact_path(output_dir: &Path, stage: &str, scenario: &str) -> PathBuf {
    output_dir.join(format!("{stage}_{}.json", sanitize_name(scenario)))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, BatchError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BatchError> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}

/// Runs every combination of an experiment, up to `parallelism` at once.
pub struct BatchExecutor {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    config: ExperimentConfig,
    limiter: Arc<Semaphore>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl BatchExecutor {
    pub fn new(
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        config: ExperimentConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.parallelism));
        Self {
            backend,
            spec,
            library,
            config,
            limiter,
            events: None,
        }
    }

    /// Stream run progress events to `sender`; see
    /// [`InteractionRunner::with_events`].
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Run every combination, write the history and results artifacts,
    /// and return one report per cell in index order. Only artifact setup
    /// and a corrupt history file are fatal; anything that goes wrong
    /// inside a combination lands on its own report.
    pub async fn execute(&self, batch: &ExperimentBatch) -> Result<BatchReport, BatchError> {
        fs::create_dir_all(&self.config.output_dir)?;

        let history_path = artifact_path(&self.config.output_dir, "history", &batch.scenario);
        let saved = if history_path.exists() {
            let checkpoint: HistoryCheckpoint = read_json(&history_path)?;
            info!(
                transcripts = checkpoint.histories.len(),
                "loaded history checkpoint"
            );
            checkpoint.histories
        } else {
            BTreeMap::new()
        };
        let transcripts = Mutex::new(saved);

        let batch_id = Uuid::new_v4();
        info!(
            %batch_id,
            combinations = batch.combinations.len(),
            parallelism = self.config.parallelism,
            "executing batch"
        );

        let futures: Vec<_> = batch
            .combinations
            .iter()
            .map(|combination| {
                let transcripts = &transcripts;
                let history_path = history_path.as_path();
                async move {
                    let outcome = match self
                        .run_combination(batch, combination, transcripts, history_path)
                        .await
                    {
                        Ok((history, survey)) => CombinationOutcome::Completed { history, survey },
                        Err(error) => {
                            warn!(index = combination.index, %error, "combination failed");
                            CombinationOutcome::Failed {
                                error: error.to_string(),
                            }
                        }
                    };
                    CombinationReport {
                        index: combination.index,
                        assignment: combination.assignment.clone(),
                        templates: combination.templates.clone(),
                        outcome,
                    }
                }
            })
            .collect();
        let reports = futures::future::join_all(futures).await;

        let report = BatchReport {
            batch_id,
            scenario: batch.scenario.clone(),
            graph: batch.graph.clone(),
            assignments: batch
                .combinations
                .iter()
                .map(|combination| (combination.index, combination.assignment.clone()))
                .collect(),
            combinations: reports,
        };
        let results_path = artifact_path(&self.config.output_dir, "results", &batch.scenario);
        write_json(&results_path, &report)?;
        info!(results = %results_path.display(), "batch finished");
        Ok(report)
    }

    /// One combination end to end: roster, conversation, survey. A saved
    /// transcript short-circuits the conversation; a fresh one is folded
    /// into the history artifact as soon as it finishes.
    async fn run_combination(
        &self,
        batch: &ExperimentBatch,
        combination: &Combination,
        transcripts: &Mutex<BTreeMap<usize, ConversationHistory>>,
        history_path: &Path,
    ) -> Result<(ConversationHistory, SurveyReport), BatchError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| BatchError::LimiterClosed)?;

        let roster = Arc::new(AgentRoster::from_templates(combination.templates.clone())?);

        let saved = {
            let transcripts = transcripts.lock().await;
            transcripts.get(&combination.index).cloned()
        };
        let history = match saved {
            Some(history) => {
                info!(index = combination.index, "reusing saved transcript");
                history
            }
            None => {
                let mut scheduler = SpeakerScheduler::new(
                    batch.design.clone(),
                    Arc::clone(&roster),
                    Arc::clone(&self.backend),
                    self.spec.clone(),
                    Arc::clone(&self.library),
                    batch.scenario.as_str(),
                )
                .with_seed(self.config.seed.wrapping_add(combination.index as u64));

                let mut runner = InteractionRunner::new(
                    Arc::clone(&self.backend),
                    self.spec.clone(),
                    Arc::clone(&self.library),
                    batch.scenario.as_str(),
                    Arc::clone(&roster),
                )
                .with_max_interactions(self.config.max_interactions);
                if let Some(sender) = &self.events {
                    runner = runner.with_events(sender.clone());
                }

                let history = runner.run(&mut scheduler).await?;
                let mut transcripts = transcripts.lock().await;
                transcripts.insert(combination.index, history.clone());
                write_json(
                    history_path,
                    &HistoryCheckpoint {
                        histories: transcripts.clone(),
                    },
                )?;
                history
            }
        };

        let engine = SurveyEngine::new(
            Arc::clone(&self.backend),
            self.spec.clone(),
            Arc::clone(&self.library),
            batch.scenario.as_str(),
        );
        let survey = engine
            .collect(
                &batch.graph,
                &roster,
                &history.statements,
                &combination.assignment,
            )
            .await?;

        Ok((history, survey))
    }
}
