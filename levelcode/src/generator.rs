//! Programmatic step generators.
//!
//! A template's `handle_steps` is a cooperative generator that interleaves
//! deterministic tool calls with LLM turns. In this runtime the generator is
//! a spawned task joined to the loop controller by a bidirectional channel
//! pair: the task receives [`StepResume`] records and yields
//! [`StepDirective`]s through its [`StepHandle`].
//!
//! Live generators are tracked in a [`GeneratorRegistry`] keyed by run id,
//! together with the set of runs currently in `STEP_ALL` mode. Entries are
//! created on the first programmatic step of a run and removed at end-of-run
//! or error; removal aborts the backing task.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::message::ToolResultPart;
use crate::state::AgentState;

/// What a generator asks the loop controller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDirective {
    /// Execute one tool synchronously and resume with its result.
    Tool {
        /// Tool to invoke.
        tool_name: String,
        /// Structured input.
        input: Value,
        /// When `false`, neither the call nor its result is recorded in the
        /// message history.
        include_tool_call: bool,
    },
    /// Run one LLM step, then resume with `steps_complete` reflecting
    /// whether the model ended its turn.
    Step,
    /// Run LLM steps until the model ends its turn, then resume.
    StepAll,
    /// Parse text as if streamed from the LLM: record the segments and
    /// execute any embedded tool calls.
    StepText {
        /// The text to parse.
        text: String,
    },
    /// Perform an `n`-response completion and resume with `n_responses`.
    GenerateN {
        /// Number of samples.
        n: usize,
    },
}

/// Read-only view of the owning agent's state, refreshed on every resume.
#[derive(Debug, Clone, Default)]
pub struct AgentSnapshot {
    /// The agent's instance id.
    pub agent_id: String,
    /// The run id.
    pub run_id: String,
    /// Output recorded so far.
    pub output: Option<Value>,
    /// Remaining step budget.
    pub steps_remaining: u32,
    /// Number of messages in the history.
    pub message_count: usize,
    /// The free-form context blob.
    pub agent_context: Value,
}

impl AgentSnapshot {
    /// Capture a snapshot of the given state.
    #[must_use]
    pub fn of(state: &AgentState) -> Self {
        Self {
            agent_id: state.agent_id.clone(),
            run_id: state.run_id.clone(),
            output: state.output.clone(),
            steps_remaining: state.steps_remaining,
            message_count: state.message_history.len(),
            agent_context: state.agent_context.clone(),
        }
    }
}

/// The record a generator is resumed with.
#[derive(Debug, Clone, Default)]
pub struct StepResume {
    /// Public view of the owning agent's state.
    pub agent_state: AgentSnapshot,
    /// Result of the tool invocation the generator just yielded, if any.
    pub tool_result: Option<Vec<ToolResultPart>>,
    /// Whether the last LLM step ended the model's turn.
    pub steps_complete: bool,
    /// Responses from a `GenerateN` directive, if one just completed.
    pub n_responses: Option<Vec<String>>,
}

/// Errors surfaced to generator code.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The owning run ended while the generator was suspended.
    #[error("step generator aborted: owning run ended")]
    Aborted,
    /// The generator failed; the message is captured in `output.error`.
    #[error("{0}")]
    Failed(String),
}

impl StepError {
    /// Create a failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug)]
pub(crate) enum StepYield {
    Directive(StepDirective),
    Done(Result<(), String>),
}

/// The generator side of the channel pair.
///
/// Generator code yields directives through the methods below; each one
/// suspends until the loop controller resumes the generator with the next
/// [`StepResume`].
#[derive(Debug)]
pub struct StepHandle {
    rx: mpsc::Receiver<StepResume>,
    tx: mpsc::Sender<StepYield>,
    current: StepResume,
}

impl StepHandle {
    /// The resume record from the most recent suspension.
    #[must_use]
    pub const fn resume(&self) -> &StepResume {
        &self.current
    }

    /// Snapshot of the owning agent's state.
    #[must_use]
    pub const fn agent_state(&self) -> &AgentSnapshot {
        &self.current.agent_state
    }

    /// Yield a raw directive and suspend until resumed.
    pub async fn advance(&mut self, directive: StepDirective) -> Result<(), StepError> {
        self.tx
            .send(StepYield::Directive(directive))
            .await
            .map_err(|_| StepError::Aborted)?;
        match self.rx.recv().await {
            Some(resume) => {
                self.current = resume;
                Ok(())
            }
            None => Err(StepError::Aborted),
        }
    }

    /// Execute one tool and return its result parts.
    pub async fn invoke_tool(
        &mut self,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Result<Vec<ToolResultPart>, StepError> {
        self.invoke(tool_name, input, true).await
    }

    /// Execute one tool without recording the call in the message history.
    pub async fn invoke_tool_hidden(
        &mut self,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Result<Vec<ToolResultPart>, StepError> {
        self.invoke(tool_name, input, false).await
    }

    async fn invoke(
        &mut self,
        tool_name: impl Into<String>,
        input: Value,
        include_tool_call: bool,
    ) -> Result<Vec<ToolResultPart>, StepError> {
        self.advance(StepDirective::Tool {
            tool_name: tool_name.into(),
            input,
            include_tool_call,
        })
        .await?;
        Ok(self.current.tool_result.take().unwrap_or_default())
    }

    /// Hand control to the LLM for one step. Returns `true` when the model
    /// ended its turn.
    pub async fn step(&mut self) -> Result<bool, StepError> {
        self.advance(StepDirective::Step).await?;
        Ok(self.current.steps_complete)
    }

    /// Hand control to the LLM until it ends its turn.
    pub async fn step_all(&mut self) -> Result<(), StepError> {
        self.advance(StepDirective::StepAll).await
    }

    /// Record `text` as assistant output, executing any embedded tool calls.
    pub async fn step_text(&mut self, text: impl Into<String>) -> Result<(), StepError> {
        self.advance(StepDirective::StepText { text: text.into() })
            .await
    }

    /// Request `n` parallel completions.
    pub async fn generate_n(&mut self, n: usize) -> Result<Vec<String>, StepError> {
        self.advance(StepDirective::GenerateN { n }).await?;
        Ok(self.current.n_responses.take().unwrap_or_default())
    }
}

/// A native programmatic step function.
pub type StepFn =
    Arc<dyn Fn(StepHandle) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// A template's programmatic step function, in either form.
#[derive(Clone)]
pub enum StepProgram {
    /// A native callable driving the generator protocol directly.
    Native(StepFn),
    /// A declarative directive script, interpreted in-process with no host
    /// surface beyond the runtime logger.
    Source(String),
}

impl StepProgram {
    /// Wrap an async function as a native step program.
    pub fn native<F, Fut>(f: F) -> Self
    where
        F: Fn(StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self::Native(Arc::new(move |handle| Box::pin(f(handle))))
    }

    /// Wrap a directive script as a source step program.
    #[must_use]
    pub fn source(source: impl Into<String>) -> Self {
        Self::Source(source.into())
    }

    fn into_step_fn(self) -> Result<StepFn, String> {
        match self {
            Self::Native(f) => Ok(f),
            Self::Source(source) => {
                let directives = parse_source(&source)?;
                Ok(Arc::new(move |mut handle: StepHandle| {
                    let directives = directives.clone();
                    Box::pin(async move {
                        for directive in directives {
                            debug!(?directive, "source step program: yielding");
                            handle.advance(directive).await?;
                        }
                        Ok(())
                    })
                }))
            }
        }
    }
}

impl fmt::Debug for StepProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("StepProgram::Native(..)"),
            Self::Source(source) => f.debug_tuple("StepProgram::Source").field(source).finish(),
        }
    }
}

/// Parse a source-form step program: a JSON array whose elements are the
/// strings `"STEP"` / `"STEP_ALL"`, tool objects (`{"tool_name", "input",
/// "include_tool_call"?}`), or tagged objects (`{"type": "step_text", ...}` /
/// `{"type": "generate_n", ...}`).
fn parse_source(source: &str) -> Result<Vec<StepDirective>, String> {
    let value: Value =
        serde_json::from_str(source).map_err(|err| format!("invalid step script: {err}"))?;
    let Value::Array(entries) = value else {
        return Err("step script must be a JSON array of directives".to_owned());
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_source_directive(&entry).map_err(|err| format!("directive {index}: {err}"))
        })
        .collect()
}

fn parse_source_directive(entry: &Value) -> Result<StepDirective, String> {
    match entry {
        Value::String(keyword) => match keyword.as_str() {
            "STEP" => Ok(StepDirective::Step),
            "STEP_ALL" => Ok(StepDirective::StepAll),
            other => Err(format!("unknown directive keyword `{other}`")),
        },
        Value::Object(fields) => {
            if let Some(tool_name) = fields.get("tool_name").and_then(Value::as_str) {
                return Ok(StepDirective::Tool {
                    tool_name: tool_name.to_owned(),
                    input: fields.get("input").cloned().unwrap_or(Value::Null),
                    include_tool_call: fields
                        .get("include_tool_call")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                });
            }
            match fields.get("type").and_then(Value::as_str) {
                Some("step_text") => {
                    let text = fields
                        .get("text")
                        .and_then(Value::as_str)
                        .ok_or("step_text directive needs a `text` string")?;
                    Ok(StepDirective::StepText {
                        text: text.to_owned(),
                    })
                }
                Some("generate_n") => {
                    let n = fields
                        .get("n")
                        .and_then(Value::as_u64)
                        .ok_or("generate_n directive needs an `n` integer")?;
                    Ok(StepDirective::GenerateN { n: n as usize })
                }
                Some(other) => Err(format!("unknown directive type `{other}`")),
                None => Err("directive object needs `tool_name` or `type`".to_owned()),
            }
        }
        _ => Err("directive must be a string or an object".to_owned()),
    }
}

/// What a resumed generator did.
#[derive(Debug)]
pub(crate) enum GeneratorStep {
    /// The generator yielded a directive.
    Yielded(StepDirective),
    /// The generator returned (`Ok`) or raised (`Err`).
    Finished(Result<(), String>),
}

/// Loop-controller side of a live generator.
#[derive(Debug)]
pub(crate) struct GeneratorHandle {
    to_task: mpsc::Sender<StepResume>,
    from_task: mpsc::Receiver<StepYield>,
    task: JoinHandle<()>,
    finished: bool,
}

impl GeneratorHandle {
    /// Spawn the generator task for a program.
    pub(crate) fn spawn(program: StepProgram) -> Result<Self, String> {
        let step_fn = program.into_step_fn()?;
        let (resume_tx, resume_rx) = mpsc::channel::<StepResume>(1);
        let (yield_tx, yield_rx) = mpsc::channel::<StepYield>(1);

        let done_tx = yield_tx.clone();
        let task = tokio::spawn(async move {
            let mut rx = resume_rx;
            let Some(first) = rx.recv().await else {
                return;
            };
            let handle = StepHandle {
                rx,
                tx: yield_tx,
                current: first,
            };
            let result = (step_fn)(handle).await;
            let _ = done_tx
                .send(StepYield::Done(result.map_err(|err| err.to_string())))
                .await;
        });

        Ok(Self {
            to_task: resume_tx,
            from_task: yield_rx,
            task,
            finished: false,
        })
    }

    /// Returns `true` once the generator has returned or raised.
    pub(crate) const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Resume the generator with a record and wait for its next yield.
    pub(crate) async fn resume(&mut self, resume: StepResume) -> GeneratorStep {
        if self.finished {
            return GeneratorStep::Finished(Ok(()));
        }
        if self.to_task.send(resume).await.is_err() {
            self.finished = true;
            return GeneratorStep::Finished(Err(
                "step generator task ended unexpectedly".to_owned()
            ));
        }
        match self.from_task.recv().await {
            Some(StepYield::Directive(directive)) => GeneratorStep::Yielded(directive),
            Some(StepYield::Done(result)) => {
                self.finished = true;
                GeneratorStep::Finished(result)
            }
            None => {
                self.finished = true;
                GeneratorStep::Finished(Err("step generator task ended unexpectedly".to_owned()))
            }
        }
    }

    /// Abort the backing task.
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

/// Process-wide registry of live generators, keyed by run id.
///
/// Only the owning run touches its entry, so the registry takes handles out
/// for the duration of a programmatic step and restores them afterwards.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    generators: Mutex<HashMap<String, GeneratorHandle>>,
    step_all: Mutex<HashSet<String>>,
}

impl GeneratorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn take(&self, run_id: &str) -> Option<GeneratorHandle> {
        self.generators
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(run_id)
    }

    pub(crate) fn restore(&self, run_id: &str, handle: GeneratorHandle) {
        self.generators
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(run_id.to_owned(), handle);
    }

    /// Mark the run as being in `STEP_ALL` mode.
    pub(crate) fn set_step_all(&self, run_id: &str) {
        self.step_all
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(run_id.to_owned());
    }

    /// Returns `true` while the run is in `STEP_ALL` mode.
    pub(crate) fn in_step_all(&self, run_id: &str) -> bool {
        self.step_all
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(run_id)
    }

    /// Clear the run's `STEP_ALL` mode.
    pub(crate) fn clear_step_all(&self, run_id: &str) {
        self.step_all
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(run_id);
    }

    /// Drop every trace of a run, aborting its generator task if alive.
    pub fn remove(&self, run_id: &str) {
        if let Some(handle) = self.take(run_id) {
            handle.abort();
        }
        self.clear_step_all(run_id);
    }

    /// Returns `true` if the run has a live generator or a `STEP_ALL` flag.
    #[must_use]
    pub fn has_entries(&self, run_id: &str) -> bool {
        let generators = self
            .generators
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if generators.contains_key(run_id) {
            return true;
        }
        drop(generators);
        self.in_step_all(run_id)
    }
}
