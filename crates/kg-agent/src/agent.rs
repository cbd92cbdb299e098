//! The orchestration loop: generate, parse, dispatch, feed back, until an answer lands.
//!
//! Each iteration is one generation request followed by at most one dispatched call.
//! Nothing overlaps: the next request is only sent once the previous call's result is
//! in the conversation.

use crate::backend::{GenerationBackend, GenerationError, GenerationRequest, SamplingParams};
use crate::parser::parse_tool_call;
use crate::prompt::{PromptError, PromptRenderer};
use crate::registry::ToolRegistry;
use kg_core::config::{CallSyntax, KgConfig};
use kg_core::message::{Conversation, Message};
use kg_core::session::TaskSession;
use kg_core::tool::{ToolCall, ToolError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Corrective turn sent when the model stops calling functions without having answered.
pub const NUDGE: &str = "You forgot to submit the answer!";

/// Why a task ended without an answer.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("iteration budget of {0} exceeded")]
    BudgetExceeded(usize),
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    #[error("generation loop finished but no answer was recorded")]
    NoAnswer,
    #[error("tool failure: {0}")]
    Tool(#[from] ToolError),
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
}

/// Loop limits and decoding settings.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub call_syntax: CallSyntax,
    /// Generation requests allowed per task, nudges included. With no answer
    /// accepted, the task fails right after the N-th request; a request that
    /// gets its answer accepted still succeeds.
    pub max_iterations: usize,
    pub timeout: Option<Duration>,
    pub sampling: SamplingParams,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            call_syntax: CallSyntax::default(),
            max_iterations: 20,
            timeout: None,
            sampling: SamplingParams::default(),
        }
    }
}

impl AgentOptions {
    pub fn from_config(config: &KgConfig) -> Self {
        Self {
            call_syntax: config.agent.call_syntax,
            max_iterations: config.agent.max_iterations,
            timeout: config.agent.timeout_secs.map(Duration::from_secs),
            sampling: SamplingParams::from_config(&config.generation),
        }
    }
}

/// One unit of work: which prompt to render, with what, and which ids are pre-approved.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub name: String,
    pub kwargs: BTreeMap<String, String>,
    /// Identifiers the model may cite without having looked them up.
    pub initial_ids: Option<BTreeSet<String>>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_initial_ids(mut self, ids: BTreeSet<String>) -> Self {
        self.initial_ids = Some(ids);
        self
    }
}

/// A finished task.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub answer: Value,
    /// Generation requests made.
    pub iterations: usize,
    /// Well-formed calls that were dispatched, in order.
    pub calls: Vec<ToolCall>,
    /// The full conversation, prompt first.
    pub trace: Vec<Message>,
}

enum LoopState {
    Running,
    Done,
    Failed(AgentError),
}

/// Drives one task at a time against a backend and a tool registry.
pub struct Agent {
    backend: Arc<dyn GenerationBackend>,
    registry: ToolRegistry,
    renderer: Arc<dyn PromptRenderer>,
    options: AgentOptions,
}

impl Agent {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        registry: ToolRegistry,
        renderer: Arc<dyn PromptRenderer>,
        options: AgentOptions,
    ) -> Self {
        Self {
            backend,
            registry,
            renderer,
            options,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Run a task to completion. Every call starts from a fresh conversation and session.
    pub async fn run(&self, task: &Task) -> Result<RunReport, AgentError> {
        let prompt = self.renderer.render(&task.name, &task.kwargs)?;
        info!(task = %task.name, model = self.backend.model_name(), "task started");

        let drive = self.drive(prompt, task.initial_ids.clone());
        let report = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, drive)
                .await
                .map_err(|_| AgentError::TimedOut(limit))?,
            None => drive.await,
        };

        match &report {
            Ok(r) => info!(task = %task.name, iterations = r.iterations, "task done"),
            Err(e) => warn!(task = %task.name, error = %e, "task failed"),
        }
        report
    }

    async fn drive(
        &self,
        prompt: String,
        initial_ids: Option<BTreeSet<String>>,
    ) -> Result<RunReport, AgentError> {
        let mut conversation = Conversation::new();
        conversation.reset(prompt);
        let mut session = TaskSession::new(initial_ids);
        let specs = self.registry.specs();
        let mut iterations = 0;
        let mut calls = Vec::new();
        let mut state = LoopState::Running;

        while matches!(state, LoopState::Running) {
            let request = GenerationRequest {
                messages: conversation.messages(),
                tools: &specs,
                call_syntax: self.options.call_syntax,
                params: &self.options.sampling,
            };
            let response = self.backend.generate(request).await?;
            iterations += 1;
            debug!(
                iteration = iterations,
                input_tokens = ?response.input_tokens,
                output_tokens = ?response.output_tokens,
                "generation"
            );
            conversation.push(Message::assistant(response.text.as_str()));

            match parse_tool_call(&response.text, self.options.call_syntax) {
                None if session.answer.is_answered() => state = LoopState::Done,
                None => {
                    debug!(iteration = iterations, "no call and no answer, nudging");
                    conversation.push(Message::user(NUDGE));
                }
                Some(call) => {
                    debug!(iteration = iterations, capability = %call.name, "dispatching");
                    calls.extend(call.tool_call());
                    let outcome = self
                        .registry
                        .dispatch(&call.name, call.arguments, &mut session)
                        .await?;
                    if let Some(notice) = call.diagnostic {
                        conversation.push(Message::tool_result(Value::String(notice.to_string())));
                    }
                    conversation.push(Message::tool_result(outcome.result.to_output()));
                    if outcome.terminal && session.answer.is_answered() {
                        state = LoopState::Done;
                    }
                }
            }

            if matches!(state, LoopState::Running) && iterations >= self.options.max_iterations {
                state = LoopState::Failed(AgentError::BudgetExceeded(self.options.max_iterations));
            }
        }

        match state {
            LoopState::Failed(err) => Err(err),
            LoopState::Done | LoopState::Running => {
                let answer = session.answer.take().ok_or(AgentError::NoAnswer)?;
                Ok(RunReport {
                    answer,
                    iterations,
                    calls,
                    trace: conversation.to_vec(),
                })
            }
        }
    }
}
