//! Tool-augmented generation over a knowledge graph.
//!
//! The model is prompted with a task and a list of functions, replies with at most one
//! function call per turn, and sees each call's result before generating again. The loop
//! ends when an answer has been accepted by `submit_final_answer`.
//!
//! # Architecture
//!
//! - **parser**: extracts the first function call from a model reply
//! - **registry**: maps capability names to tools and dispatches calls
//! - **answer**: the answer-submission tool and its hallucination guard
//! - **backend**: `GenerationBackend` trait with an OpenAI-compatible client
//! - **prompt**: task templates and tool-use instructions
//! - **agent**: the generation loop
//! - **batch**: NDJSON batch runs with a per-line status log
//! - **progress**: terminal progress bars via `indicatif`

pub mod agent;
pub mod answer;
pub mod backend;
pub mod batch;
pub mod parser;
pub mod progress;
pub mod prompt;
pub mod registry;

pub use agent::{Agent, AgentError, AgentOptions, NUDGE, RunReport, Task};
pub use answer::{AnswerTool, AnswerValidator, TripleAnswerParser, ValidatedAnswer};
pub use backend::{
    GenerationBackend, GenerationError, OpenAiCompatibleBackend, SamplingParams, ScriptedBackend,
};
pub use batch::{BatchError, BatchOptions, BatchSummary, run_batch};
pub use parser::{MULTIPLE_CALLS_NOTICE, ParsedCall, parse_tool_call};
pub use progress::BatchProgress;
pub use prompt::{PromptError, PromptRenderer, TemplateRenderer};
pub use registry::{RegistryError, ToolOutcome, ToolRegistry};
