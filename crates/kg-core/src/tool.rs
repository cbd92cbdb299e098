//! The tool contract: capability tables, advertised specs, calls, results and errors.

use crate::session::TaskSession;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A capability as advertised to the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object.
    pub parameters: Value,
}

/// A call parsed from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Outcome of one call, as rendered back into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(Value),
    Error(String),
}

impl ToolResult {
    /// Value placed inside the tool-result turn.
    pub fn to_output(&self) -> Value {
        match self {
            ToolResult::Success(v) => v.clone(),
            ToolResult::Error(msg) => Value::String(msg.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }
}

/// What a capability hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    /// The task may end once this result is in the log.
    pub terminal: bool,
}

impl ToolOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            terminal: false,
        }
    }

    pub fn terminal(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            terminal: true,
        }
    }
}

/// Capability failures. Only the kinds reported by [`ToolError::is_fatal`] stop a task;
/// everything else is rendered back to the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments for {capability}: {message}")]
    InvalidArguments { capability: String, message: String },
    #[error("{0}")]
    Runtime(String),
    #[error("connection to graph store failed: {0}")]
    ConnectionFailed(String),
    #[error("malformed graph query ({message}): {query}")]
    MalformedQuery { query: String, message: String },
    #[error("graph store request timed out: {0}")]
    TimedOut(String),
}

impl ToolError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToolError::ConnectionFailed(_)
                | ToolError::MalformedQuery { .. }
                | ToolError::TimedOut(_)
        )
    }
}

/// One row of a tool's static capability table.
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Internal helpers are declared but cannot be requested by name.
    pub exposed: bool,
    pub parameters: fn() -> Value,
}

impl CapabilitySpec {
    pub fn to_tool_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: (self.parameters)(),
        }
    }
}

/// JSON schema for a parameter struct, for use as [`CapabilitySpec::parameters`].
pub fn parameters_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Decode a call's arguments into the capability's typed parameters.
pub fn decode_arguments<T: serde::de::DeserializeOwned>(
    capability: &str,
    arguments: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| ToolError::InvalidArguments {
        capability: capability.to_string(),
        message: e.to_string(),
    })
}

/// Which capabilities of a tool to activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilitySelection {
    /// Every exposed capability in the table.
    All,
    /// An explicit ordered list.
    Names(Vec<String>),
}

impl CapabilitySelection {
    /// `["all"]` (case-insensitive) selects everything; anything else is an explicit list.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.len() == 1 && names[0].as_ref().trim().eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Names(
                names
                    .iter()
                    .map(|n| n.as_ref().trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
            )
        }
    }
}

/// A component bundling capabilities that share state through the [`TaskSession`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The static capability table for this tool type.
    fn capabilities(&self) -> &'static [CapabilitySpec];

    /// Run one capability. Arguments are validated here, against the handler's typed
    /// parameters, not against the advertised schema.
    async fn invoke(
        &self,
        capability: &str,
        arguments: Map<String, Value>,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError>;
}
