//! Allow-listed mapping from call name to the tool that owns the capability.

use kg_core::session::TaskSession;
use kg_core::tool::{CapabilitySelection, CapabilitySpec, Tool, ToolError, ToolResult, ToolSpec};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capability selection problems, reported when the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("invalid capability: {0} is not exposed")]
    InvalidCapability(String),
    #[error("capability {0} is provided by more than one tool")]
    DuplicateCapability(String),
}

/// Result of dispatching one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub result: ToolResult,
    pub terminal: bool,
}

impl ToolOutcome {
    fn error(message: String) -> Self {
        Self {
            result: ToolResult::Error(message),
            terminal: false,
        }
    }
}

struct Entry {
    spec: CapabilitySpec,
    tool: Arc<dyn Tool>,
}

/// The capabilities a run may call, in the order they are advertised.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<&'static str, usize>,
}

/// Collects tools and their selected capabilities.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    entries: Vec<Entry>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistryBuilder {
    /// Activate the selected capabilities of `tool`.
    pub fn with_tool(
        mut self,
        tool: Arc<dyn Tool>,
        selection: &CapabilitySelection,
    ) -> Result<Self, RegistryError> {
        let table = tool.capabilities();
        let chosen: Vec<CapabilitySpec> = match selection {
            CapabilitySelection::All => table.iter().filter(|c| c.exposed).copied().collect(),
            CapabilitySelection::Names(names) => names
                .iter()
                .map(|name| match table.iter().find(|c| c.name == name.as_str()) {
                    None => Err(RegistryError::UnknownCapability(name.clone())),
                    Some(c) if !c.exposed => Err(RegistryError::InvalidCapability(name.clone())),
                    Some(c) => Ok(*c),
                })
                .collect::<Result<_, _>>()?,
        };

        for spec in chosen {
            if self.index.contains_key(spec.name) {
                return Err(RegistryError::DuplicateCapability(spec.name.to_string()));
            }
            debug!(tool = tool.name(), capability = spec.name, "capability enabled");
            self.index.insert(spec.name, self.entries.len());
            self.entries.push(Entry {
                spec,
                tool: Arc::clone(&tool),
            });
        }
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Specs to advertise to the generation backend.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.to_tool_spec()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.spec.name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run a parsed call.
    ///
    /// Unknown names, bad arguments and ordinary capability faults come back as error
    /// results for the model. Only fatal tool errors are returned as `Err`.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Result<Map<String, Value>, String>,
        session: &mut TaskSession,
    ) -> Result<ToolOutcome, ToolError> {
        let Some(entry) = self.index.get(name).map(|&i| &self.entries[i]) else {
            warn!(capability = name, "call to unknown capability");
            return Ok(ToolOutcome::error(format!("Tool {name} not found.")));
        };
        let arguments = match arguments {
            Ok(a) => a,
            Err(reason) => {
                warn!(capability = name, %reason, "unparseable arguments");
                return Ok(ToolOutcome::error(format!(
                    "Invalid arguments for {name}: {reason}"
                )));
            }
        };

        match entry.tool.invoke(name, arguments, session).await {
            Ok(out) => Ok(ToolOutcome {
                result: ToolResult::Success(out.value),
                terminal: out.terminal,
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(capability = name, error = %e, "capability failed");
                Ok(ToolOutcome::error(e.to_string()))
            }
        }
    }
}
