//! Tool trait, the abstraction over agent capabilities.
//!
//! The orchestrator treats tools as black boxes: it needs the name (for flow
//! rules and usage tracking) and the callable (for execution). Whatever a tool
//! returns is kept verbatim as an artifact; returning an agent or an agent
//! reference hands the conversation over to it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::agent::{Agent, AgentNode, AgentRef};
use crate::error::{RegistrationError, ToolError};
use crate::provider::ToolDefinition;

/// Session-scoped key/value store handed to every tool call.
pub type ContextVars = serde_json::Map<String, serde_json::Value>;

/// The raw return value of a tool call.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Plain text, shown to the model unchanged.
    Text(String),
    /// Structured data. An object with an `output` field is displayed as that field.
    Json(serde_json::Value),
    /// Transfer control to another agent.
    Handoff(AgentNode),
    /// Vacate the active agent; remaining calls in the batch are skipped.
    EndConversation(String),
}

impl ToolOutput {
    /// Text shown to the model for this output.
    pub fn display_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(value) => match value.get("output") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => value.to_string(),
            },
            ToolOutput::Handoff(node) => node.name().to_string(),
            ToolOutput::EndConversation(reason) => reason.clone(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => ToolOutput::Text(s),
            other => ToolOutput::Json(other),
        }
    }
}

impl From<Agent> for ToolOutput {
    fn from(agent: Agent) -> Self {
        ToolOutput::Handoff(AgentNode::Concrete(agent))
    }
}

impl From<AgentRef> for ToolOutput {
    fn from(reference: AgentRef) -> Self {
        ToolOutput::Handoff(AgentNode::Reference(reference))
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "lookup_order").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments and the session context.
    ///
    /// Implementations must not panic: a panic unwinds through the turn and
    /// the session is left mid-batch. Report failures as
    /// [`ToolError::ExecutionFailed`] so they become tool-result content.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &mut ContextVars,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFn =
    dyn Fn(serde_json::Value, &mut ContextVars) -> std::result::Result<ToolOutput, ToolError> + Send + Sync;

/// A tool backed by a synchronous closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(serde_json::Value, &mut ContextVars) -> std::result::Result<ToolOutput, ToolError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            func: Box::new(func),
        }
    }

    pub fn with_parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &mut ContextVars,
    ) -> std::result::Result<ToolOutput, ToolError> {
        (self.func)(arguments, context)
    }
}

/// An insertion-ordered set of uniquely named tools.
///
/// The order tools are registered in is the order they are offered to the
/// model when no flow rule narrows them.
#[derive(Clone)]
pub struct ToolRegistry {
    owner: String,
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry. `owner` labels registration errors.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Rejects empty and duplicate names.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), RegistrationError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RegistrationError::EmptyToolName {
                owner: self.owner.clone(),
            });
        }
        if self.index.contains_key(&name) {
            return Err(RegistrationError::DuplicateTool {
                owner: self.owner.clone(),
                tool: name,
            });
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tool names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Definitions for the named tools, in the order given. Unknown names are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.get(n))
            .map(|t| t.to_definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new("tool registry")
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("owner", &self.owner)
            .field("tools", &self.names())
            .finish()
    }
}
