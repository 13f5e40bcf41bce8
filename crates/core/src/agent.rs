//! Agents, symbolic agent references, and reference resolution.
//!
//! Agents may hand off to agents that are declared later, so hand-off tools
//! usually return an [`AgentRef`] by name. References are resolved through the
//! session's agent map with an explicit visited-set walk; a chain that loops
//! back on itself is an error, never an infinite loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::error::{AgentError, RegistrationError};
use crate::tool::{Tool, ToolRegistry};

/// A named configuration of instructions, model, and available tools.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Unique name, used as the agent map key and for privacy scoping
    pub name: String,

    /// Model identifier sent to the completion service
    pub model: String,

    /// System prompt text
    pub instructions: String,

    /// Forced tool choice, if any
    pub tool_choice: Option<String>,

    /// Whether intermediate messages are hidden from other agents
    pub private: bool,

    tool_map: ToolRegistry,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tool_map: ToolRegistry::new(format!("agent '{name}'")),
            name,
            model: model.into(),
            instructions: String::new(),
            tool_choice: None,
            private: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool_choice(mut self, choice: impl Into<String>) -> Self {
        self.tool_choice = Some(choice.into());
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Add a tool. Duplicate names are rejected.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistrationError> {
        self.tool_map.register(tool)
    }

    /// Add several tools, stopping at the first duplicate.
    pub fn add_tools<I>(&mut self, tools: I) -> Result<(), RegistrationError>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            self.add_tool(tool)?;
        }
        Ok(())
    }

    /// Builder form of [`Agent::add_tool`].
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, RegistrationError> {
        self.add_tool(tool)?;
        Ok(self)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tool_map
    }

    /// Tool names in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tool_map.names()
    }
}

/// A symbolic pointer to an agent by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentRef {
    pub name: String,
}

impl AgentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Either a concrete agent or a reference to one.
#[derive(Debug, Clone)]
pub enum AgentNode {
    Concrete(Agent),
    Reference(AgentRef),
}

impl AgentNode {
    pub fn name(&self) -> &str {
        match self {
            AgentNode::Concrete(agent) => &agent.name,
            AgentNode::Reference(r) => &r.name,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, AgentNode::Reference(_))
    }
}

impl From<Agent> for AgentNode {
    fn from(agent: Agent) -> Self {
        AgentNode::Concrete(agent)
    }
}

impl From<AgentRef> for AgentNode {
    fn from(reference: AgentRef) -> Self {
        AgentNode::Reference(reference)
    }
}

/// Name → agent (or alias) lookup table owned by a session.
pub type AgentMap = HashMap<String, AgentNode>;

/// Resolve a node to a concrete agent.
///
/// References are followed through `agent_map` until a concrete agent is
/// reached. Fails with [`AgentError::NotFound`] on a dangling name and with
/// [`AgentError::CircularReference`] when a name recurs.
pub fn resolve(agent_map: &AgentMap, node: &AgentNode) -> Result<Agent, AgentError> {
    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let mut current = node;

    loop {
        match current {
            AgentNode::Concrete(agent) => return Ok(agent.clone()),
            AgentNode::Reference(reference) => {
                chain.push(reference.name.clone());
                if !visited.insert(reference.name.as_str()) {
                    return Err(AgentError::CircularReference { chain });
                }
                current = agent_map
                    .get(&reference.name)
                    .ok_or_else(|| AgentError::NotFound(reference.name.clone()))?;
            }
        }
    }
}

/// Insert `node` under its name, warning when an entry is replaced.
///
/// Returns `true` if an existing entry was overwritten.
pub fn register(agent_map: &mut AgentMap, node: AgentNode) -> bool {
    let name = node.name().to_string();
    register_as(agent_map, name, node)
}

/// Insert `node` under `name`, which may differ from the node's own name.
pub fn register_as(agent_map: &mut AgentMap, name: impl Into<String>, node: AgentNode) -> bool {
    let name = name.into();
    let replaced = agent_map.insert(name.clone(), node).is_some();
    if replaced {
        warn!(agent = %name, "Overwriting existing agent registration");
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(nodes: Vec<AgentNode>) -> AgentMap {
        let mut map = AgentMap::new();
        for node in nodes {
            register(&mut map, node);
        }
        map
    }

    #[test]
    fn concrete_agent_resolves_to_itself() {
        let agent = Agent::new("triage", "gpt-4o-mini");
        let resolved = resolve(&AgentMap::new(), &agent.clone().into()).unwrap();
        assert_eq!(resolved.name, "triage");
    }

    #[test]
    fn three_hop_chain_resolves() {
        // a -> b -> c -> concrete "c"
        let mut map = map_of(vec![
            Agent::new("c", "m").with_instructions("terminal").into(),
        ]);
        map.insert("a".into(), AgentRef::new("b").into());
        map.insert("b".into(), AgentRef::new("c").into());

        let resolved = resolve(&map, &AgentRef::new("a").into()).unwrap();
        assert_eq!(resolved.name, "c");
        assert_eq!(resolved.instructions, "terminal");
    }

    #[test]
    fn self_reference_is_circular() {
        let mut map = AgentMap::new();
        map.insert("loop".into(), AgentRef::new("loop").into());

        let err = resolve(&map, &AgentRef::new("loop").into()).unwrap_err();
        assert_eq!(
            err,
            AgentError::CircularReference {
                chain: vec!["loop".into(), "loop".into()]
            }
        );
    }

    #[test]
    fn mutual_reference_is_circular() {
        let mut map = AgentMap::new();
        map.insert("ping".into(), AgentRef::new("pong").into());
        map.insert("pong".into(), AgentRef::new("ping").into());

        let err = resolve(&map, &AgentRef::new("ping").into()).unwrap_err();
        assert!(matches!(err, AgentError::CircularReference { .. }));
    }

    #[test]
    fn dangling_reference_is_not_found() {
        let err = resolve(&AgentMap::new(), &AgentRef::new("ghost").into()).unwrap_err();
        assert_eq!(err, AgentError::NotFound("ghost".into()));
    }

    #[test]
    fn register_reports_overwrite() {
        let mut map = AgentMap::new();
        assert!(!register(&mut map, Agent::new("a", "m1").into()));
        assert!(register(&mut map, Agent::new("a", "m2").into()));
        assert!(!register_as(&mut map, "alias", AgentRef::new("a").into()));
        assert!(register_as(&mut map, "alias", AgentRef::new("b").into()));
        assert_eq!(map["alias"].name(), "b");

        let resolved = resolve(&map, &AgentRef::new("a").into()).unwrap();
        assert_eq!(resolved.model, "m2");
    }

    #[test]
    fn duplicate_agent_tool_rejected() {
        use crate::tool::FnTool;
        let tool = || -> Arc<dyn Tool> { Arc::new(FnTool::new("search", "Search", |_, _| Ok("".into()))) };

        let mut agent = Agent::new("researcher", "m");
        agent.add_tool(tool()).unwrap();
        let err = agent.add_tool(tool()).unwrap_err();
        assert!(err.to_string().contains("agent 'researcher'"));
        assert_eq!(agent.tool_names(), vec!["search"]);
    }
}
