//! Session state, everything one conversation owns.

use std::fmt;
use std::sync::Arc;

use agentflow_config::AppConfig;
use agentflow_core::agent::{self, AgentMap, AgentNode, AgentRef};
use agentflow_core::error::ToolError;
use agentflow_core::message::{get_used_tools, Message};
use agentflow_core::progress::{NullSink, ProgressSink, StderrSink};
use agentflow_core::tool::{ContextVars, ToolOutput};
use agentflow_rules::{FlowRule, RuleError};
use uuid::Uuid;

/// The raw result of one tool call, kept whether or not it succeeded.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Result<ToolOutput, ToolError>,
}

impl Artifact {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

/// A conversation between a user, a set of agents, and their tools.
///
/// A session has exactly one owner. [`Orchestrator::run_turn`] takes it by
/// `&mut`, so concurrent mutation is ruled out by the borrow checker.
///
/// [`Orchestrator::run_turn`]: crate::Orchestrator::run_turn
pub struct Session {
    /// Unique session ID
    pub id: Uuid,

    /// Full history, privacy wrappers included
    pub history: Vec<Message>,

    /// The agent that answers the next user message, if any
    pub active_agent: Option<AgentNode>,

    /// Key/value store handed to every tool call
    pub context: ContextVars,

    /// Every raw tool return value, in call order
    pub artifacts: Vec<Artifact>,

    rules: Vec<FlowRule>,
    agent_map: AgentMap,
    sink: Arc<dyn ProgressSink>,
}

impl Session {
    /// Start a session with `agent` active. A concrete agent is also
    /// registered so references to its name resolve.
    pub fn new(agent: impl Into<AgentNode>) -> Self {
        let node = agent.into();
        let mut agent_map = AgentMap::new();
        if !node.is_reference() {
            agent::register(&mut agent_map, node.clone());
        }
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            active_agent: Some(node),
            context: ContextVars::new(),
            artifacts: Vec::new(),
            rules: Vec::new(),
            agent_map,
            sink: Arc::new(NullSink),
        }
    }

    /// Start a session with the rules and progress output from `config`.
    pub fn from_config(agent: impl Into<AgentNode>, config: &AppConfig) -> Result<Self, RuleError> {
        let sink: Arc<dyn ProgressSink> = if config.progress.enabled {
            Arc::new(StderrSink)
        } else {
            Arc::new(NullSink)
        };
        let rules = config.build_rules()?;
        Ok(Self::new(agent).with_sink(sink).with_rules(rules))
    }

    pub fn with_context(mut self, context: ContextVars) -> Self {
        self.context = context;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_rules<I>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = FlowRule>,
    {
        self.add_rules(rules);
        self
    }

    /// Append a rule. Rules are evaluated in the order they were added.
    pub fn add_rule(&mut self, rule: impl Into<FlowRule>) {
        self.rules.push(rule.into());
    }

    pub fn add_rules<I>(&mut self, rules: I)
    where
        I: IntoIterator<Item = FlowRule>,
    {
        self.rules.extend(rules);
    }

    pub fn rules(&self) -> &[FlowRule] {
        &self.rules
    }

    /// Register an agent under its name. Returns `true` if an existing entry
    /// was overwritten.
    pub fn register_agent(&mut self, agent: impl Into<AgentNode>) -> bool {
        agent::register(&mut self.agent_map, agent.into())
    }

    /// Register `alias` as a name that resolves to `target`.
    pub fn register_ref(&mut self, alias: impl Into<String>, target: impl Into<String>) -> bool {
        agent::register_as(&mut self.agent_map, alias, AgentRef::new(target).into())
    }

    pub fn agent_map(&self) -> &AgentMap {
        &self.agent_map
    }

    /// Tools called so far, read from the raw history.
    pub fn used_tools(&self, keep_duplicates: bool) -> Vec<String> {
        get_used_tools(&self.history, keep_duplicates)
    }

    pub(crate) fn progress(&self, line: &str) {
        self.sink.emit(line);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("messages", &self.history.len())
            .field("active_agent", &self.active_agent.as_ref().map(AgentNode::name))
            .field("artifacts", &self.artifacts.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::agent::{resolve, Agent};
    use agentflow_core::error::AgentError;
    use agentflow_rules::{RepeatCheck, RuleSpec, ToolFlowRule};

    #[test]
    fn new_session_registers_concrete_agent() {
        let session = Session::new(Agent::new("triage", "m"));
        assert!(session.agent_map().contains_key("triage"));
        assert_eq!(session.active_agent.as_ref().map(AgentNode::name), Some("triage"));
        assert!(session.history.is_empty());
    }

    #[test]
    fn reference_start_resolves_after_registration() {
        let mut session = Session::new(AgentRef::new("support"));
        assert!(session.agent_map().is_empty());

        session.register_agent(Agent::new("billing", "m"));
        session.register_ref("support", "billing");

        let active = session.active_agent.clone().unwrap();
        let agent = resolve(session.agent_map(), &active).unwrap();
        assert_eq!(agent.name, "billing");
    }

    #[test]
    fn alias_loop_is_reported() {
        let mut session = Session::new(AgentRef::new("a"));
        session.register_ref("a", "b");
        session.register_ref("b", "a");
        let active = session.active_agent.clone().unwrap();
        assert!(matches!(
            resolve(session.agent_map(), &active),
            Err(AgentError::CircularReference { .. })
        ));
    }

    #[test]
    fn overwrite_is_reported() {
        let mut session = Session::new(Agent::new("triage", "m"));
        assert!(session.register_agent(Agent::new("triage", "other-model")));
        assert!(!session.register_agent(Agent::new("sales", "m")));
    }

    #[test]
    fn rules_keep_insertion_order() {
        let mut session = Session::new(Agent::new("a", "m"));
        session.add_rule(ToolFlowRule::fixed_order(["x", "y"]));
        session.add_rule(RepeatCheck::new(2).unwrap());
        session.add_rule(RepeatCheck::new(2).unwrap());
        assert_eq!(session.rules().len(), 3);
        assert!(session.rules()[0].as_tool_rule().is_some());
        assert!(session.rules()[2].as_termination_rule().is_some());
    }

    #[test]
    fn from_config_builds_rules() {
        let mut config = AppConfig::default();
        config.progress.enabled = false;
        config.rules.push(RuleSpec::RepeatCheck { n: 3 });
        let session = Session::from_config(Agent::new("a", "m"), &config).unwrap();
        assert_eq!(session.rules().len(), 1);

        config.rules.push(RuleSpec::RepeatCheck { n: 1 });
        assert!(Session::from_config(Agent::new("a", "m"), &config).is_err());
    }

    #[test]
    fn used_tools_read_history() {
        let mut session = Session::new(Agent::new("a", "m"));
        session.history.push(Message::tool_result("x", serde_json::json!({}), "1", "c1"));
        session.history.push(Message::tool_result("x", serde_json::json!({}), "2", "c2"));
        assert_eq!(session.used_tools(false), vec!["x"]);
        assert_eq!(session.used_tools(true), vec!["x", "x"]);
    }
}
