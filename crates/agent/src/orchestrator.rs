//! The turn orchestrator implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use agentflow_config::{AppConfig, OrchestratorConfig};
use agentflow_core::agent::{resolve, Agent, AgentNode};
use agentflow_core::error::{Error, ToolError};
use agentflow_core::event::{DomainEvent, EventBus};
use agentflow_core::message::{tool_sequence, Message, MessageToolCall, Role};
use agentflow_core::privacy::{apply_privacy, filter_history, Exposure};
use agentflow_core::provider::{Provider, ProviderRequest};
use agentflow_core::tool::{ContextVars, ToolOutput};
use agentflow_rules::{get_allowed_tools, run_termination_checks, Combine};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::session::{Artifact, Session};

/// Where a turn currently is. Transitions are traced at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    ResolvingAgent,
    AwaitingModel,
    ProcessingTools,
    CheckingTermination,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::ResolvingAgent => "resolving_agent",
            TurnState::AwaitingModel => "awaiting_model",
            TurnState::ProcessingTools => "processing_tools",
            TurnState::CheckingTermination => "checking_termination",
            TurnState::Done => "done",
        };
        f.write_str(s)
    }
}

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Messages appended after the user message, privacy wrappers included
    pub messages: Vec<Message>,

    /// The agent that will answer the next user message
    pub active_agent: Option<AgentNode>,

    /// The session context after every tool call of the turn
    pub context: ContextVars,

    /// The termination rule that stopped the turn, if one did
    pub terminated_by: Option<String>,
}

impl TurnOutcome {
    /// Content of the last non-empty assistant message.
    pub fn reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role() == Role::Assistant)
            .map(Message::content)
            .find(|c| !c.is_empty())
    }
}

/// Drives a session through resolve → complete → execute tools → check, until
/// the model answers without tool calls, the budget runs out, or a
/// termination rule fires.
pub struct Orchestrator {
    /// The completion service
    provider: Arc<dyn Provider>,

    /// Maximum messages appended per turn
    max_turns: usize,

    /// Merge strategy for tool rule results
    combine: Combine,

    /// Model for agents that leave theirs empty
    default_model: String,

    /// Temperature setting
    temperature: f32,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    /// Create an orchestrator with default settings.
    pub fn new(provider: Arc<dyn Provider>, event_bus: Arc<EventBus>) -> Self {
        Self::with_settings(provider, &OrchestratorConfig::default(), event_bus)
    }

    /// Create an orchestrator from the `[orchestrator]` config section.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig, event_bus: Arc<EventBus>) -> Self {
        Self::with_settings(provider, &config.orchestrator, event_bus)
    }

    fn with_settings(provider: Arc<dyn Provider>, settings: &OrchestratorConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            provider,
            max_turns: settings.max_turns,
            combine: settings.combine,
            default_model: settings.default_model.clone(),
            temperature: settings.temperature,
            event_bus,
        }
    }

    /// Set the per-turn message budget.
    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    pub fn with_combine(mut self, combine: Combine) -> Self {
        self.combine = combine;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn combine(&self) -> Combine {
        self.combine
    }

    fn enter(&self, session: &Session, state: TurnState) {
        debug!(session_id = %session.id, %state, "Turn state");
    }

    fn model_for(&self, agent: &Agent) -> String {
        if agent.model.trim().is_empty() {
            self.default_model.clone()
        } else {
            agent.model.clone()
        }
    }

    /// Process one user message.
    ///
    /// Reference errors and completion-service errors abort the turn with
    /// `Err`. Tool failures are recorded as tool-result content and as
    /// artifacts, and the loop carries on. Termination is a normal outcome.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_text: impl Into<String>,
    ) -> Result<TurnOutcome, Error> {
        let user_text = user_text.into();
        let starting_agent = session.active_agent.as_ref().map(|a| a.name().to_string());
        info!(
            session_id = %session.id,
            agent = ?starting_agent,
            messages = session.history.len(),
            "Starting turn"
        );
        self.event_bus.publish(DomainEvent::TurnStarted {
            session_id: session.id.to_string(),
            agent: starting_agent,
            timestamp: Utc::now(),
        });

        session.progress(&format!("User: {user_text}"));
        session.history.push(Message::user(user_text));
        let mut start = session.history.len();

        let keep_duplicates = self.combine.keeps_duplicates();
        let mut used_tools = session.used_tools(keep_duplicates);
        let mut terminated_by = None;

        while session.history.len() - start < self.max_turns {
            let Some(active) = session.active_agent.clone() else {
                break;
            };

            self.enter(session, TurnState::ResolvingAgent);
            let agent = resolve(session.agent_map(), &active)?;
            let all_tools = agent.tool_names();
            let allowed = get_allowed_tools(session.rules(), &used_tools, &all_tools, self.combine);

            if install_system_message(&mut session.history, &agent.instructions) {
                start += 1;
            }

            self.enter(session, TurnState::AwaitingModel);
            let request = ProviderRequest {
                model: self.model_for(&agent),
                messages: filter_history(&session.history, &agent),
                temperature: self.temperature,
                tools: agent.tools().definitions_for(&allowed),
                tool_choice: agent.tool_choice.clone(),
                parallel_tool_calls: false,
            };
            let response = self.provider.complete(request).await?;

            self.event_bus.publish(DomainEvent::ResponseGenerated {
                session_id: session.id.to_string(),
                model: response.model.clone(),
                messages: response.messages.len(),
                tokens_used: response.usage.as_ref().map(|u| u.total_tokens),
                timestamp: Utc::now(),
            });

            let batch_start = session.history.len();
            for message in response.messages {
                let exposure = if message.is_final_answer() {
                    Exposure::Terminal
                } else {
                    Exposure::Intermediate
                };
                session.history.push(apply_privacy(message, &agent, exposure));
            }

            let tool_calls: Vec<MessageToolCall> = match session.history[batch_start..].last() {
                Some(last) => last.tool_calls().to_vec(),
                None => {
                    warn!(session_id = %session.id, "Completion service returned no messages");
                    break;
                }
            };
            if tool_calls.is_empty() {
                break;
            }

            self.enter(session, TurnState::ProcessingTools);
            debug!(tool_count = tool_calls.len(), "Executing tool calls");
            let mut batch = Batch::new(batch_start, active);
            for call in &tool_calls {
                self.execute_call(session, &agent, call, &mut batch).await;
            }
            session.active_agent = batch.next_agent;

            for name in tool_sequence(&session.history[batch_start..]) {
                if keep_duplicates || !used_tools.contains(&name) {
                    used_tools.push(name);
                }
            }

            self.enter(session, TurnState::CheckingTermination);
            let current = session.active_agent.take();
            let outcome = run_termination_checks(session.rules(), &session.history, current);
            session.active_agent = outcome.active_agent;
            if let Some(rule) = outcome.terminated_by {
                session.progress(&format!("Terminated by {rule}"));
                self.event_bus.publish(DomainEvent::TerminationTriggered {
                    rule: rule.clone(),
                    timestamp: Utc::now(),
                });
                terminated_by = Some(rule);
                break;
            }
        }

        let appended = session.history.len() - start;
        if appended >= self.max_turns && session.active_agent.is_some() {
            warn!(
                session_id = %session.id,
                max_turns = self.max_turns,
                "Turn budget exhausted"
            );
        }

        self.enter(session, TurnState::Done);
        let active_name = session.active_agent.as_ref().map(|a| a.name().to_string());
        info!(
            session_id = %session.id,
            new_messages = appended,
            agent = ?active_name,
            "Turn complete"
        );
        self.event_bus.publish(DomainEvent::TurnCompleted {
            session_id: session.id.to_string(),
            new_messages: appended,
            agent: active_name,
            timestamp: Utc::now(),
        });

        Ok(TurnOutcome {
            messages: session.history[start..].to_vec(),
            active_agent: session.active_agent.clone(),
            context: session.context.clone(),
            terminated_by,
        })
    }

    /// Run one requested tool call and append its result.
    ///
    /// Every call gets a tool-result message, including calls skipped after
    /// the agent was vacated, so each tool-call id in history has an answer.
    async fn execute_call(
        &self,
        session: &mut Session,
        agent: &Agent,
        call: &MessageToolCall,
        batch: &mut Batch,
    ) {
        if batch.next_agent.is_none() {
            debug!(tool = %call.name, call_id = %call.id, "Agent vacated, skipping tool call");
            session.progress(&format!("Early exit: skipping {} ({})", call.name, call.id));
            let arguments = parse_arguments(call).unwrap_or_else(|_| Value::String(call.arguments.clone()));
            session.history.push(Message::skipped_tool_result(
                call.name.as_str(),
                arguments,
                format!("Early exit: {} was not run, the conversation has ended.", call.name),
                call.id.as_str(),
            ));
            return;
        }

        session.progress(&format!("Tool call: {}({})", call.name, call.arguments));
        let parsed = parse_arguments(call);
        let arguments = match &parsed {
            Ok(value) => value.clone(),
            Err(_) => Value::String(call.arguments.clone()),
        };

        let started = Instant::now();
        let outcome = match (agent.tools().get(&call.name), parsed) {
            (None, _) => Err(ToolError::NotFound(call.name.clone())),
            (Some(_), Err(e)) => Err(e),
            (Some(tool), Ok(args)) => tool.execute(args, &mut session.context).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: outcome.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        let (content, exposure) = match &outcome {
            Ok(ToolOutput::Handoff(target)) => {
                info!(from = %agent.name, to = %target.name(), "Handing off");
                self.event_bus.publish(DomainEvent::HandoffOccurred {
                    from: agent.name.clone(),
                    to: target.name().to_string(),
                    timestamp: Utc::now(),
                });
                batch.next_agent = Some(target.clone());
                batch.handed_off = true;

                // The outgoing agent's last words stay visible to the next one.
                let published: Vec<Message> = session
                    .history
                    .drain(batch.start..)
                    .map(Message::into_public)
                    .collect();
                session.history.extend(published);

                let ack = json!({ "assistant": target.name(), "arguments": arguments });
                (ack.to_string(), Exposure::Handoff)
            }
            Ok(output @ ToolOutput::EndConversation(_)) => {
                info!(agent = %agent.name, tool = %call.name, "Tool ended the conversation");
                batch.next_agent = None;
                (output.display_text(), Exposure::Terminal)
            }
            Ok(output) => (output.display_text(), batch.routine_exposure()),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {e}"), batch.routine_exposure())
            }
        };

        session.progress(&format!("Tool output ({}): {content}", call.name));
        session.artifacts.push(Artifact {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome,
        });

        let message = Message::tool_result(call.name.as_str(), arguments, content, call.id.as_str());
        session.history.push(apply_privacy(message, agent, exposure));
    }
}

/// Tool-call bookkeeping for one provider response.
struct Batch {
    /// History index of the response's first message
    start: usize,

    /// Who answers next; `None` once a tool ended the conversation
    next_agent: Option<AgentNode>,

    /// A handoff happened earlier in this batch
    handed_off: bool,
}

impl Batch {
    fn new(start: usize, active: AgentNode) -> Self {
        Self {
            start,
            next_agent: Some(active),
            handed_off: false,
        }
    }

    /// Exposure for ordinary results. After a handoff the rest of the batch
    /// is published to the incoming agent as well.
    fn routine_exposure(&self) -> Exposure {
        if self.handed_off {
            Exposure::Handoff
        } else {
            Exposure::Intermediate
        }
    }
}

/// Make the first message a system message carrying `instructions`.
///
/// Returns `true` when a message was inserted rather than replaced.
fn install_system_message(history: &mut Vec<Message>, instructions: &str) -> bool {
    let system = Message::system(instructions);
    match history.first_mut() {
        Some(first) if first.is_system() => {
            *first = system;
            false
        }
        _ => {
            history.insert(0, system);
            true
        }
    }
}

fn parse_arguments(call: &MessageToolCall) -> Result<Value, ToolError> {
    if call.arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidArguments {
        tool_name: call.name.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::error::ProviderError;
    use agentflow_core::provider::{ProviderResponse, Usage};

    /// A mock provider that returns a fixed response.
    struct MockProvider {
        response: String,
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                messages: vec![Message::assistant(&self.response)],
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Timeout("30s".into()))
        }
    }

    fn orchestrator(provider: impl Provider + 'static) -> Orchestrator {
        Orchestrator::new(Arc::new(provider), Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn simple_text_response() {
        let orch = orchestrator(MockProvider {
            response: "Hello! How can I help?".into(),
        });
        let agent = Agent::new("helper", "mock-model").with_instructions("Be brief.");
        let mut session = Session::new(agent);

        let outcome = orch.run_turn(&mut session, "Hello!").await.unwrap();
        assert_eq!(outcome.reply(), Some("Hello! How can I help?"));
        assert_eq!(outcome.messages.len(), 1);
        // System + User + Assistant = 3 messages
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history[0].content(), "Be brief.");
        assert_eq!(outcome.active_agent.unwrap().name(), "helper");
    }

    #[tokio::test]
    async fn system_message_replaced_on_second_turn() {
        let orch = orchestrator(MockProvider {
            response: "ok".into(),
        });
        let mut session = Session::new(Agent::new("helper", "m").with_instructions("v1"));
        orch.run_turn(&mut session, "one").await.unwrap();

        session.register_agent(Agent::new("helper", "m").with_instructions("v2"));
        session.active_agent = Some(agentflow_core::agent::AgentRef::new("helper").into());
        orch.run_turn(&mut session, "two").await.unwrap();

        assert_eq!(session.history.iter().filter(|m| m.is_system()).count(), 1);
        assert_eq!(session.history[0].content(), "v2");
        assert_eq!(session.history.len(), 5);
    }

    #[tokio::test]
    async fn provider_error_aborts_turn() {
        let orch = orchestrator(FailingProvider);
        let mut session = Session::new(Agent::new("helper", "m"));
        let err = orch.run_turn(&mut session, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn no_active_agent_is_a_no_op() {
        let orch = orchestrator(FailingProvider);
        let mut session = Session::new(Agent::new("helper", "m"));
        session.active_agent = None;
        let outcome = orch.run_turn(&mut session, "anyone?").await.unwrap();
        assert!(outcome.messages.is_empty());
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn events_published_for_turn() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orch = Orchestrator::new(
            Arc::new(MockProvider {
                response: "hi".into(),
            }),
            bus,
        );
        let mut session = Session::new(Agent::new("helper", "m"));
        orch.run_turn(&mut session, "hello").await.unwrap();

        assert!(matches!(*rx.recv().await.unwrap(), DomainEvent::TurnStarted { .. }));
        match &*rx.recv().await.unwrap() {
            DomainEvent::ResponseGenerated { tokens_used, .. } => assert_eq!(*tokens_used, Some(15)),
            other => panic!("Expected ResponseGenerated, got {other:?}"),
        }
        assert!(matches!(*rx.recv().await.unwrap(), DomainEvent::TurnCompleted { new_messages: 1, .. }));
    }

    #[test]
    fn empty_model_falls_back_to_default() {
        let orch = orchestrator(FailingProvider);
        assert_eq!(orch.model_for(&Agent::new("a", "")), "gpt-4o-mini");
        assert_eq!(orch.model_for(&Agent::new("a", "local")), "local");
    }

    #[test]
    fn install_system_message_inserts_once() {
        let mut history = vec![Message::user("hi")];
        assert!(install_system_message(&mut history, "first"));
        assert!(!install_system_message(&mut history, "second"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content(), "second");
    }

    #[test]
    fn arguments_parsed_or_rejected() {
        let ok = MessageToolCall::new("c1", "lookup", &json!({"id": 7}));
        assert_eq!(parse_arguments(&ok).unwrap()["id"], 7);

        let empty = MessageToolCall {
            id: "c2".into(),
            name: "lookup".into(),
            arguments: String::new(),
        };
        assert!(parse_arguments(&empty).unwrap().as_object().unwrap().is_empty());

        let broken = MessageToolCall {
            id: "c3".into(),
            name: "lookup".into(),
            arguments: "{not json".into(),
        };
        assert!(matches!(
            parse_arguments(&broken),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn turn_state_display() {
        assert_eq!(TurnState::CheckingTermination.to_string(), "checking_termination");
    }
}
