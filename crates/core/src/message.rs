//! Message domain types.
//!
//! A conversation is an ordered list of [`Message`]s. The four public kinds
//! (system, user, assistant, tool result) are plain variants; visibility
//! restrictions are layered on top with [`Message::Private`], which forwards
//! every read accessor to the message it wraps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions of the active agent
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

impl MessageToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<MessageToolCall>,
    },
    ToolResult {
        tool_name: String,
        #[serde(default)]
        arguments: serde_json::Value,
        content: String,
        call_id: String,
        /// The call was answered without running the tool.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        skipped: bool,
    },
    Private(PrivateMessage),
}

/// A message restricted to a set of agents.
///
/// Never wraps another private message; [`PrivateMessage::new`] flattens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessage {
    message: Box<Message>,
    visible: BTreeSet<String>,
    last_turn: bool,
}

impl PrivateMessage {
    pub fn new<I, S>(message: Message, visible: I, last_turn: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let message = match message {
            Message::Private(inner) => inner.message,
            other => Box::new(other),
        };
        Self {
            message,
            visible: visible.into_iter().map(Into::into).collect(),
            last_turn,
        }
    }

    /// The wrapped (always public) message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Names of the agents allowed to see this message.
    pub fn visible(&self) -> &BTreeSet<String> {
        &self.visible
    }

    pub fn last_turn(&self) -> bool {
        self.last_turn
    }

    pub fn into_message(self) -> Message {
        *self.message
    }
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Create a new assistant message without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message requesting tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        content: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Message::ToolResult {
            tool_name: tool_name.into(),
            arguments,
            content: content.into(),
            call_id: call_id.into(),
            skipped: false,
        }
    }

    /// Answer a tool call that was never executed. Skipped results keep the
    /// call/result pairing intact but do not count as tool usage.
    pub fn skipped_tool_result(
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        content: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Message::ToolResult {
            tool_name: tool_name.into(),
            arguments,
            content: content.into(),
            call_id: call_id.into(),
            skipped: true,
        }
    }

    /// The underlying public message, looking through a private wrapper.
    pub fn inner(&self) -> &Message {
        match self {
            Message::Private(p) => p.message(),
            other => other,
        }
    }

    /// Drop any visibility restriction.
    pub fn into_public(self) -> Message {
        match self {
            Message::Private(p) => p.into_message(),
            other => other,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Message::Private(_))
    }

    pub fn as_private(&self) -> Option<&PrivateMessage> {
        match self {
            Message::Private(p) => Some(p),
            _ => None,
        }
    }

    pub fn role(&self) -> Role {
        match self.inner() {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::ToolResult { .. } | Message::Private(_) => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self.inner() {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content.as_str(),
            Message::Private(_) => "",
        }
    }

    /// Tool calls requested by an assistant message (empty for other kinds).
    pub fn tool_calls(&self) -> &[MessageToolCall] {
        match self.inner() {
            Message::Assistant { tool_calls, .. } => tool_calls.as_slice(),
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Name of the tool that produced this message, for tool results.
    pub fn tool_name(&self) -> Option<&str> {
        match self.inner() {
            Message::ToolResult { tool_name, .. } => Some(tool_name.as_str()),
            _ => None,
        }
    }

    /// Correlation id of a tool result.
    pub fn call_id(&self) -> Option<&str> {
        match self.inner() {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.inner(), Message::ToolResult { skipped: true, .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self.inner(), Message::System { .. })
    }

    /// An assistant message that carries no tool-call requests.
    pub fn is_final_answer(&self) -> bool {
        matches!(self.inner(), Message::Assistant { tool_calls, .. } if tool_calls.is_empty())
    }
}

/// Ordered tool names of every executed tool-result message in `history`.
///
/// Private wrappers are looked through: flow control always sees the raw
/// history. Skipped calls are left out.
pub fn tool_sequence(history: &[Message]) -> Vec<String> {
    history
        .iter()
        .filter(|m| !m.is_skipped())
        .filter_map(|m| m.tool_name().map(str::to_string))
        .collect()
}

/// Tools used so far in `history`, in first-use order.
///
/// With `keep_duplicates` every call is listed; otherwise each name appears
/// once.
pub fn get_used_tools(history: &[Message], keep_duplicates: bool) -> Vec<String> {
    let sequence = tool_sequence(history);
    if keep_duplicates {
        return sequence;
    }
    let mut seen = BTreeSet::new();
    sequence
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
