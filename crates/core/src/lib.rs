//! # AgentFlow Core
//!
//! Domain types, traits, and error definitions for the AgentFlow tool-calling
//! orchestrator. The flow-rule engine and the turn orchestrator live in their
//! own crates and depend inward on this one.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here (`Provider`, `Tool`,
//! `ProgressSink`). This enables:
//! - Scripted providers and closure tools in tests
//! - Swapping the completion backend without touching the control plane
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod privacy;
pub mod progress;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{resolve, Agent, AgentMap, AgentNode, AgentRef};
pub use error::{AgentError, Error, ProviderError, RegistrationError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{get_used_tools, tool_sequence, Message, MessageToolCall, PrivateMessage, Role};
pub use privacy::{apply_privacy, filter_history, is_visible, Exposure};
pub use progress::{BufferSink, NullSink, ProgressSink, StderrSink};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{ContextVars, FnTool, Tool, ToolOutput, ToolRegistry};
