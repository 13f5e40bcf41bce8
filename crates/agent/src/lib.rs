//! The turn loop of AgentFlow.
//!
//! Each user message runs through a **Resolve → Complete → Act → Check** cycle:
//!
//! 1. **Resolve** the active agent through the session's agent map
//! 2. **Gate** its tools with the session's flow rules
//! 3. **Complete**: send the privacy-filtered history to the provider
//! 4. **If tool calls**: execute them in order, hand off if a tool says so,
//!    then run the termination checks and loop back to step 1
//! 5. **If a final answer**: the turn is done
//!
//! The loop also stops when the per-turn message budget runs out or a
//! termination rule fires.

pub mod orchestrator;
pub mod session;

pub use orchestrator::{Orchestrator, TurnOutcome, TurnState};
pub use session::{Artifact, Session};
