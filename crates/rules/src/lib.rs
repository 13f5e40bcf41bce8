//! Flow rules: policies that shape what the agent loop may do.
//!
//! Two families of rules share one ordered list on a session:
//!
//! - **Tool rules** narrow the set of tools offered to the model each turn
//!   ([`ToolFlowRule::FixedOrder`], [`ToolFlowRule::FixedPrerequisites`]).
//! - **Termination rules** inspect the raw history after every tool batch and
//!   can stop the loop or redirect it to another agent
//!   ([`CycleCheck`], [`RepeatCheck`], [`GenericCheck`]).
//!
//! ```text
//! ┌──────────────┐  used tools   ┌────────────────────┐  allowed   ┌──────────┐
//! │ Raw history  │──────────────▶│ get_allowed_tools   │──────────▶│ Provider │
//! └──────┬───────┘               └────────────────────┘            └──────────┘
//!        │ tool sequence          ┌────────────────────┐
//!        └───────────────────────▶│ run_termination_…   │──▶ continue / stop / redirect
//!                                 └────────────────────┘
//! ```
//!
//! # Example Rule Set
//!
//! ```toml
//! [[rules]]
//! kind = "fixed_order"
//! order = ["identify_user", "lookup_order", "refund"]
//!
//! [[rules]]
//! kind = "repeat_check"
//! n = 4
//! ```

mod allowed;
mod model;
mod termination;

pub use allowed::{get_allowed_tools, Combine};
pub use model::{FlowRule, RuleSet, RuleSpec, ToolFlowRule};
pub use termination::{
    is_cycle, num_subsequent_repeats, run_termination_checks, CycleCheck, GenericCheck,
    RepeatCheck, TerminationOutcome, TerminationRule,
};

/// Errors from the rule subsystem. All of them are construction-time errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid {rule} rule: {reason}")]
    InvalidParameter { rule: String, reason: String },

    #[error("unknown combine strategy '{0}' (expected union, intersect or vcat)")]
    UnknownCombine(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
