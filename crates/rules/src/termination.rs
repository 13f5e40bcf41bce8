//! Termination checks that stop (or redirect) a runaway agent loop.
//!
//! Checks run after each completed tool batch, in rule-list order, against the
//! raw history. They signal; they never fail. Only malformed parameters are
//! errors, and those are raised when the rule is built.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use agentflow_core::agent::AgentNode;
use agentflow_core::message::{tool_sequence, Message};

use crate::model::FlowRule;
use crate::RuleError;

/// Stop when the recent tool calls repeat the same cycle `n_cycles` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleCheck {
    n_cycles: usize,
    span: usize,
}

impl CycleCheck {
    /// `n_cycles` repetitions of a cycle of length 2..=`span`. Both must be > 1.
    pub fn new(n_cycles: usize, span: usize) -> Result<Self, RuleError> {
        if n_cycles <= 1 {
            return Err(RuleError::InvalidParameter {
                rule: "CycleCheck".into(),
                reason: format!("n_cycles must be greater than 1, got {n_cycles}"),
            });
        }
        if span <= 1 {
            return Err(RuleError::InvalidParameter {
                rule: "CycleCheck".into(),
                reason: format!("span must be greater than 1, got {span}"),
            });
        }
        Ok(Self { n_cycles, span })
    }

    pub fn n_cycles(&self) -> usize {
        self.n_cycles
    }

    pub fn span(&self) -> usize {
        self.span
    }

    pub fn triggers(&self, tools: &[String]) -> bool {
        is_cycle(tools, self.n_cycles, self.span)
    }
}

impl Default for CycleCheck {
    fn default() -> Self {
        Self { n_cycles: 3, span: 3 }
    }
}

/// Stop when the same tool is called `n` times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatCheck {
    n: usize,
}

impl RepeatCheck {
    pub fn new(n: usize) -> Result<Self, RuleError> {
        if n <= 1 {
            return Err(RuleError::InvalidParameter {
                rule: "RepeatCheck".into(),
                reason: format!("n must be greater than 1, got {n}"),
            });
        }
        Ok(Self { n })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn triggers(&self, tools: &[String]) -> bool {
        num_subsequent_repeats(tools) >= self.n
    }
}

type Predicate = dyn Fn(&[Message], Option<&AgentNode>) -> Option<AgentNode> + Send + Sync;

/// A caller-supplied check. Returning `None` stops the loop; returning an
/// agent makes it the active agent.
#[derive(Clone)]
pub struct GenericCheck {
    name: String,
    predicate: Arc<Predicate>,
}

impl GenericCheck {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&[Message], Option<&AgentNode>) -> Option<AgentNode> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, history: &[Message], active: Option<&AgentNode>) -> Option<AgentNode> {
        (self.predicate)(history, active)
    }
}

impl fmt::Debug for GenericCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericCheck").field("name", &self.name).finish()
    }
}

/// A rule that can halt or redirect the loop.
#[derive(Debug, Clone)]
pub enum TerminationRule {
    Cycle(CycleCheck),
    Repeat(RepeatCheck),
    Generic(GenericCheck),
}

impl fmt::Display for TerminationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationRule::Cycle(c) => {
                write!(f, "CycleCheck(n_cycles={}, span={})", c.n_cycles, c.span)
            }
            TerminationRule::Repeat(r) => write!(f, "RepeatCheck(n={})", r.n),
            TerminationRule::Generic(g) => write!(f, "GenericCheck({})", g.name),
        }
    }
}

/// Whether the tail of `seq` is `n_cycles` copies of one cycle.
///
/// Cycle lengths from `min(span, len / n_cycles)` down to 2 are tried.
pub fn is_cycle<T: PartialEq>(seq: &[T], n_cycles: usize, span: usize) -> bool {
    if n_cycles < 2 {
        return false;
    }
    let max_len = span.min(seq.len() / n_cycles);
    (2..=max_len).rev().any(|len| {
        let tail = &seq[seq.len() - n_cycles * len..];
        let first = &tail[..len];
        tail.chunks(len).all(|chunk| chunk == first)
    })
}

/// Longest run of consecutive equal items.
pub fn num_subsequent_repeats<T: PartialEq>(seq: &[T]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for (i, item) in seq.iter().enumerate() {
        run = if i > 0 && seq[i - 1] == *item { run + 1 } else { 1 };
        longest = longest.max(run);
    }
    longest
}

/// Result of running every termination rule once.
#[derive(Debug, Clone)]
pub struct TerminationOutcome {
    /// The active agent after the checks (`None` once terminated).
    pub active_agent: Option<AgentNode>,
    /// Description of the rule that stopped the loop, if any.
    pub terminated_by: Option<String>,
}

impl TerminationOutcome {
    pub fn is_terminated(&self) -> bool {
        self.terminated_by.is_some()
    }
}

/// Run the termination rules in `rules`, in order, against the raw history.
///
/// The first rule that fires stops evaluation and clears the active agent.
/// A generic check that returns an agent replaces the active agent for the
/// checks after it.
pub fn run_termination_checks(
    rules: &[FlowRule],
    history: &[Message],
    active_agent: Option<AgentNode>,
) -> TerminationOutcome {
    let tools = tool_sequence(history);
    let mut active = active_agent;

    for rule in rules.iter().filter_map(FlowRule::as_termination_rule) {
        let fired = match rule {
            TerminationRule::Cycle(check) => check.triggers(&tools),
            TerminationRule::Repeat(check) => check.triggers(&tools),
            TerminationRule::Generic(check) => match check.evaluate(history, active.as_ref()) {
                Some(next) => {
                    debug!(rule = %rule, agent = %next.name(), "Generic check kept the loop running");
                    active = Some(next);
                    false
                }
                None => true,
            },
        };
        if fired {
            warn!(rule = %rule, calls = tools.len(), "Termination check fired");
            return TerminationOutcome {
                active_agent: None,
                terminated_by: Some(rule.to_string()),
            };
        }
    }

    TerminationOutcome {
        active_agent: active,
        terminated_by: None,
    }
}
