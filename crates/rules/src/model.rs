//! Rule data model: the types a session's rule list is made of.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::termination::{CycleCheck, GenericCheck, RepeatCheck, TerminationRule};
use crate::RuleError;

/// A rule in a session's ordered rule list. Duplicates are allowed.
#[derive(Debug, Clone)]
pub enum FlowRule {
    Tool(ToolFlowRule),
    Termination(TerminationRule),
}

impl FlowRule {
    pub fn as_tool_rule(&self) -> Option<&ToolFlowRule> {
        match self {
            FlowRule::Tool(rule) => Some(rule),
            FlowRule::Termination(_) => None,
        }
    }

    pub fn as_termination_rule(&self) -> Option<&TerminationRule> {
        match self {
            FlowRule::Termination(rule) => Some(rule),
            FlowRule::Tool(_) => None,
        }
    }
}

impl From<ToolFlowRule> for FlowRule {
    fn from(rule: ToolFlowRule) -> Self {
        FlowRule::Tool(rule)
    }
}

impl From<TerminationRule> for FlowRule {
    fn from(rule: TerminationRule) -> Self {
        FlowRule::Termination(rule)
    }
}

impl From<CycleCheck> for FlowRule {
    fn from(rule: CycleCheck) -> Self {
        FlowRule::Termination(TerminationRule::Cycle(rule))
    }
}

impl From<RepeatCheck> for FlowRule {
    fn from(rule: RepeatCheck) -> Self {
        FlowRule::Termination(TerminationRule::Repeat(rule))
    }
}

impl From<GenericCheck> for FlowRule {
    fn from(rule: GenericCheck) -> Self {
        FlowRule::Termination(TerminationRule::Generic(rule))
    }
}

/// A policy that narrows the tools offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFlowRule {
    /// Tools must be used strictly in this order, one at a time.
    FixedOrder { order: Vec<String> },
    /// A tool unlocks once all of its prerequisites have been used.
    FixedPrerequisites {
        prerequisites: BTreeMap<String, Vec<String>>,
    },
}

impl ToolFlowRule {
    pub fn fixed_order<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolFlowRule::FixedOrder {
            order: order.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fixed_prerequisites<I, S, P>(prerequisites: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: IntoIterator<Item = S>,
    {
        ToolFlowRule::FixedPrerequisites {
            prerequisites: prerequisites
                .into_iter()
                .map(|(tool, reqs)| (tool.into(), reqs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    pub fn is_fixed_order(&self) -> bool {
        matches!(self, ToolFlowRule::FixedOrder { .. })
    }
}

/// Declarative form of the data-only rules, for configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    FixedOrder {
        order: Vec<String>,
    },
    FixedPrerequisites {
        #[serde(default)]
        prerequisites: BTreeMap<String, Vec<String>>,
    },
    CycleCheck {
        #[serde(default = "default_n_cycles")]
        n_cycles: usize,
        #[serde(default = "default_span")]
        span: usize,
    },
    RepeatCheck {
        n: usize,
    },
}

fn default_n_cycles() -> usize {
    3
}

fn default_span() -> usize {
    3
}

impl RuleSpec {
    /// Build the rule, validating its parameters.
    pub fn build(&self) -> Result<FlowRule, RuleError> {
        let rule = match self {
            RuleSpec::FixedOrder { order } => ToolFlowRule::FixedOrder {
                order: order.clone(),
            }
            .into(),
            RuleSpec::FixedPrerequisites { prerequisites } => ToolFlowRule::FixedPrerequisites {
                prerequisites: prerequisites.clone(),
            }
            .into(),
            RuleSpec::CycleCheck { n_cycles, span } => CycleCheck::new(*n_cycles, *span)?.into(),
            RuleSpec::RepeatCheck { n } => RepeatCheck::new(*n)?.into(),
        };
        Ok(rule)
    }
}

/// A set of rule declarations loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuleError> {
        let set: RuleSet = toml::from_str(toml_str)?;
        set.validate()?;
        Ok(set)
    }

    /// Validate all rules in the set.
    pub fn validate(&self) -> Result<(), RuleError> {
        for spec in &self.rules {
            spec.build()?;
        }
        Ok(())
    }

    /// Build every rule, in declaration order.
    pub fn build(&self) -> Result<Vec<FlowRule>, RuleError> {
        self.rules.iter().map(RuleSpec::build).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
