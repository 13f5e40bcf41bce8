//! Tool gating: which tools the model may call this turn.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::model::{FlowRule, ToolFlowRule};
use crate::RuleError;

/// How the results of several non-FixedOrder tool rules are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Every tool any rule allows, deduplicated in first-seen order.
    #[default]
    Union,
    /// Only tools every rule allows, in `all_tools` order.
    Intersect,
    /// Concatenation of every rule's result, duplicates kept.
    Vcat,
}

impl Combine {
    /// Whether usage tracking keeps repeated tool names.
    pub fn keeps_duplicates(self) -> bool {
        self == Combine::Vcat
    }

    fn apply(self, results: &[Vec<String>], all_tools: &[String]) -> Vec<String> {
        let known: HashSet<&str> = all_tools.iter().map(String::as_str).collect();
        match self {
            Combine::Union => {
                let mut seen = HashSet::new();
                results
                    .iter()
                    .flatten()
                    .filter(|t| known.contains(t.as_str()) && seen.insert(t.as_str()))
                    .cloned()
                    .collect()
            }
            Combine::Intersect => all_tools
                .iter()
                .filter(|t| results.iter().all(|r| r.contains(t)))
                .cloned()
                .collect(),
            Combine::Vcat => results
                .iter()
                .flatten()
                .filter(|t| known.contains(t.as_str()))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for Combine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Combine::Union => "union",
            Combine::Intersect => "intersect",
            Combine::Vcat => "vcat",
        };
        f.write_str(s)
    }
}

impl FromStr for Combine {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(Combine::Union),
            "intersect" => Ok(Combine::Intersect),
            "vcat" => Ok(Combine::Vcat),
            other => Err(RuleError::UnknownCombine(other.to_string())),
        }
    }
}

impl ToolFlowRule {
    /// Tools this rule alone would allow.
    pub fn allowed_tools(&self, used_tools: &[String], all_tools: &[String]) -> Vec<String> {
        match self {
            ToolFlowRule::FixedOrder { order } => fixed_order_allowed(order, used_tools, all_tools),
            ToolFlowRule::FixedPrerequisites { prerequisites } => {
                if prerequisites.is_empty() {
                    return all_tools.to_vec();
                }
                all_tools
                    .iter()
                    .filter(|tool| match prerequisites.get(tool.as_str()) {
                        None => true,
                        Some(reqs) => reqs
                            .iter()
                            .all(|r| all_tools.contains(r) && used_tools.contains(r)),
                    })
                    .cloned()
                    .collect()
            }
        }
    }
}

fn fixed_order_allowed(order: &[String], used_tools: &[String], all_tools: &[String]) -> Vec<String> {
    if order.is_empty() {
        return all_tools.to_vec();
    }
    let valid: Vec<&String> = order.iter().filter(|t| all_tools.contains(t)).collect();
    if valid.is_empty() {
        return Vec::new();
    }
    // Highest declared position used anywhere, not the most recent call.
    let last_used = valid.iter().rposition(|t| used_tools.contains(t));
    match last_used {
        None => vec![valid[0].clone()],
        Some(i) if i + 1 == valid.len() => Vec::new(),
        Some(i) => vec![valid[i + 1].clone()],
    }
}

/// Names of the tools the model may call, given the rules and usage so far.
///
/// - No tool rules: `all_tools` unchanged.
/// - The first FixedOrder rule with a non-empty result wins outright.
/// - Otherwise the remaining tool rules' non-empty results are merged with
///   `combine`; if there are none, no tools are allowed.
pub fn get_allowed_tools(
    rules: &[FlowRule],
    used_tools: &[String],
    all_tools: &[String],
    combine: Combine,
) -> Vec<String> {
    let tool_rules: Vec<&ToolFlowRule> = rules.iter().filter_map(FlowRule::as_tool_rule).collect();
    if tool_rules.is_empty() {
        return all_tools.to_vec();
    }

    for rule in tool_rules.iter().filter(|r| r.is_fixed_order()) {
        let allowed = rule.allowed_tools(used_tools, all_tools);
        if !allowed.is_empty() {
            debug!(?allowed, "FixedOrder rule takes precedence");
            return allowed;
        }
    }

    let results: Vec<Vec<String>> = tool_rules
        .iter()
        .filter(|r| !r.is_fixed_order())
        .map(|r| r.allowed_tools(used_tools, all_tools))
        .filter(|allowed| !allowed.is_empty())
        .collect();
    if results.is_empty() {
        debug!("No tool rule allows any tool");
        return Vec::new();
    }

    let allowed = combine.apply(&results, all_tools);
    debug!(%combine, ?allowed, "Combined tool rule results");
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination::RepeatCheck;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn abc() -> Vec<String> {
        names(&["a", "b", "c"])
    }

    #[test]
    fn passthrough_without_tool_rules() {
        let all = names(&["x", "y"]);
        assert_eq!(get_allowed_tools(&[], &[], &all, Combine::Union), all);

        let only_termination: Vec<FlowRule> = vec![RepeatCheck::new(3).unwrap().into()];
        assert_eq!(
            get_allowed_tools(&only_termination, &names(&["x"]), &all, Combine::Intersect),
            all
        );
    }

    #[test]
    fn fixed_order_sequence() {
        let rule = ToolFlowRule::fixed_order(["a", "b", "c"]);
        assert_eq!(rule.allowed_tools(&[], &abc()), names(&["a"]));
        assert_eq!(rule.allowed_tools(&names(&["a"]), &abc()), names(&["b"]));
        assert_eq!(rule.allowed_tools(&names(&["a", "b"]), &abc()), names(&["c"]));
        assert!(rule.allowed_tools(&abc(), &abc()).is_empty());
    }

    #[test]
    fn fixed_order_edge_cases() {
        let empty = ToolFlowRule::fixed_order(Vec::<String>::new());
        assert_eq!(empty.allowed_tools(&[], &abc()), abc());

        let unknown = ToolFlowRule::fixed_order(["zz"]);
        assert!(unknown.allowed_tools(&[], &abc()).is_empty());

        // "b" is not available, so the valid order is [a, c]
        let skipping = ToolFlowRule::fixed_order(["a", "b", "c"]);
        let all = names(&["a", "c"]);
        assert_eq!(skipping.allowed_tools(&names(&["a"]), &all), names(&["c"]));

        // unrelated usage restarts at the first tool
        assert_eq!(skipping.allowed_tools(&names(&["q"]), &abc()), names(&["a"]));
    }

    #[test]
    fn fixed_order_scans_declared_position() {
        // "c" used long ago outranks "a" used most recently
        let rule = ToolFlowRule::fixed_order(["a", "b", "c", "d"]);
        let all = names(&["a", "b", "c", "d"]);
        assert_eq!(rule.allowed_tools(&names(&["c", "a"]), &all), names(&["d"]));
    }

    #[test]
    fn fixed_prerequisites_unlocks() {
        let rule = ToolFlowRule::fixed_prerequisites([("b", vec!["a"]), ("c", vec!["a", "b"])]);
        assert_eq!(rule.allowed_tools(&[], &abc()), names(&["a"]));
        assert_eq!(rule.allowed_tools(&names(&["a"]), &abc()), names(&["a", "b"]));
        assert_eq!(rule.allowed_tools(&names(&["a", "b"]), &abc()), abc());
    }

    #[test]
    fn fixed_prerequisites_missing_prereq_blocks() {
        let rule = ToolFlowRule::fixed_prerequisites([("c", vec!["ghost"])]);
        assert_eq!(rule.allowed_tools(&names(&["ghost"]), &abc()), names(&["a", "b"]));

        let empty = ToolFlowRule::FixedPrerequisites {
            prerequisites: Default::default(),
        };
        assert_eq!(empty.allowed_tools(&[], &abc()), abc());
    }

    #[test]
    fn fixed_order_takes_precedence() {
        let rules: Vec<FlowRule> = vec![
            ToolFlowRule::fixed_order(["a"]).into(),
            ToolFlowRule::fixed_prerequisites([("a", vec!["c"])]).into(),
        ];
        let intersect = get_allowed_tools(&rules, &[], &abc(), Combine::Intersect);
        let vcat = get_allowed_tools(&rules, &[], &abc(), Combine::Vcat);
        assert_eq!(intersect, names(&["a"]));
        assert_eq!(intersect, vcat);
    }

    #[test]
    fn exhausted_fixed_order_blocks_everything() {
        let rules: Vec<FlowRule> = vec![ToolFlowRule::fixed_order(["a", "b", "c"]).into()];
        assert!(get_allowed_tools(&rules, &abc(), &abc(), Combine::Union).is_empty());
    }

    #[test]
    fn exhausted_fixed_order_falls_back_to_other_rules() {
        let rules: Vec<FlowRule> = vec![
            ToolFlowRule::fixed_order(["a"]).into(),
            ToolFlowRule::fixed_prerequisites([("c", vec!["b"])]).into(),
        ];
        let used = names(&["a"]);
        assert_eq!(
            get_allowed_tools(&rules, &used, &abc(), Combine::Union),
            names(&["a", "b"])
        );
    }

    #[test]
    fn combine_strategies() {
        let rules: Vec<FlowRule> = vec![
            ToolFlowRule::fixed_prerequisites([("c", vec!["b"])]).into(),
            ToolFlowRule::fixed_prerequisites([("a", vec!["b"])]).into(),
        ];
        // first → [a, b], second → [b, c]
        assert_eq!(
            get_allowed_tools(&rules, &[], &abc(), Combine::Union),
            names(&["a", "b", "c"])
        );
        assert_eq!(
            get_allowed_tools(&rules, &[], &abc(), Combine::Intersect),
            names(&["b"])
        );
        assert_eq!(
            get_allowed_tools(&rules, &[], &abc(), Combine::Vcat),
            names(&["a", "b", "b", "c"])
        );
    }

    #[test]
    fn combine_parses_from_str() {
        assert_eq!("VCAT".parse::<Combine>().unwrap(), Combine::Vcat);
        assert_eq!(" union ".parse::<Combine>().unwrap(), Combine::Union);
        assert!(matches!(
            "merge".parse::<Combine>(),
            Err(RuleError::UnknownCombine(_))
        ));
        assert!(Combine::Vcat.keeps_duplicates());
        assert!(!Combine::Intersect.keeps_duplicates());
    }
}
