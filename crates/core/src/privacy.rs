//! Message visibility between agents sharing a session.
//!
//! A private agent's intermediate tool chatter is wrapped so only that agent
//! sees it. Final answers and hand-off context stay public so the next agent
//! and the end user keep continuity.
//!
//! Visibility only affects what is shown to the model. Usage tracking and
//! termination checks read the raw history (see
//! [`get_used_tools`](crate::message::get_used_tools)).

use crate::agent::Agent;
use crate::message::{Message, PrivateMessage};

/// How a message relates to the exchange it was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Produced mid-exchange.
    Intermediate,
    /// The terminal message of the current exchange.
    Terminal,
    /// Produced while control moves to another agent.
    Handoff,
}

/// Whether `agent` may see `message`.
pub fn is_visible(message: &Message, agent: &Agent) -> bool {
    match message {
        Message::Private(p) => p.visible().contains(&agent.name),
        _ => true,
    }
}

/// The subsequence of `history` visible to `agent`, order preserved.
pub fn filter_history(history: &[Message], agent: &Agent) -> Vec<Message> {
    history
        .iter()
        .filter(|m| is_visible(m, agent))
        .cloned()
        .collect()
}

/// Apply `agent`'s privacy policy to a freshly produced message.
pub fn apply_privacy(message: Message, agent: &Agent, exposure: Exposure) -> Message {
    let message = message.into_public();
    if !agent.private {
        return message;
    }
    let stays_public = exposure != Exposure::Intermediate || message.is_final_answer();
    if stays_public {
        return message;
    }
    Message::Private(PrivateMessage::new(message, [agent.name.as_str()], false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{get_used_tools, MessageToolCall};

    fn tool_request() -> Message {
        let call = MessageToolCall::new("c1", "search", &serde_json::json!({"q": "x"}));
        Message::assistant_with_tools("", vec![call])
    }

    #[test]
    fn public_agent_never_wraps() {
        let agent = Agent::new("open", "m");
        let msg = apply_privacy(tool_request(), &agent, Exposure::Intermediate);
        assert!(!msg.is_private());
    }

    #[test]
    fn private_intermediate_is_hidden_from_others() {
        let owner = Agent::new("secretive", "m").private(true);
        let other = Agent::new("other", "m");

        let msg = apply_privacy(tool_request(), &owner, Exposure::Intermediate);
        assert!(msg.is_private());
        assert!(is_visible(&msg, &owner));
        assert!(!is_visible(&msg, &other));
    }

    #[test]
    fn private_terminal_is_public() {
        let owner = Agent::new("secretive", "m").private(true);
        let other = Agent::new("other", "m");

        let msg = apply_privacy(tool_request(), &owner, Exposure::Terminal);
        assert!(is_visible(&msg, &other));
    }

    #[test]
    fn private_final_answer_is_public() {
        let owner = Agent::new("secretive", "m").private(true);
        let other = Agent::new("other", "m");

        let msg = apply_privacy(Message::assistant("done"), &owner, Exposure::Intermediate);
        assert!(is_visible(&msg, &other));
    }

    #[test]
    fn private_handoff_is_public() {
        let owner = Agent::new("secretive", "m").private(true);
        let result = Message::tool_result("transfer", serde_json::json!({}), "{}", "c1");
        let msg = apply_privacy(result, &owner, Exposure::Handoff);
        assert!(!msg.is_private());
    }

    #[test]
    fn filter_preserves_order() {
        let owner = Agent::new("secretive", "m").private(true);
        let other = Agent::new("other", "m");
        let history = vec![
            Message::user("q"),
            apply_privacy(tool_request(), &owner, Exposure::Intermediate),
            Message::assistant("a"),
        ];

        let seen = filter_history(&history, &other);
        assert_eq!(seen, vec![Message::user("q"), Message::assistant("a")]);
        assert_eq!(filter_history(&history, &owner).len(), 3);
    }

    #[test]
    fn used_tools_same_for_any_viewer() {
        let owner = Agent::new("secretive", "m").private(true);
        let history = vec![
            Message::user("q"),
            apply_privacy(
                Message::tool_result("search", serde_json::json!({}), "r", "c1"),
                &owner,
                Exposure::Intermediate,
            ),
        ];
        assert!(history[1].is_private());
        assert_eq!(get_used_tools(&history, false), vec!["search"]);
    }
}
