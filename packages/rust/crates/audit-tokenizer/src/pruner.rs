use crate::count_tokens;
use serde::{Deserialize, Serialize};

/// A single message in a chat-style conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

fn joined_serialization(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop the earliest non-system message, repeatedly, until the joined
/// `"role: content\n..."` serialization of `messages` fits within `limit`
/// tokens, or only one message remains.
///
/// This is a caller-side utility for trimming prompts before they are sent
/// upstream; the admission engine itself never calls it.
#[must_use]
pub fn shorten(messages: &[Message], limit: usize) -> Vec<Message> {
    let mut shortened: Vec<Message> = messages.to_vec();
    if count_tokens(&joined_serialization(&shortened)) <= limit {
        return shortened;
    }

    while shortened.len() > 1 {
        let Some(remove_at) = shortened.iter().position(|m| m.role != "system") else {
            break;
        };
        shortened.remove(remove_at);

        if count_tokens(&joined_serialization(&shortened)) <= limit {
            break;
        }
    }

    shortened
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn leaves_short_history_untouched() {
        let messages = vec![msg("system", "be nice"), msg("user", "hi")];
        let result = shorten(&messages, 1000);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn drops_earliest_non_system_first() {
        let long = "word ".repeat(200);
        let messages = vec![
            msg("system", "be nice"),
            msg("user", &long),
            msg("assistant", &long),
            msg("user", "final question"),
        ];
        let result = shorten(&messages, 50);
        assert_eq!(result[0].role, "system");
        assert!(result.len() < messages.len());
        assert!(result.iter().any(|m| m.content == "final question"));
    }

    #[test]
    fn never_drops_below_one_message() {
        let long = "word ".repeat(5000);
        let messages = vec![msg("user", &long)];
        let result = shorten(&messages, 1);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn preserves_all_system_messages() {
        let long = "word ".repeat(2000);
        let messages = vec![
            msg("system", "rule one"),
            msg("system", "rule two"),
            msg("user", &long),
        ];
        let result = shorten(&messages, 1);
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|m| m.role == "system"));
    }
}
