use bloom_common::{Interaction, UserProfile};
use serde::{Deserialize, Serialize};

pub const NO_PROFILE: &str = "No user profile available";
pub const NO_HISTORY: &str = "No previous interaction history";
pub const NO_CONVERSATION: &str = "No previous conversation history";

const MAX_EXCHANGE_CHARS: usize = 200;

/// Prompt-ready user context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub profile_text: String,
    pub history_text: String,
    pub conversation_text: String,
    /// True when any of the three sections came from real user data.
    pub used_user_context: bool,
}

impl AgentContext {
    pub fn empty() -> Self {
        Self {
            profile_text: NO_PROFILE.to_string(),
            history_text: NO_HISTORY.to_string(),
            conversation_text: NO_CONVERSATION.to_string(),
            used_user_context: false,
        }
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// Turns stored profile and history into prompt sections.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub max_logs: usize,
    pub max_exchanges: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            max_logs: 5,
            max_exchanges: 3,
        }
    }
}

impl ContextBuilder {
    pub fn new(max_logs: usize, max_exchanges: usize) -> Self {
        Self {
            max_logs,
            max_exchanges,
        }
    }

    /// How many interactions `build` can use.
    pub fn history_window(&self) -> usize {
        self.max_logs.max(self.max_exchanges)
    }

    /// `history` must be oldest first.
    pub fn build(&self, profile: Option<&UserProfile>, history: &[Interaction]) -> AgentContext {
        let profile_text = profile
            .filter(|p| !p.is_empty())
            .map(UserProfile::to_prompt_text)
            .filter(|t| !t.is_empty());

        let history_text = self.format_logs(history);
        let conversation_text = self.format_conversation(history);

        let used_user_context =
            profile_text.is_some() || history_text.is_some() || conversation_text.is_some();

        AgentContext {
            profile_text: profile_text.unwrap_or_else(|| NO_PROFILE.to_string()),
            history_text: history_text.unwrap_or_else(|| NO_HISTORY.to_string()),
            conversation_text: conversation_text.unwrap_or_else(|| NO_CONVERSATION.to_string()),
            used_user_context,
        }
    }

    fn format_logs(&self, history: &[Interaction]) -> Option<String> {
        let recent = tail(history, self.max_logs);
        if recent.is_empty() {
            return None;
        }

        let entries: Vec<String> = recent
            .iter()
            .map(|i| {
                format!(
                    "\"{}\" ({})",
                    truncate_chars(i.query.trim(), MAX_EXCHANGE_CHARS),
                    i.timestamp.format("%Y-%m-%d")
                )
            })
            .collect();
        Some(entries.join("; "))
    }

    fn format_conversation(&self, history: &[Interaction]) -> Option<String> {
        let recent = tail(history, self.max_exchanges);
        if recent.is_empty() {
            return None;
        }

        let exchanges: Vec<String> = recent
            .iter()
            .map(|i| {
                format!(
                    "User: {} / Bloom: {}",
                    truncate_chars(i.query.trim(), MAX_EXCHANGE_CHARS),
                    truncate_chars(i.response.trim(), MAX_EXCHANGE_CHARS)
                )
            })
            .collect();
        Some(exchanges.join("\n"))
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    let mut s: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloom_common::QueryCategory;

    fn interaction(query: &str, response: &str) -> Interaction {
        Interaction::new("u1", query, response, QueryCategory::Consultation)
    }

    #[test]
    fn test_empty_context_uses_placeholders() {
        let context = ContextBuilder::default().build(None, &[]);
        assert_eq!(context, AgentContext::empty());
        assert!(!context.used_user_context);
    }

    #[test]
    fn test_empty_profile_counts_as_missing() {
        let profile = UserProfile::default();
        let context = ContextBuilder::default().build(Some(&profile), &[]);
        assert_eq!(context.profile_text, NO_PROFILE);
        assert!(!context.used_user_context);
    }

    #[test]
    fn test_profile_and_history_rendered() {
        let profile = UserProfile {
            age: Some(52),
            ..Default::default()
        };
        let history = vec![
            interaction("first", "a1"),
            interaction("second", "a2"),
            interaction("third", "a3"),
        ];

        let context = ContextBuilder::new(2, 1).build(Some(&profile), &history);
        assert!(context.used_user_context);
        assert_eq!(context.profile_text, "age: 52");
        assert!(context.history_text.starts_with("\"second\" ("));
        assert!(context.history_text.contains("\"third\""));
        assert!(!context.history_text.contains("first"));
        assert_eq!(context.conversation_text, "User: third / Bloom: a3");
    }

    #[test]
    fn test_long_exchanges_are_truncated() {
        let long = "x".repeat(250);
        let context = ContextBuilder::default().build(None, &[interaction("q", &long)]);
        let expected = format!("User: q / Bloom: {}…", "x".repeat(200));
        assert_eq!(context.conversation_text, expected);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé…");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }

    #[test]
    fn test_history_window() {
        assert_eq!(ContextBuilder::new(5, 3).history_window(), 5);
        assert_eq!(ContextBuilder::new(1, 4).history_window(), 4);
    }
}
