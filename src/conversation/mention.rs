//! Trigger-token detection.

use crate::Event;
use regex::Regex;

/// Detects whether a message is directed at the agent.
///
/// Tokens match case-insensitively and only on word boundaries, so a token
/// never matches inside a longer word (`askaosus` does not match
/// `notaskaosus123`). Explicit protocol mentions of the agent's own id count
/// as a trigger too.
#[derive(Debug, Clone)]
pub struct MentionMatcher {
    agent_id: String,
    patterns: Vec<Regex>,
}

impl MentionMatcher {
    pub fn new(agent_id: impl Into<String>, tokens: &[String]) -> Self {
        let patterns = tokens
            .iter()
            .map(|token| token.trim())
            .filter(|token| !token.is_empty())
            .filter_map(|token| {
                let pattern = format!(r"(?i)(^|\W){}(\W|$)", regex::escape(token));
                match Regex::new(&pattern) {
                    Ok(regex) => Some(regex),
                    Err(error) => {
                        tracing::warn!(token, %error, "ignoring unusable trigger token");
                        None
                    }
                }
            })
            .collect();

        Self {
            agent_id: agent_id.into(),
            patterns,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether the raw text contains any trigger token.
    pub fn matches_text(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(text))
    }

    /// Whether the event mentions the agent, by text or by mention metadata.
    pub fn is_triggered(&self, event: &Event) -> bool {
        if event
            .mentioned_user_ids
            .iter()
            .any(|user_id| user_id == &self.agent_id)
        {
            return true;
        }
        event.body().is_some_and(|body| self.matches_text(body))
    }

    /// The text with every trigger token removed and whitespace collapsed.
    pub fn strip(&self, text: &str) -> String {
        let mut stripped = text.to_string();
        for pattern in &self.patterns {
            // Adjacent tokens share a separator, so one pass can leave a match behind.
            loop {
                let next = pattern.replace_all(&stripped, "${1}${2}").into_owned();
                if next == stripped {
                    break;
                }
                stripped = next;
            }
        }

        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
            .trim_start_matches([':', ',', '،'])
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::text_event;

    fn matcher() -> MentionMatcher {
        MentionMatcher::new(
            "@askaosus:matrix.org",
            &["@askaosus:matrix.org".into(), "askaosus".into()],
        )
    }

    #[test]
    fn matches_tokens_case_insensitively() {
        let matcher = matcher();
        assert!(matcher.matches_text("askaosus how do I install ubuntu?"));
        assert!(matcher.matches_text("Hey AskAosus, what's up"));
        assert!(matcher.matches_text("@askaosus:matrix.org help"));
        assert!(matcher.matches_text("سؤال askaosus"));
    }

    #[test]
    fn does_not_match_inside_longer_words() {
        let matcher = MentionMatcher::new("@agentname:x.org", &["agentname".into()]);
        assert!(!matcher.matches_text("otheragentname123 said hi"));
        assert!(!matcher.matches_text("agentnames are fun"));
        assert!(!matcher.matches_text("no mention here"));
        assert!(matcher.matches_text("(agentname)"));
    }

    #[test]
    fn mention_metadata_counts_as_trigger() {
        let matcher = matcher();
        let mut event = text_event("$1", "@user:matrix.org", "how do I install ubuntu?");
        assert!(!matcher.is_triggered(&event));

        event.mentioned_user_ids = vec!["@askaosus:matrix.org".into()];
        assert!(matcher.is_triggered(&event));
    }

    #[test]
    fn strips_every_occurrence() {
        let matcher = matcher();
        assert_eq!(
            matcher.strip("askaosus askaosus: how to install ubuntu"),
            "how to install ubuntu"
        );
        assert_eq!(
            matcher.strip("@askaosus:matrix.org, what is linux?"),
            "what is linux?"
        );
        assert_eq!(matcher.strip("AskAosus"), "");
    }

    #[test]
    fn empty_tokens_are_ignored() {
        let matcher = MentionMatcher::new("@bot:x.org", &["  ".into()]);
        assert!(!matcher.matches_text("anything"));
    }
}
