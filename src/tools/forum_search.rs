//! Forum search tool.

use crate::ForumHit;
use crate::llm::model::ToolSpec;
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "search_forum";

/// Arguments for the forum search tool.
#[derive(Debug, Deserialize)]
pub struct SearchForumArgs {
    /// Keywords to search for, in the question's language or in English.
    pub query: String,
}

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Search the Discourse forum for topics related to the user's query, \
                      search using keywords in the query language or in english.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to execute."
                }
            },
            "required": ["query"]
        }),
    }
}

/// Render hits as the tool result the model reads.
pub fn render_hits(hits: &[ForumHit], no_results: &str) -> String {
    if hits.is_empty() {
        return no_results.to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(index, hit)| {
            format!(
                "Result {}:\nTitle: {}\nURL: {}\nContent: {}",
                index + 1,
                hit.title,
                hit.url,
                hit.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_numbered_blocks() {
        let hits = vec![
            ForumHit {
                topic_id: 1,
                title: "Installing Ubuntu".into(),
                url: "https://discourse.aosus.org/t/installing-ubuntu/1".into(),
                excerpt: "Step one".into(),
            },
            ForumHit {
                topic_id: 2,
                title: "Dual boot".into(),
                url: "https://discourse.aosus.org/t/dual-boot/2".into(),
                excerpt: "Partitioning".into(),
            },
        ];

        let rendered = render_hits(&hits, "none");
        assert!(rendered.starts_with("Result 1:\nTitle: Installing Ubuntu\n"));
        assert!(rendered.contains("\n\nResult 2:\nTitle: Dual boot\nURL: https://discourse.aosus.org/t/dual-boot/2\nContent: Partitioning"));
    }

    #[test]
    fn empty_hits_use_the_no_results_text() {
        assert_eq!(render_hits(&[], "No relevant topics found."), "No relevant topics found.");
    }
}
