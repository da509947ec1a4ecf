//! System instructions for the search-orchestration model.

use minijinja::{Environment, context};
use std::path::Path;

const DEFAULT_TEMPLATE: &str = r#"# System Instructions for the Askaosus Assistant

You are an AI assistant for the Askaosus community, the largest Arabic community for free and open-source software. Your role is to help users find relevant information on the community's Discourse forum at {{ forum_url }}.

## Available Tools

### search_forum
Search the forum for topics related to the user's question.
- **query** (string): the search query. Use keywords in the question's language or in English.
- Returns up to {{ max_results }} topics with title, URL and the first part of their content.

### send_link
Send the user a link once you have found a relevant topic.
- **url** (string): URL of the most relevant topic, exactly as returned by search_forum
- **message** (string): a brief message introducing the link

### no_result_message
Tell the user that nothing relevant was found.

## Search Process

1. Start by searching with the user's own words.
2. Read the returned topics and decide whether one of them answers the question.
3. If not, refine the query. You have at most {{ max_iterations }} searches in total.
4. Finish by calling `send_link` with the best topic or `no_result_message` when nothing fits.

## Response Guidelines

- Always respond in {{ language_name }}.
- Keep responses brief and to the point.
- Only link topics that were returned by a search. Never invent URLs.
- When the conversation includes earlier messages, answer the latest one using the rest as context.
"#;

/// Values substituted into the system prompt template.
#[derive(Debug, Clone)]
pub struct PromptVars<'a> {
    pub forum_url: &'a str,
    pub language: &'a str,
    pub max_iterations: usize,
    pub max_results: usize,
}

/// The system prompt template, either built in or loaded from disk.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    template: String,
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl SystemPrompt {
    /// Load an override file, or use the built-in instructions when none is configured.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(template) if !template.trim().is_empty() => {
                tracing::info!(path = %path.display(), "system prompt loaded");
                Self { template }
            }
            Ok(_) => {
                tracing::warn!(path = %path.display(), "system prompt file is empty, using default");
                Self::default()
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "system prompt not readable, using default");
                Self::default()
            }
        }
    }

    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the prompt. A template that fails to render is used verbatim.
    pub fn render(&self, vars: &PromptVars<'_>) -> String {
        match self.try_render(vars) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::warn!(%error, "system prompt failed to render, using raw text");
                self.template.clone()
            }
        }
    }

    fn try_render(&self, vars: &PromptVars<'_>) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("system", &self.template)?;
        env.get_template("system")?.render(context! {
            forum_url => vars.forum_url,
            language => vars.language,
            language_name => language_name(vars.language),
            max_iterations => vars.max_iterations,
            max_results => vars.max_results,
        })
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "ar" => "Arabic",
        "en" => "English",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> PromptVars<'static> {
        PromptVars {
            forum_url: "https://discourse.aosus.org",
            language: "ar",
            max_iterations: 3,
            max_results: 5,
        }
    }

    #[test]
    fn default_prompt_fills_every_variable() {
        let rendered = SystemPrompt::default().render(&vars());
        assert!(rendered.contains("https://discourse.aosus.org"));
        assert!(rendered.contains("at most 3 searches"));
        assert!(rendered.contains("up to 5 topics"));
        assert!(rendered.contains("respond in Arabic"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn broken_template_is_used_verbatim() {
        let prompt = SystemPrompt::from_template("Answer about {{ forum_url ");
        assert_eq!(prompt.render(&vars()), "Answer about {{ forum_url ");
    }

    #[test]
    fn override_file_replaces_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_prompt.md");
        std::fs::write(&path, "Only talk about {{ forum_url }}.").unwrap();

        let prompt = SystemPrompt::load(Some(&path));
        assert_eq!(
            prompt.render(&vars()),
            "Only talk about https://discourse.aosus.org."
        );

        let missing = SystemPrompt::load(Some(&dir.path().join("absent.md")));
        assert!(missing.render(&vars()).contains("search_forum"));
    }
}
