//! Supported OpenAI-compatible providers.

use serde::{Deserialize, Serialize};

/// Attribution headers OpenRouter shows on its dashboards.
pub const OPENROUTER_REFERER: &str = "https://github.com/aosus/askaosus";
pub const OPENROUTER_TITLE: &str = "Askaosus Matrix Bot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Gemini,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    /// Headers sent with every completion request besides authorization.
    pub fn extra_headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Provider::OpenRouter => &[
                ("HTTP-Referer", OPENROUTER_REFERER),
                ("X-Title", OPENROUTER_TITLE),
            ],
            Provider::OpenAi | Provider::Gemini => &[],
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "openrouter" => Ok(Provider::OpenRouter),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!(
                "unsupported LLM provider '{other}', expected one of: openai, openrouter, gemini"
            )),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::OpenRouter => write!(f, "openrouter"),
            Provider::Gemini => write!(f, "gemini"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Provider;

    #[test]
    fn parses_known_providers() {
        assert_eq!("OpenRouter".parse::<Provider>(), Ok(Provider::OpenRouter));
        assert_eq!("gemini".parse::<Provider>(), Ok(Provider::Gemini));
        assert!("anthropic".parse::<Provider>().is_err());
    }

    #[test]
    fn only_openrouter_sends_attribution_headers() {
        assert_eq!(Provider::OpenRouter.extra_headers().len(), 2);
        assert!(Provider::OpenAi.extra_headers().is_empty());
    }
}
