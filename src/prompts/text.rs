//! User-facing response strings.
//!
//! The catalog is a `{category: {key: {language: text}}}` mapping. Built-in
//! defaults exist for every key, and an optional JSON file overlays them key
//! by key, so a missing or malformed file never blocks a reply.

use std::collections::HashMap;
use std::path::Path;

/// Returned when neither the requested language nor a fallback language has text.
pub const GENERIC_FALLBACK: &str = "عذراً، حدث خطأ غير متوقع";

pub const ERROR_MESSAGES: &str = "error_messages";
pub const DISCOURSE_MESSAGES: &str = "discourse_messages";
pub const SYSTEM_MESSAGES: &str = "system_messages";

const FALLBACK_LANGUAGES: [&str; 2] = ["ar", "en"];

/// (category, key, arabic, english)
const BUILTIN: &[(&str, &str, &str, &str)] = &[
    (
        ERROR_MESSAGES,
        "no_results_found",
        "عذراً، لم أتمكن من العثور على موضوعات ذات صلة بسؤالك. يرجى المحاولة بصيغة مختلفة أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, I couldn't find any relevant topics for your question. Please try rephrasing your query or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        ERROR_MESSAGES,
        "processing_error",
        "عذراً، حدث خطأ أثناء معالجة سؤالك. يرجى المحاولة مرة أخرى أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, an error occurred while processing your question. Please try again later or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        ERROR_MESSAGES,
        "search_error",
        "عذراً، حدث خطأ أثناء البحث. يرجى المحاولة مرة أخرى أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, an error occurred while searching for an answer. Please try again later or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        ERROR_MESSAGES,
        "search_rate_limited",
        "عذراً، المنتدى يتلقى طلبات كثيرة حالياً. يرجى المحاولة بعد قليل أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, the forum is receiving too many requests right now. Please try again in a moment or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        ERROR_MESSAGES,
        "iterations_exhausted",
        "عذراً، لم أصل إلى إجابة قاطعة بعد عدة محاولات بحث. يرجى إعادة صياغة سؤالك أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, I couldn't reach a definitive answer after several searches. Please rephrase your question or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        ERROR_MESSAGES,
        "fallback_error",
        "عذراً، لم أتمكن من معالجة سؤالك. يرجى المحاولة مرة أخرى أو زيارة المنتدى مباشرة: https://discourse.aosus.org",
        "Sorry, I couldn't process your question. Please try again or visit the forum directly: https://discourse.aosus.org",
    ),
    (
        DISCOURSE_MESSAGES,
        "no_results",
        "لم يتم العثور على موضوعات ذات صلة.",
        "No relevant topics found.",
    ),
    (
        DISCOURSE_MESSAGES,
        "untitled_topic",
        "موضوع بدون عنوان",
        "Untitled topic",
    ),
    (
        DISCOURSE_MESSAGES,
        "default_excerpt",
        "موضوع في مجتمع أسس",
        "Topic in Aosus community",
    ),
    (
        SYSTEM_MESSAGES,
        "perfect_match",
        "وجدت تطابقاً مثالياً لسؤالك:",
        "I found a perfect match for your question:",
    ),
    (
        SYSTEM_MESSAGES,
        "closest_match",
        "إليك أقرب موضوع ذي صلة وجدته:",
        "Here's the closest relevant topic I found:",
    ),
];

type Variants = HashMap<String, String>;
type Category = HashMap<String, Variants>;

/// Language-aware lookup table for every string the agent says on its own.
#[derive(Debug, Clone)]
pub struct ResponseCatalog {
    categories: HashMap<String, Category>,
}

impl Default for ResponseCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ResponseCatalog {
    /// Catalog holding only the built-in defaults.
    pub fn builtin() -> Self {
        let mut categories: HashMap<String, Category> = HashMap::new();
        for (category, key, arabic, english) in BUILTIN {
            let variants = Variants::from([
                ("ar".to_string(), arabic.to_string()),
                ("en".to_string(), english.to_string()),
            ]);
            categories
                .entry(category.to_string())
                .or_default()
                .insert(key.to_string(), variants);
        }
        Self { categories }
    }

    /// Load the catalog, overlaying the JSON file at `path` on the defaults.
    ///
    /// Read and parse failures are logged and leave the defaults in place.
    pub fn load(path: Option<&Path>) -> Self {
        let mut catalog = Self::builtin();
        let Some(path) = path else {
            return catalog;
        };

        match std::fs::read_to_string(path) {
            Ok(text) => match catalog.overlay_json(&text) {
                Ok(count) => {
                    tracing::info!(path = %path.display(), entries = count, "response catalog loaded");
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "malformed response catalog, using defaults");
                }
            },
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "response catalog not readable, using defaults");
            }
        }
        catalog
    }

    /// Merge a JSON mapping over the current entries, returning how many keys it supplied.
    ///
    /// The whole document is parsed before anything is merged.
    pub fn overlay_json(&mut self, text: &str) -> Result<usize, serde_json::Error> {
        let parsed: HashMap<String, Category> = serde_json::from_str(text)?;
        let mut count = 0;
        for (category, entries) in parsed {
            let target = self.categories.entry(category).or_default();
            for (key, variants) in entries {
                target.entry(key).or_default().extend(variants);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Text for `category.key` in `language`, falling back to Arabic, then English.
    pub fn get(&self, category: &str, key: &str, language: &str) -> &str {
        let Some(variants) = self
            .categories
            .get(category)
            .and_then(|entries| entries.get(key))
        else {
            tracing::warn!(category, key, "no response text configured");
            return GENERIC_FALLBACK;
        };

        std::iter::once(language)
            .chain(FALLBACK_LANGUAGES)
            .find_map(|candidate| variants.get(candidate))
            .map(String::as_str)
            .unwrap_or(GENERIC_FALLBACK)
    }

    pub fn error(&self, key: &str, language: &str) -> &str {
        self.get(ERROR_MESSAGES, key, language)
    }

    pub fn discourse(&self, key: &str, language: &str) -> &str {
        self.get(DISCOURSE_MESSAGES, key, language)
    }
}
