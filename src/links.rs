//! Link annotation: append tracking parameters to URLs in outgoing answers.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// A parenthesised group counts as part of the URL only when it is balanced,
/// so `Foo_(bar)` stays whole while `(see https://x.org)` loses the `)`.
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:[^\s<>()\[\]{}"'`]|\([^\s<>()\[\]{}"'`]*\))+"#)
        .expect("hardcoded url regex")
});

/// Punctuation that ends a sentence rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '،', '؟', '*', '_'];

/// Configured tracking parameters, parsed from `key=value&key=value` text.
///
/// Entries without `=` or with an empty key are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingTags {
    pairs: Vec<(String, String)>,
}

impl TrackingTags {
    pub fn parse(raw: &str) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for entry in raw.trim().trim_start_matches('?').split('&') {
            let Some((key, value)) = entry.split_once('=') else {
                if !entry.trim().is_empty() {
                    tracing::warn!(entry, "ignoring tracking tag without '='");
                }
                continue;
            };
            let key = decode(key.trim());
            if key.is_empty() || pairs.iter().any(|(known, _)| *known == key) {
                continue;
            }
            pairs.push((key, decode(value.trim())));
        }
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Append the configured tags to every URL in `text`.
///
/// Keys already present in a URL's query are never overwritten. URLs that do
/// not parse are left as they are, and all other text passes through untouched.
pub fn annotate(text: &str, tags: &TrackingTags) -> String {
    if tags.is_empty() {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    let mut copied_up_to = 0;
    for found in URL_REGEX.find_iter(text) {
        let candidate = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        output.push_str(&text[copied_up_to..found.start()]);
        match annotate_url(candidate, tags) {
            Some(annotated) => output.push_str(&annotated),
            None => output.push_str(candidate),
        }
        copied_up_to = found.start() + candidate.len();
    }
    output.push_str(&text[copied_up_to..]);
    output
}

/// The URL with missing tags appended, or `None` when nothing changes.
fn annotate_url(raw: &str, tags: &TrackingTags) -> Option<String> {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(error) => {
            tracing::debug!(url = raw, %error, "leaving unparseable url untouched");
            return None;
        }
    };

    let existing: HashSet<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    let missing: Vec<&(String, String)> = tags
        .pairs()
        .iter()
        .filter(|(key, _)| !existing.contains(key))
        .collect();
    if missing.is_empty() {
        return None;
    }

    url.query_pairs_mut()
        .extend_pairs(missing.iter().map(|(key, value)| (key.as_str(), value.as_str())));
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &str) -> TrackingTags {
        TrackingTags::parse(raw)
    }

    #[test]
    fn parses_tag_strings() {
        let parsed = tags("utm_source=askaosus&utm_medium=matrix");
        assert_eq!(
            parsed.pairs(),
            &[
                ("utm_source".to_string(), "askaosus".to_string()),
                ("utm_medium".to_string(), "matrix".to_string())
            ]
        );
        assert!(tags("invalid_format_no_equals").is_empty());
        assert!(tags("").is_empty());
        assert_eq!(tags("?a=1&&=x&b=two%20words").pairs().len(), 2);
    }

    #[test]
    fn appends_tags_to_each_url_only() {
        let text = "Try https://discourse.aosus.org/t/install-ubuntu/12 for the steps.";
        assert_eq!(
            annotate(text, &tags("utm_source=askaosus&utm_medium=matrix")),
            "Try https://discourse.aosus.org/t/install-ubuntu/12?utm_source=askaosus&utm_medium=matrix for the steps."
        );
    }

    #[test]
    fn preserves_existing_parameters_and_values() {
        let text = "https://discourse.aosus.org/search?q=test&utm_source=forum";
        let annotated = annotate(text, &tags("utm_source=bot&utm_campaign=help"));
        assert_eq!(
            annotated,
            "https://discourse.aosus.org/search?q=test&utm_source=forum&utm_campaign=help"
        );
    }

    #[test]
    fn annotation_is_idempotent() {
        let tags = tags("utm_source=bot&utm_medium=matrix");
        let text = "أفضل نتيجة:\n\nhttps://discourse.aosus.org/t/a/1 و https://example.org/x?y=1#frag";
        let once = annotate(text, &tags);
        assert_eq!(annotate(&once, &tags), once);
        assert!(once.contains("https://example.org/x?y=1&utm_source=bot&utm_medium=matrix#frag"));
    }

    #[test]
    fn non_url_text_is_byte_identical() {
        let tags = tags("utm_source=bot");
        let text = "no links here, just http:// and text 🙂";
        assert_eq!(annotate(text, &tags), text);
    }

    #[test]
    fn unparseable_urls_are_left_alone() {
        let tags = tags("utm_source=bot");
        let text = "broken http://:80/path and https://example.org:99999/x done";
        assert_eq!(annotate(text, &tags), text);
    }

    #[test]
    fn balanced_parentheses_stay_inside_the_url() {
        let tags = tags("utm_source=bot");
        assert_eq!(
            annotate("See https://en.wikipedia.org/wiki/Foo_(bar).", &tags),
            "See https://en.wikipedia.org/wiki/Foo_(bar)?utm_source=bot."
        );
        assert_eq!(
            annotate("(see https://x.org/a)", &tags),
            "(see https://x.org/a?utm_source=bot)"
        );
        assert_eq!(
            annotate("[guide](https://x.org/guide) done", &tags),
            "[guide](https://x.org/guide?utm_source=bot) done"
        );
    }

    #[test]
    fn no_tags_means_no_change() {
        let text = "https://discourse.aosus.org/t/test-topic/123";
        assert_eq!(annotate(text, &TrackingTags::default()), text);
    }
}
