//! Query expansion for forum search.
//!
//! The forum is mostly Arabic but many topics use English product names, so
//! a question is searched several ways: as asked, as bare keywords, through
//! English equivalents of known Arabic terms, and by its longest terms.

use regex::Regex;
use std::sync::LazyLock;

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("hardcoded word regex"));

static LATIN_WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]+\b").expect("hardcoded latin word regex"));

const MAX_KEYWORDS: usize = 5;
const MAX_IMPORTANT_TERMS: usize = 3;
/// Individual-term searches per query.
pub const INDIVIDUAL_TERM_SEARCHES: usize = 2;

const STOP_WORDS: &[&str] = &[
    "في", "من", "إلى", "على", "مع", "عن", "كيف", "ماذا", "متى", "أين", "لماذا", "هل", "ما",
    "هو", "هي", "هذا", "هذه", "التي", "الذي", "والتي", "أن", "إن", "كان", "كانت", "يكون",
    "تكون", "لكي", "حتى", "لا", "لم", "لن",
];

/// Arabic term and the English words it is searched as.
const TERM_MAPPINGS: &[(&str, &[&str])] = &[
    ("أوبونتو", &["ubuntu"]),
    ("لينكس", &["linux"]),
    ("وندوز", &["windows"]),
    ("فيدورا", &["fedora"]),
    ("دبيان", &["debian"]),
    ("أرش", &["arch"]),
    ("منت", &["mint"]),
    ("سنتوس", &["centos"]),
    ("ريد هات", &["redhat", "rhel"]),
    ("أوبن سوزي", &["opensuse", "suse"]),
    ("جنوم", &["gnome"]),
    ("كي دي إي", &["kde", "plasma"]),
    ("فايرفوكس", &["firefox"]),
    ("كروم", &["chrome", "chromium"]),
    ("ليبر أوفيس", &["libreoffice"]),
    ("جيمب", &["gimp"]),
    ("بلندر", &["blender"]),
    ("فيسوال ستوديو كود", &["vscode", "visual studio code"]),
    ("فيم", &["vim", "neovim"]),
    ("جيت", &["git", "github", "gitlab"]),
    ("دوكر", &["docker"]),
    ("بايثون", &["python"]),
    ("جافا سكريبت", &["javascript", "nodejs"]),
    ("رست", &["rust"]),
    ("تثبيت", &["install", "installation", "setup"]),
    ("إزالة", &["remove", "uninstall"]),
    ("تحديث", &["update", "upgrade"]),
    ("مشكلة", &["problem", "issue", "error"]),
    ("خطأ", &["error", "crash"]),
    ("حل", &["solution", "fix"]),
    ("إعداد", &["configuration", "settings"]),
    ("شرح", &["tutorial", "guide"]),
    ("شبكة", &["network", "wifi"]),
    ("خادم", &["server"]),
    ("نسخ احتياطي", &["backup", "restore"]),
];

/// Queries to run for `query`, in order, without duplicates.
pub fn search_plan(query: &str) -> Vec<String> {
    let query = query.trim();
    let mut plan = vec![query.to_string()];

    let keywords = extract_keywords(query);
    if !keywords.is_empty() {
        plan.push(keywords.join(" "));
    }

    let english = english_equivalents(query);
    if !english.is_empty() {
        plan.push(english.join(" "));
    }

    plan.extend(
        important_terms(query)
            .into_iter()
            .take(INDIVIDUAL_TERM_SEARCHES),
    );

    let mut unique = Vec::with_capacity(plan.len());
    for candidate in plan {
        if !candidate.is_empty() && !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// Words longer than two characters that are not stop words, first five.
pub fn extract_keywords(query: &str) -> Vec<String> {
    WORD_REGEX
        .find_iter(query)
        .map(|word| word.as_str())
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(word))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// English search words for every known Arabic term the query contains.
pub fn english_equivalents(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for (arabic, english) in TERM_MAPPINGS {
        if lowered.contains(arabic) {
            for term in *english {
                if !terms.iter().any(|known| known == term) {
                    terms.push(term.to_string());
                }
            }
        }
    }
    terms
}

/// Latin words, long words and known terms, longest first.
pub fn important_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let candidates = LATIN_WORD_REGEX
        .find_iter(query)
        .map(|word| word.as_str())
        .chain(
            WORD_REGEX
                .find_iter(query)
                .map(|word| word.as_str())
                .filter(|word| word.chars().count() >= 4),
        )
        .chain(
            TERM_MAPPINGS
                .iter()
                .map(|(arabic, _)| *arabic)
                .filter(|arabic| lowered.contains(arabic)),
        );

    let mut terms: Vec<String> = Vec::new();
    for candidate in candidates {
        if !terms.iter().any(|known| known == candidate) {
            terms.push(candidate.to_string());
        }
    }
    terms.sort_by_key(|term| std::cmp::Reverse(term.chars().count()));
    terms.truncate(MAX_IMPORTANT_TERMS);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stop_words_and_short_words() {
        assert_eq!(
            extract_keywords("كيف يمكن تثبيت أوبونتو على الحاسوب"),
            vec!["يمكن", "تثبيت", "أوبونتو", "الحاسوب"]
        );
        assert_eq!(extract_keywords("is it ok"), Vec::<String>::new());
    }

    #[test]
    fn arabic_terms_map_to_english() {
        assert_eq!(
            english_equivalents("مشكلة في تثبيت أوبونتو"),
            vec!["ubuntu", "install", "installation", "setup", "problem", "issue", "error"]
        );
        assert!(english_equivalents("nothing known here").is_empty());
    }

    #[test]
    fn important_terms_prefer_longer_words() {
        assert_eq!(
            important_terms("do you know ubuntu install steps"),
            vec!["install", "ubuntu", "steps"]
        );
    }

    #[test]
    fn plan_starts_with_the_question_and_has_no_duplicates() {
        let plan = search_plan("ubuntu");
        assert_eq!(plan, vec!["ubuntu"]);

        let plan = search_plan("how to install ubuntu");
        assert_eq!(plan[0], "how to install ubuntu");
        assert_eq!(plan[1], "how install ubuntu");
        assert!(plan.contains(&"install".to_string()));
        let mut deduped = plan.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), plan.len());
    }
}
