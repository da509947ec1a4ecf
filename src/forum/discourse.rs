//! Discourse `search.json` client.

use crate::ForumHit;
use crate::config::DiscourseConfig;
use crate::error::SearchError;
use crate::forum::ForumSearch;
use crate::forum::keywords;
use crate::prompts::ResponseCatalog;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

const USER_AGENT: &str = "Askaosus Matrix Bot/1.0";
/// Characters of topic text handed to the model per hit.
pub const EXCERPT_CHARS: usize = 1000;
const MAX_RESULTS_PER_REQUEST: usize = 10;
/// A whole multi-strategy search takes at most this many request timeouts.
pub const SEARCH_BUDGET_FACTOR: u32 = 2;

static HTML_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("hardcoded html tag regex"));

/// Fallback text for topics missing a title or any excerpt.
#[derive(Debug, Clone)]
pub struct TopicLabels {
    pub untitled_topic: String,
    pub default_excerpt: String,
}

impl TopicLabels {
    pub fn from_catalog(catalog: &ResponseCatalog, language: &str) -> Self {
        Self {
            untitled_topic: catalog.discourse("untitled_topic", language).to_string(),
            default_excerpt: catalog.discourse("default_excerpt", language).to_string(),
        }
    }
}

/// Searches a Discourse forum with several query strategies.
#[derive(Debug, Clone)]
pub struct DiscourseClient {
    http: reqwest::Client,
    base_url: String,
    labels: TopicLabels,
    search_budget: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    topics: Vec<TopicData>,
    #[serde(default)]
    posts: Vec<PostData>,
}

#[derive(Debug, Deserialize)]
struct TopicData {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    fancy_title: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    topic_id: u64,
    #[serde(default)]
    blurb: Option<String>,
}

impl DiscourseClient {
    pub fn new(
        config: &DiscourseConfig,
        labels: TopicLabels,
        request_timeout: Duration,
    ) -> Result<Self, SearchError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let (Some(key), Some(username)) = (&config.api_key, &config.api_username) {
            headers.insert(
                "api-key",
                key.parse()
                    .map_err(|_| SearchError::Unreachable("invalid Discourse API key".into()))?,
            );
            headers.insert(
                "api-username",
                username
                    .parse()
                    .map_err(|_| SearchError::Unreachable("invalid Discourse username".into()))?,
            );
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|error| SearchError::Unreachable(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            labels,
            search_budget: request_timeout * SEARCH_BUDGET_FACTOR,
        })
    }

    /// One `search.json` request.
    async fn perform_search(&self, query: &str, limit: usize) -> Result<Vec<ForumHit>, SearchError> {
        let per_request = (limit * 2).clamp(1, MAX_RESULTS_PER_REQUEST).to_string();
        let response = self
            .http
            .get(format!("{}/search.json", self.base_url))
            .query(&[("q", query), ("order", "relevance"), ("limit", per_request.as_str())])
            .send()
            .await
            .map_err(|error| SearchError::Unreachable(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            return Err(SearchError::Unreachable(format!("search returned {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|error| SearchError::Unreachable(format!("malformed search response: {error}")))?;
        Ok(self.parse_results(body))
    }

    /// Topics only, in relevance order. Posts only contribute excerpts.
    fn parse_results(&self, body: SearchResponse) -> Vec<ForumHit> {
        body.topics
            .into_iter()
            .map(|topic| {
                let title = topic
                    .title
                    .or(topic.fancy_title)
                    .map(|title| title.trim().to_string())
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| self.labels.untitled_topic.clone());

                let excerpt = topic
                    .excerpt
                    .as_deref()
                    .map(clean_excerpt)
                    .filter(|excerpt| !excerpt.is_empty())
                    .or_else(|| {
                        body.posts
                            .iter()
                            .filter(|post| post.topic_id == topic.id)
                            .find_map(|post| post.blurb.as_deref().map(clean_excerpt))
                            .filter(|excerpt| !excerpt.is_empty())
                    })
                    .unwrap_or_else(|| self.labels.default_excerpt.clone());

                let url = match topic.slug.as_deref().filter(|slug| !slug.is_empty()) {
                    Some(slug) => format!("{}/t/{slug}/{}", self.base_url, topic.id),
                    None => format!("{}/t/{}", self.base_url, topic.id),
                };

                ForumHit {
                    topic_id: topic.id,
                    title,
                    url,
                    excerpt,
                }
            })
            .collect()
    }
}

impl ForumSearch for DiscourseClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ForumHit>, SearchError> {
        let plan = keywords::search_plan(query);
        let deadline = tokio::time::Instant::now() + self.search_budget;
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for (strategy, planned) in plan.iter().enumerate() {
            tracing::debug!(strategy, query = %planned, "searching forum");
            let request = self.perform_search(planned, limit);
            // The primary request is bounded by the client timeout alone.
            let outcome = if strategy == 0 {
                Ok(request.await)
            } else {
                tokio::time::timeout_at(deadline, request).await
            };

            let results = match outcome {
                Ok(Ok(results)) => results,
                // The question as asked decides the outcome. Expansions are best effort.
                Ok(Err(error)) if strategy == 0 => return Err(error),
                Ok(Err(error)) => {
                    tracing::warn!(strategy, query = %planned, %error, "secondary search failed, keeping earlier hits");
                    break;
                }
                Err(_) => {
                    tracing::warn!(strategy, query = %planned, "search budget spent, keeping earlier hits");
                    break;
                }
            };

            hits.extend(results.into_iter().filter(|hit| seen.insert(hit.topic_id)));
        }

        hits.truncate(limit);
        tracing::info!(query, hits = hits.len(), "forum search finished");
        Ok(hits)
    }
}

/// Strip highlight markup, collapse whitespace and cut to [`EXCERPT_CHARS`].
fn clean_excerpt(raw: &str) -> String {
    let text = HTML_TAG_REGEX.replace_all(raw, "");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &collapsed[..cut]),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn labels() -> TopicLabels {
        TopicLabels {
            untitled_topic: "Untitled topic".into(),
            default_excerpt: "Topic in Aosus community".into(),
        }
    }

    fn client(base_url: &str) -> DiscourseClient {
        client_with_timeout(base_url, Duration::from_secs(5))
    }

    fn client_with_timeout(base_url: &str, request_timeout: Duration) -> DiscourseClient {
        let config = DiscourseConfig {
            base_url: base_url.into(),
            api_key: Some("secret".into()),
            api_username: Some("system".into()),
            max_results: 5,
        };
        DiscourseClient::new(&config, labels(), request_timeout).unwrap()
    }

    const SEARCH_BODY: &str = indoc::indoc! {r#"
        {
            "posts": [
                {"id": 11, "topic_id": 2, "blurb": "Use <span class=\"search-highlight\">grub</span>   rescue"}
            ],
            "topics": [
                {"id": 1, "title": "Installing Ubuntu", "slug": "installing-ubuntu", "excerpt": "Step one"},
                {"id": 2, "title": "GRUB repair", "slug": "grub-repair"},
                {"id": 3, "slug": ""}
            ]
        }
    "#};

    #[test]
    fn parses_topics_with_fallbacks() {
        let client = client("https://discourse.aosus.org");
        let body: SearchResponse = serde_json::from_str(SEARCH_BODY).unwrap();
        let hits = client.parse_results(body);

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].url, "https://discourse.aosus.org/t/installing-ubuntu/1");
        assert_eq!(hits[0].excerpt, "Step one");
        assert_eq!(hits[1].excerpt, "Use grub rescue");
        assert_eq!(hits[2].title, "Untitled topic");
        assert_eq!(hits[2].excerpt, "Topic in Aosus community");
        assert_eq!(hits[2].url, "https://discourse.aosus.org/t/3");
    }

    #[test]
    fn excerpts_are_capped() {
        let long = "a".repeat(1500);
        let cleaned = clean_excerpt(&long);
        assert_eq!(cleaned.chars().count(), EXCERPT_CHARS + 1);
        assert!(cleaned.ends_with('…'));
    }

    async fn search_mock(server: &MockServer, query: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .and(query_param("q", query))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn topics(ids: &[u64]) -> ResponseTemplate {
        let topics: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "title": format!("Topic {id}"), "slug": format!("topic-{id}"), "excerpt": "x"}))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "topics": topics }))
    }

    #[tokio::test]
    async fn rate_limit_on_first_query_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server.uri()).search("ubuntu", 5).await;
        assert!(matches!(result, Err(SearchError::RateLimited)));
    }

    #[tokio::test]
    async fn server_errors_are_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let result = client(&server.uri()).search("ubuntu", 5).await;
        assert!(matches!(result, Err(SearchError::Unreachable(_))));
    }

    #[tokio::test]
    async fn merges_strategies_and_deduplicates() {
        let server = MockServer::start().await;
        search_mock(&server, "how to install ubuntu", topics(&[1])).await;
        search_mock(&server, "how install ubuntu", topics(&[1, 2])).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .with_priority(10)
            .mount(&server)
            .await;

        let hits = client(&server.uri())
            .search("how to install ubuntu", 5)
            .await
            .unwrap();

        assert_eq!(hits.iter().map(|hit| hit.topic_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(hits[1].url, format!("{}/t/topic-2/2", server.uri()));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let first = &requests[0];
        assert_eq!(
            first.url.query(),
            Some("q=how+to+install+ubuntu&order=relevance&limit=10")
        );
        assert_eq!(first.headers.get("api-key").unwrap(), "secret");
        assert_eq!(first.headers.get("api-username").unwrap(), "system");
        assert_eq!(first.headers.get("user-agent").unwrap(), USER_AGENT);
    }

    #[tokio::test]
    async fn slow_expansions_keep_the_primary_hits() {
        let server = MockServer::start().await;
        search_mock(&server, "how to install ubuntu", topics(&[1])).await;
        // Each expansion fits the request timeout but together they exceed the budget.
        Mock::given(method("GET"))
            .respond_with(topics(&[2]).set_delay(Duration::from_millis(900)))
            .with_priority(10)
            .mount(&server)
            .await;

        let client = client_with_timeout(&server.uri(), Duration::from_secs(1));
        let started = std::time::Instant::now();
        let hits = client.search("how to install ubuntu", 5).await.unwrap();

        assert_eq!(hits.iter().map(|hit| hit.topic_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn results_are_truncated_to_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(topics(&[1, 2, 3]))
            .mount(&server)
            .await;

        let hits = client(&server.uri()).search("ubuntu", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
