//! Configuration loading and validation.
//!
//! Values come from an optional TOML file and are overridden by environment
//! variables. The resulting [`Config`] is immutable for the process lifetime.

use crate::ReplyMode;
use crate::error::{ConfigError, Result};
use crate::links::TrackingTags;
use crate::llm::providers::Provider;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default and bounds for the reply-chain walk.
pub const DEFAULT_THREAD_DEPTH: usize = 6;
pub const MIN_THREAD_DEPTH: usize = 1;
pub const MAX_THREAD_DEPTH: usize = 20;

const DEFAULT_MAX_SEARCH_ITERATIONS: usize = 3;
const DEFAULT_MAX_SEARCH_RESULTS: usize = 5;
const DEFAULT_RATE_LIMIT_SECS: f64 = 1.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OWN_MESSAGE_CAPACITY: usize = 4096;

/// Askaosus configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub discourse: DiscourseConfig,
    pub llm: LlmConfig,
    pub bot: BotConfig,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rolling log files, if file logging is enabled.
    pub log_dir: Option<PathBuf>,
    /// TOML file the values were read from, if any.
    pub source: Option<PathBuf>,
}

/// Matrix homeserver connection.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub homeserver_url: String,
    pub user_id: String,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub device_name: String,
    /// Where session credentials are cached between runs.
    pub store_path: PathBuf,
}

/// Discourse forum connection.
#[derive(Debug, Clone)]
pub struct DiscourseConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_username: Option<String>,
    /// Maximum hits handed to the model per search.
    pub max_results: usize,
}

/// Language-model provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// OpenRouter provider sorting ("price", "throughput", "latency").
    pub openrouter_sort: Option<String>,
}

/// Reply behavior and pipeline tuning.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub reply_mode: ReplyMode,
    /// Reply-chain hops fetched in watch mode, always within 1..=20.
    pub thread_depth_limit: usize,
    /// Depth as configured, before clamping.
    pub requested_thread_depth: usize,
    pub max_search_iterations: usize,
    /// Minimum interval between two emitted responses.
    pub rate_limit: Duration,
    pub utm_tags: TrackingTags,
    /// Trigger tokens, matched case-insensitively on word boundaries.
    pub mentions: Vec<String>,
    pub language: String,
    pub responses_path: Option<PathBuf>,
    pub system_prompt_path: Option<PathBuf>,
    /// Timeout for each fetch, search and model call.
    pub request_timeout: Duration,
    /// How many sent event ids the own-message registry remembers.
    pub own_message_capacity: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    log_level: Option<String>,
    log_dir: Option<PathBuf>,
    matrix: FileMatrix,
    discourse: FileDiscourse,
    llm: FileLlm,
    bot: FileBot,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileMatrix {
    homeserver_url: Option<String>,
    user_id: Option<String>,
    password: Option<String>,
    access_token: Option<String>,
    device_name: Option<String>,
    store_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDiscourse {
    base_url: Option<String>,
    api_key: Option<String>,
    username: Option<String>,
    max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLlm {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    openrouter_sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileBot {
    reply_behavior: Option<String>,
    thread_depth_limit: Option<usize>,
    max_search_iterations: Option<usize>,
    rate_limit_seconds: Option<f64>,
    utm_tags: Option<String>,
    mentions: Option<Vec<String>>,
    language: Option<String>,
    responses_path: Option<PathBuf>,
    system_prompt_path: Option<PathBuf>,
    request_timeout_seconds: Option<u64>,
    own_message_capacity: Option<usize>,
}

/// File values with environment overrides layered on top.
struct Sources<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Sources<'_> {
    fn string(&self, key: &str, file: Option<String>) -> Option<String> {
        (self.env)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or(file.filter(|value| !value.trim().is_empty()))
    }

    fn required(&self, key: &str, file: Option<String>) -> Result<String> {
        self.string(key, file)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()).into())
    }

    fn parsed<T: FromStr>(&self, key: &str, file: Option<T>) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match (self.env)(key).filter(|value| !value.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|error| {
                ConfigError::Invalid(format!("{key}='{raw}' is not valid: {error}")).into()
            }),
            None => Ok(file),
        }
    }

    fn path(&self, key: &str, file: Option<PathBuf>) -> Option<PathBuf> {
        self.string(key, None).map(PathBuf::from).or(file)
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    ///
    /// Without an explicit path, `<config dir>/askaosus/config.toml` is read when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join("askaosus").join("config.toml"))
                .filter(|candidate| candidate.exists())
        });

        let toml_text = match &path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|error| {
                ConfigError::Load {
                    path: path.display().to_string(),
                    source: Arc::new(error),
                }
            })?),
            None => None,
        };

        let env = |key: &str| std::env::var(key).ok();
        let mut config = Self::from_sources(toml_text.as_deref(), &env)?;
        config.source = path;
        Ok(config)
    }

    /// Build configuration from TOML text and an environment lookup.
    pub fn from_sources(
        toml_text: Option<&str>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file: FileConfig = match toml_text {
            Some(text) => toml::from_str(text).map_err(|error| ConfigError::Parse(error.to_string()))?,
            None => FileConfig::default(),
        };
        let sources = Sources { env };

        let matrix = MatrixConfig {
            homeserver_url: sources.required("MATRIX_HOMESERVER_URL", file.matrix.homeserver_url)?,
            user_id: sources.required("MATRIX_USER_ID", file.matrix.user_id)?,
            password: sources.string("MATRIX_PASSWORD", file.matrix.password),
            access_token: sources.string("MATRIX_ACCESS_TOKEN", file.matrix.access_token),
            device_name: sources
                .string("MATRIX_DEVICE_NAME", file.matrix.device_name)
                .unwrap_or_else(|| "askaosus-rs".into()),
            store_path: sources
                .path("MATRIX_STORE_PATH", file.matrix.store_path)
                .unwrap_or_else(default_store_path),
        };
        validate_url("MATRIX_HOMESERVER_URL", &matrix.homeserver_url)?;
        if matrix.password.is_none() && matrix.access_token.is_none() {
            return Err(ConfigError::MissingKey(
                "MATRIX_PASSWORD or MATRIX_ACCESS_TOKEN".into(),
            )
            .into());
        }

        let discourse = DiscourseConfig {
            base_url: sources
                .string("DISCOURSE_BASE_URL", file.discourse.base_url)
                .unwrap_or_else(|| "https://discourse.aosus.org".into())
                .trim_end_matches('/')
                .to_string(),
            api_key: sources.string("DISCOURSE_API_KEY", file.discourse.api_key),
            api_username: sources.string("DISCOURSE_USERNAME", file.discourse.username),
            max_results: sources
                .parsed("BOT_MAX_SEARCH_RESULTS", file.discourse.max_results)?
                .unwrap_or(DEFAULT_MAX_SEARCH_RESULTS)
                .max(1),
        };
        validate_url("DISCOURSE_BASE_URL", &discourse.base_url)?;

        let provider: Provider = sources
            .string("LLM_PROVIDER", file.llm.provider)
            .unwrap_or_else(|| "openai".into())
            .parse()
            .map_err(ConfigError::Invalid)?;
        let base_url = sources
            .string("LLM_BASE_URL", file.llm.base_url)
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        validate_url("LLM_BASE_URL", &base_url)?;

        let llm = LlmConfig {
            provider,
            api_key: sources.required("LLM_API_KEY", file.llm.api_key)?,
            base_url,
            model: sources
                .string("LLM_MODEL", file.llm.model)
                .unwrap_or_else(|| "gpt-4".into()),
            max_tokens: sources.parsed("LLM_MAX_TOKENS", file.llm.max_tokens)?.unwrap_or(500),
            temperature: sources
                .parsed("LLM_TEMPERATURE", file.llm.temperature)?
                .unwrap_or(0.7),
            openrouter_sort: sources.string("LLM_OPENROUTER_SORTING", file.llm.openrouter_sort),
        };

        let reply_mode = match sources.string("BOT_REPLY_BEHAVIOR", file.bot.reply_behavior) {
            Some(raw) => raw.parse::<ReplyMode>().map_err(ConfigError::Invalid)?,
            None => ReplyMode::default(),
        };

        let requested_depth = sources
            .parsed("BOT_THREAD_DEPTH_LIMIT", file.bot.thread_depth_limit)?
            .unwrap_or(DEFAULT_THREAD_DEPTH);
        let thread_depth_limit = clamp_thread_depth(requested_depth);

        let max_search_iterations = sources
            .parsed("BOT_MAX_SEARCH_ITERATIONS", file.bot.max_search_iterations)?
            .unwrap_or(DEFAULT_MAX_SEARCH_ITERATIONS);
        if max_search_iterations == 0 {
            return Err(ConfigError::Invalid(
                "BOT_MAX_SEARCH_ITERATIONS must be at least 1".into(),
            )
            .into());
        }

        let rate_limit_secs = sources
            .parsed("BOT_RATE_LIMIT_SECONDS", file.bot.rate_limit_seconds)?
            .unwrap_or(DEFAULT_RATE_LIMIT_SECS);
        let rate_limit = Duration::try_from_secs_f64(rate_limit_secs).map_err(|error| {
            ConfigError::Invalid(format!(
                "BOT_RATE_LIMIT_SECONDS must be a non-negative number of seconds, got {rate_limit_secs}: {error}"
            ))
        })?;

        let mentions = match (sources.env)("BOT_MENTIONS").filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => split_list(&raw),
            None => file
                .bot
                .mentions
                .map(|list| list.into_iter().map(|m| m.trim().to_string()).filter(|m| !m.is_empty()).collect())
                .unwrap_or_default(),
        };
        let mentions = if mentions.is_empty() {
            default_mentions(&matrix.user_id)
        } else {
            mentions
        };

        let bot = BotConfig {
            reply_mode,
            thread_depth_limit,
            requested_thread_depth: requested_depth,
            max_search_iterations,
            rate_limit,
            utm_tags: TrackingTags::parse(
                &sources
                    .string("BOT_UTM_TAGS", file.bot.utm_tags)
                    .unwrap_or_default(),
            ),
            mentions,
            language: sources
                .string("BOT_LANGUAGE", file.bot.language)
                .unwrap_or_else(|| "ar".into()),
            responses_path: sources.path("BOT_RESPONSES_PATH", file.bot.responses_path),
            system_prompt_path: sources.path("BOT_SYSTEM_PROMPT_PATH", file.bot.system_prompt_path),
            request_timeout: Duration::from_secs(
                sources
                    .parsed("BOT_REQUEST_TIMEOUT_SECONDS", file.bot.request_timeout_seconds)?
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
                    .max(1),
            ),
            own_message_capacity: sources
                .parsed("BOT_OWN_MESSAGE_CAPACITY", file.bot.own_message_capacity)?
                .unwrap_or(DEFAULT_OWN_MESSAGE_CAPACITY)
                .max(1),
        };

        Ok(Self {
            matrix,
            discourse,
            llm,
            bot,
            log_level: sources
                .string("LOG_LEVEL", file.log_level)
                .unwrap_or_else(|| "info".into())
                .to_lowercase(),
            log_dir: sources.path("LOG_DIR", file.log_dir),
            source: None,
        })
    }

    /// Log the effective configuration without secrets.
    ///
    /// Called once tracing is up, so load-time adjustments are reported here.
    pub fn log_summary(&self) {
        if let Some(path) = &self.source {
            tracing::info!(path = %path.display(), "configuration file loaded");
        }
        if self.bot.requested_thread_depth != self.bot.thread_depth_limit {
            tracing::warn!(
                requested = self.bot.requested_thread_depth,
                clamped = self.bot.thread_depth_limit,
                "BOT_THREAD_DEPTH_LIMIT out of range, clamped"
            );
        }
        tracing::info!(
            homeserver = %self.matrix.homeserver_url,
            user_id = %self.matrix.user_id,
            discourse = %self.discourse.base_url,
            provider = %self.llm.provider,
            llm_base_url = %self.llm.base_url,
            model = %self.llm.model,
            reply_mode = %self.bot.reply_mode,
            thread_depth_limit = self.bot.thread_depth_limit,
            max_search_iterations = self.bot.max_search_iterations,
            rate_limit_ms = self.bot.rate_limit.as_millis() as u64,
            mentions = ?self.bot.mentions,
            "configuration loaded"
        );
    }
}

/// Force a requested depth into the supported range.
pub fn clamp_thread_depth(requested: usize) -> usize {
    requested.clamp(MIN_THREAD_DEPTH, MAX_THREAD_DEPTH)
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|error| ConfigError::Invalid(format!("{key}='{value}' is not a URL: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::Invalid(format!("{key}='{value}' must be an http(s) URL")).into());
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// The full Matrix id plus its localpart ("@bot:example.org" → "@bot:example.org", "bot").
fn default_mentions(user_id: &str) -> Vec<String> {
    let localpart = user_id
        .trim_start_matches('@')
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut mentions = vec![user_id.to_string()];
    if !localpart.is_empty() && localpart != user_id {
        mentions.push(localpart);
    }
    mentions
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("askaosus").join("matrix_store"))
        .unwrap_or_else(|| PathBuf::from("./data/matrix_store"))
}
