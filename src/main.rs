//! Askaosus CLI entry point.

use anyhow::Context as _;
use askaosus::agent::{Responder, ResponderDeps, ResponderSettings};
use askaosus::config::Config;
use askaosus::conversation::{MentionMatcher, OwnMessageRegistry, ReplyClassifier};
use askaosus::forum::discourse::TopicLabels;
use askaosus::forum::{DiscourseClient, ForumSearch as _};
use askaosus::llm::OpenAiCompatibleModel;
use askaosus::messaging::{MatrixTransport, Transport as _};
use askaosus::prompts::system::PromptVars;
use askaosus::prompts::{ResponseCatalog, SystemPrompt};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "askaosus")]
#[command(about = "Matrix room assistant answering from the Aosus Discourse forum")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also write daily-rotated logs into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Run one forum search, print the hits and exit
    #[arg(long, value_name = "QUERY")]
    search: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = init_tracing(cli.debug, &config.log_level, log_dir.as_deref())?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting askaosus");
    config.log_summary();

    let catalog = Arc::new(ResponseCatalog::load(config.bot.responses_path.as_deref()));
    let labels = TopicLabels::from_catalog(&catalog, &config.bot.language);
    let discourse = DiscourseClient::new(&config.discourse, labels, config.bot.request_timeout)
        .context("failed to build Discourse client")?;

    if let Some(query) = cli.search {
        return run_search(&discourse, &query, config.discourse.max_results).await;
    }

    let system_prompt = SystemPrompt::load(config.bot.system_prompt_path.as_deref()).render(&PromptVars {
        forum_url: &config.discourse.base_url,
        language: &config.bot.language,
        max_iterations: config.bot.max_search_iterations,
        max_results: config.discourse.max_results,
    });

    let model = OpenAiCompatibleModel::new(config.llm.clone(), config.bot.request_timeout)
        .context("failed to build language model client")?;
    tracing::info!(model = model.model_name(), "language model ready");

    let transport = Arc::new(
        MatrixTransport::new(config.matrix.clone(), config.bot.request_timeout)
            .context("failed to build Matrix transport")?,
    );
    let inbound = transport
        .start()
        .await
        .context("failed to connect to the Matrix homeserver")?;

    let classifier = ReplyClassifier::new(
        config.bot.reply_mode,
        MentionMatcher::new(config.matrix.user_id.clone(), &config.bot.mentions),
    );
    let cancel = CancellationToken::new();
    let responder = Arc::new(Responder::new(
        ResponderDeps {
            transport: Arc::clone(&transport),
            model: Arc::new(model),
            search: Arc::new(discourse),
            registry: Arc::new(OwnMessageRegistry::new(config.bot.own_message_capacity)),
            catalog,
        },
        classifier,
        system_prompt,
        ResponderSettings::from_config(&config),
        cancel.clone(),
    ));

    let mut responder_task = tokio::spawn(Arc::clone(&responder).run(inbound));
    tracing::info!("askaosus started");

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
            if let Err(error) = responder_task.await {
                tracing::error!(%error, "responder task failed");
            }
        }
        result = &mut responder_task => {
            if let Err(error) = result {
                tracing::error!(%error, "responder task failed");
            }
        }
    }

    transport
        .shutdown()
        .await
        .context("failed to shut down Matrix transport")?;
    tracing::info!("askaosus stopped");
    Ok(())
}

async fn run_search(discourse: &DiscourseClient, query: &str, limit: usize) -> anyhow::Result<()> {
    let hits = discourse
        .search(query, limit)
        .await
        .with_context(|| format!("forum search for '{query}' failed"))?;

    if hits.is_empty() {
        println!("no results for '{query}'");
    }
    for (index, hit) in hits.iter().enumerate() {
        println!("{}. {}\n   {}\n   {}\n", index + 1, hit.title, hit.url, hit.excerpt);
    }
    Ok(())
}

/// Console output plus an optional daily-rolling file.
///
/// `RUST_LOG` wins over the configured level. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_tracing(
    debug: bool,
    level: &str,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("askaosus={level},warn")))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "askaosus.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
