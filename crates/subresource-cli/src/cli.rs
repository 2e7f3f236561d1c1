//! Exposes the command line application.
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use subresource::config::Config;
use subresource::fetcher::Fetcher;
use subresource::http::HttpTransport;
use subresource::resource::{LoadOptions, Resource, ResourceKind};
use subresource::scheduler::NotificationScheduler;
use subresource::store::MemoryStore;
use subresource::{logging, metrics};
use url::Url;

use crate::client::CompletionClient;

/// Loads resources through an in-memory resource cache.
#[derive(Parser)]
#[command(name = "subfetch", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// How often every URL is requested.
    #[arg(long, short, default_value_t = 2)]
    repeat: usize,

    /// The kind of resource to request, like `raw`, `script` or `image`.
    #[arg(long, short, default_value = "raw")]
    kind: ResourceKind,

    /// The URLs to load.
    #[arg(required = true)]
    urls: Vec<Url>,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    logging::init_logging(&config);
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(config, cli))
}

async fn run(config: Config, cli: Cli) -> Result<()> {
    let store = Rc::new(MemoryStore::new(config.store));
    let scheduler = Rc::new(NotificationScheduler::new());
    tokio::task::spawn_local(scheduler.clone().run());

    let transport =
        Rc::new(HttpTransport::new(&config.http).context("failed to create the http client")?);
    tokio::task::spawn_local(transport.clone().run());
    let fetcher = Fetcher::new(store.clone(), scheduler, config.dispatch, transport);

    for round in 1..=cli.repeat {
        for url in &cli.urls {
            let started = Instant::now();
            let (requested, disposition) =
                fetcher.request(url.clone(), cli.kind, LoadOptions::default());
            let resource = Rc::new(CompletionClient::default())
                .observe(&requested)
                .await;
            let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);

            println!(
                "#{round} {:<10} {:<24} {:>10} B {:>8}  {url}",
                disposition.as_str(),
                describe(&resource),
                resource.encoded_size(),
                humantime::format_duration(elapsed).to_string(),
            );
        }
    }

    tracing::info!(
        entries = store.len(),
        live_size = store.live_size(),
        dead_size = store.dead_size(),
        "finished all rounds"
    );
    Ok(())
}

/// The outcome of a load in a few words.
fn describe(resource: &Resource) -> String {
    if let Some(error) = resource.resource_error() {
        return error.to_string();
    }
    match resource.response() {
        Some(response) => response.status().to_string(),
        None => format!("{:?}", resource.status()),
    }
}
