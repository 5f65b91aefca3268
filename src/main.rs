use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use costwatch_feed::export::{ExportFormat, ExportRequest, download_report};
use costwatch_feed::render::event_line;
use costwatch_feed::source::build_client;
use costwatch_feed::{
    ActivityEvent, AppConfig, EventSource, FeedSession, FeedUpdate, HttpEventSource,
};

#[derive(Debug, Parser)]
#[command(name = "costwatch-feed", version, about = "Live activity feed for AI usage costs")]
struct Cli {
    /// Overrides COSTWATCH_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Overrides COSTWATCH_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow the live activity stream until interrupted
    Watch {
        #[arg(long)]
        limit: Option<usize>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the most recent activity events once
    Recent {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Download a usage report
    Export {
        #[arg(long, value_enum)]
        format: ExportFormat,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    dotenvy::from_filename(".env.local").ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("costwatch_feed=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Watch { limit, json } => watch(config, limit, json).await,
        Command::Recent { limit, json } => recent(config, limit, json).await,
        Command::Export {
            format,
            from,
            to,
            output,
        } => {
            let request = ExportRequest { format, from, to };
            export(config, request, output).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::from_env_with_base(cli.base_url.as_deref())?;
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }
    Ok(config)
}

fn http_source(config: &AppConfig) -> Result<HttpEventSource> {
    let client = build_client(None).context("failed to construct HTTP client")?;
    Ok(HttpEventSource::new(
        client,
        config.recent_url()?,
        config.stream_url()?,
        config.token.clone(),
    ))
}

async fn watch(mut config: AppConfig, limit: Option<usize>, json: bool) -> Result<()> {
    if let Some(limit) = limit {
        config.feed.limit = limit;
    }
    let source: Arc<dyn EventSource> = Arc::new(http_source(&config)?);
    let session = FeedSession::new(source, config.feed.clone());
    let mut updates = session.subscribe();
    session.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                info!("interrupted; stopping feed");
                break;
            }
            update = updates.recv() => match update {
                Ok(FeedUpdate::Snapshot { .. }) => {
                    for event in session.events().iter().rev() {
                        print_event(event, &config, json)?;
                    }
                }
                Ok(FeedUpdate::Merged { added }) => {
                    for event in added.iter().rev() {
                        print_event(event, &config, json)?;
                    }
                }
                Ok(FeedUpdate::Event(event)) => print_event(&event, &config, json)?,
                Ok(FeedUpdate::State(state)) => info!(%state, "feed state"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind the feed"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop();
    let stats = session.stats();
    info!(
        connects = stats.connect_attempts,
        reconnects = stats.reconnects_scheduled,
        frames = stats.frames_received,
        dropped = stats.frames_dropped,
        "feed finished"
    );
    Ok(())
}

async fn recent(config: AppConfig, limit: Option<usize>, json: bool) -> Result<()> {
    let source = HttpEventSource::new(
        build_client(Some(Duration::from_secs(15))).context("failed to construct HTTP client")?,
        config.recent_url()?,
        config.stream_url()?,
        config.token.clone(),
    );
    let events = source
        .fetch_recent(limit.unwrap_or(config.feed.limit))
        .await
        .context("failed to fetch recent activity")?;

    if events.is_empty() {
        println!("No recent activity.");
        return Ok(());
    }
    for event in &events {
        print_event(event, &config, json)?;
    }
    Ok(())
}

async fn export(config: AppConfig, request: ExportRequest, output: Option<PathBuf>) -> Result<()> {
    let client =
        build_client(Some(Duration::from_secs(120))).context("failed to construct HTTP client")?;
    let output = output.unwrap_or_else(|| request.default_file_name());
    let written = download_report(
        &client,
        &config.export_url()?,
        config.token.as_deref(),
        &request,
        &output,
    )
    .await?;
    println!("Saved {written} byte(s) to {}.", output.display());
    Ok(())
}

fn print_event(event: &ActivityEvent, config: &AppConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", event_line(event, config.timezone));
    }
    Ok(())
}
