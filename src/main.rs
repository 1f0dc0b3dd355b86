use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedrelay::config::Config;
use feedrelay::content::TitleResolver;
use feedrelay::dispatch::{LogMessenger, Messenger, Pipeline, Renderer, WebhookMessenger};
use feedrelay::feed::{next_minute_start, FeedRegistry, Monitor, SubscribeError};
use feedrelay::net::WebClient;
use feedrelay::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedrelay"))
}

#[derive(Parser, Debug)]
#[command(name = "feedrelay", about = "Relay new feed entries to a messaging target")]
struct Args {
    /// Path to config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll feeds every minute until interrupted
    Run,
    /// Poll every feed once and exit
    Once,
    /// Subscribe to a feed
    Add { name: String, url: String },
    /// Unsubscribe from a feed
    Remove { name: String },
    /// List subscriptions
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedrelay=info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(config = ?config, "Loaded configuration");

    let db_path = {
        let path = PathBuf::from(&config.database);
        if path.is_relative() && config.database != ":memory:" {
            let base = config_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| config_dir.clone());
            std::fs::create_dir_all(&base).context("Failed to create config directory")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if base == config_dir {
                    let perms = std::fs::Permissions::from_mode(0o700);
                    if let Err(e) = std::fs::set_permissions(&base, perms) {
                        tracing::warn!(
                            path = %base.display(),
                            error = %e,
                            "Failed to set config directory permissions"
                        );
                    }
                }
            }
            base.join(path)
        } else {
            path
        }
    };
    let db_path_str = db_path
        .to_str()
        .context("Database path contains invalid UTF-8")?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedrelay instance is using the database.");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let registry = Arc::new(
        FeedRegistry::load(db, config.poll_interval_minutes())
            .await
            .context("Failed to load feeds")?,
    );
    let client = WebClient::new(config.web_config()).context("Failed to build HTTP client")?;

    let messenger: Arc<dyn Messenger> = match &config.webhook_url {
        Some(url) => Arc::new(
            WebhookMessenger::new(url.clone(), config.webhook_token.clone())
                .context("Failed to build webhook client")?,
        ),
        None => {
            tracing::info!("No webhook configured, messages will only be logged");
            Arc::new(LogMessenger)
        }
    };
    let renderer = Renderer::new(TitleResolver::new(client.clone()));
    let pipeline = Pipeline::start(config.pipeline_config(), renderer, messenger);
    let monitor = Monitor::new(
        Arc::clone(&registry),
        client,
        pipeline.handle(),
        config.target.clone(),
        config.fetch_timeout(),
    );

    match args.command {
        Command::Run => {
            tracing::info!(
                feeds = registry.len().await,
                interval_minutes = registry.interval(),
                "Starting monitor"
            );
            // Pinned once so a Ctrl-C during a cycle is seen at the next wait
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            let mut due = next_minute_start(Utc::now());
            loop {
                let wait = (due - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = &mut shutdown => {
                        tracing::info!("Interrupted, finishing queued messages");
                        break;
                    }
                }
                monitor.run_cycle(due, false).await;
                // Minutes a slow cycle ran into are skipped, never repeated
                due = (due + chrono::Duration::minutes(1)).max(next_minute_start(Utc::now()));
            }
        }
        Command::Once => {
            let stats = monitor.run_cycle(Utc::now(), true).await;
            println!(
                "updated: {}, not updated: {}, failed: {}",
                stats.updated, stats.not_updated, stats.failed
            );
        }
        Command::Add { name, url } => match monitor.subscribe(&name, &url).await {
            Ok(feed) => println!("Added {} ({})", feed.name, feed.link),
            Err(SubscribeError::Registry(e)) => {
                return Err(e).context("Failed to store subscription");
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Command::Remove { name } => match registry.remove(&name).await? {
            Some(feed) => println!("Removed {} ({})", feed.name, feed.link),
            None => println!("No feed named {}", name),
        },
        Command::List => {
            for feed in registry.all().await {
                println!("{}\t{}", feed.name, feed.link);
            }
        }
    }

    drop(monitor);
    let stats = pipeline.finish().await;
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Dispatch pipeline drained"
    );
    Ok(())
}
