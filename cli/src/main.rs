//! regwatch CLI: follow a registry change feed into a search-index queue.
//!
//! Usage:
//! ```bash
//! # Follow the feed until Ctrl-C
//! REGWATCH_QUEUE_API_KEY=… regwatch run --config regwatch.json
//!
//! # Show the stored checkpoint against the feed head
//! regwatch status --config regwatch.json
//! ```

mod config;
mod logging;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};

use regwatch_core::{
    ChangesTransport, CheckpointStore, Cursor, Progress, QueueBacklog, WatchBuilder,
};
use regwatch_http::{CouchChangesClient, SearchQueueClient};
use regwatch_storage::SqliteCheckpointStore;

use crate::config::{AppConfig, API_KEY_ENV};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("regwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("regwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Follow a registry change feed into a search-index queue\n");
    println!("USAGE:");
    println!("    regwatch <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Follow the change feed until interrupted");
    println!("    status     Show the stored checkpoint and feed head");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --config <PATH>   Config file  [default: regwatch.json]\n");
    println!("ENVIRONMENT:");
    println!("    {API_KEY_ENV}   Search queue API key (run only)");
}

fn load_config(args: &[String]) -> Result<AppConfig> {
    let path = parse_flag(args, "--config").unwrap_or_else(|| "regwatch.json".into());
    AppConfig::load(&PathBuf::from(path))
}

async fn open_store(config: &AppConfig) -> Result<SqliteCheckpointStore> {
    SqliteCheckpointStore::open(&config.checkpoint.path, config.checkpoint.watcher_id.clone())
        .await
        .with_context(|| format!("opening checkpoint store {}", config.checkpoint.path))
}

async fn cmd_run(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    logging::init_tracing(&config.log);

    let feed = Arc::new(CouchChangesClient::new(
        &config.feed.url,
        config.watch.longpoll_timeout(),
    )?);
    let queue = Arc::new(SearchQueueClient::new(
        config.queue_config(env::var(API_KEY_ENV).ok())?,
    )?);
    let store = Arc::new(open_store(&config).await?);
    tracing::info!(
        feed = %feed.db_url(),
        queue = %queue.index_url(),
        watcher = store.watcher_id(),
        "regwatch configured"
    );

    let watch = WatchBuilder::new(feed, queue.clone(), store)
        .config(config.watch.clone())
        .backlog(queue)
        .build()?;

    watch.start().await?;
    tracing::info!("regwatch started");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listening for ctrl-c")?;
            tracing::info!("interrupt received");
        }
        _ = watch.closed() => {
            tracing::warn!("change feed closed");
        }
    }

    watch.stop().await?;
    Ok(())
}

async fn cmd_status(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(&config).await?;
    let feed = CouchChangesClient::new(&config.feed.url, config.watch.longpoll_timeout())?;

    let checkpoint = store.load().await?;
    let head = feed.head().await?;

    println!("Feed:        {}", feed.db_url());
    println!("Watcher:     {}", store.watcher_id());
    println!("Head:        {head}");
    match &checkpoint {
        Some(cp) => {
            let cursor = cp.cursor.clone().unwrap_or_else(Cursor::origin);
            println!("Checkpoint:  {cursor}");
            println!(
                "Stage:       {}",
                cp.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".into())
            );
            println!("Updated at:  {}", cp.updated_at);
            if let (Some(current), Some(total)) = (cursor.position(), head.position()) {
                let progress = Progress::new(current, total);
                println!(
                    "Progress:    {}% ({} remaining)",
                    progress.percent(),
                    progress.remaining()
                );
            }
        }
        None => println!("Checkpoint:  none (next run starts from the beginning)"),
    }

    if let Ok(queue) = config
        .queue_config(env::var(API_KEY_ENV).ok())
        .and_then(|c| Ok(SearchQueueClient::new(c)?))
    {
        match queue.queue_length().await {
            Ok(len) => println!("Queue:       {len} pending at {}", queue.index_url()),
            Err(e) => println!("Queue:       unavailable at {} ({e})", queue.index_url()),
        }
    }

    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
