use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::lifecycle::run_until_signal;
use crate::aggregator::{validate_interval, validate_workers, Aggregator, AggregatorError};
use crate::config::Config;
use crate::control::{Command, ControlClient, ControlServer};
use crate::feed::{Fetcher, HttpFetcher};
use crate::storage::{Article, Database, DatabaseError, Feed};
use crate::util::{format_duration, validate_feed_url};

async fn open_database(config: &Config) -> Result<Database> {
    let path = config
        .database
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    if path != ":memory:" {
        if let Some(parent) = config.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    Database::open(path)
        .await
        .with_context(|| format!("Failed to open database {}", path))
}

fn http_fetcher(config: &Config) -> Result<HttpFetcher> {
    Ok(HttpFetcher::with_default_client()
        .context("Failed to build HTTP client")?
        .timeout(config.fetch_timeout()))
}

pub(super) async fn fetch(config: &Config) -> Result<()> {
    let settings = config.settings()?;
    let db = open_database(config).await?;
    let fetcher = http_fetcher(config)?;

    let server = match ControlServer::bind(config.control_addr).await {
        Ok(server) => server,
        Err(AggregatorError::AlreadyRunning) => bail!(
            "another aggregator instance is already running (control address {} in use)",
            config.control_addr
        ),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to bind control listener on {}", config.control_addr)
            })
        }
    };

    let aggregator = Arc::new(Aggregator::new(Arc::new(db), Arc::new(fetcher), settings));

    println!(
        "The background process for fetching feeds has started (interval = {}, workers = {})",
        format_duration(settings.interval()),
        settings.workers()
    );
    run_until_signal(aggregator, server).await?;
    println!("Graceful shutdown: aggregator stopped");
    Ok(())
}

pub(super) async fn add(config: &Config, name: &str, url: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("feed name must not be empty");
    }
    let url = validate_feed_url(url).context("Invalid feed URL")?;

    let items = http_fetcher(config)?
        .fetch_and_parse(url.as_str())
        .await
        .with_context(|| format!("{} does not serve a readable RSS or Atom feed", url))?;
    tracing::debug!(url = %url, items = items.len(), "Feed verified");

    let db = open_database(config).await?;
    let feed = db.create_feed(name, url.as_str()).await?;
    println!("Feed added: {} ({})", feed.name, feed.url);
    Ok(())
}

pub(super) async fn list(config: &Config, num: Option<usize>) -> Result<()> {
    let db = open_database(config).await?;
    let feeds = db.list_feeds(num).await?;
    print!("{}", render_feed_list(&feeds));
    Ok(())
}

pub(super) async fn delete(config: &Config, name: &str) -> Result<()> {
    let db = open_database(config).await?;
    db.delete_feed(name).await?;
    println!("Feed deleted: {}", name);
    Ok(())
}

pub(super) async fn articles(config: &Config, feed_name: &str, num: usize) -> Result<()> {
    let db = open_database(config).await?;
    if db.get_feed_by_name(feed_name).await?.is_none() {
        return Err(DatabaseError::FeedNotFound(feed_name.to_string()).into());
    }

    let articles = db.articles_by_feed_name(feed_name, num).await?;
    print!("{}", render_articles(feed_name, &articles));
    Ok(())
}

pub(super) async fn set_interval(config: &Config, interval: Duration) -> Result<()> {
    validate_interval(interval)?;
    ControlClient::new(config.control_endpoint())
        .send(Command::SetInterval(interval))
        .await?;
    println!("Interval set to {}", format_duration(interval));
    Ok(())
}

pub(super) async fn set_workers(config: &Config, count: usize) -> Result<()> {
    validate_workers(count)?;
    ControlClient::new(config.control_endpoint())
        .send(Command::SetWorkers(count))
        .await?;
    println!("Number of workers set to {}", count);
    Ok(())
}

fn format_millis(millis: i64, pattern: &str) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format(pattern).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn render_feed_list(feeds: &[Feed]) -> String {
    if feeds.is_empty() {
        return "No RSS feeds found\n".to_string();
    }

    let mut out = String::from("# Available RSS Feeds\n");
    for (i, feed) in feeds.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. Name: {}\n   URL: {}\n   Added: {}\n",
            i + 1,
            feed.name,
            feed.url,
            format_millis(feed.created_at, "%Y-%m-%d %H:%M")
        );
    }
    out
}

fn render_articles(feed_name: &str, articles: &[Article]) -> String {
    if articles.is_empty() {
        return format!("No articles found for feed: {}\n", feed_name);
    }

    let mut out = format!("Feed: {}\n\n", feed_name);
    for (i, article) in articles.iter().enumerate() {
        let _ = write!(
            out,
            "{}. [{}] {}\n   {}\n\n",
            i + 1,
            format_millis(article.published_at, "%Y-%m-%d"),
            article.title,
            article.link
        );
    }
    out
}
