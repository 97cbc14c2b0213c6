//! Command-line surface: one long-running `fetch` command, feed management
//! against the database, and control commands for a running `fetch`.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{default_config_path, Config};
use crate::util::parse_duration;

#[derive(Parser, Debug)]
#[command(
    name = "rsshub",
    version,
    about = "Background RSS aggregator with live-adjustable interval and workers"
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/rsshub/config.toml)
    #[arg(long, global = true, env = "RSSHUB_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the background process that periodically fetches feeds
    Fetch,

    /// Add a new RSS feed
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
    },

    /// List available RSS feeds, newest first
    List {
        /// Show at most this many feeds
        #[arg(long)]
        num: Option<usize>,
    },

    /// Delete a feed and its articles
    Delete {
        #[arg(long)]
        name: String,
    },

    /// Show the latest articles of a feed
    Articles {
        #[arg(long = "feed-name")]
        feed_name: String,
        #[arg(long, default_value_t = 3)]
        num: usize,
    },

    /// Change the fetch interval of the running process (e.g. 2m, 30s, 1h)
    SetInterval {
        #[arg(value_parser = parse_duration)]
        interval: Duration,
    },

    /// Change the number of workers of the running process
    SetWorkers { count: usize },
}

/// Load configuration and dispatch the selected command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&path)?;
    config.apply_env();
    tracing::debug!(config = ?config, "Effective configuration");

    match cli.command {
        Commands::Fetch => commands::fetch(&config).await,
        Commands::Add { name, url } => commands::add(&config, &name, &url).await,
        Commands::List { num } => commands::list(&config, num).await,
        Commands::Delete { name } => commands::delete(&config, &name).await,
        Commands::Articles { feed_name, num } => commands::articles(&config, &feed_name, num).await,
        Commands::SetInterval { interval } => commands::set_interval(&config, interval).await,
        Commands::SetWorkers { count } => commands::set_workers(&config, count).await,
    }
}
