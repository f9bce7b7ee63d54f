use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reis_sync::config::Config;
use reis_sync::models::Language;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "reis-sync",
    version,
    about = "Background sync, document crawler and exam booking for the university portal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync all portal data into the local store
    Sync {
        /// Run a single sync and exit instead of syncing periodically
        #[arg(long)]
        once: bool,

        /// Print Prometheus metrics after a single sync
        #[arg(long, requires = "once")]
        metrics: bool,
    },

    /// Crawl one document-server folder and print its files as JSON
    Crawl {
        /// Folder URL (must point at slozka.pl)
        url: String,

        /// Listing language (cz, en)
        #[arg(short, long)]
        lang: Option<Language>,

        /// Maximum subfolder depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Do not descend into subfolders
        #[arg(long)]
        flat: bool,
    },

    /// Serve the host side of the message bridge over stdin/stdout
    Bridge,

    /// Register for an exam term as soon as its registration opens
    Book {
        /// Exam term id
        #[arg(short, long)]
        term: String,

        /// Exam section id the term belongs to
        #[arg(short, long)]
        section: String,
    },

    /// Show what the local store holds
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    reis_sync::i18n::set_language(config.language);
    if let Err(e) = reis_sync::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    match cli.command {
        Commands::Sync { once, metrics } => {
            tracing::info!(once, "Starting sync command");
            commands::sync(config, once, metrics).await?;
        }

        Commands::Crawl {
            url,
            lang,
            depth,
            flat,
        } => {
            tracing::info!(url = %url, lang = ?lang, depth = ?depth, flat, "Starting crawl command");
            commands::crawl(config, url, lang, depth, flat).await?;
        }

        Commands::Bridge => {
            tracing::info!("Starting bridge host on stdio");
            commands::bridge(config).await?;
        }

        Commands::Book { term, section } => {
            tracing::info!(term = %term, section = %section, "Starting book command");
            commands::book(config, term, section).await?;
        }

        Commands::Status => commands::status(config)?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// Logs go to stderr: stdout carries command output and bridge messages
fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("reis_sync=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("reis_sync={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
