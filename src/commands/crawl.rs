use anyhow::{Context, Result};
use reis_sync::config::Config;
use reis_sync::crawler::{AuthFetcher, CrawlSettings, FolderCrawler};
use reis_sync::models::Language;
use std::sync::Arc;

pub async fn crawl(
    config: Config,
    url: String,
    lang: Option<Language>,
    depth: Option<u32>,
    flat: bool,
) -> Result<()> {
    let fetcher = AuthFetcher::new(&config.portal).context("Failed to build HTTP client")?;

    let mut settings = CrawlSettings::from(&config);
    if let Some(depth) = depth {
        settings.max_depth = depth;
    }
    settings.recursive = !flat;

    let lang = lang.unwrap_or(config.language);
    let crawler = FolderCrawler::new(Arc::new(fetcher), settings);
    let files = crawler
        .crawl(&url, lang)
        .await
        .with_context(|| format!("Failed to crawl {url}"))?;

    tracing::info!(count = files.len(), "Crawl finished");
    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}
