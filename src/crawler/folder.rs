//! Recursive document-folder crawl
//!
//! A crawl fetches the root listing, drains its pagination, then recurses into
//! subfolder entries up to `max_depth`. Collection and merging are separate:
//! [`FolderCrawler::crawl`] gathers every entry it can reach and
//! [`merge_entries`] reduces them to the final deduplicated file list.

use super::fetcher::PageFetcher;
use crate::config::Config;
use crate::metrics;
use crate::models::{Language, ParsedFile};
use crate::parser::parse_folder;
use crate::throttle::{run_with_delay, ConcurrencyLimiter};
use crate::utils::error::CrawlerError;
use crate::utils::{has_download_param, is_folder_link, normalize_link, with_lang, FOLDER_PATTERN};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Crawl limits
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub base_url: String,
    pub max_depth: u32,
    pub subfolder_delay: Duration,
    pub page_concurrency: usize,
    pub recursive: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            base_url: "https://is.mendelu.cz".to_string(),
            max_depth: 2,
            subfolder_delay: Duration::from_millis(200),
            page_concurrency: 3,
            recursive: true,
        }
    }
}

impl From<&Config> for CrawlSettings {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.portal.base_url.clone(),
            max_depth: config.crawler.max_depth,
            subfolder_delay: config.subfolder_delay(),
            page_concurrency: config.crawler.page_concurrency,
            recursive: true,
        }
    }
}

/// Folder crawler over any page fetcher
#[derive(Clone)]
pub struct FolderCrawler {
    fetcher: Arc<dyn PageFetcher>,
    pages: ConcurrencyLimiter,
    settings: CrawlSettings,
}

impl FolderCrawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: CrawlSettings) -> Self {
        Self {
            fetcher,
            pages: ConcurrencyLimiter::new(settings.page_concurrency),
            settings,
        }
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Crawl a folder and return its merged, deduplicated files
    ///
    /// Only a failure to fetch `root_url` itself is returned as an error.
    pub async fn crawl(&self, root_url: &str, lang: Language) -> Result<Vec<ParsedFile>, CrawlerError> {
        if !root_url.contains(FOLDER_PATTERN) {
            return Err(CrawlerError::InvalidFolderUrl(root_url.to_string()));
        }

        let entries = self.collect(root_url.to_string(), lang, 0).await?;
        let mut files = merge_entries(entries);
        for file in &mut files {
            file.language = Some(lang);
        }

        tracing::info!(url = root_url, lang = %lang, files = files.len(), "Folder crawl finished");
        Ok(files)
    }

    /// Gather raw entries of one folder and its descendants
    fn collect(&self, url: String, lang: Language, depth: u32) -> BoxFuture<'_, Result<Vec<ParsedFile>, CrawlerError>> {
        Box::pin(async move {
            let url = with_lang(&url, lang);
            let html = self.fetcher.get(&url).await?;
            let root = parse_folder(&html, &self.settings.base_url);
            metrics::record_pages_fetched(1);

            tracing::debug!(
                url = %url,
                depth,
                files = root.files.len(),
                pages = root.pagination_links.len(),
                "Fetched folder page"
            );

            let mut entries = root.files;
            entries.extend(self.drain_pagination(root.pagination_links, lang).await);

            if self.settings.recursive && depth < self.settings.max_depth {
                let folders = subfolders(&entries);
                if !folders.is_empty() {
                    tracing::debug!(url = %url, depth, subfolders = folders.len(), "Recursing into subfolders");
                }

                let nested = run_with_delay(
                    folders,
                    |(folder_url, name)| async move {
                        let mut files = self.collect(folder_url, lang, depth + 1).await.inspect_err(|e| {
                            metrics::record_crawl_unit_failure();
                            tracing::warn!(subfolder = %name, error = %e, "Subfolder failed, skipping");
                        })?;
                        for file in &mut files {
                            file.subfolder = name.clone();
                        }
                        Ok::<_, CrawlerError>(files)
                    },
                    self.settings.subfolder_delay,
                )
                .await;
                entries.extend(nested.into_iter().flatten());
            }

            Ok(entries)
        })
    }

    /// Fetch every pagination page in order; failed pages contribute nothing
    async fn drain_pagination(&self, links: Vec<String>, lang: Language) -> Vec<ParsedFile> {
        let mut files = Vec::new();
        for link in links {
            let page_url = with_lang(&link, lang);
            let result = self.pages.run(|| self.fetcher.get(&page_url)).await;
            match result {
                Ok(html) => {
                    metrics::record_pages_fetched(1);
                    files.extend(parse_folder(&html, &self.settings.base_url).files);
                }
                Err(e) => {
                    metrics::record_crawl_unit_failure();
                    tracing::warn!(url = %page_url, error = %e, "Pagination page failed, skipping");
                }
            }
        }
        files
    }
}

/// Folder entries worth recursing into, deduplicated by URL
///
/// The same subfolder shows up on every paginated page of its parent.
fn subfolders(entries: &[ParsedFile]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| {
            let link = entry.primary_link()?;
            (is_folder_link(link) && seen.insert(link.to_string()))
                .then(|| (link.to_string(), entry.name.clone()))
        })
        .collect()
}

fn has_download(entry: &ParsedFile) -> bool {
    entry.attachments.iter().any(|a| has_download_param(&a.link))
}

fn is_file_entry(entry: &ParsedFile) -> bool {
    entry
        .attachments
        .iter()
        .any(|a| has_download_param(&a.link) || !a.link.contains(FOLDER_PATTERN))
}

/// Deduplicate by normalized primary link and drop pure folder pointers
///
/// On a key collision the entry with a download link wins; otherwise the first
/// one seen is kept. Output keeps first-seen order.
pub fn merge_entries(entries: Vec<ParsedFile>) -> Vec<ParsedFile> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<ParsedFile> = Vec::new();

    for entry in entries {
        let Some(key) = entry.primary_link().map(normalize_link) else {
            continue;
        };
        match index.get(&key) {
            Some(&position) => {
                if !has_download(&merged[position]) && has_download(&entry) {
                    merged[position] = entry;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(entry);
            }
        }
    }

    merged.retain(is_file_entry);
    merged
}
