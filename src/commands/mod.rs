pub mod book;
pub mod bridge;
pub mod crawl;
pub mod status;
pub mod sync;

// Re-export command functions for convenience
pub use book::book;
pub use bridge::bridge;
pub use crawl::crawl;
pub use status::status;
pub use sync::sync;

use anyhow::{Context, Result};
use reis_sync::cache::{CacheStore, SubjectCaches};
use reis_sync::config::Config;
use reis_sync::crawler::{AuthFetcher, CrawlSettings, FolderCrawler, PageFetcher};
use reis_sync::portal::HttpPortal;
use reis_sync::sync::SyncOrchestrator;
use std::sync::Arc;

/// Components shared by the commands that talk to the portal
pub struct Runtime {
    pub fetcher: Arc<dyn PageFetcher>,
    pub portal: Arc<HttpPortal>,
    pub store: Arc<CacheStore>,
}

impl Runtime {
    pub fn new(config: &Config) -> Result<Self> {
        if config.portal.session_cookie.is_none() {
            tracing::warn!("No session cookie configured; authenticated pages will fail");
        }

        let fetcher: Arc<dyn PageFetcher> =
            Arc::new(AuthFetcher::new(&config.portal).context("Failed to build HTTP client")?);
        let portal = Arc::new(HttpPortal::new(
            fetcher.clone(),
            &config.portal,
            config.student.clone(),
        ));
        let store = Arc::new(open_store(config)?);
        store.set_language(config.language);

        Ok(Self {
            fetcher,
            portal,
            store,
        })
    }

    pub fn crawler(&self, config: &Config) -> FolderCrawler {
        FolderCrawler::new(self.fetcher.clone(), CrawlSettings::from(config))
    }

    /// Build an orchestrator primed with whatever the store already holds
    pub async fn orchestrator(&self, config: &Config) -> Result<Arc<SyncOrchestrator>> {
        let caches = Arc::new(SubjectCaches::new(self.store.clone(), config.cache_max_age()));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                self.portal.clone(),
                self.crawler(config),
                self.store.clone(),
                config.sync.subject_concurrency,
            )
            .with_caches(caches),
        );
        orchestrator
            .load_from_store()
            .await
            .context("Failed to load cached snapshot")?;
        Ok(orchestrator)
    }
}

pub fn open_store(config: &Config) -> Result<CacheStore> {
    CacheStore::open(&config.storage.sqlite_path).with_context(|| {
        format!(
            "Failed to open store at {}",
            config.storage.sqlite_path.display()
        )
    })
}
