//! Portal page fetching and document-folder crawling
//!
//! [`fetcher`] holds the authenticated fetch collaborator; [`folder`] the
//! recursive, paginated folder crawl built on top of it.

pub mod fetcher;
pub mod folder;

pub use fetcher::{AuthFetcher, PageFetcher};
pub use folder::{merge_entries, CrawlSettings, FolderCrawler};
