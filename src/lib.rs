//! reis-sync - background sync engine for university information-system data
//!
//! Keeps a local, persistent copy of a student's schedule, exams, subjects,
//! course files, assessments and syllabi, relays authenticated requests
//! between an isolated client and a privileged host, and fires exam
//! registrations the moment their window opens.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Authenticated page fetching and recursive folder crawling
//! - [`parser`] - HTML parsing and data extraction
//! - [`portal`] - Typed access to the portal pages and exam actions
//! - [`sync`] - Two-phase sync orchestration and the periodic sync service
//! - [`cache`] - SQLite-backed snapshot store and per-subject caches
//! - [`bridge`] - Correlated message bridge between client and host
//! - [`booking`] - Scheduled exam registration
//! - [`throttle`] - Concurrency limiting and delay-spaced dispatch
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use reis_sync::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let fetcher: Arc<dyn PageFetcher> = Arc::new(AuthFetcher::new(&config.portal)?);
//!     let portal = Arc::new(HttpPortal::new(fetcher.clone(), &config.portal, config.student.clone()));
//!     let crawler = FolderCrawler::new(fetcher, CrawlSettings::from(&config));
//!     let store = Arc::new(CacheStore::open(&config.storage.sqlite_path)?);
//!
//!     let orchestrator = SyncOrchestrator::new(portal, crawler, store, config.sync.subject_concurrency);
//!     orchestrator.sync_all().await;
//!     Ok(())
//! }
//! ```

// Initialize rust-i18n at crate root level
rust_i18n::i18n!("locales", fallback = "en");

pub mod booking;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod i18n;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod portal;
pub mod sync;
pub mod throttle;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::booking::{BookingArm, BookingEvent, BookingScheduler, SystemClock};
    pub use crate::bridge::{BridgeClient, HostHandler, Transport};
    pub use crate::cache::{CacheStore, Partition, SubjectCaches};
    pub use crate::config::Config;
    pub use crate::crawler::{AuthFetcher, CrawlSettings, FolderCrawler, PageFetcher};
    pub use crate::error::{Error, ErrorCategory, ReisErrorTrait, Result};
    pub use crate::models::{ExamSubject, Language, ParsedFile, SubjectInfo, SyncSnapshot};
    pub use crate::portal::{ExamRegistrar, HttpPortal, PortalApi};
    pub use crate::sync::{SyncOrchestrator, SyncOutcome, SyncService};
}

// Direct re-exports for convenience
pub use models::{Language, SyncSnapshot};
