//! Persistent keyed snapshot store
//!
//! Every domain lives in a named partition holding one JSON document per key.
//! Global snapshots use [`CURRENT_KEY`]; per-subject entries use the course
//! code. Consumers subscribe to [`StoreEvent`]s and re-read on notification.
//!
//! # Example
//!
//! ```rust,ignore
//! use reis_sync::cache::{CacheStore, Partition, CURRENT_KEY};
//!
//! let store = CacheStore::open("data/reis-cache.db")?;
//! let exams: Option<Vec<ExamSubject>> = store.get(Partition::Exams, CURRENT_KEY)?;
//! ```

pub mod subject;

pub use subject::{CacheEntry, EntryStatus, StoredValue, SubjectCache, SubjectCaches};

use crate::models::Language;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Key of the single global snapshot in a partition
pub const CURRENT_KEY: &str = "current";

/// Key of the last completed sync timestamp in [`Partition::Meta`]
pub const LAST_SYNC_KEY: &str = "last_sync";

const EVENT_CAPACITY: usize = 64;

/// Cache store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Named storage partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Schedule,
    Exams,
    Subjects,
    Files,
    Assessments,
    Syllabuses,
    SuccessRates,
    Classmates,
    Meta,
}

impl Partition {
    pub const ALL: [Partition; 9] = [
        Self::Schedule,
        Self::Exams,
        Self::Subjects,
        Self::Files,
        Self::Assessments,
        Self::Syllabuses,
        Self::SuccessRates,
        Self::Classmates,
        Self::Meta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Exams => "exams",
            Self::Subjects => "subjects",
            Self::Files => "files",
            Self::Assessments => "assessments",
            Self::Syllabuses => "syllabuses",
            Self::SuccessRates => "success_rates",
            Self::Classmates => "classmates",
            Self::Meta => "meta",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Change notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A full sync finished (possibly partially)
    SyncCompleted { last_sync: DateTime<Utc> },
    /// The active UI language changed
    LanguageChanged(Language),
    /// A single entry was removed
    Invalidated { partition: Partition, key: String },
}

/// SQLite-backed snapshot store
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection. Writes are
/// last-write-wins per `(partition, key)`.
pub struct CacheStore {
    conn: Mutex<Connection>,
    language: RwLock<Language>,
    events: broadcast::Sender<StoreEvent>,
}

impl CacheStore {
    /// Open (or create) a store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "Cache store opened");
        Ok(store)
    }

    /// In-memory store (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    partition TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    language TEXT,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (partition, key)
                );
                "#,
        )?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            language: RwLock::new(Language::default()),
            events,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Read a persisted document
    pub fn get<T: DeserializeOwned>(&self, partition: Partition, key: &str) -> Result<Option<T>, StoreError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM snapshots WHERE partition = ?1 AND key = ?2",
                params![partition.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| serde_json::from_str(&json)).transpose().map_err(Into::into)
    }

    /// Write a document without a language tag
    pub fn set<T: Serialize + ?Sized>(&self, partition: Partition, key: &str, value: &T) -> Result<(), StoreError> {
        self.write(partition, key, value, None)
    }

    /// Write a document produced in `lang`
    pub fn set_tagged<T: Serialize + ?Sized>(
        &self,
        partition: Partition,
        key: &str,
        value: &T,
        lang: Language,
    ) -> Result<(), StoreError> {
        self.write(partition, key, value, Some(lang))
    }

    fn write<T: Serialize + ?Sized>(
        &self,
        partition: Partition,
        key: &str,
        value: &T,
        lang: Option<Language>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
                INSERT INTO snapshots (partition, key, value, language, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(partition, key) DO UPDATE SET
                    value = excluded.value,
                    language = excluded.language,
                    updated_at = excluded.updated_at
                "#,
            params![
                partition.as_str(),
                key,
                json,
                lang.map(|l| l.as_str()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Language tag of a stored entry, if any
    pub fn language_of(&self, partition: Partition, key: &str) -> Result<Option<Language>, StoreError> {
        let conn = self.lock()?;
        let tag: Option<Option<String>> = conn
            .query_row(
                "SELECT language FROM snapshots WHERE partition = ?1 AND key = ?2",
                params![partition.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tag.flatten().and_then(|t| t.parse().ok()))
    }

    /// Remove an entry and notify subscribers
    pub fn delete(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
        let removed = {
            let conn = self.lock()?;
            conn.execute(
                "DELETE FROM snapshots WHERE partition = ?1 AND key = ?2",
                params![partition.as_str(), key],
            )?
        };
        if removed > 0 {
            self.notify(StoreEvent::Invalidated {
                partition,
                key: key.to_string(),
            });
        }
        Ok(removed > 0)
    }

    /// All keys of a partition in sorted order
    pub fn keys(&self, partition: Partition) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM snapshots WHERE partition = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![partition.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Timestamp of the last completed sync
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get(Partition::Meta, LAST_SYNC_KEY)
    }

    pub fn active_language(&self) -> Language {
        self.language.read().map(|l| *l).unwrap_or_default()
    }

    /// Switch the active UI language; subscribers are told only on change
    pub fn set_language(&self, lang: Language) {
        let changed = match self.language.write() {
            Ok(mut current) => std::mem::replace(&mut *current, lang) != lang,
            Err(_) => {
                tracing::warn!("Language lock poisoned, keeping previous language");
                false
            }
        };
        if changed {
            tracing::info!(lang = %lang, "Active language changed");
            self.notify(StoreEvent::LanguageChanged(lang));
        }
    }

    /// Receive store events; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
