//! Per-subject, language-aware sub-caches
//!
//! Each [`SubjectCache`] keeps an in-memory [`CacheEntry`] per course code on
//! top of one store partition. A read for the active language that finds no
//! matching value fetches both languages at once and persists them together,
//! so switching the UI language later is served without network traffic.

use super::{CacheStore, Partition, StoreEvent};
use crate::models::{Assessment, Classmate, Language, ParsedFile, SubjectSuccessRate, Syllabus};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Persisted per-subject value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue<T> {
    /// Both languages fetched together
    Dual {
        cz: T,
        en: T,
        #[serde(rename = "fetchedAt")]
        fetched_at: DateTime<Utc>,
    },
    /// A value produced in a single language
    Tagged {
        language: Language,
        value: T,
        #[serde(rename = "fetchedAt")]
        fetched_at: DateTime<Utc>,
    },
}

impl<T> StoredValue<T> {
    pub fn tagged(language: Language, value: T) -> Self {
        Self::Tagged {
            language,
            value,
            fetched_at: Utc::now(),
        }
    }

    pub fn dual(cz: T, en: T) -> Self {
        Self::Dual {
            cz,
            en,
            fetched_at: Utc::now(),
        }
    }

    /// Fold a single-language value into what is already stored
    ///
    /// The other language's half of `existing` is kept, together with its
    /// older fetch time.
    pub fn merge(existing: Option<Self>, language: Language, value: T) -> Self {
        let (kept, fetched_at) = match existing {
            Some(Self::Dual { cz, en, fetched_at }) => match language {
                Language::Cz => (en, fetched_at),
                Language::En => (cz, fetched_at),
            },
            Some(Self::Tagged {
                language: other,
                value: kept,
                fetched_at,
            }) if other != language => (kept, fetched_at),
            _ => return Self::tagged(language, value),
        };
        let (cz, en) = match language {
            Language::Cz => (value, kept),
            Language::En => (kept, value),
        };
        Self::Dual { cz, en, fetched_at }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        match self {
            Self::Dual { fetched_at, .. } | Self::Tagged { fetched_at, .. } => *fetched_at,
        }
    }

    /// Language recorded next to the value in the store
    pub fn language_tag(&self, active: Language) -> Language {
        match self {
            Self::Dual { .. } => active,
            Self::Tagged { language, .. } => *language,
        }
    }

    /// Value for `lang`, if this entry holds one
    pub fn for_language(&self, lang: Language) -> Option<&T> {
        match self {
            Self::Dual { cz, .. } if lang == Language::Cz => Some(cz),
            Self::Dual { en, .. } => Some(en),
            Self::Tagged { language, value, .. } => (*language == lang).then_some(value),
        }
    }

    /// Value for `lang`, falling back to whatever language is stored
    pub fn prefer(self, lang: Language) -> T {
        match self {
            Self::Dual { cz, en, .. } => match lang {
                Language::Cz => cz,
                Language::En => en,
            },
            Self::Tagged { value, .. } => value,
        }
    }
}

/// Load state of one key
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus<T> {
    Loading,
    Ready(T),
    Error(String),
}

impl<T> EntryStatus<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub status: EntryStatus<T>,
    pub language: Option<Language>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Language-aware cache over one partition
pub struct SubjectCache<T> {
    store: Arc<CacheStore>,
    partition: Partition,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    max_age: Duration,
}

impl<T> SubjectCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<CacheStore>, partition: Partition, max_age: Duration) -> Self {
        Self {
            store,
            partition,
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // Entries hold no invariants a panic could break halfway
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.max_age) {
            Ok(max_age) => Utc::now() - fetched_at < max_age,
            Err(_) => true,
        }
    }

    fn settle(&self, key: &str, status: EntryStatus<T>, lang: Language, fetched_at: Option<DateTime<Utc>>) -> EntryStatus<T> {
        self.entries().insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                status: status.clone(),
                language: Some(lang),
                fetched_at,
            },
        );
        status
    }

    /// Return the value for the active language, loading it when needed
    ///
    /// Calls made while the key is loading, or while a fresh entry for the
    /// active language exists, never reach `load`.
    pub async fn fetch<F, Fut, E>(&self, key: &str, load: F) -> EntryStatus<T>
    where
        F: Fn(Language) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let load = &load;
        self.fetch_with(key, move || async move {
            let (cz, en) = tokio::join!(load(Language::Cz), load(Language::En));
            (cz.map_err(|e| e.to_string()), en.map_err(|e| e.to_string()))
        })
        .await
    }

    /// [`fetch`](Self::fetch) for values that read the same in both languages
    ///
    /// One load fills both halves of the stored entry.
    pub async fn fetch_shared<F, Fut, E>(&self, key: &str, load: F) -> EntryStatus<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.fetch_with(key, move || async move {
            match load().await {
                Ok(value) => (Ok(value.clone()), Ok(value)),
                Err(e) => {
                    let message = e.to_string();
                    (Err(message.clone()), Err(message))
                }
            }
        })
        .await
    }

    async fn fetch_with<F, Fut>(&self, key: &str, load_both: F) -> EntryStatus<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (Result<T, String>, Result<T, String>)>,
    {
        let lang = self.store.active_language();

        {
            let mut entries = self.entries();
            if let Some(entry) = entries.get(key) {
                match &entry.status {
                    EntryStatus::Loading => return EntryStatus::Loading,
                    EntryStatus::Ready(_)
                        if entry.language == Some(lang)
                            && entry.fetched_at.is_some_and(|at| self.is_fresh(at)) =>
                    {
                        return entry.status.clone();
                    }
                    _ => {}
                }
            }
            entries.insert(
                key.to_string(),
                CacheEntry {
                    key: key.to_string(),
                    status: EntryStatus::Loading,
                    language: Some(lang),
                    fetched_at: None,
                },
            );
        }

        match self.store.get::<StoredValue<T>>(self.partition, key) {
            Ok(Some(stored)) if self.is_fresh(stored.fetched_at()) => {
                if let Some(value) = stored.for_language(lang) {
                    tracing::debug!(partition = %self.partition, key, "Subject cache hit");
                    return self.settle(key, EntryStatus::Ready(value.clone()), lang, Some(stored.fetched_at()));
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(partition = %self.partition, key, error = %e, "Failed to read cached entry"),
        }

        tracing::debug!(partition = %self.partition, key, lang = %lang, "Subject cache miss, fetching both languages");
        let (cz, en) = load_both().await;

        let (stored, status) = match (cz, en) {
            (Ok(cz), Ok(en)) => {
                let value = if lang == Language::Cz { cz.clone() } else { en.clone() };
                (Some(StoredValue::dual(cz, en)), EntryStatus::Ready(value))
            }
            (cz, en) => {
                let (active, other) = if lang == Language::Cz { (cz, en) } else { (en, cz) };
                if let Err(e) = &other {
                    tracing::warn!(partition = %self.partition, key, error = %e, "Secondary language fetch failed");
                }
                match active {
                    Ok(value) => {
                        let existing = self.store.get::<StoredValue<T>>(self.partition, key).ok().flatten();
                        (Some(StoredValue::merge(existing, lang, value.clone())), EntryStatus::Ready(value))
                    }
                    Err(e) => (None, EntryStatus::Error(e)),
                }
            }
        };

        let fetched_at = stored.as_ref().map(StoredValue::fetched_at);
        if let Some(stored) = &stored {
            if let Err(e) = self.store.set_tagged(self.partition, key, stored, stored.language_tag(lang)) {
                tracing::warn!(partition = %self.partition, key, error = %e, "Failed to persist entry");
            }
        }

        self.settle(key, status, lang, fetched_at)
    }

    /// Current in-memory entry
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries().get(key).cloned()
    }

    /// Any value available for immediate display, fresh or not
    pub fn stale(&self, key: &str) -> Option<T> {
        let lang = self.store.active_language();
        if let Some(entry) = self.entries().get(key) {
            if let EntryStatus::Ready(value) = &entry.status {
                if entry.language == Some(lang) {
                    return Some(value.clone());
                }
            }
        }
        match self.store.get::<StoredValue<T>>(self.partition, key) {
            Ok(stored) => stored.map(|s| s.prefer(lang)),
            Err(e) => {
                tracing::warn!(partition = %self.partition, key, error = %e, "Failed to read stale entry");
                None
            }
        }
    }

    /// Drop a key from memory and from the store
    pub fn invalidate(&self, key: &str) {
        self.entries().remove(key);
        if let Err(e) = self.store.delete(self.partition, key) {
            tracing::warn!(partition = %self.partition, key, error = %e, "Failed to delete entry");
        }
    }

    /// Forget every settled entry; in-flight loads keep their slot
    pub fn clear(&self) {
        self.entries().retain(|_, entry| entry.status.is_loading());
    }

    pub fn on_store_event(&self, event: &StoreEvent) {
        match event {
            StoreEvent::LanguageChanged(lang) => {
                self.entries()
                    .retain(|_, entry| entry.status.is_loading() || entry.language == Some(*lang));
            }
            StoreEvent::Invalidated { partition, key } if *partition == self.partition => {
                self.entries().remove(key);
            }
            StoreEvent::SyncCompleted { .. } => self.clear(),
            StoreEvent::Invalidated { .. } => {}
        }
    }
}

/// The per-subject caches consumers read from
pub struct SubjectCaches {
    pub files: SubjectCache<Vec<ParsedFile>>,
    pub assessments: SubjectCache<Vec<Assessment>>,
    pub syllabus: SubjectCache<Syllabus>,
    pub success_rates: SubjectCache<SubjectSuccessRate>,
    pub classmates: SubjectCache<Vec<Classmate>>,
}

impl SubjectCaches {
    pub fn new(store: Arc<CacheStore>, max_age: Duration) -> Self {
        Self {
            files: SubjectCache::new(store.clone(), Partition::Files, max_age),
            assessments: SubjectCache::new(store.clone(), Partition::Assessments, max_age),
            syllabus: SubjectCache::new(store.clone(), Partition::Syllabuses, max_age),
            success_rates: SubjectCache::new(store.clone(), Partition::SuccessRates, max_age),
            classmates: SubjectCache::new(store, Partition::Classmates, max_age),
        }
    }

    pub fn on_store_event(&self, event: &StoreEvent) {
        self.files.on_store_event(event);
        self.assessments.on_store_event(event);
        self.syllabus.on_store_event(event);
        self.success_rates.on_store_event(event);
        self.classmates.on_store_event(event);
    }

    /// Apply store events until the store goes away
    pub fn spawn_listener(self: Arc<Self>, store: &CacheStore) -> JoinHandle<()> {
        let mut events = store.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.on_store_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subject caches lagged behind store events");
                        self.on_store_event(&StoreEvent::SyncCompleted { last_sync: Utc::now() });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
