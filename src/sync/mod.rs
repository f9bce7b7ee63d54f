//! Background synchronization of every portal domain
//!
//! A sync runs in two phases:
//! - Phase 1 fetches schedule, exams and subjects concurrently. A failed
//!   domain keeps its previous value.
//! - Phase 2 fans out over the subjects under a concurrency limit. For each
//!   subject it crawls the document folder and fetches assessments and the
//!   syllabus, and lists the seminar group, each in both languages.
//!
//! Every finished unit is written to the [`CacheStore`] immediately. Snapshots
//! are published at the start, after Phase 1 and on completion.

use crate::cache::{
    CacheStore, EntryStatus, Partition, StoreError, StoreEvent, StoredValue, SubjectCaches, CURRENT_KEY, LAST_SYNC_KEY,
};
use crate::crawler::FolderCrawler;
use crate::metrics;
use crate::models::{
    Assessment, Classmate, Language, ParsedFile, SubjectInfo, SubjectSuccessRate, SubjectsData, Syllabus, SyncSnapshot,
};
use crate::portal::PortalApi;
use crate::throttle::ConcurrencyLimiter;
use crate::utils::error::CrawlerError;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

const UPDATE_CAPACITY: usize = 16;

/// Freshness of the on-demand caches unless configured otherwise
const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(300);

/// Summary of a finished sync
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Phase 1 domains whose fetch failed
    pub failed_domains: Vec<&'static str>,
    pub subjects_processed: usize,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        !self.failed_domains.is_empty()
    }
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another sync was already running; nothing was done
    Skipped,
}

/// Clears the syncing flag however the run ends
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct SubjectResult {
    code: String,
    files: Option<Vec<ParsedFile>>,
    assessments: Option<Vec<Assessment>>,
    syllabus: Option<Syllabus>,
    classmates: Option<Vec<Classmate>>,
}

/// Coordinates full syncs; at most one runs at a time
pub struct SyncOrchestrator {
    portal: Arc<dyn PortalApi>,
    crawler: FolderCrawler,
    store: Arc<CacheStore>,
    caches: Arc<SubjectCaches>,
    limiter: ConcurrencyLimiter,
    is_syncing: AtomicBool,
    snapshot: RwLock<SyncSnapshot>,
    updates: broadcast::Sender<SyncSnapshot>,
}

impl SyncOrchestrator {
    pub fn new(
        portal: Arc<dyn PortalApi>,
        crawler: FolderCrawler,
        store: Arc<CacheStore>,
        subject_concurrency: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            portal,
            crawler,
            caches: Arc::new(SubjectCaches::new(store.clone(), DEFAULT_CACHE_MAX_AGE)),
            store,
            limiter: ConcurrencyLimiter::new(subject_concurrency),
            is_syncing: AtomicBool::new(false),
            snapshot: RwLock::new(SyncSnapshot::default()),
            updates,
        }
    }

    /// Use `caches` for on-demand per-subject reads
    pub fn with_caches(mut self, caches: Arc<SubjectCaches>) -> Self {
        self.caches = caches;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn caches(&self) -> &Arc<SubjectCaches> {
        &self.caches
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSnapshot> {
        self.updates.subscribe()
    }

    /// Replace the snapshot with an edited copy and broadcast it
    async fn publish(&self, edit: impl FnOnce(&mut SyncSnapshot)) {
        let next = {
            let mut current = self.snapshot.write().await;
            let mut next = current.clone();
            edit(&mut next);
            *current = next.clone();
            next
        };
        // Nobody listening is fine
        let _ = self.updates.send(next);
    }

    /// Seed the snapshot from the persisted store
    pub async fn load_from_store(&self) -> Result<(), StoreError> {
        let lang = self.store.active_language();
        let mut snapshot = SyncSnapshot {
            schedule: self.store.get(Partition::Schedule, CURRENT_KEY)?,
            exams: self.store.get(Partition::Exams, CURRENT_KEY)?,
            subjects: self.store.get(Partition::Subjects, CURRENT_KEY)?,
            last_sync: self.store.last_sync()?,
            ..Default::default()
        };

        for key in self.store.keys(Partition::Files)? {
            if let Some(stored) = self.store.get::<StoredValue<Vec<ParsedFile>>>(Partition::Files, &key)? {
                snapshot.files.insert(key, stored.prefer(lang));
            }
        }
        for key in self.store.keys(Partition::Assessments)? {
            if let Some(stored) = self.store.get::<StoredValue<Vec<Assessment>>>(Partition::Assessments, &key)? {
                snapshot.assessments.insert(key, stored.prefer(lang));
            }
        }
        for key in self.store.keys(Partition::Syllabuses)? {
            if let Some(stored) = self.store.get::<StoredValue<Syllabus>>(Partition::Syllabuses, &key)? {
                snapshot.syllabuses.insert(key, stored.prefer(lang));
            }
        }
        for key in self.store.keys(Partition::Classmates)? {
            if let Some(stored) = self.store.get::<StoredValue<Vec<Classmate>>>(Partition::Classmates, &key)? {
                snapshot.classmates.insert(key, stored.prefer(lang));
            }
        }

        tracing::debug!(
            subjects = snapshot.files.len(),
            has_synced = snapshot.has_synced(),
            "Loaded snapshot from store"
        );
        *self.snapshot.write().await = snapshot;
        Ok(())
    }

    /// Run a full sync unless one is already in progress
    pub async fn sync_all(&self) -> SyncOutcome {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress, ignoring trigger");
            metrics::record_sync_skipped();
            return SyncOutcome::Skipped;
        }
        let guard = SyncingGuard(&self.is_syncing);
        let _timer = metrics::start_sync_timer();
        let started = Instant::now();
        let lang = self.store.active_language();

        tracing::info!(lang = %lang, "Sync started");
        self.publish(|s| {
            s.is_syncing = true;
            s.error = None;
        })
        .await;

        // Phase 1
        let (schedule, exams, subjects, groups) = tokio::join!(
            self.portal.fetch_schedule(lang),
            self.portal.fetch_exams(lang),
            self.portal.fetch_subjects(lang),
            self.portal.fetch_seminar_groups(lang),
        );
        let subjects = subjects.map(|data| with_seminar_groups(data, groups));

        let mut failed_domains = Vec::new();
        let schedule = self.settle_domain("schedule", Partition::Schedule, schedule, &mut failed_domains);
        let exams = self.settle_domain("exams", Partition::Exams, exams, &mut failed_domains);
        let subjects = self.settle_domain("subjects", Partition::Subjects, subjects, &mut failed_domains);

        let known_subjects = match &subjects {
            Some(fresh) => Some(fresh.clone()),
            None => self.previous_subjects().await,
        };
        self.publish(|s| {
            if schedule.is_some() {
                s.schedule = schedule;
            }
            if exams.is_some() {
                s.exams = exams;
            }
            if subjects.is_some() {
                s.subjects = subjects;
            }
        })
        .await;

        // Phase 2
        let subject_list: Vec<SubjectInfo> = known_subjects
            .map(|data| data.data.into_values().collect())
            .unwrap_or_default();
        let subjects_processed = subject_list.len();
        let results = self
            .limiter
            .run_all(subject_list, |subject| self.sync_subject(subject, lang))
            .await;

        let now = Utc::now();
        if let Err(e) = self.store.set(Partition::Meta, LAST_SYNC_KEY, &now) {
            tracing::warn!(error = %e, "Failed to record last sync time");
        }

        let error = (!failed_domains.is_empty()).then(|| format!("Failed to sync: {}", failed_domains.join(", ")));
        self.publish(|s| {
            for result in results {
                if let Some(files) = result.files {
                    s.files.insert(result.code.clone(), files);
                }
                if let Some(assessments) = result.assessments {
                    s.assessments.insert(result.code.clone(), assessments);
                }
                if let Some(syllabus) = result.syllabus {
                    s.syllabuses.insert(result.code.clone(), syllabus);
                }
                if let Some(classmates) = result.classmates {
                    s.classmates.insert(result.code, classmates);
                }
            }
            s.last_sync = Some(now);
            s.is_syncing = false;
            s.error = error;
        })
        .await;
        let completed = StoreEvent::SyncCompleted { last_sync: now };
        self.caches.on_store_event(&completed);
        self.store.notify(completed);
        // A trigger can only start once the completion snapshot is out
        drop(guard);
        metrics::record_sync_completed();

        let report = SyncReport {
            failed_domains,
            subjects_processed,
            duration: started.elapsed(),
        };
        tracing::info!(
            subjects = report.subjects_processed,
            failed = ?report.failed_domains,
            duration_ms = report.duration.as_millis() as u64,
            "Sync finished"
        );
        SyncOutcome::Completed(report)
    }

    /// Persist a Phase 1 result, or record the failure
    fn settle_domain<T: Serialize>(
        &self,
        domain: &'static str,
        partition: Partition,
        result: Result<T, CrawlerError>,
        failed: &mut Vec<&'static str>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                if let Err(e) = self.store.set(partition, CURRENT_KEY, &value) {
                    tracing::warn!(domain, error = %e, "Failed to persist domain");
                }
                Some(value)
            }
            Err(e) => {
                tracing::warn!(domain, error = %e, "Domain fetch failed, keeping previous value");
                metrics::record_domain_failure(domain);
                failed.push(domain);
                None
            }
        }
    }

    async fn previous_subjects(&self) -> Option<SubjectsData> {
        if let Some(subjects) = self.snapshot.read().await.subjects.clone() {
            return Some(subjects);
        }
        self.store.get(Partition::Subjects, CURRENT_KEY).ok().flatten()
    }

    /// Folder crawl, assessments and syllabus of one subject, concurrently
    ///
    /// Each unit is fetched in both languages and persisted as one entry, so
    /// the per-subject caches can switch language without refetching.
    async fn sync_subject(&self, subject: SubjectInfo, lang: Language) -> SubjectResult {
        let code = subject.subject_code.clone();

        let crawl = async {
            let folder_url = subject.folder_url.as_deref()?;
            self.sync_unit(&code, Partition::Files, lang, |l| self.crawler.crawl(folder_url, l))
                .await
        };
        let assessments = async {
            subject.subject_id.as_ref()?;
            self.sync_unit(&code, Partition::Assessments, lang, |l| {
                self.portal.fetch_assessments(&subject, l)
            })
            .await
        };
        let syllabus = async {
            subject.subject_id.as_ref()?;
            self.sync_unit(&code, Partition::Syllabuses, lang, |l| {
                self.portal.fetch_syllabus(&subject, l)
            })
            .await
        };
        let classmates = async {
            subject.subject_id.as_ref()?;
            subject.skupina_id.as_ref()?;
            self.sync_unit(&code, Partition::Classmates, lang, |l| {
                self.portal.fetch_classmates(&subject, l)
            })
            .await
        };
        let (files, assessments, syllabus, classmates) = tokio::join!(crawl, assessments, syllabus, classmates);

        SubjectResult {
            code,
            files,
            assessments,
            syllabus,
            classmates,
        }
    }

    /// Subject by course code from the latest known subject list
    async fn known_subject(&self, code: &str) -> Option<SubjectInfo> {
        self.previous_subjects().await?.data.remove(code)
    }

    /// Historical pass rates of a subject, loaded on first request
    pub async fn success_rate(&self, code: &str) -> EntryStatus<SubjectSuccessRate> {
        let Some(subject) = self.known_subject(code).await else {
            return EntryStatus::Error(format!("Unknown subject: {code}"));
        };
        self.caches
            .success_rates
            .fetch_shared(code, || self.portal.fetch_success_rate(&subject))
            .await
    }

    /// Seminar group members of a subject, from the cache or the portal
    pub async fn classmates(&self, code: &str) -> EntryStatus<Vec<Classmate>> {
        let Some(subject) = self.known_subject(code).await else {
            return EntryStatus::Error(format!("Unknown subject: {code}"));
        };
        self.caches
            .classmates
            .fetch(code, |l| self.portal.fetch_classmates(&subject, l))
            .await
    }

    /// Fetch one per-subject unit in both languages and store it
    ///
    /// Returns the value for `lang`, or the other language when only that
    /// one arrived.
    async fn sync_unit<T, F, Fut>(&self, code: &str, partition: Partition, lang: Language, load: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Language) -> Fut,
        Fut: Future<Output = Result<T, CrawlerError>>,
    {
        let (cz, en) = tokio::join!(load(Language::Cz), load(Language::En));
        let cz = self.unit(code, partition, Language::Cz, cz);
        let en = self.unit(code, partition, Language::En, en);

        let stored = match (cz, en) {
            (Some(cz), Some(en)) => StoredValue::dual(cz, en),
            (Some(value), None) => self.merge_stored(partition, code, Language::Cz, value),
            (None, Some(value)) => self.merge_stored(partition, code, Language::En, value),
            (None, None) => return None,
        };
        if let Err(e) = self.store.set_tagged(partition, code, &stored, stored.language_tag(lang)) {
            tracing::warn!(subject = %code, partition = %partition, error = %e, "Failed to persist subject data");
        }
        Some(stored.prefer(lang))
    }

    /// Keep the other language's half of an existing entry
    fn merge_stored<T>(&self, partition: Partition, code: &str, language: Language, value: T) -> StoredValue<T>
    where
        T: DeserializeOwned,
    {
        let existing = match self.store.get::<StoredValue<T>>(partition, code) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(subject = %code, partition = %partition, error = %e, "Failed to read stored subject data");
                None
            }
        };
        StoredValue::merge(existing, language, value)
    }

    /// Log and swallow a per-subject failure
    fn unit<T>(&self, code: &str, partition: Partition, lang: Language, result: Result<T, CrawlerError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                metrics::record_crawl_unit_failure();
                tracing::warn!(subject = %code, partition = %partition, lang = %lang, error = %e, "Subject sub-fetch failed");
                None
            }
        }
    }
}

/// Attach seminar group ids to the subjects they belong to
fn with_seminar_groups(
    mut subjects: SubjectsData,
    groups: Result<BTreeMap<String, String>, CrawlerError>,
) -> SubjectsData {
    match groups {
        Ok(groups) => {
            for (code, group) in groups {
                if let Some(subject) = subjects.data.get_mut(&code) {
                    subject.skupina_id = Some(group);
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to fetch seminar groups"),
    }
    subjects
}

/// Runs the orchestrator on startup and on a fixed interval
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    run_on_startup: bool,
    shutdown: watch::Sender<bool>,
}

impl SyncService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration, run_on_startup: bool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            interval,
            run_on_startup,
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Start the periodic loop
    pub fn start(&self) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let period = self.interval;
        let run_on_startup = self.run_on_startup;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            if !run_on_startup {
                // The first tick completes immediately
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let SyncOutcome::Completed(report) = orchestrator.sync_all().await {
                            if report.is_partial() {
                                tracing::warn!(failed = ?report.failed_domains, "Partial sync, retrying on next tick");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Sync service shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Sync now; a no-op while a sync is in flight
    pub async fn trigger(&self) -> SyncOutcome {
        self.orchestrator.sync_all().await
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
