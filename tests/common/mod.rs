//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use reis_sync::bridge::FetchOptions;
use reis_sync::crawler::PageFetcher;
use reis_sync::error::{Error, FetchError};
use reis_sync::models::{
    Assessment, BlockLesson, Classmate, ExamActionResult, ExamSection, ExamSubject, ExamTerm, Language, SectionStatus,
    SemesterStats, SubjectInfo, SubjectSuccessRate, SubjectsData, Syllabus,
};
use reis_sync::portal::{ExamRegistrar, PortalApi};
use reis_sync::utils::error::CrawlerError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const BASE: &str = "https://is.mendelu.cz";

/// Absolute folder URL for a document-server folder id
pub fn folder_url(id: u32) -> String {
    format!("{BASE}/auth/dok_server/slozka.pl?id={id}")
}

/// One listing row; `href` is relative to the document server
pub fn listing_row(name: &str, href: &str, mime: &str) -> String {
    format!(
        r#"<tr class="uis-hl-table lbn">
             <td class="UISTMNumberCell">1</td>
             <td></td>
             <td><a href="{href}"><img sysid="mime-{mime}"></a> {name}</td>
             <td>comment</td><td>Novák</td><td>01.10.2025</td>
           </tr>"#
    )
}

/// A folder page built from rows plus optional pagination anchors
pub fn folder_page(rows: &[String], pages: &[(&str, &str)]) -> String {
    let anchors: String = pages
        .iter()
        .map(|(label, href)| format!(r#"<a href="{href}">{label}</a> "#))
        .collect();
    format!(
        "<html><body><table>{}</table><div>{anchors}</div></body></html>",
        rows.join("\n")
    )
}

/// Page fetcher serving canned pages keyed by exact URL
#[derive(Default)]
pub struct MapFetcher {
    pages: Mutex<HashMap<String, Result<String, u16>>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.lock().unwrap().insert(url.into(), Ok(html.into()));
        self
    }

    pub fn failing(self, url: impl Into<String>, status: u16) -> Self {
        self.pages.lock().unwrap().insert(url.into(), Err(status));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch_page(&self, url: &str, _options: &FetchOptions) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.lock().unwrap().get(url).cloned();
        match page {
            Some(Ok(html)) => Ok(html),
            Some(Err(status)) => Err(FetchError::from_status(status)),
            None => Err(FetchError::from_status(404)),
        }
    }
}

pub fn subject(code: &str, subject_id: Option<&str>, folder: Option<String>) -> SubjectInfo {
    SubjectInfo {
        display_name: code.to_string(),
        full_name: format!("{code} full name"),
        subject_code: code.to_string(),
        subject_id: subject_id.map(str::to_string),
        skupina_id: None,
        folder_url: folder,
        fetched_at: Utc::now(),
    }
}

pub fn subjects_data(subjects: Vec<SubjectInfo>) -> SubjectsData {
    SubjectsData {
        version: SubjectsData::VERSION,
        last_updated: Utc::now(),
        data: subjects
            .into_iter()
            .map(|s| (s.subject_code.clone(), s))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn lesson(code: &str) -> BlockLesson {
    BlockLesson {
        id: format!("{code}-1"),
        date: "13.10.2025".to_string(),
        start_time: "08:00".to_string(),
        end_time: "09:50".to_string(),
        course_code: code.to_string(),
        course_name: format!("{code} lecture"),
        ..Default::default()
    }
}

pub fn exam_term(id: &str, registration_start: Option<&str>) -> ExamTerm {
    ExamTerm {
        id: id.to_string(),
        date: "20.01.2026".to_string(),
        time: "09:00".to_string(),
        capacity: "3/20".to_string(),
        room: "Q01".to_string(),
        teacher: "Novák".to_string(),
        registration_start: registration_start.map(str::to_string),
        ..Default::default()
    }
}

pub fn exam_subject(section_id: &str, terms: Vec<ExamTerm>) -> ExamSubject {
    ExamSubject {
        id: "EBC-ALG".to_string(),
        name: "Algorithms".to_string(),
        code: "EBC-ALG".to_string(),
        sections: vec![ExamSection {
            id: section_id.to_string(),
            name: "Exam".to_string(),
            status: SectionStatus::Open,
            registered_term: None,
            terms,
        }],
    }
}

/// Scripted portal; each domain fails when its flag is set
pub struct FakePortal {
    pub subjects: SubjectsData,
    pub exams: Vec<ExamSubject>,
    pub fail_schedule: bool,
    pub fail_exams: bool,
    pub fail_subjects: bool,
    pub fail_assessments_for: Vec<String>,
    pub seminar_groups: BTreeMap<String, String>,
    pub delay: Duration,
    pub assessment_delay: Duration,
    pub schedule_calls: AtomicUsize,
    pub assessment_calls: AtomicUsize,
    pub success_rate_calls: AtomicUsize,
    /// Czech assessment loads running right now, one per subject in flight
    pub subjects_in_flight: AtomicUsize,
    pub peak_subjects_in_flight: AtomicUsize,
}

impl FakePortal {
    pub fn new(subjects: SubjectsData) -> Self {
        Self {
            subjects,
            exams: Vec::new(),
            fail_schedule: false,
            fail_exams: false,
            fail_subjects: false,
            fail_assessments_for: Vec::new(),
            seminar_groups: BTreeMap::new(),
            delay: Duration::ZERO,
            assessment_delay: Duration::ZERO,
            schedule_calls: AtomicUsize::new(0),
            assessment_calls: AtomicUsize::new(0),
            success_rate_calls: AtomicUsize::new(0),
            subjects_in_flight: AtomicUsize::new(0),
            peak_subjects_in_flight: AtomicUsize::new(0),
        }
    }

    fn server_error() -> CrawlerError {
        CrawlerError::Fetch(FetchError::ServerError(500))
    }
}

#[async_trait]
impl PortalApi for FakePortal {
    async fn fetch_schedule(&self, _lang: Language) -> Result<Vec<BlockLesson>, CrawlerError> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_schedule {
            return Err(Self::server_error());
        }
        Ok(vec![lesson("EBC-ALG")])
    }

    async fn fetch_exams(&self, _lang: Language) -> Result<Vec<ExamSubject>, CrawlerError> {
        if self.fail_exams {
            return Err(Self::server_error());
        }
        Ok(self.exams.clone())
    }

    async fn fetch_subjects(&self, _lang: Language) -> Result<SubjectsData, CrawlerError> {
        if self.fail_subjects {
            return Err(Self::server_error());
        }
        Ok(self.subjects.clone())
    }

    async fn fetch_assessments(
        &self,
        subject: &SubjectInfo,
        lang: Language,
    ) -> Result<Vec<Assessment>, CrawlerError> {
        self.assessment_calls.fetch_add(1, Ordering::SeqCst);
        if lang == Language::Cz {
            let now = self.subjects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_subjects_in_flight.fetch_max(now, Ordering::SeqCst);
        }
        if !self.assessment_delay.is_zero() {
            tokio::time::sleep(self.assessment_delay).await;
        }
        if lang == Language::Cz {
            self.subjects_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail_assessments_for.contains(&subject.subject_code) {
            return Err(Self::server_error());
        }
        Ok(vec![Assessment {
            name: format!("{} test {lang}", subject.subject_code),
            score: 8.0,
            max_score: 10.0,
            success_rate: 80.0,
            ..Default::default()
        }])
    }

    async fn fetch_syllabus(&self, subject: &SubjectInfo, lang: Language) -> Result<Syllabus, CrawlerError> {
        Ok(Syllabus {
            version: Syllabus::VERSION,
            language: Some(lang),
            course_id: subject.subject_id.clone(),
            requirements_text: "Written exam".to_string(),
            requirements_table: Vec::new(),
        })
    }

    async fn fetch_seminar_groups(&self, _lang: Language) -> Result<BTreeMap<String, String>, CrawlerError> {
        Ok(self.seminar_groups.clone())
    }

    async fn fetch_classmates(&self, subject: &SubjectInfo, lang: Language) -> Result<Vec<Classmate>, CrawlerError> {
        Ok(vec![Classmate {
            person_id: 1,
            name: format!("{} classmate {lang}", subject.subject_code),
            ..Default::default()
        }])
    }

    async fn fetch_success_rate(&self, subject: &SubjectInfo) -> Result<SubjectSuccessRate, CrawlerError> {
        self.success_rate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SubjectSuccessRate {
            course_code: subject.subject_code.clone(),
            stats: vec![SemesterStats {
                semester_name: "ZS 2024/2025 - PEF".to_string(),
                year: 2024,
                total_pass: 30,
                total_fail: 10,
                ..Default::default()
            }],
            last_updated: Utc::now(),
        })
    }
}

/// Registrar recording every call, refusing terms listed in `refuse`
#[derive(Default)]
pub struct RecordingRegistrar {
    pub calls: Mutex<Vec<String>>,
    pub refuse: Vec<String>,
}

impl RecordingRegistrar {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExamRegistrar for RecordingRegistrar {
    async fn register_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        self.calls.lock().unwrap().push(format!("register:{term_id}"));
        if self.refuse.iter().any(|t| t == term_id) {
            return Ok(ExamActionResult::failed("Termín je již plný"));
        }
        Ok(ExamActionResult::ok())
    }

    async fn unregister_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        self.calls.lock().unwrap().push(format!("unregister:{term_id}"));
        Ok(ExamActionResult::ok())
    }
}
