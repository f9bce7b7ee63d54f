//! Domain fetchers and exam registration against the student portal
//!
//! [`PortalApi`] is what the sync orchestrator consumes; [`ExamRegistrar`] is
//! what the booking scheduler and bridge actions consume. [`HttpPortal`]
//! implements both on top of any [`PageFetcher`], so the same code runs with
//! a direct authenticated client or through the message bridge.

use crate::bridge::FetchOptions;
use crate::config::{PortalConfig, StudentConfig};
use crate::crawler::PageFetcher;
use crate::error::Error;
use crate::models::{
    Assessment, BlockLesson, Classmate, ExamActionResult, ExamSubject, Language, SemesterStats, SubjectInfo,
    SubjectSuccessRate, SubjectsData, Syllabus,
};
use crate::parser::success_rate::legacy_codes;
use crate::parser::{
    parse_assessments, parse_classmates, parse_course_links, parse_exam_list, parse_seminar_groups, parse_semesters,
    parse_stats_table, parse_subject_list, parse_syllabus, selector,
};
use crate::utils::error::{CrawlerError, ParseError};
use crate::utils::query_number;
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

/// Faculty whose statistics pages list the semesters
const STATS_FACULTY: u32 = 2;

/// Error phrases the exam page shows when a registration is refused
const TERM_FULL: &str = "Termín je již plný";
const CANNOT_REGISTER: &str = "nelze přihlásit";
/// Prefix of the portal's generic error message
const GENERIC_ERROR_PREFIX: &str = "Chyba:";

static UNREGISTER_LINK: LazyLock<Selector> = selector!(r#"a[href*="odhlasit_ihned=1"]"#);

/// Read access to every synchronized domain
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn fetch_schedule(&self, lang: Language) -> Result<Vec<BlockLesson>, CrawlerError>;

    async fn fetch_exams(&self, lang: Language) -> Result<Vec<ExamSubject>, CrawlerError>;

    async fn fetch_subjects(&self, lang: Language) -> Result<SubjectsData, CrawlerError>;

    async fn fetch_assessments(
        &self,
        subject: &SubjectInfo,
        lang: Language,
    ) -> Result<Vec<Assessment>, CrawlerError>;

    async fn fetch_syllabus(&self, subject: &SubjectInfo, lang: Language) -> Result<Syllabus, CrawlerError>;

    /// Seminar group id per course code for the current period
    async fn fetch_seminar_groups(&self, lang: Language) -> Result<BTreeMap<String, String>, CrawlerError>;

    /// Students of the subject's seminar group
    async fn fetch_classmates(&self, subject: &SubjectInfo, lang: Language) -> Result<Vec<Classmate>, CrawlerError>;

    /// Pass rates of the subject over past semesters
    async fn fetch_success_rate(&self, subject: &SubjectInfo) -> Result<SubjectSuccessRate, CrawlerError>;
}

/// Registration side effects on exam terms
#[async_trait]
pub trait ExamRegistrar: Send + Sync {
    async fn register_exam(&self, term_id: &str) -> Result<ExamActionResult, Error>;

    async fn unregister_exam(&self, term_id: &str) -> Result<ExamActionResult, Error>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    #[serde(default)]
    block_lessons: Vec<BlockLesson>,
}

/// Portal access over HTTP pages
#[derive(Clone)]
pub struct HttpPortal {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    student: StudentConfig,
}

impl HttpPortal {
    pub fn new(fetcher: Arc<dyn PageFetcher>, portal: &PortalConfig, student: StudentConfig) -> Self {
        Self {
            fetcher,
            base_url: portal.base_url.trim_end_matches('/').to_string(),
            student,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn studium(&self) -> Result<&str, CrawlerError> {
        self.student
            .studium
            .as_deref()
            .ok_or_else(|| CrawlerError::MissingIdentifiers("studium".to_string()))
    }

    fn period_params(&self) -> Result<String, CrawlerError> {
        let studium = self.studium()?;
        Ok(match self.student.obdobi.as_deref() {
            Some(obdobi) => format!("studium={studium};obdobi={obdobi}"),
            None => format!("studium={studium}"),
        })
    }

    fn subject_id<'a>(subject: &'a SubjectInfo) -> Result<&'a str, CrawlerError> {
        subject
            .subject_id
            .as_deref()
            .ok_or_else(|| CrawlerError::MissingIdentifiers(format!("subject id of {}", subject.subject_code)))
    }

    fn exam_url(&self, term_id: &str, action: &str) -> Result<String, CrawlerError> {
        Ok(format!(
            "{}/auth/student/terminy_seznam.pl?termin={term_id};{};{action}=1;lang=cz",
            self.base_url,
            self.period_params()?
        ))
    }

    /// Form body of the timetable export request
    fn schedule_form(&self, user_id: &str, studium: &str, from: NaiveDate, to: NaiveDate) -> String {
        let obdobi = self.student.obdobi.as_deref().unwrap_or_default();
        let back = format!("../student/moje_studium.pl?_m=3110,studium={studium},obdobi={obdobi}");
        let from = from.format("%d.%m.%Y").to_string();
        let to = to.format("%d.%m.%Y").to_string();

        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("rozvrh_student", user_id)
            .append_pair("zpet", &back)
            .append_pair("rezervace", "0")
            .append_pair("poznamky_base", "1")
            .append_pair("poznamky_parovani", "1")
            .append_pair("poznamky_jiny_areal", "1")
            .append_pair("poznamky_dl_omez", "1")
            .append_pair("typ_vypisu", "konani")
            .append_pair("konani_od", &from)
            .append_pair("konani_do", &to)
            .append_pair("format", "json")
            .append_pair("nezvol_all", "2")
            .append_pair("poznamky", "1")
            .append_pair("poznamky_zmeny", "1")
            .append_pair("poznamky_dalsi_ucit", "1")
            .append_pair("zobraz", "1")
            .append_pair("zobraz2", "Zobrazit")
            .finish()
    }
}

/// Monday of the current week through Sunday of the following one
fn schedule_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - ChronoDuration::days(i64::from(today.weekday().num_days_from_monday()));
    (monday, monday + ChronoDuration::days(13))
}

/// Interpret the page returned after a registration request
pub fn registration_outcome(html: &str, term_id: &str) -> ExamActionResult {
    let document = Html::parse_document(html);
    let has_unregister_link = document
        .select(&UNREGISTER_LINK)
        .filter_map(|a| a.value().attr("href"))
        .any(|href| query_number(href, "termin").as_deref() == Some(term_id));
    let generic_error = document
        .root_element()
        .text()
        .any(|text| text.trim_start().starts_with(GENERIC_ERROR_PREFIX));
    let refused = html.contains(TERM_FULL) || html.contains(CANNOT_REGISTER) || generic_error;

    if has_unregister_link && !refused {
        ExamActionResult::ok()
    } else if html.contains(TERM_FULL) {
        ExamActionResult::failed("Termín je již plný.")
    } else if html.contains(CANNOT_REGISTER) {
        ExamActionResult::failed("Na tento termín se nelze přihlásit.")
    } else {
        ExamActionResult::failed("Registrace se nepodařila ověřit. Zkontrolujte v IS.")
    }
}

#[async_trait]
impl PortalApi for HttpPortal {
    async fn fetch_schedule(&self, _lang: Language) -> Result<Vec<BlockLesson>, CrawlerError> {
        let user_id = self
            .student
            .user_id
            .as_deref()
            .ok_or_else(|| CrawlerError::MissingIdentifiers("user id".to_string()))?;
        let studium = self.studium()?;
        let (from, to) = schedule_window(Local::now().date_naive());

        let url = format!("{}/auth/katalog/rozvrhy_view.pl", self.base_url);
        let options = FetchOptions::post_form(self.schedule_form(user_id, studium, from, to));
        let body = self.fetcher.fetch_page(&url, &options).await?;

        let response: ScheduleResponse = serde_json::from_str(&body).map_err(ParseError::from)?;
        tracing::debug!(lessons = response.block_lessons.len(), "Fetched schedule");
        Ok(response.block_lessons)
    }

    async fn fetch_exams(&self, lang: Language) -> Result<Vec<ExamSubject>, CrawlerError> {
        let url = format!(
            "{}/auth/student/terminy_seznam.pl?{};lang={}",
            self.base_url,
            self.period_params()?,
            lang.as_str()
        );
        let html = self.fetcher.get(&url).await?;
        Ok(parse_exam_list(&html, lang))
    }

    async fn fetch_subjects(&self, lang: Language) -> Result<SubjectsData, CrawlerError> {
        let url = format!("{}/auth/student/list.pl?lang={}", self.base_url, lang.as_str());
        let html = self.fetcher.get(&url).await?;
        Ok(parse_subject_list(&html, &self.base_url, Utc::now()))
    }

    async fn fetch_assessments(
        &self,
        subject: &SubjectInfo,
        lang: Language,
    ) -> Result<Vec<Assessment>, CrawlerError> {
        let url = format!(
            "{}/auth/student/list.pl?{};predmet={};test=1;lang={}",
            self.base_url,
            self.period_params()?,
            Self::subject_id(subject)?,
            lang.as_str()
        );
        let html = self.fetcher.get(&url).await?;
        Ok(parse_assessments(&html))
    }

    async fn fetch_syllabus(&self, subject: &SubjectInfo, lang: Language) -> Result<Syllabus, CrawlerError> {
        let subject_id = Self::subject_id(subject)?;
        let url = format!(
            "{}/auth/katalog/syllabus.pl?predmet={subject_id};lang={}",
            self.base_url,
            lang.as_str()
        );
        let html = self.fetcher.get(&url).await?;
        Ok(parse_syllabus(&html, lang, Some(subject_id)))
    }

    async fn fetch_seminar_groups(&self, lang: Language) -> Result<BTreeMap<String, String>, CrawlerError> {
        let url = format!(
            "{}/auth/student/spoluzaci.pl?{};lang={}",
            self.base_url,
            self.period_params()?,
            lang.as_str()
        );
        let html = self.fetcher.get(&url).await?;
        Ok(parse_seminar_groups(&html))
    }

    async fn fetch_classmates(&self, subject: &SubjectInfo, lang: Language) -> Result<Vec<Classmate>, CrawlerError> {
        let subject_id = Self::subject_id(subject)?;
        let group = subject
            .skupina_id
            .as_deref()
            .ok_or_else(|| CrawlerError::MissingIdentifiers(format!("seminar group of {}", subject.subject_code)))?;
        let url = format!(
            "{}/auth/student/spoluzaci.pl?predmet={subject_id};{};skupina={group};lang={}",
            self.base_url,
            self.period_params()?,
            lang.as_str()
        );
        let html = self.fetcher.get(&url).await?;
        Ok(parse_classmates(&html))
    }

    async fn fetch_success_rate(&self, subject: &SubjectInfo) -> Result<SubjectSuccessRate, CrawlerError> {
        let code = subject.subject_code.as_str();
        let mut codes = vec![code.to_string()];
        codes.extend(legacy_codes(code));

        let start = format!(
            "{}/auth/student/hodnoceni.pl?fakulta={STATS_FACULTY};lang=cz",
            self.base_url
        );
        let html = self.fetcher.get(&start).await?;
        let semesters = parse_semesters(&html, &self.base_url, Local::now().year());
        tracing::debug!(subject = code, semesters = semesters.len(), "Collecting success rates");

        let mut stats = Vec::new();
        for semester in semesters {
            let page = match self.fetcher.get(&semester.url).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(semester = %semester.name, error = %e, "Failed to load semester statistics");
                    continue;
                }
            };
            for (_, course_url) in parse_course_links(&page, &self.base_url, &codes) {
                let terms = match self.fetcher.get(&course_url).await {
                    Ok(course_page) => parse_stats_table(&course_page),
                    Err(e) => {
                        tracing::warn!(url = %course_url, error = %e, "Failed to load course statistics");
                        continue;
                    }
                };
                let Some(terms) = terms else { continue };
                stats.push(SemesterStats {
                    semester_name: semester.name.clone(),
                    semester_id: semester.id.clone(),
                    year: semester.year,
                    total_pass: terms.iter().map(|t| t.pass).sum(),
                    total_fail: terms.iter().map(|t| t.fail).sum(),
                    source_url: Some(course_url),
                    terms,
                });
            }
        }
        stats.sort_by(|a, b| b.year.cmp(&a.year));

        Ok(SubjectSuccessRate {
            course_code: code.to_string(),
            stats,
            last_updated: Utc::now(),
        })
    }
}

#[async_trait]
impl ExamRegistrar for HttpPortal {
    async fn register_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        let url = self.exam_url(term_id, "prihlasit_ihned")?;
        tracing::info!(term_id, "Registering for exam term");

        let html = self
            .fetcher
            .fetch_page(&url, &FetchOptions::get_once())
            .await
            .map_err(CrawlerError::from)?;
        let outcome = registration_outcome(&html, term_id);
        if outcome.success {
            tracing::info!(term_id, "Registration verified");
        } else {
            tracing::warn!(term_id, error = ?outcome.error, "Registration not confirmed");
        }
        Ok(outcome)
    }

    async fn unregister_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        let url = self.exam_url(term_id, "odhlasit_ihned")?;
        tracing::info!(term_id, "Unregistering from exam term");

        self.fetcher
            .fetch_page(&url, &FetchOptions::get_once())
            .await
            .map_err(CrawlerError::from)?;
        Ok(ExamActionResult::ok())
    }
}
