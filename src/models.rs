// Core data structures shared by the bridge, sync engine and caches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Portal language. Serialized as the portal's own `cz` / `en` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Cz,
    En,
}

impl Language {
    /// Both languages, Czech first
    pub const ALL: [Language; 2] = [Language::Cz, Language::En];

    /// Value used in the portal `lang=` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cz => "cz",
            Self::En => "en",
        }
    }

    /// Locale code used for translated messages
    pub fn locale(&self) -> &'static str {
        match self {
            Self::Cz => "cs",
            Self::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cz" | "cs" | "cs-cz" | "czech" => Ok(Self::Cz),
            "en" | "en-us" | "en-gb" | "english" => Ok(Self::En),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// One downloadable (or navigable) link of a folder entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileAttachment {
    pub name: String,
    /// MIME type derived from the portal icon, e.g. `pdf` or `folder`
    #[serde(rename = "type")]
    pub mime_type: String,
    pub link: String,
}

/// A row of a document-server folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParsedFile {
    /// Display name of the folder the file was found in (empty for the root)
    pub subfolder: String,
    #[serde(rename = "file_name")]
    pub name: String,
    #[serde(rename = "file_comment")]
    pub comment: String,
    pub author: String,
    pub date: String,
    #[serde(rename = "files")]
    pub attachments: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl ParsedFile {
    /// First attachment, which carries the entry's identity
    pub fn primary_link(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.link.as_str())
    }
}

/// Result of parsing one folder page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderPage {
    pub files: Vec<ParsedFile>,
    /// Absolute URLs of the other pages of the same listing
    pub pagination_links: Vec<String>,
}

// ============================================================================
// Subjects
// ============================================================================

/// An enrolled subject as listed on the student's subject page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInfo {
    pub display_name: String,
    pub full_name: String,
    /// Course code such as `EBC-ALG`, used as the per-subject cache key
    pub subject_code: String,
    pub subject_id: Option<String>,
    pub skupina_id: Option<String>,
    pub folder_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// All subjects keyed by course code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubjectsData {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub data: BTreeMap<String, SubjectInfo>,
}

impl SubjectsData {
    pub const VERSION: u32 = 1;

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectInfo> {
        self.data.values()
    }
}

// ============================================================================
// Exams
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Registered,
    Available,
    #[default]
    Open,
}

/// A single exam date a student can register for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExamTerm {
    pub id: String,
    pub date: String,
    pub time: String,
    /// `occupied/total`
    pub capacity: String,
    pub full: bool,
    pub room: String,
    pub teacher: String,
    /// Portal format `DD.MM.YYYY HH:MM`
    pub registration_start: Option<String>,
    pub registration_end: Option<String>,
    pub can_register_now: bool,
}

/// The term a section is currently registered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTerm {
    pub id: String,
    pub date: String,
    pub time: String,
    pub room: String,
    pub teacher: String,
    pub deregistration_deadline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExamSection {
    pub id: String,
    pub name: String,
    pub status: SectionStatus,
    pub registered_term: Option<RegisteredTerm>,
    pub terms: Vec<ExamTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExamSubject {
    pub id: String,
    pub name: String,
    pub code: String,
    pub sections: Vec<ExamSection>,
}

/// Find a term by id across all subjects
pub fn find_term<'a>(subjects: &'a [ExamSubject], term_id: &str) -> Option<&'a ExamTerm> {
    subjects
        .iter()
        .flat_map(|s| s.sections.iter())
        .flat_map(|sec| sec.terms.iter())
        .find(|t| t.id == term_id)
}

/// Find a section by id across all subjects
pub fn find_section<'a>(subjects: &'a [ExamSubject], section_id: &str) -> Option<&'a ExamSection> {
    subjects
        .iter()
        .flat_map(|s| s.sections.iter())
        .find(|sec| sec.id == section_id)
}

/// Outcome of a register / unregister action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExamActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Per-subject details
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub success_rate: f64,
    pub submitted_date: String,
    pub teacher: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Syllabus {
    pub version: u32,
    pub language: Option<Language>,
    pub course_id: Option<String>,
    pub requirements_text: String,
    pub requirements_table: Vec<Vec<String>>,
}

impl Syllabus {
    pub const VERSION: u32 = 2;
}

/// A student enrolled in the same seminar group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Classmate {
    /// Portal person id, 0 when the photo link carries none
    pub person_id: u64,
    pub photo_url: String,
    pub name: String,
    pub study_info: String,
}

/// Grade counts of one exam term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GradeStats {
    #[serde(rename = "A")]
    pub a: u32,
    #[serde(rename = "B")]
    pub b: u32,
    #[serde(rename = "C")]
    pub c: u32,
    #[serde(rename = "D")]
    pub d: u32,
    #[serde(rename = "E")]
    pub e: u32,
    #[serde(rename = "F")]
    pub f: u32,
    /// Failed for not showing up
    #[serde(rename = "FN")]
    pub fn_: u32,
}

impl GradeStats {
    pub fn passed(&self) -> u32 {
        self.a + self.b + self.c + self.d + self.e
    }

    pub fn failed(&self) -> u32 {
        self.f + self.fn_
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TermStats {
    pub term: String,
    pub grades: GradeStats,
    pub pass: u32,
    pub fail: u32,
}

/// Results of one subject in one past semester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SemesterStats {
    pub semester_name: String,
    pub semester_id: String,
    pub year: i32,
    pub total_pass: u32,
    pub total_fail: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub terms: Vec<TermStats>,
}

/// Historical pass rates of a subject, newest semester first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSuccessRate {
    pub course_code: String,
    pub stats: Vec<SemesterStats>,
    pub last_updated: DateTime<Utc>,
}

impl SubjectSuccessRate {
    /// Share of passing results over every recorded semester
    pub fn pass_ratio(&self) -> Option<f64> {
        let pass: u32 = self.stats.iter().map(|s| s.total_pass).sum();
        let fail: u32 = self.stats.iter().map(|s| s.total_fail).sum();
        let total = pass + fail;
        (total > 0).then(|| f64::from(pass) / f64::from(total))
    }
}

/// A scheduled lesson as returned by the portal timetable endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlockLesson {
    #[serde(default)]
    pub id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub course_code: String,
    pub course_name: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default)]
    pub is_seminar: bool,
    #[serde(default)]
    pub study_id: String,
    #[serde(default)]
    pub period_id: String,
}

// ============================================================================
// Sync snapshot
// ============================================================================

/// Everything the isolated side needs to render, replaced wholesale per phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub schedule: Option<Vec<BlockLesson>>,
    pub exams: Option<Vec<ExamSubject>>,
    pub subjects: Option<SubjectsData>,
    #[serde(default)]
    pub files: BTreeMap<String, Vec<ParsedFile>>,
    #[serde(default)]
    pub assessments: BTreeMap<String, Vec<Assessment>>,
    #[serde(default)]
    pub syllabuses: BTreeMap<String, Syllabus>,
    #[serde(default)]
    pub classmates: BTreeMap<String, Vec<Classmate>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSnapshot {
    /// Whether at least one sync has completed
    pub fn has_synced(&self) -> bool {
        self.last_sync.is_some()
    }

    /// Select one part of the snapshot by its wire name
    pub fn part(&self, data_type: &str) -> Option<serde_json::Value> {
        let value = match data_type {
            "schedule" => serde_json::to_value(&self.schedule),
            "exams" => serde_json::to_value(&self.exams),
            "subjects" => serde_json::to_value(&self.subjects),
            "files" => serde_json::to_value(&self.files),
            "assessments" => serde_json::to_value(&self.assessments),
            "syllabuses" => serde_json::to_value(&self.syllabuses),
            "classmates" => serde_json::to_value(&self.classmates),
            "all" => serde_json::to_value(self),
            _ => return None,
        };
        value.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_serde_uses_portal_codes() {
        assert_eq!(serde_json::to_string(&Language::Cz).unwrap(), "\"cz\"");
        assert_eq!(serde_json::to_string(&Language::En).unwrap(), "\"en\"");
        assert_eq!("cs".parse::<Language>().unwrap(), Language::Cz);
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn test_parsed_file_wire_names() {
        let file = ParsedFile {
            name: "Lecture 1".into(),
            attachments: vec![FileAttachment {
                name: "l1.pdf".into(),
                mime_type: "pdf".into(),
                link: "https://is.mendelu.cz/a?download=1".into(),
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["file_name"], "Lecture 1");
        assert_eq!(json["files"][0]["type"], "pdf");
        assert!(json.get("language").is_none());
    }

    #[test]
    fn test_find_term_and_section() {
        let subjects = vec![ExamSubject {
            id: "1".into(),
            name: "Algorithms".into(),
            code: "EBC-ALG".into(),
            sections: vec![ExamSection {
                id: "s1".into(),
                name: "Exam".into(),
                terms: vec![ExamTerm {
                    id: "t9".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }];

        assert!(find_term(&subjects, "t9").is_some());
        assert!(find_term(&subjects, "t1").is_none());
        assert_eq!(find_section(&subjects, "s1").map(|s| s.name.as_str()), Some("Exam"));
    }

    #[test]
    fn test_success_rate_pass_ratio() {
        let grades = GradeStats {
            a: 2,
            e: 1,
            f: 1,
            ..Default::default()
        };
        let rate = SubjectSuccessRate {
            course_code: "EBC-ALG".into(),
            stats: vec![SemesterStats {
                total_pass: grades.passed(),
                total_fail: grades.failed(),
                ..Default::default()
            }],
            last_updated: Utc::now(),
        };
        assert_eq!(rate.pass_ratio(), Some(0.75));
        assert_eq!(serde_json::to_value(grades).unwrap()["FN"], 0);

        let empty = SubjectSuccessRate::default();
        assert_eq!(empty.pass_ratio(), None);
    }

    #[test]
    fn test_snapshot_part_selection() {
        let snapshot = SyncSnapshot::default();
        assert!(!snapshot.has_synced());
        assert_eq!(snapshot.part("schedule"), Some(serde_json::Value::Null));
        assert!(snapshot.part("all").is_some());
        assert!(snapshot.part("weather").is_none());
    }
}
