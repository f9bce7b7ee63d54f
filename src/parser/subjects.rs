//! Enrolled-subject list (`/auth/student/list.pl`)

use super::{element_text, selector};
use crate::models::{SubjectInfo, SubjectsData};
use crate::utils::{query_number, resolve_link};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SUBJECT_ROWS: LazyLock<Selector> = selector!("#tmtab_1 tr.uis-hl-table");
static SYLLABUS_LINK: LazyLock<Selector> = selector!("a[href*=\"/auth/katalog/syllabus.pl\"]");
static FOLDER_LINK: LazyLock<Selector> = selector!("a[href*=\"dok_server/slozka.pl\"]");
static ANCHORS: LazyLock<Selector> = selector!("a[href]");

static TRAILING_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]+\)\s*$").expect("Invalid regex pattern"));

/// Parse the subject table into subjects keyed by course code
///
/// Rows without both a syllabus link and a document folder link are skipped.
pub fn parse_subject_list(html: &str, base_url: &str, fetched_at: DateTime<Utc>) -> SubjectsData {
    let document = Html::parse_document(html);
    let mut data = BTreeMap::new();

    for row in document.select(&SUBJECT_ROWS) {
        let (Some(syllabus), Some(folder)) = (
            row.select(&SYLLABUS_LINK).next(),
            row.select(&FOLDER_LINK).next(),
        ) else {
            continue;
        };

        let full_name = element_text(syllabus);
        let Some(subject_code) = full_name.split_whitespace().next().map(str::to_string) else {
            continue;
        };

        let subject_id = syllabus
            .value()
            .attr("href")
            .and_then(|href| query_number(href, "predmet"));
        let folder_url = folder
            .value()
            .attr("href")
            .map(|href| resolve_link(base_url, href));
        let skupina_id = row
            .select(&ANCHORS)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| query_number(href, "skupina"));

        let display_name = TRAILING_PARENS.replace(&full_name, "").trim().to_string();

        data.insert(
            subject_code.clone(),
            SubjectInfo {
                display_name,
                full_name,
                subject_code,
                subject_id,
                skupina_id,
                folder_url,
                fetched_at,
            },
        );
    }

    tracing::debug!(subjects = data.len(), "Parsed subject list");

    SubjectsData {
        version: SubjectsData::VERSION,
        last_updated: fetched_at,
        data,
    }
}
