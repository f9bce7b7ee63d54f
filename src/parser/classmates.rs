//! Classmates pages (`/auth/student/spoluzaci.pl`)
//!
//! The overview page lists every enrolled subject with links to its groups;
//! the group page lists the students of one seminar group.

use super::{element_text, selector};
use crate::models::Classmate;
use crate::utils::query_number;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static OVERVIEW_ROWS: LazyLock<Selector> = selector!("#table_1 tr");
static GROUP_ROWS: LazyLock<Selector> = selector!("#tmtab_1 tr");
static CELLS: LazyLock<Selector> = selector!("td");
static GROUP_LINKS: LazyLock<Selector> = selector!("a[href*=\"skupina=\"]");
static PHOTO: LazyLock<Selector> = selector!("img");

/// Seminar group id per course code from the classmates overview
///
/// Only the "from the seminar" link counts; links filtered by teacher or
/// e-mail carry a group id too and are skipped.
pub fn parse_seminar_groups(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut groups = BTreeMap::new();

    for row in document.select(&OVERVIEW_ROWS) {
        let cells: Vec<_> = row.select(&CELLS).collect();
        if cells.len() < 2 {
            continue;
        }
        let Some(code) = element_text(cells[0]).split_whitespace().next().map(str::to_string) else {
            continue;
        };

        let group = row
            .select(&GROUP_LINKS)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| !href.contains("vyucujici=") && !href.contains("email="))
            .find_map(|href| query_number(href, "skupina"));
        if let Some(group) = group {
            groups.insert(code, group);
        }
    }

    tracing::debug!(groups = groups.len(), "Parsed seminar groups");
    groups
}

/// Students of one seminar group
///
/// Columns: hidden number, number, photo, name, study info, e-mail icon.
pub fn parse_classmates(html: &str) -> Vec<Classmate> {
    let document = Html::parse_document(html);

    document
        .select(&GROUP_ROWS)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&CELLS).collect();
            if cells.len() < 5 {
                return None;
            }
            let name = element_text(cells[3]);
            if name.is_empty() {
                return None;
            }

            let photo_url = cells[2]
                .select(&PHOTO)
                .next()
                .and_then(|img| img.value().attr("src"))
                .unwrap_or_default()
                .to_string();
            let person_id = query_number(&photo_url, "id")
                .and_then(|id| id.parse().ok())
                .unwrap_or(0);

            Some(Classmate {
                person_id,
                photo_url,
                name,
                study_info: element_text(cells[4]),
            })
        })
        .collect()
}
