//! Continuous assessment table (`list.pl?...;test=1`)
//!
//! Columns are located by their header text rather than by position since the
//! portal inserts optional columns depending on the subject.

use super::{element_text, selector};
use crate::models::Assessment;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static TABLES: LazyLock<Selector> = selector!("table");
static ROWS: LazyLock<Selector> = selector!("tr");
static HEADERS: LazyLock<Selector> = selector!("th");
static CELLS: LazyLock<Selector> = selector!("td");

#[derive(Debug, Default)]
struct Columns {
    name: Option<usize>,
    score: Option<usize>,
    max_score: Option<usize>,
    success_rate: Option<usize>,
    date: Option<usize>,
    teacher: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Option<Self> {
        let find = |keys: &[&str]| {
            headers.iter().position(|h| {
                let h = h.to_lowercase();
                keys.iter().any(|k| h.contains(k))
            })
        };
        let columns = Self {
            name: find(&["název", "name", "title"]),
            max_score: find(&["max"]),
            score: headers.iter().position(|h| {
                let h = h.to_lowercase();
                (h.contains("bod") || h.contains("point") || h.contains("score")) && !h.contains("max")
            }),
            success_rate: find(&["úspěšnost", "success", "%"]),
            date: find(&["datum", "date", "odevzd", "submitted"]),
            teacher: find(&["vyučující", "hodnotil", "teacher", "evaluated"]),
        };
        (columns.name.is_some() && columns.score.is_some()).then_some(columns)
    }
}

/// Parse every assessment row on the page; an unrecognized page yields nothing
pub fn parse_assessments(html: &str) -> Vec<Assessment> {
    let document = Html::parse_document(html);

    for table in document.select(&TABLES) {
        let headers: Vec<String> = table.select(&HEADERS).map(element_text).collect();
        let Some(columns) = Columns::from_headers(&headers) else {
            continue;
        };

        return table
            .select(&ROWS)
            .filter_map(|row| parse_row(row, &columns))
            .collect();
    }

    tracing::debug!("No assessment table found");
    Vec::new()
}

fn parse_row(row: ElementRef<'_>, columns: &Columns) -> Option<Assessment> {
    let cells: Vec<String> = row.select(&CELLS).map(element_text).collect();
    if cells.is_empty() {
        return None;
    }
    let cell = |index: Option<usize>| index.and_then(|i| cells.get(i)).cloned().unwrap_or_default();

    let name = cell(columns.name);
    if name.is_empty() {
        return None;
    }

    // "7,5 / 10" carries both values in the score column
    let score_text = cell(columns.score);
    let (score, inline_max) = match score_text.split_once('/') {
        Some((score, max)) => (parse_number(score), Some(parse_number(max))),
        None => (parse_number(&score_text), None),
    };
    let max_score = columns
        .max_score
        .map(|i| parse_number(&cell(Some(i))))
        .or(inline_max)
        .unwrap_or_default();

    let success_rate = match columns.success_rate {
        Some(i) => parse_number(&cell(Some(i))),
        None if max_score > 0.0 => (score / max_score * 100.0).round(),
        None => 0.0,
    };

    Some(Assessment {
        name,
        score,
        max_score,
        success_rate,
        submitted_date: cell(columns.date),
        teacher: cell(columns.teacher),
    })
}

/// Parse a Czech or English formatted number, ignoring units
fn parse_number(text: &str) -> f64 {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse().unwrap_or(0.0)
}
