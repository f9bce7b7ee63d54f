//! Course syllabus requirements (`/auth/katalog/syllabus.pl`)

use super::{element_text, selector};
use crate::models::{Language, Syllabus};
use crate::utils::normalize_whitespace;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static HEADER_CANDIDATES: LazyLock<Selector> = selector!("b, span, strong, h1, h2, h3");
static FIRST_CELL: LazyLock<Selector> = selector!("td");
static INNER_TABLE: LazyLock<Selector> = selector!("table");
static TABLE_ROWS: LazyLock<Selector> = selector!("tr");
static TABLE_CELLS: LazyLock<Selector> = selector!("th, td");

const TEXT_HEADER: &str = "Požadavky na ukončení";
const TABLE_HEADER: &str = "Rozložení požadavků na ukončení";

/// Text used when the requirements section is absent
pub const SECTION_NOT_FOUND: &str = "Error: Section not found";

/// Parse the completion requirements of a course
///
/// The page is a layout table: a header row containing the section title is
/// followed by a row holding the content.
pub fn parse_syllabus(html: &str, lang: Language, course_id: Option<&str>) -> Syllabus {
    let document = Html::parse_document(html);

    let requirements_text = content_row(&document, TEXT_HEADER)
        .and_then(|row| row.select(&FIRST_CELL).next())
        .map(multiline_text)
        .unwrap_or_else(|| SECTION_NOT_FOUND.to_string());

    let requirements_table = content_row(&document, TABLE_HEADER)
        .and_then(|row| row.select(&INNER_TABLE).next())
        .map(|table| {
            table
                .select(&TABLE_ROWS)
                .map(|row| row.select(&TABLE_CELLS).map(element_text).collect::<Vec<_>>())
                .filter(|cells| !cells.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Syllabus {
        version: Syllabus::VERSION,
        language: Some(lang),
        course_id: course_id.map(str::to_string),
        requirements_text,
        requirements_table,
    }
}

/// The `tr` sibling after the row whose header contains `title`
fn content_row<'a>(document: &'a Html, title: &str) -> Option<ElementRef<'a>> {
    let header = document
        .select(&HEADER_CANDIDATES)
        .find(|el| el.text().collect::<String>().contains(title))?;

    let header_row = header
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")?;

    header_row
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
}

/// Cell text with `<br>` kept as line breaks and blank lines dropped
fn multiline_text(cell: ElementRef<'_>) -> String {
    super::text_with_breaks(cell, '\n')
        .lines()
        .map(normalize_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
