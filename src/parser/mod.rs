//! HTML parsing and data extraction
//!
//! Pure functions turning portal pages into typed records. None of them
//! perform I/O; the crawler and the portal API feed them fetched HTML.

pub mod assessments;
pub mod classmates;
pub mod exams;
pub mod folder;
pub mod subjects;
pub mod success_rate;
pub mod syllabus;

pub use assessments::parse_assessments;
pub use classmates::{parse_classmates, parse_seminar_groups};
pub use exams::parse_exam_list;
pub use folder::parse_folder;
pub use subjects::parse_subject_list;
pub use success_rate::{parse_course_links, parse_semesters, parse_stats_table};
pub use syllabus::parse_syllabus;

use crate::utils::normalize_whitespace;
use scraper::{ElementRef, Node, Selector};

// Helper macro for selectors that are fixed at compile time
macro_rules! selector {
    ($s:expr) => {
        std::sync::LazyLock::new(|| {
            scraper::Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
        })
    };
}
pub(crate) use selector;

/// Whitespace-normalized text content of an element
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Text of the first descendant matching `selector`
pub(crate) fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(element_text)
}

/// `href` of the first matching anchor
pub(crate) fn select_href(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|s| s.to_string())
}

/// Split an element's content on `<br>` and return the text of each part
pub(crate) fn br_parts(element: ElementRef<'_>) -> Vec<String> {
    const BREAK: char = '\u{1}';
    text_with_breaks(element, BREAK)
        .split(BREAK)
        .map(normalize_whitespace)
        .collect()
}

/// Text content with every `<br>` replaced by `separator`
pub(crate) fn text_with_breaks(element: ElementRef<'_>, separator: char) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push(separator),
            _ => {}
        }
    }
    out
}
