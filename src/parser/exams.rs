//! Exam term list (`/auth/student/terminy_seznam.pl`)
//!
//! `#table_1` lists terms the student is registered for, `#table_2` the terms
//! open for registration. Both are grouped into subject → section → terms.

use super::{br_parts, element_text, selector};
use crate::models::{ExamSection, ExamSubject, ExamTerm, Language, RegisteredTerm, SectionStatus};
use crate::utils::query_number;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static REGISTERED_ROWS: LazyLock<Selector> = selector!("#table_1 tbody tr");
static AVAILABLE_ROWS: LazyLock<Selector> = selector!("#table_2 tbody tr");
static CELLS: LazyLock<Selector> = selector!("td");
static REGISTER_LINK: LazyLock<Selector> = selector!("a[href*=\"prihlasit_ihned=1\"]");
static UNREGISTER_LINK: LazyLock<Selector> = selector!("a[href*=\"odhlasit_ihned=1\"]");
static INFO_LINK: LazyLock<Selector> = selector!("a[href*=\"terminy_info.pl\"]");

static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}[./]\d{1,2}[./]\d{4}").expect("Invalid regex pattern"));
static SEMESTER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ZL]S\s*\d{4}/\d{4}\s*-\s*[A-Z]+\s*(-)?\s*").expect("Invalid regex pattern")
});

/// Parse the exam page in the given language
///
/// English pages print dates as `MM/DD/YYYY`; they are normalized to
/// `DD.MM.YYYY` so every consumer sees the same format.
pub fn parse_exam_list(html: &str, lang: Language) -> Vec<ExamSubject> {
    let english = lang == Language::En;
    let document = Html::parse_document(html);
    let mut builder = ExamListBuilder::default();

    for row in document.select(&REGISTERED_ROWS) {
        builder.add_registered(row, english);
    }
    for row in document.select(&AVAILABLE_ROWS) {
        builder.add_available(row, english);
    }

    builder.finish()
}

#[derive(Default)]
struct ExamListBuilder {
    subjects: Vec<ExamSubject>,
}

impl ExamListBuilder {
    fn section(&mut self, code: &str, raw_name: &str, raw_section: &str) -> &mut ExamSection {
        let index = match self.subjects.iter().position(|s| s.code == code) {
            Some(index) => index,
            None => {
                self.subjects.push(ExamSubject {
                    id: code.to_string(),
                    name: SEMESTER_PREFIX.replace(raw_name, "").trim().to_string(),
                    code: code.to_string(),
                    sections: Vec::new(),
                });
                self.subjects.len() - 1
            }
        };
        let subject = &mut self.subjects[index];

        let name = capitalize(raw_section.split('(').next().unwrap_or_default().trim());
        let position = match subject.sections.iter().position(|s| s.name == name) {
            Some(position) => position,
            None => {
                subject.sections.push(ExamSection {
                    id: format!("{}-{}", subject.id, name.to_lowercase().replace(char::is_whitespace, "-")),
                    name,
                    status: SectionStatus::Open,
                    registered_term: None,
                    terms: Vec::new(),
                });
                subject.sections.len() - 1
            }
        };
        &mut subject.sections[position]
    }

    fn add_registered(&mut self, row: ElementRef<'_>, english: bool) {
        let cols: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
        if cols.len() < 6 {
            return;
        }
        let Some(date_index) = cols.iter().position(|c| DATE.is_match(&element_text(*c))) else {
            return;
        };
        let text = |i: usize| cols.get(i).map(|c| element_text(*c)).unwrap_or_default();

        let (date, time) = split_date_time(&normalize_date(&text(date_index), english));
        let term_id = row
            .select(&UNREGISTER_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| query_number(href, "termin"))
            .unwrap_or_default();
        let deregistration_deadline = cols.iter().find_map(|c| {
            let parts = br_parts(*c);
            parts
                .get(2)
                .filter(|p| p.as_str() != "--" && DATE.is_match(p))
                .map(|p| normalize_date(p, english))
        });

        let registered = RegisteredTerm {
            id: term_id,
            date,
            time,
            room: text(date_index + 1),
            teacher: text(date_index + 3),
            deregistration_deadline,
        };

        let section = self.section(&text(1), &text(2), &text(date_index + 2));
        section.status = SectionStatus::Registered;
        section.registered_term = Some(registered);
    }

    fn add_available(&mut self, row: ElementRef<'_>, english: bool) {
        let cols: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
        if cols.len() < 8 {
            return;
        }
        let Some(date_index) = cols.iter().position(|c| DATE.is_match(&element_text(*c))) else {
            return;
        };
        let text = |i: usize| cols.get(i).map(|c| element_text(*c)).unwrap_or_default();

        let register_href = row
            .select(&REGISTER_LINK)
            .next()
            .and_then(|a| a.value().attr("href"));
        let Some(term_id) = register_href
            .and_then(|href| query_number(href, "termin"))
            .or_else(|| {
                row.select(&INFO_LINK)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(|href| query_number(href, "termin"))
            })
        else {
            tracing::debug!("Skipping exam row without a term id");
            return;
        };

        let capacity = text(date_index + 4);
        let full = capacity_full(&capacity);

        let (registration_start, registration_end) = cols
            .iter()
            .map(|c| br_parts(*c))
            .find(|parts| parts.len() >= 2)
            .map(|parts| {
                let keep = |p: &String| (p.as_str() != "--" && DATE.is_match(p)).then(|| normalize_date(p, english));
                (parts.first().and_then(keep), parts.get(1).and_then(keep))
            })
            .unwrap_or((None, None));

        let (date, time) = split_date_time(&normalize_date(&text(date_index), english));
        let term = ExamTerm {
            id: term_id,
            date,
            time,
            capacity,
            full,
            room: text(date_index + 1),
            teacher: text(date_index + 3),
            registration_start,
            registration_end,
            can_register_now: register_href.is_some() && !full,
        };

        let section = self.section(&text(2), &text(3), &text(date_index + 2));
        if section.status == SectionStatus::Open && term.can_register_now {
            section.status = SectionStatus::Available;
        }
        section.terms.push(term);
    }

    fn finish(self) -> Vec<ExamSubject> {
        self.subjects
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `occupied/total`; unreadable capacities count as not full
fn capacity_full(capacity: &str) -> bool {
    let mut parts = capacity.split('/').map(|p| p.trim().parse::<u32>());
    match (parts.next(), parts.next()) {
        (Some(Ok(occupied)), Some(Ok(total))) => occupied >= total,
        _ => false,
    }
}

fn split_date_time(value: &str) -> (String, String) {
    let mut parts = value.split_whitespace();
    let date = parts.next().unwrap_or_default().to_string();
    let time = parts.next().unwrap_or_default().to_string();
    (date, time)
}

/// Normalize `MM/DD/YYYY` (English) or `D.M.YYYY` to `DD.MM.YYYY`, keeping any time
pub fn normalize_date(value: &str, english: bool) -> String {
    let value = value.trim();
    if value.is_empty() || value == "--" {
        return value.to_string();
    }
    let mut parts = value.splitn(2, ' ');
    let date = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    let time = rest.split_whitespace().next().unwrap_or_default();

    let (day, month, year) = if english && date.contains('/') {
        let mut it = date.split('/');
        let month = it.next().unwrap_or_default();
        let day = it.next().unwrap_or_default();
        (day, month, it.next().unwrap_or_default())
    } else if date.contains('.') {
        let mut it = date.split('.');
        (
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
        )
    } else {
        return value.to_string();
    };

    let normalized = format!("{day:0>2}.{month:0>2}.{year}");
    if time.is_empty() {
        normalized
    } else {
        format!("{normalized} {time}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
      <table id="table_1"><tbody>
        <tr>
          <td>1</td><td>EBC-ALG</td><td>ZS 2025/2026 - PEF Algoritmizace</td>
          <td>15.01.2026 09:00 (čt)</td><td>Q01</td><td>zkouška (písemná)</td><td>Novák</td>
          <td>10.12.2025<br>10.01.2026<br>14.01.2026</td>
          <td><a href="terminy_seznam.pl?termin=5001;odhlasit_ihned=1">odhlásit</a></td>
        </tr>
      </tbody></table>
      <table id="table_2"><tbody>
        <tr>
          <td>1</td><td></td><td>EBC-ALG</td><td>ZS 2025/2026 - PEF Algoritmizace</td>
          <td>22.01.2026 09:00</td><td>Q02</td><td>zkouška</td><td>Novák</td><td>12/20</td>
          <td>01.12.2025 08:00<br>20.01.2026 23:59</td>
          <td><a href="terminy_seznam.pl?termin=5002;prihlasit_ihned=1">přihlásit</a></td>
        </tr>
        <tr>
          <td>2</td><td></td><td>EBC-MAT</td><td>Matematika</td>
          <td>23.01.2026 10:00</td><td>Q03</td><td>test</td><td>Svoboda</td><td>30/30</td>
          <td>--<br>--</td>
          <td><a href="terminy_info.pl?termin=6001">info</a></td>
        </tr>
      </tbody></table>
    </body></html>"#;

    #[test]
    fn test_parse_registered_and_available() {
        let subjects = parse_exam_list(PAGE, Language::Cz);
        assert_eq!(subjects.len(), 2);

        let alg = &subjects[0];
        assert_eq!(alg.code, "EBC-ALG");
        assert_eq!(alg.name, "Algoritmizace");
        assert_eq!(alg.sections.len(), 1);

        let exam = &alg.sections[0];
        assert_eq!(exam.name, "Zkouška");
        assert_eq!(exam.id, "EBC-ALG-zkouška");
        assert_eq!(exam.status, SectionStatus::Registered);
        let registered = exam.registered_term.as_ref().unwrap();
        assert_eq!(registered.id, "5001");
        assert_eq!(registered.date, "15.01.2026");
        assert_eq!(registered.time, "09:00");
        assert_eq!(registered.deregistration_deadline.as_deref(), Some("14.01.2026"));

        let term = &exam.terms[0];
        assert_eq!(term.id, "5002");
        assert_eq!(term.capacity, "12/20");
        assert!(!term.full);
        assert!(term.can_register_now);
        assert_eq!(term.registration_start.as_deref(), Some("01.12.2025 08:00"));
        assert_eq!(term.registration_end.as_deref(), Some("20.01.2026 23:59"));

        let mat = &subjects[1].sections[0];
        assert_eq!(mat.status, SectionStatus::Open);
        assert!(mat.terms[0].full);
        assert!(!mat.terms[0].can_register_now);
        assert_eq!(mat.terms[0].registration_start, None);
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("02/16/2026 10:00 (Mon)", true), "16.02.2026 10:00");
        assert_eq!(normalize_date("6.2.2026", false), "06.02.2026");
        assert_eq!(normalize_date("--", false), "--");
    }

    #[test]
    fn test_capacity() {
        assert!(capacity_full("20/20"));
        assert!(!capacity_full("3/20"));
        assert!(!capacity_full("?"));
    }
}
