//! Subject success statistics (`/auth/student/hodnoceni.pl`)
//!
//! Three levels of pages: the faculty page lists semesters, a semester page
//! lists courses, and a course page holds the grade table per exam term.

use super::{element_text, selector};
use crate::models::{GradeStats, TermStats};
use crate::utils::query_number;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// How many years back semesters are considered
pub const MAX_HISTORY_YEARS: i32 = 15;

static SEMESTER_ROWS: LazyLock<Selector> = selector!("table#tmtab_1 tr.uis-hl-table");
static COURSE_ROWS: LazyLock<Selector> = selector!("tr.uis-hl-table");
static TABLES: LazyLock<Selector> = selector!("table");
static CELLS: LazyLock<Selector> = selector!("td");
static ANCHOR: LazyLock<Selector> = selector!("a[href]");

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").expect("Invalid regex pattern"));

/// A semester row on the faculty statistics page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemesterLink {
    pub name: String,
    pub url: String,
    pub year: i32,
    pub id: String,
}

/// Codes a course was listed under before the current naming scheme
///
/// `EBC-ALG` and `EBC_ALG` were both plain `ALG` in older semesters.
pub fn legacy_codes(code: &str) -> Vec<String> {
    ["EBC-", "EBC_"]
        .iter()
        .filter_map(|prefix| code.strip_prefix(prefix))
        .map(str::to_string)
        .collect()
}

fn join(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(String::from)
}

/// Semesters of the last [`MAX_HISTORY_YEARS`] years
///
/// The name sits in the second cell and the link in the fifth; rows whose
/// name carries no year are skipped.
pub fn parse_semesters(html: &str, base_url: &str, current_year: i32) -> Vec<SemesterLink> {
    let document = Html::parse_document(html);
    let link_base = format!("{}/auth/student/", base_url.trim_end_matches('/'));

    document
        .select(&SEMESTER_ROWS)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&CELLS).collect();
            let (name_cell, link_cell) = (cells.get(1)?, cells.get(4)?);
            let name = element_text(*name_cell);
            let year: i32 = YEAR.find(&name)?.as_str().parse().ok()?;
            if year < current_year - MAX_HISTORY_YEARS {
                return None;
            }
            let href = link_cell.select(&ANCHOR).next()?.value().attr("href")?;

            Some(SemesterLink {
                id: query_number(href, "obdobi").unwrap_or_else(|| "0".to_string()),
                url: join(&link_base, href)?,
                name,
                year,
            })
        })
        .collect()
}

/// Statistics links of the courses in `codes` on a semester page
pub fn parse_course_links(html: &str, base_url: &str, codes: &[String]) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let link_base = format!("{}/auth/", base_url.trim_end_matches('/'));

    document
        .select(&COURSE_ROWS)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&CELLS).collect();
            let code = element_text(*cells.first()?);
            if !codes.contains(&code) {
                return None;
            }
            let href = cells.get(4)?.select(&ANCHOR).next()?.value().attr("href")?;
            Some((code, join(&link_base, href)?))
        })
        .collect()
}

/// Grade table of a course page, one entry per exam term
///
/// Returns `None` when the page has no table with both the term header and
/// the `zk-nedost` column.
pub fn parse_stats_table(html: &str) -> Option<Vec<TermStats>> {
    let document = Html::parse_document(html);
    let table = document.select(&TABLES).find(|table| {
        let text = table.text().collect::<String>();
        text.contains("Termín") && text.contains("zk-nedost")
    })?;

    let terms = table
        .select(&COURSE_ROWS)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&CELLS).collect();
            if cells.len() < 9 {
                return None;
            }
            let count = |i: usize| element_text(cells[i]).parse::<u32>().unwrap_or(0);
            let grades = GradeStats {
                a: count(2),
                b: count(3),
                c: count(4),
                d: count(5),
                e: count(6),
                f: count(7),
                fn_: count(8),
            };
            Some(TermStats {
                term: element_text(cells[1]),
                pass: grades.passed(),
                fail: grades.failed(),
                grades,
            })
        })
        .collect();
    Some(terms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://is.mendelu.cz";

    #[test]
    fn test_legacy_codes() {
        assert_eq!(legacy_codes("EBC-ALG"), vec!["ALG"]);
        assert_eq!(legacy_codes("EBC_ALG"), vec!["ALG"]);
        assert!(legacy_codes("ALG").is_empty());
    }

    #[test]
    fn test_parse_semesters_skips_old_and_unnamed() {
        let html = r#"<table id="tmtab_1">
            <tr class="uis-hl-table"><td>1</td><td>ZS 2024/2025 - PEF</td><td></td><td></td>
              <td><a href="hodnoceni.pl?fakulta=2;obdobi=801">Zvolit</a></td></tr>
            <tr class="uis-hl-table"><td>2</td><td>LS 1999/2000 - PEF</td><td></td><td></td>
              <td><a href="hodnoceni.pl?fakulta=2;obdobi=12">Zvolit</a></td></tr>
            <tr class="uis-hl-table"><td>3</td><td>Souhrn</td><td></td><td></td>
              <td><a href="hodnoceni.pl?fakulta=2">Zvolit</a></td></tr>
        </table>"#;

        let semesters = parse_semesters(html, BASE, 2026);
        assert_eq!(
            semesters,
            vec![SemesterLink {
                name: "ZS 2024/2025 - PEF".to_string(),
                url: format!("{BASE}/auth/student/hodnoceni.pl?fakulta=2;obdobi=801"),
                year: 2024,
                id: "801".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_course_links_filters_codes() {
        let html = r#"<table>
            <tr class="uis-hl-table"><td>ALG</td><td>Algoritmizace</td><td></td><td></td>
              <td><a href="student/hodnoceni.pl?predmet=5;obdobi=801">Zvolit</a></td></tr>
            <tr class="uis-hl-table"><td>TZI</td><td>Teorie</td><td></td><td></td>
              <td><a href="student/hodnoceni.pl?predmet=6;obdobi=801">Zvolit</a></td></tr>
        </table>"#;

        let links = parse_course_links(html, BASE, &["ALG".to_string()]);
        assert_eq!(
            links,
            vec![(
                "ALG".to_string(),
                format!("{BASE}/auth/student/hodnoceni.pl?predmet=5;obdobi=801")
            )]
        );
    }

    #[test]
    fn test_parse_stats_table() {
        let html = r#"<table><tr><td>Menu</td></tr></table>
        <table>
            <tr><th>#</th><th>Termín</th><th>A</th><th>B</th><th>C</th><th>D</th><th>E</th><th>F</th><th>zk-nedost</th></tr>
            <tr class="uis-hl-table"><td>1</td><td>1. termín</td><td>3</td><td>2</td><td>1</td><td>0</td><td>4</td><td>5</td><td>1</td></tr>
            <tr class="uis-hl-table"><td>2</td><td>2. termín</td><td>-</td><td>1</td><td></td><td></td><td></td><td>2</td><td>0</td></tr>
        </table>"#;

        let terms = parse_stats_table(html).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "1. termín");
        assert_eq!(terms[0].pass, 10);
        assert_eq!(terms[0].fail, 6);
        assert_eq!(terms[1].grades.a, 0);
        assert_eq!(terms[1].pass, 1);

        assert!(parse_stats_table("<table><tr><td>Termín</td></tr></table>").is_none());
    }
}
