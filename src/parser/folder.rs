//! Document-server folder pages
//!
//! A folder page is a table of entries (files or subfolders), optionally
//! split into pages linked as `1-50`, `51-100`, ... A document detail page
//! (single file with an attachments row) is also accepted and yields one entry.

use super::{element_text, selector};
use crate::models::{FileAttachment, FolderPage, ParsedFile};
use crate::utils::{has_download_param, resolve_link, FOLDER_PATTERN};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static LISTING_ROWS: LazyLock<Selector> = selector!("tr.uis-hl-table.lbn");
static TABLE_ROWS: LazyLock<Selector> = selector!("table tr");
static CELLS: LazyLock<Selector> = selector!("td");
static ANCHORS: LazyLock<Selector> = selector!("a");
static CHECKBOX: LazyLock<Selector> = selector!("input[type=\"checkbox\"]");
static MIME_ICON: LazyLock<Selector> = selector!("img[sysid]");

static PAGE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+-\d+$").expect("Invalid regex pattern"));

/// Rows that only navigate the folder tree
const NAVIGATION_ROWS: &[&str] = &["Všechny moje složky", "Nadřazená složka", "All my folders", "Parent folder"];

/// Parse a folder (or document detail) page
///
/// Links are resolved against `base_url`; links to other hosts are ignored.
pub fn parse_folder(html: &str, base_url: &str) -> FolderPage {
    let document = Html::parse_document(html);

    if let Some(file) = parse_detail_page(&document, base_url) {
        return FolderPage {
            files: vec![file],
            pagination_links: Vec::new(),
        };
    }

    FolderPage {
        files: parse_rows(&document, base_url),
        pagination_links: parse_pagination(&document, base_url),
    }
}

fn parse_pagination(document: &Html, base_url: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains(FOLDER_PATTERN) || has_download_param(href) {
            continue;
        }
        if !PAGE_RANGE.is_match(element_text(anchor).as_str()) {
            continue;
        }
        let link = resolve_link(base_url, href);
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

fn parse_rows(document: &Html, base_url: &str) -> Vec<ParsedFile> {
    let mut rows: Vec<ElementRef<'_>> = document.select(&LISTING_ROWS).collect();
    if rows.is_empty() {
        rows = document
            .select(&TABLE_ROWS)
            .filter(|row| row.select(&CELLS).count() >= 5)
            .collect();
    }

    rows.into_iter()
        .filter_map(|row| parse_row(row, base_url))
        .collect()
}

fn parse_row(row: ElementRef<'_>, base_url: &str) -> Option<ParsedFile> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
    let first = cells.first()?;
    let offset = usize::from(
        first.value().classes().any(|c| c == "UISTMNumberCell")
            || first.select(&CHECKBOX).next().is_some(),
    );
    if cells.len() < 2 + offset {
        return None;
    }

    let cell_text = |index: usize| cells.get(index).map(|c| element_text(*c)).unwrap_or_default();

    let name = cell_text(1 + offset);
    if name.is_empty() || NAVIGATION_ROWS.iter().any(|nav| name.contains(nav)) {
        return None;
    }

    let mut attachments: Vec<FileAttachment> = Vec::new();
    for anchor in row.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(link) = portal_link(base_url, href) else {
            continue;
        };
        let mime_type = mime_type(anchor);

        if let Some(existing) = attachments.iter_mut().find(|a| a.link == link) {
            if existing.mime_type == "unknown" && mime_type != "unknown" {
                existing.mime_type = mime_type;
            }
            continue;
        }
        attachments.push(FileAttachment {
            name: name.clone(),
            mime_type,
            link,
        });
    }

    if attachments.is_empty() {
        return None;
    }

    Some(ParsedFile {
        subfolder: cell_text(offset),
        name,
        comment: cell_text(2 + offset),
        author: cell_text(3 + offset),
        date: cell_text(4 + offset),
        attachments,
        language: None,
    })
}

fn parse_detail_page(document: &Html, base_url: &str) -> Option<ParsedFile> {
    let cells: Vec<ElementRef<'_>> = document.select(&CELLS).collect();
    let label = cells.iter().find(|td| {
        let text = element_text(**td);
        text.contains("Přílohy:") || text.contains("Attachments:")
    })?;
    let row = label.parent().and_then(ElementRef::wrap)?;
    let anchor = row.select(&ANCHORS).next()?;
    let link = portal_link(base_url, anchor.value().attr("href")?)?;

    let value_of = |labels: &[&str]| -> String {
        cells
            .iter()
            .find(|td| {
                let text = element_text(**td);
                labels.iter().any(|l| text.starts_with(l))
            })
            .and_then(|td| td.parent().and_then(ElementRef::wrap))
            .and_then(|tr| tr.select(&CELLS).nth(1))
            .map(element_text)
            .unwrap_or_default()
    };

    let mut name = value_of(&["Název:", "Name:"]);
    if name.is_empty() {
        name = "Unknown".to_string();
    }
    let mime_type = row
        .select(&MIME_ICON)
        .next()
        .and_then(|img| img.value().attr("sysid"))
        .map(|s| s.trim_start_matches("mime-").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Some(ParsedFile {
        subfolder: String::new(),
        name: name.clone(),
        comment: value_of(&["Poznámka:", "Komentář:", "Comments:"]),
        author: value_of(&["Vložil:", "Zadal:", "Entered by:"]),
        date: value_of(&["Datum dokumentu:", "Document date:"]),
        attachments: vec![FileAttachment {
            name,
            mime_type,
            link,
        }],
        language: None,
    })
}

fn mime_type(anchor: ElementRef<'_>) -> String {
    anchor
        .select(&MIME_ICON)
        .next()
        .and_then(|img| img.value().attr("sysid"))
        .map(|s| s.trim_start_matches("mime-").to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolve `href` and keep it only if it stays on the portal host
fn portal_link(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    let link = resolve_link(base_url, href);
    let base_host = url::Url::parse(base_url).ok()?.host_str()?.to_string();
    let link_host = url::Url::parse(&link).ok()?.host_str()?.to_string();
    (base_host == link_host).then_some(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://is.mendelu.cz";

    fn listing(rows: &str, extra: &str) -> String {
        format!("<html><body><table>{rows}</table>{extra}</body></html>")
    }

    #[test]
    fn test_parse_file_and_folder_rows() {
        let html = listing(
            r#"<tr class="uis-hl-table lbn">
                 <td class="UISTMNumberCell">1</td>
                 <td>Lectures</td>
                 <td><a href="slozka.pl?id=10;dok=55;download=1"><img sysid="mime-pdf"></a> Lecture 1</td>
                 <td>intro</td><td>Novák</td><td>01.10.2025</td>
               </tr>
               <tr class="uis-hl-table lbn">
                 <td><input type="checkbox"></td>
                 <td></td>
                 <td><a href="slozka.pl?id=11"><img sysid="mime-slozka"></a> Exercises</td>
                 <td></td><td>Dvořák</td><td>02.10.2025</td>
               </tr>"#,
            "",
        );

        let page = parse_folder(&html, BASE);
        assert_eq!(page.files.len(), 2);

        let lecture = &page.files[0];
        assert_eq!(lecture.subfolder, "Lectures");
        assert_eq!(lecture.name, "Lecture 1");
        assert_eq!(lecture.comment, "intro");
        assert_eq!(lecture.author, "Novák");
        assert_eq!(lecture.attachments[0].mime_type, "pdf");
        assert_eq!(
            lecture.attachments[0].link,
            "https://is.mendelu.cz/auth/dok_server/slozka.pl?id=10;dok=55;download=1"
        );

        let folder = &page.files[1];
        assert_eq!(folder.name, "Exercises");
        assert_eq!(folder.attachments[0].mime_type, "slozka");
        assert!(page.pagination_links.is_empty());
    }

    #[test]
    fn test_navigation_rows_and_foreign_links_skipped() {
        let html = listing(
            r#"<tr class="uis-hl-table lbn"><td></td><td><a href="slozka.pl?id=1">Nadřazená složka</a></td></tr>
               <tr class="uis-hl-table lbn"><td></td><td><a href="https://evil.example/x">Elsewhere</a></td></tr>"#,
            "",
        );
        assert!(parse_folder(&html, BASE).files.is_empty());
    }

    #[test]
    fn test_pagination_links_deduplicated() {
        let html = listing(
            "",
            r#"<a href="slozka.pl?id=10;on=1">51-100</a>
               <a href="slozka.pl?id=10;on=1">51-100</a>
               <a href="slozka.pl?id=10;on=2">101-150</a>
               <a href="slozka.pl?id=10;on=1;download=1">51-100</a>
               <a href="slozka.pl?id=10">Back</a>"#,
        );
        let page = parse_folder(&html, BASE);
        assert_eq!(
            page.pagination_links,
            vec![
                "https://is.mendelu.cz/auth/dok_server/slozka.pl?id=10;on=1".to_string(),
                "https://is.mendelu.cz/auth/dok_server/slozka.pl?id=10;on=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_fallback_rows_without_listing_class() {
        let html = listing(
            r#"<tr><td>Sub</td><td><a href="/auth/dok_server/slozka.pl?id=3;download=9">Notes</a></td><td>c</td><td>a</td><td>d</td></tr>
               <tr><td>too</td><td>short</td></tr>"#,
            "",
        );
        let page = parse_folder(&html, BASE);
        assert_eq!(page.files.len(), 1);
        assert_eq!(page.files[0].attachments[0].mime_type, "unknown");
    }

    #[test]
    fn test_detail_page() {
        let html = r#"<table>
            <tr><td>Název:</td><td>Syllabus</td></tr>
            <tr><td>Vložil:</td><td>Novák</td></tr>
            <tr><td>Přílohy:</td><td><a href="slozka.pl?id=4;download=2"><img sysid="mime-docx"></a></td></tr>
        </table>"#;
        let page = parse_folder(html, BASE);
        assert_eq!(page.files.len(), 1);
        assert_eq!(page.files[0].name, "Syllabus");
        assert_eq!(page.files[0].author, "Novák");
        assert_eq!(page.files[0].attachments[0].mime_type, "docx");
    }
}
