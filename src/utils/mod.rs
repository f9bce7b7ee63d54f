//! Common utilities and helper functions
//!
//! URL handling for the document server: language parameters, relative link
//! resolution and the link normalization used as the dedup identity.

pub mod error;

use crate::models::Language;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Path fragment of folder-listing pages on the document server
pub const FOLDER_PATTERN: &str = "slozka.pl";

/// Query marker of direct file downloads
pub const DOWNLOAD_MARKER: &str = "download";

/// Directory pagination links are relative to
pub const DOCUMENT_SERVER_PATH: &str = "/auth/dok_server/";

/// Append the portal `lang=` parameter unless the URL already carries one
///
/// The portal separates query parameters with `;`, so an existing query is
/// extended with `;lang=..` and a bare path gets `?lang=..`.
pub fn with_lang(url: &str, lang: Language) -> String {
    if url.contains("lang=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { ';' } else { '?' };
    format!("{url}{separator}lang={}", lang.as_str())
}

/// Resolve a possibly relative document-server link against the portal base
pub fn resolve_link(base_url: &str, link: &str) -> String {
    let link = link.trim();
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }

    let base = base_url.trim_end_matches('/');
    if link.starts_with('/') {
        format!("{base}{link}")
    } else if let Some(rest) = link.strip_prefix("../") {
        format!("{base}/auth/{rest}")
    } else {
        format!("{base}{DOCUMENT_SERVER_PATH}{}", link.trim_start_matches("./"))
    }
}

/// Whether a link points at a folder listing rather than a file
pub fn is_folder_link(link: &str) -> bool {
    link.contains(FOLDER_PATTERN) && !has_download_param(link)
}

/// Whether a link is a direct download
pub fn has_download_param(link: &str) -> bool {
    link.contains(DOWNLOAD_MARKER)
}

/// Normalize a link for identity comparison
///
/// Lowercases scheme and host, drops the fragment and removes the `lang`
/// parameter so the same file fetched in both languages compares equal.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return strip_lang_param(trimmed);
    };
    parsed.set_fragment(None);
    let query = parsed.query().map(strip_query_lang);
    parsed.set_query(query.as_deref().filter(|q| !q.is_empty()));
    parsed.to_string()
}

fn strip_lang_param(link: &str) -> String {
    match link.split_once('?') {
        Some((path, query)) => {
            let query = strip_query_lang(query);
            if query.is_empty() {
                path.to_string()
            } else {
                format!("{path}?{query}")
            }
        }
        None => link.to_string(),
    }
}

fn strip_query_lang(query: &str) -> String {
    query
        .split([';', '&'])
        .filter(|pair| !pair.is_empty() && !pair.starts_with("lang="))
        .collect::<Vec<_>>()
        .join(";")
}

/// Extract a numeric query parameter such as `predmet=123`
pub fn query_number(link: &str, name: &str) -> Option<String> {
    static PARAM_RE: OnceLock<Regex> = OnceLock::new();

    let re = PARAM_RE
        .get_or_init(|| Regex::new(r"(?:^|[?;&])([a-z_]+)=(\d+)").expect("Invalid regex pattern"));

    re.captures_iter(link)
        .find(|c| &c[1] == name)
        .map(|c| c[2].to_string())
}

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}
