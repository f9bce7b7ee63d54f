//! Internationalization (i18n) support
//!
//! User-facing messages (error descriptions, booking countdown text) are
//! available in Czech (cs) and English (en). The portal itself uses `cz` for
//! Czech; [`Language::locale`](crate::models::Language::locale) maps between
//! the two.
//!
//! # Environment Variables
//!
//! - `REIS_LANG`: preferred message language (cs, cz, en). Defaults to English.

use crate::models::Language;
use std::sync::OnceLock;

// Note: rust_i18n::i18n! macro is declared in lib.rs (crate root)

static CURRENT_LOCALE: OnceLock<String> = OnceLock::new();

/// Set the process-wide locale for translations
pub fn set_locale(locale: &str) {
    let normalized = normalize_locale(locale);
    rust_i18n::set_locale(normalized);
    CURRENT_LOCALE.get_or_init(|| normalized.to_string());
}

/// Get the current locale
pub fn current_locale() -> &'static str {
    CURRENT_LOCALE.get().map(|s| s.as_str()).unwrap_or("en")
}

/// Set the locale from a portal language
pub fn set_language(lang: Language) {
    set_locale(lang.locale());
}

/// Initialize i18n from `REIS_LANG`
pub fn init_from_env() {
    let locale = std::env::var("REIS_LANG").unwrap_or_else(|_| "en".to_string());
    set_locale(&locale);
}

/// Normalize a locale code to one of the supported locales
///
/// - cs, cs-CZ, cz, czech -> cs
/// - everything else -> en
fn normalize_locale(locale: &str) -> &'static str {
    let lower = locale.to_lowercase();

    if lower.starts_with("cs") || lower.starts_with("cz") || lower == "czech" {
        "cs"
    } else {
        "en"
    }
}

/// Translate a key, re-exported from rust_i18n
#[doc(inline)]
pub use rust_i18n::t;
