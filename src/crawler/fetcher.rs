//! Authenticated portal fetcher with rate limiting and charset detection
//!
//! This module provides the page-fetch collaborator used by the crawler and
//! the portal API:
//! - Session cookie persistence through the reqwest cookie store
//! - Rate limiting with governor
//! - Retry with exponential backoff for idempotent requests
//! - 401/403 reported as `FetchError::Auth`
//! - UTF-8 / windows-1250 / ISO-8859-2 body decoding

use crate::bridge::messages::FetchOptions;
use crate::config::PortalConfig;
use crate::metrics;
use crate::utils::error::FetchError;
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1250};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    cookie::Jar,
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT},
    Client, Method, Response,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Something that can fetch a portal page as text
///
/// Implemented by [`AuthFetcher`] on the host side and by the bridge client
/// on the isolated side, so crawling works in either context.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` with the given options and return the decoded body
    async fn fetch_page(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError>;

    /// Plain GET
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_page(url, &FetchOptions::default()).await
    }
}

/// Direct HTTP fetcher holding the portal session
pub struct AuthFetcher {
    /// HTTP client with cookie store, timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Maximum number of retry attempts for idempotent requests
    max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    base_delay_ms: u64,

    user_agent: String,
}

impl AuthFetcher {
    /// Create a fetcher from the portal configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidUrl` if the base URL is malformed and
    /// `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &PortalConfig) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        if let Some(cookie) = &config.session_cookie {
            let base = url::Url::parse(&config.base_url)
                .map_err(|_| FetchError::InvalidUrl(config.base_url.clone()))?;
            jar.add_cookie_str(cookie, &base);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_provider(jar)
            .build()?;

        let rate = NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            max_retries: config.max_retries,
            base_delay_ms: 500,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Override the backoff base delay
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    async fn fetch_with_retry(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let method = Method::from_bytes(options.method.to_uppercase().as_bytes())
            .map_err(|_| FetchError::InvalidUrl(format!("unsupported method {}", options.method)))?;
        // Registrations and other side effects must not be replayed
        let attempts = if options.is_retryable() { self.max_retries } else { 0 };
        let headers = self.build_headers(options);

        let mut last_error = FetchError::MaxRetriesExceeded;

        for attempt in 0..=attempts {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tracing::debug!(%url, attempt, delay_ms = delay, "Retrying request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.rate_limiter.until_ready().await;

            let mut request = self.client.request(method.clone(), url).headers(headers.clone());
            if let Some(body) = &options.body {
                request = request.body(body.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    metrics::record_portal_request(status.as_u16());

                    if status.is_success() {
                        return self.decode_response(response).await;
                    }

                    let error = FetchError::from_status(status.as_u16());
                    if Self::should_retry(status.as_u16()) {
                        last_error = error;
                        continue;
                    }
                    if error.is_auth() {
                        tracing::warn!(%url, status = status.as_u16(), "Portal session rejected");
                    }
                    return Err(error);
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Http(e)
                    };
                }
            }
        }

        if attempts == 0 {
            return Err(last_error);
        }
        tracing::warn!(%url, error = %last_error, "Retries exhausted");
        Err(FetchError::MaxRetriesExceeded)
    }

    /// Retry on 429 and transient 5xx; never on 4xx
    fn should_retry(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }

    async fn decode_response(&self, response: Response) -> Result<String, FetchError> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let bytes = response.bytes().await?;
        decode_bytes(&bytes, &content_type)
    }

    fn build_headers(&self, options: &FetchOptions) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("cs-CZ,cs;q=0.9,en;q=0.8"),
        );

        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::debug!(header = %name, "Dropping invalid request header"),
            }
        }

        headers
    }
}

#[async_trait]
impl PageFetcher for AuthFetcher {
    async fn fetch_page(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        if url::Url::parse(url).is_err() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }
        self.fetch_with_retry(url, options).await
    }
}

/// Decode a body using the declared charset, falling back to detection
///
/// Order: Content-Type charset, strict UTF-8, `<meta charset>` in the first
/// kilobyte, windows-1250 (the portal's legacy encoding).
///
/// # Errors
///
/// Returns `FetchError::Decode` if the declared charset cannot decode the body
pub fn decode_bytes(bytes: &[u8], content_type: &str) -> Result<String, FetchError> {
    if let Some(encoding) = charset_from(content_type) {
        return decode_with(encoding, bytes);
    }

    if let Ok(text) = decode_with(UTF_8, bytes) {
        return Ok(text);
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_lowercase();
    if let Some(encoding) = charset_from(&head) {
        if let Ok(text) = decode_with(encoding, bytes) {
            return Ok(text);
        }
    }

    let (cow, _, _) = WINDOWS_1250.decode(bytes);
    Ok(cow.into_owned())
}

fn charset_from(text: &str) -> Option<&'static Encoding> {
    let lower = text.to_lowercase();
    let start = lower.find("charset=")? + "charset=".len();
    let label: String = lower[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    Encoding::for_label(label.as_bytes())
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, FetchError> {
    let (cow, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(FetchError::Decode(format!("{} decoding errors", encoding.name())));
    }
    Ok(cow.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8() {
        let text = "Přednášky a cvičení";
        let decoded = decode_bytes(text.as_bytes(), "text/html; charset=utf-8");
        assert_eq!(decoded.unwrap(), text);
    }

    #[test]
    fn test_decode_windows_1250_declared() {
        // "Příliš" in windows-1250
        let bytes: &[u8] = &[0x50, 0xf8, 0xed, 0x6c, 0x69, 0x9a];
        let decoded = decode_bytes(bytes, "text/html; charset=windows-1250").unwrap();
        assert_eq!(decoded, "Příliš");
    }

    #[test]
    fn test_decode_meta_charset_fallback() {
        let mut bytes = b"<meta charset=\"iso-8859-2\"><p>".to_vec();
        bytes.extend_from_slice(&[0xb9]); // "š" in ISO-8859-2
        let decoded = decode_bytes(&bytes, "text/html").unwrap();
        assert!(decoded.ends_with('š'));
    }

    #[test]
    fn test_should_retry() {
        assert!(AuthFetcher::should_retry(429));
        assert!(AuthFetcher::should_retry(503));
        assert!(!AuthFetcher::should_retry(401));
        assert!(!AuthFetcher::should_retry(403));
        assert!(!AuthFetcher::should_retry(404));
    }

    #[test]
    fn test_headers_merge_request_options() {
        let fetcher = AuthFetcher::new(&PortalConfig::default()).unwrap();
        let options = FetchOptions::post_form("a=1".into());
        let headers = fetcher.build_headers(&options);
        assert!(headers.contains_key(USER_AGENT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded; charset=UTF-8"
        );
    }

    #[test]
    fn test_fetcher_with_session_cookie() {
        let config = PortalConfig {
            session_cookie: Some("UISAuth=abc".into()),
            ..Default::default()
        };
        assert!(AuthFetcher::new(&config).is_ok());
    }
}
