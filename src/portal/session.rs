use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::{Regex, RegexBuilder};
use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION,
    USER_AGENT,
};
use reqwest::redirect::Policy;
use tracing::{debug, info, warn};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Response to a form submission that is not allowed to follow redirects.
#[derive(Debug, Clone, Default)]
pub struct FormResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl FormResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// The four request shapes the portal needs. `HttpSession` is the real
/// implementation; tests substitute canned responses.
pub trait Transport {
    fn get_text(&self, url: &str) -> Result<String>;

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<FormResponse>;

    fn post_xhr(&self, url: &str, query: &[(&str, String)]) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub pdf_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            request_timeout: Duration::from_secs(60),
            pdf_timeout: Duration::from_secs(30),
        }
    }
}

/// One cookie-bearing crawl session. Both clients share the cookie jar so the
/// search form and the paging requests stay inside the same portal session.
pub struct HttpSession {
    client: Client,
    form_client: Client,
    pdf_timeout: Duration,
}

impl HttpSession {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let headers = default_headers();

        if !config.verify_tls {
            warn!("TLS certificate verification disabled for this session");
        }

        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(headers.clone())
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let form_client = Client::builder()
            .cookie_provider(jar)
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.request_timeout)
            .redirect(Policy::none())
            .build()
            .context("failed to build form-submission HTTP client")?;

        Ok(Self {
            client,
            form_client,
            pdf_timeout: config.pdf_timeout,
        })
    }
}

impl Transport for HttpSession {
    fn get_text(&self, url: &str) -> Result<String> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("server rejected request: {url}"))?;

        response
            .text()
            .with_context(|| format!("failed to read response body: {url}"))
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "GET (binary)");
        let response = self
            .client
            .get(url)
            .timeout(self.pdf_timeout)
            .send()
            .with_context(|| format!("download failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("server rejected download: {url}"))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("pdf") && !url.to_lowercase().ends_with(".pdf") {
            warn!(url = %url, content_type = %content_type, "download may not be a PDF");
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read download body: {url}"))?;
        Ok(bytes.to_vec())
    }

    fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<FormResponse> {
        debug!(url = %url, "POST form");
        let response = self
            .form_client
            .post(url)
            .header(CACHE_CONTROL, "max-age=0")
            .form(form)
            .send()
            .with_context(|| format!("form submission failed: {url}"))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .with_context(|| format!("failed to read form response: {url}"))?;

        Ok(FormResponse {
            status,
            location,
            body,
        })
    }

    fn post_xhr(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        debug!(url = %url, "POST xhr");
        let response = self
            .client
            .post(url)
            .query(query)
            .header(ACCEPT, "*/*")
            .header("x-requested-with", "XMLHttpRequest")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-dest", "empty")
            .send()
            .with_context(|| format!("page request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("server rejected page request: {url}"))?;

        response
            .text()
            .with_context(|| format!("failed to read page body: {url}"))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        "upgrade-insecure-requests",
        HeaderValue::from_static("1"),
    );
    headers
}

/// Locates the portal's session token on the landing page.
pub struct TokenInitiator {
    patterns: Vec<Regex>,
}

impl TokenInitiator {
    pub fn new() -> Result<Self> {
        let sources = [
            r#"Guid["']?\s*[:=]\s*["']?([a-f0-9-]+)"#,
            r#"value\s*=\s*["']([0-9]+)["'].*?name\s*=\s*["']Guid["']"#,
            r#"name\s*=\s*["']Guid["'].*?value\s*=\s*["']([0-9]+)["']"#,
        ];

        let patterns = sources
            .iter()
            .map(|source| {
                RegexBuilder::new(source)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("failed to compile session token regex: {source}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn find_token(&self, body: &str) -> Option<String> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(body)
                .and_then(|captures| captures.get(1))
                .map(|token| token.as_str().to_string())
                .filter(|token| !token.is_empty())
        })
    }

    /// Always yields a usable token: a scraped one when the landing page
    /// carries it, a time-derived one otherwise.
    pub fn obtain_token(&self, transport: &dyn Transport, base_url: &str) -> String {
        let url = format!("{base_url}/Terminal/");

        match transport.get_text(&url) {
            Ok(body) => match self.find_token(&body) {
                Some(token) => {
                    info!(token = %token, "session token found on landing page");
                    token
                }
                None => {
                    let token = generated_token();
                    warn!(token = %token, "session token not found, using generated token");
                    token
                }
            },
            Err(error) => {
                let token = generated_token();
                warn!(error = %error, token = %token, "landing page unavailable, using generated token");
                token
            }
        }
    }
}

pub fn generated_token() -> String {
    Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::tests::FakeTransport;

    #[test]
    fn find_token_reads_script_assignment() {
        let initiator = TokenInitiator::new().expect("patterns should compile");
        let body = r#"<script>var config = { guid: "3fa85f64-5717-4562" };</script>"#;
        assert_eq!(
            initiator.find_token(body).as_deref(),
            Some("3fa85f64-5717-4562")
        );
    }

    #[test]
    fn find_token_reads_hidden_input_in_either_attribute_order() {
        let initiator = TokenInitiator::new().expect("patterns should compile");
        let value_first = r#"<input type="hidden" value="1723456789012" name="Guid" />"#;
        let name_first = r#"<input name='Guid' type='hidden' value='998877' />"#;

        assert_eq!(
            initiator.find_token(value_first).as_deref(),
            Some("1723456789012")
        );
        assert_eq!(initiator.find_token(name_first).as_deref(), Some("998877"));
    }

    #[test]
    fn obtain_token_falls_back_when_landing_page_lacks_token() {
        let initiator = TokenInitiator::new().expect("patterns should compile");
        let transport = FakeTransport::default()
            .with_page("https://portal.test/Terminal/", "<html><body>nothing</body></html>");

        let token = initiator.obtain_token(&transport, "https://portal.test");
        assert!(!token.is_empty());
        assert!(token.chars().all(|character| character.is_ascii_digit()));
    }

    #[test]
    fn obtain_token_falls_back_when_landing_page_fails() {
        let initiator = TokenInitiator::new().expect("patterns should compile");
        let transport = FakeTransport::default();

        let token = initiator.obtain_token(&transport, "https://portal.test");
        assert!(token.parse::<i64>().is_ok());
    }

    #[test]
    fn form_response_detects_redirects() {
        let response = FormResponse {
            status: 302,
            location: Some("/Terminal/Resultado".to_string()),
            body: String::new(),
        };
        assert!(response.is_redirect());
        assert!(!FormResponse::default().is_redirect());
    }
}
