//! Primary extraction: the managed scrape service.
//!
//! One `POST {url}` per article, bounded by a fixed timeout and never
//! retried. A scrape failure usually means the page is unsuitable for this
//! strategy (script-rendered, login wall), not that the network hiccupped,
//! so recovery belongs to the browser fallback in
//! [`crate::pipeline::extract`], not to a retry loop here.

use crate::error::ArticleError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "Scrape service";

/// Anything that turns a URL into Markdown given an API key.
#[async_trait]
pub trait ScrapeService: Send + Sync {
    async fn scrape(&self, url: &str, api_key: &str) -> Result<String, ArticleError>;
}

/// HTTP client for a Firecrawl-compatible `/scrape` endpoint.
#[derive(Debug, Clone)]
pub struct ScrapeClient {
    endpoint: String,
    timeout_secs: u64,
}

impl ScrapeClient {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_secs,
        }
    }
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ScrapeEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
}

#[async_trait]
impl ScrapeService for ScrapeClient {
    async fn scrape(&self, url: &str, api_key: &str) -> Result<String, ArticleError> {
        info!("Scraping {} via {}", url, self.endpoint);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ArticleError::network(SERVICE, e))?;

        let response = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&ScrapeRequest { url })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ArticleError::timeout("Scrape request", self.timeout_secs)
                } else {
                    ArticleError::network(SERVICE, e)
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ArticleError::network(SERVICE, e))?;
        debug!("Scrape response: HTTP {}, {} bytes", status, body.len());

        if !status.is_success() {
            let detail = parse_envelope(&body)
                .err()
                .map(|e| match e {
                    ArticleError::Upstream { message, .. } => message,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unexpected success body".to_string());
            return Err(ArticleError::upstream(
                SERVICE,
                format!("HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        parse_envelope(&body)
    }
}

/// Pull the Markdown out of a scrape response body.
///
/// Anything but `{success: true, data: {markdown: "..."}}` is an
/// [`ArticleError::Upstream`] carrying the service's `error` text when it
/// sent one.
pub fn parse_envelope(body: &str) -> Result<String, ArticleError> {
    let envelope: ScrapeEnvelope = serde_json::from_str(body).map_err(|e| {
        ArticleError::upstream(SERVICE, format!("malformed response: {e}"))
    })?;

    if envelope.success {
        if let Some(markdown) = envelope.data.and_then(|d| d.markdown) {
            return Ok(markdown);
        }
        return Err(ArticleError::upstream(
            SERVICE,
            "response has no data.markdown field",
        ));
    }

    Err(ArticleError::upstream(
        SERVICE,
        envelope.error.unwrap_or_else(|| "unknown error".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_envelope_yields_markdown() {
        let body = r##"{"success":true,"data":{"markdown":"# Title\n\nBody","metadata":{}}}"##;
        assert_eq!(parse_envelope(body).unwrap(), "# Title\n\nBody");
    }

    #[test]
    fn declared_failure_carries_service_message() {
        let body = r#"{"success":false,"error":"Payment required"}"#;
        let err = parse_envelope(body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("Payment required"));
    }

    #[test]
    fn failure_without_message_is_unknown() {
        let err = parse_envelope(r#"{"success":false}"#).unwrap_err();
        assert!(err.to_string().contains("unknown error"));
    }

    #[test]
    fn success_without_markdown_is_upstream_error() {
        let err = parse_envelope(r#"{"success":true,"data":{"html":"<p>x</p>"}}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("data.markdown"));
    }

    #[test]
    fn non_json_body_is_upstream_error() {
        let err = parse_envelope("<html>502 Bad Gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Port 9 (discard) on localhost is closed in any sane test environment.
        let client = ScrapeClient::new("http://127.0.0.1:9/v0/scrape", 2);
        let err = client.scrape("https://example.org/a", "key").await.unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::Network | ErrorKind::Timeout),
            "got: {err}"
        );
        assert!(err.allows_fallback());
    }
}
