//! Extraction coordinator: scrape service first, browser second.
//!
//! | scrape key | scrape result          | fallback allowed | outcome                  |
//! |------------|------------------------|------------------|--------------------------|
//! | present    | Ok                     | any              | Primary                  |
//! | present    | network/upstream/timeout | yes            | browser                  |
//! | present    | network/upstream/timeout | no             | scrape error unchanged   |
//! | absent     | n/a                    | yes              | browser                  |
//! | absent     | n/a                    | no               | `Configuration` error    |
//!
//! An invalid URL is rejected before either strategy runs.

use crate::error::ArticleError;
use crate::output::{ExtractionResult, ExtractionStrategy};
use crate::pipeline::dynamic::FallbackExtractor;
use crate::pipeline::scrape::ScrapeService;
use crate::progress::ProgressCallback;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Check that `input` is an absolute HTTP(S) URL with a host.
pub fn validate_url(input: &str) -> Result<Url, ArticleError> {
    let invalid = |reason: &str| ArticleError::InvalidUrl {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL is empty"));
    }
    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(&format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    Ok(url)
}

/// Chooses and runs an extraction strategy for one URL.
pub struct ExtractionCoordinator {
    scraper: Arc<dyn ScrapeService>,
    fallback: Option<FallbackExtractor>,
    progress: Option<ProgressCallback>,
}

impl ExtractionCoordinator {
    pub fn new(scraper: Arc<dyn ScrapeService>, fallback: Option<FallbackExtractor>) -> Self {
        Self {
            scraper,
            fallback,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Extract `url` as Markdown.
    ///
    /// `scrape_key` is the scrape service credential; `None` or blank means
    /// the primary strategy is skipped.
    pub async fn extract(
        &self,
        url: &str,
        scrape_key: Option<&str>,
        allow_fallback: bool,
    ) -> Result<ExtractionResult, ArticleError> {
        let url = validate_url(url)?;
        let url = url.as_str();

        match crate::config::non_blank(scrape_key) {
            Some(key) => match self.scraper.scrape(url, key).await {
                Ok(markdown) => {
                    info!("Scrape service returned {} bytes", markdown.len());
                    Ok(self.done(markdown, ExtractionStrategy::Primary))
                }
                Err(e) if allow_fallback && e.allows_fallback() => {
                    warn!("Scrape failed, trying browser: {}", e);
                    self.run_fallback(url, &e.to_string()).await
                }
                Err(e) => Err(e),
            },
            None if allow_fallback => {
                info!("No scrape key configured, using browser");
                self.run_fallback(url, "no scrape service key").await
            }
            None => Err(ArticleError::configuration(
                "Scrape service",
                "no API key was provided and browser fallback is disabled",
            )),
        }
    }

    async fn run_fallback(&self, url: &str, reason: &str) -> Result<ExtractionResult, ArticleError> {
        let fallback = self.fallback.as_ref().ok_or_else(|| {
            ArticleError::configuration(
                "Browser fallback",
                "fallback was needed but no browser is available",
            )
        })?;

        if let Some(cb) = &self.progress {
            cb.on_extraction_fallback(reason);
        }
        let markdown = fallback.extract(url).await?;
        Ok(self.done(markdown, ExtractionStrategy::Fallback))
    }

    fn done(&self, markdown: String, strategy: ExtractionStrategy) -> ExtractionResult {
        if let Some(cb) = &self.progress {
            cb.on_extracted(strategy);
        }
        ExtractionResult { markdown, strategy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::dynamic::tests::FakeHost;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Reply {
        Markdown(&'static str),
        Upstream(&'static str),
        Network,
    }

    struct FakeScraper {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl FakeScraper {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScrapeService for FakeScraper {
        async fn scrape(&self, _url: &str, _api_key: &str) -> Result<String, ArticleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Markdown(md) => Ok(md.to_string()),
                Reply::Upstream(msg) => Err(ArticleError::upstream("Scrape service", msg)),
                Reply::Network => Err(ArticleError::network("Scrape service", "connection reset")),
            }
        }
    }

    const PAGE: &str = r#"<body><h1>Rendered</h1><div class="content"><p>from browser</p></div></body>"#;

    fn coordinator(scraper: Arc<FakeScraper>, host: Option<&FakeHost>) -> ExtractionCoordinator {
        let fallback = host.map(|h| {
            FallbackExtractor::new(
                Arc::new(h.clone()),
                Duration::from_millis(100),
                Duration::from_secs(5),
            )
        });
        ExtractionCoordinator::new(scraper, fallback)
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://mp.weixin.qq.com/s/abc").is_ok());
        assert!(validate_url("http://example.org").is_ok());
        for bad in ["", "   ", "not a url", "ftp://example.org/x", "mailto:a@b.c", "/relative/path"] {
            let err = validate_url(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input, "input {bad:?}");
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_browser() {
        let scraper = FakeScraper::new(Reply::Markdown("# From API"));
        let host = FakeHost::serving(PAGE);
        let result = coordinator(scraper.clone(), Some(&host))
            .extract("https://example.org/a", Some("key"), true)
            .await
            .unwrap();

        assert_eq!(result.strategy, ExtractionStrategy::Primary);
        assert_eq!(result.markdown, "# From API");
        assert_eq!(host.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declared_failure_falls_back_when_allowed() {
        let scraper = FakeScraper::new(Reply::Upstream("Payment required"));
        let host = FakeHost::serving(PAGE);
        let result = coordinator(scraper.clone(), Some(&host))
            .extract("https://example.org/a", Some("key"), true)
            .await
            .unwrap();

        assert_eq!(result.strategy, ExtractionStrategy::Fallback);
        assert!(result.markdown.starts_with("# Rendered"));
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
        assert_eq!(host.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declared_failure_propagates_when_not_allowed() {
        let scraper = FakeScraper::new(Reply::Upstream("Payment required"));
        let host = FakeHost::serving(PAGE);
        let err = coordinator(scraper, Some(&host))
            .extract("https://example.org/a", Some("key"), false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("Payment required"));
        assert_eq!(host.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn network_failure_falls_back() {
        let scraper = FakeScraper::new(Reply::Network);
        let host = FakeHost::serving(PAGE);
        let result = coordinator(scraper, Some(&host))
            .extract("https://example.org/a", Some("key"), true)
            .await
            .unwrap();
        assert_eq!(result.strategy, ExtractionStrategy::Fallback);
    }

    #[tokio::test]
    async fn missing_key_goes_straight_to_browser() {
        let scraper = FakeScraper::new(Reply::Markdown("unused"));
        let host = FakeHost::serving(PAGE);
        let result = coordinator(scraper.clone(), Some(&host))
            .extract("https://example.org/a", Some("  "), true)
            .await
            .unwrap();

        assert_eq!(result.strategy, ExtractionStrategy::Fallback);
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_key_without_fallback_is_configuration_error() {
        let scraper = FakeScraper::new(Reply::Markdown("unused"));
        let err = coordinator(scraper, None)
            .extract("https://example.org/a", None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn fallback_without_browser_is_configuration_error() {
        let scraper = FakeScraper::new(Reply::Upstream("blocked"));
        let err = coordinator(scraper, None)
            .extract("https://example.org/a", Some("key"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn invalid_url_never_reaches_a_strategy() {
        let scraper = FakeScraper::new(Reply::Markdown("unused"));
        let host = FakeHost::serving(PAGE);
        let err = coordinator(scraper.clone(), Some(&host))
            .extract("notaurl", Some("key"), true)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
        assert_eq!(host.opened.load(Ordering::SeqCst), 0);
    }
}
