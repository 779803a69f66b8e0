//! Fallback extraction: render the page in a headless browser.
//!
//! The browser is driven through two small traits so the flow can be tested
//! with scripted fakes; the Chromium implementation lives in
//! [`crate::pipeline::browser`].
//!
//! The flow is a fixed sequence of steps:
//!
//! ```text
//! Launch → Navigate → WaitForLoad → ReadPage → Locate → Sanitize → Title → Coerce
//! ```
//!
//! * The whole sequence runs under one deadline (`browser_timeout_secs`).
//! * `WaitForLoad` has its own shorter bound; expiry there is logged and the
//!   flow continues with whatever has rendered.
//! * If `ReadPage` fails or yields nothing, the body's outer markup is
//!   returned unmodified and the remaining steps are skipped. A failed
//!   `Navigate` is fatal.
//! * The session is closed exactly once after the flow, whatever the outcome.

use crate::error::ArticleError;
use crate::pipeline::html;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Starts browser sessions.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, ArticleError>;
}

/// One live browser with (at most) one page.
#[async_trait]
pub trait BrowserSession: Send {
    /// Open a page at `url`. Returns once the request has been issued.
    async fn navigate(&mut self, url: &str) -> Result<(), ArticleError>;

    /// Wait until the page reports it has finished loading.
    async fn wait_for_load(&mut self) -> Result<(), ArticleError>;

    /// Full rendered document as HTML.
    async fn page_html(&mut self) -> Result<String, ArticleError>;

    /// `document.body.outerHTML`, used when the full document can't be read.
    async fn body_outer_html(&mut self) -> Result<String, ArticleError>;

    /// Release the page and the browser process.
    async fn close(self: Box<Self>);
}

/// Steps of the browser flow, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    Launch,
    Navigate,
    WaitForLoad,
    ReadPage,
    Locate,
    Sanitize,
    Title,
    Coerce,
}

impl fmt::Display for FallbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackStep::Launch => "launch",
            FallbackStep::Navigate => "navigate",
            FallbackStep::WaitForLoad => "wait for load",
            FallbackStep::ReadPage => "read page",
            FallbackStep::Locate => "locate content",
            FallbackStep::Sanitize => "sanitize",
            FallbackStep::Title => "resolve title",
            FallbackStep::Coerce => "coerce to markdown",
        };
        f.write_str(name)
    }
}

/// Browser-backed extractor.
#[derive(Clone)]
pub struct FallbackExtractor {
    host: Arc<dyn BrowserHost>,
    navigation_wait: Duration,
    deadline: Duration,
}

impl FallbackExtractor {
    pub fn new(host: Arc<dyn BrowserHost>, navigation_wait: Duration, deadline: Duration) -> Self {
        Self {
            host,
            navigation_wait,
            deadline,
        }
    }

    /// Render `url` and convert the article part of it to Markdown.
    ///
    /// # Errors
    /// * [`ArticleError::Timeout`] when the whole flow exceeds its deadline.
    /// * Whatever the browser host reports for launch, navigation or reads.
    pub async fn extract(&self, url: &str) -> Result<String, ArticleError> {
        info!("Browser extraction of {}", url);
        let deadline = Instant::now() + self.deadline;

        debug!("Fallback step: {}", FallbackStep::Launch);
        let mut session = match tokio::time::timeout_at(deadline, self.host.open()).await {
            Ok(opened) => opened?,
            Err(_) => return Err(self.deadline_error()),
        };

        let outcome = tokio::time::timeout_at(deadline, self.run(session.as_mut(), url)).await;
        session.close().await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("Browser extraction of {} hit its deadline", url);
                Err(self.deadline_error())
            }
        }
    }

    async fn run(&self, session: &mut dyn BrowserSession, url: &str) -> Result<String, ArticleError> {
        debug!("Fallback step: {}", FallbackStep::Navigate);
        session.navigate(url).await?;

        debug!("Fallback step: {}", FallbackStep::WaitForLoad);
        match tokio::time::timeout(self.navigation_wait, session.wait_for_load()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Page load signal failed, continuing: {}", e),
            Err(_) => warn!(
                "Page not loaded after {}ms, continuing with rendered content",
                self.navigation_wait.as_millis()
            ),
        }

        debug!("Fallback step: {}", FallbackStep::ReadPage);
        let page = match session.page_html().await {
            Ok(page) if !page.trim().is_empty() => page,
            Ok(_) => return self.last_resort(session, "rendered document is empty").await,
            Err(e) => return self.last_resort(session, &e.to_string()).await,
        };

        debug!("Fallback step: {}", FallbackStep::Locate);
        let located = html::locate_content(&page);
        debug!("Fallback step: {}", FallbackStep::Sanitize);
        let clean = html::sanitize(&located.html);
        debug!("Fallback step: {}", FallbackStep::Title);
        let title = html::resolve_title(&page);
        debug!("Fallback step: {}", FallbackStep::Coerce);
        let markdown = html::coerce_to_markdown(&clean, &title);

        info!(
            "Browser extraction produced {} bytes (content via {})",
            markdown.len(),
            located.selector.unwrap_or("body")
        );
        Ok(markdown)
    }

    /// The body's outer markup, returned as-is, when the rendered document
    /// cannot be read after a successful navigation.
    async fn last_resort(
        &self,
        session: &mut dyn BrowserSession,
        reason: &str,
    ) -> Result<String, ArticleError> {
        warn!("Could not read rendered document ({}), returning body markup unchanged", reason);
        session.body_outer_html().await
    }

    fn deadline_error(&self) -> ArticleError {
        ArticleError::timeout("Browser extraction", self.deadline.as_secs().max(1))
    }
}

impl fmt::Debug for FallbackExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackExtractor")
            .field("navigation_wait", &self.navigation_wait)
            .field("deadline", &self.deadline)
            .finish()
    }
}
