//! Chromium implementation of [`BrowserHost`] via `chromiumoxide`.
//!
//! Every session launches its own headless browser with a throwaway profile
//! directory. The browser process, its CDP handler task and the profile are
//! torn down in [`BrowserSession::close`]; [`Drop`] covers early exits.

use crate::error::ArticleError;
use crate::pipeline::dynamic::{BrowserHost, BrowserSession};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const COMPONENT: &str = "Browser";

/// Launches headless Chromium.
#[derive(Debug, Clone, Default)]
pub struct ChromeHost {
    /// Explicit browser binary; `None` lets chromiumoxide search the usual places.
    pub executable: Option<std::path::PathBuf>,
}

impl ChromeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }
}

#[async_trait]
impl BrowserHost for ChromeHost {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, ArticleError> {
        let profile = TempDir::new().map_err(|e| {
            ArticleError::Internal(format!("cannot create browser profile dir: {e}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(exe) = &self.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| ArticleError::configuration(COMPONENT, e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ArticleError::configuration(COMPONENT, format!("launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        debug!("Launched headless browser, profile {}", profile.path().display());

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            page: None,
            handler_task: Some(handler_task),
            _profile: profile,
        }))
    }
}

/// A live Chromium process with one page.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    _profile: TempDir,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, ArticleError> {
        self.page
            .as_ref()
            .ok_or_else(|| ArticleError::Internal("no page open in browser session".into()))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ArticleError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ArticleError::Internal("browser already closed".into()))?;
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| ArticleError::network(COMPONENT, format!("navigation failed: {e}")))?;
        self.page = Some(page);
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), ArticleError> {
        self.page()?
            .wait_for_navigation()
            .await
            .map_err(|e| ArticleError::network(COMPONENT, e))?;
        Ok(())
    }

    async fn page_html(&mut self) -> Result<String, ArticleError> {
        self.page()?
            .content()
            .await
            .map_err(|e| ArticleError::network(COMPONENT, e))
    }

    async fn body_outer_html(&mut self) -> Result<String, ArticleError> {
        self.page()?
            .evaluate("document.body ? document.body.outerHTML : ''")
            .await
            .map_err(|e| ArticleError::network(COMPONENT, e))?
            .into_value::<String>()
            .map_err(|e| ArticleError::upstream(COMPONENT, format!("unexpected body value: {e}")))
    }

    async fn close(mut self: Box<Self>) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Page close failed: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close failed: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser wait failed: {}", e);
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        debug!("Browser session closed");
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // Reached without close() only on cancellation or panic. Dropping the
        // Browser kills its child process.
        if self.browser.take().is_some() {
            warn!("Browser session dropped without close, killing browser");
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
