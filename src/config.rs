//! Configuration types for article processing.
//!
//! Behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Secrets are deliberately *not* part of it: they
//! travel separately in [`Credentials`] so a config can be logged, cloned and
//! shared without leaking keys, and so no stage ever reads ambient state.

use crate::error::ArticleError;
use crate::pipeline::dynamic::BrowserHost;
use crate::pipeline::llm::ModelBackend;
use crate::pipeline::scrape::ScrapeService;
use crate::pipeline::storage::ImageStore;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Scrape endpoint used when none is configured.
pub const DEFAULT_SCRAPE_ENDPOINT: &str = "https://api.firecrawl.dev/v0/scrape";

/// Base URL of the Gemini REST API.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Storage upload endpoint base; the cloud name and `/image/upload` are appended.
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://api.cloudinary.com/v1_1";

/// Model candidates, newest/most capable first.
pub const DEFAULT_MODEL_CANDIDATES: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-pro",
];

/// Configuration for one article-processing run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_article2md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .allow_fallback(false)
///     .max_chunk_chars(6000)
///     .models(["gemini-2.0-flash", "gemini-1.5-flash"])
///     .build()
///     .unwrap();
/// assert_eq!(config.model_candidates.len(), 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Extraction ───────────────────────────────────────────────────────
    /// Fall back to the headless browser when the scrape service is
    /// unavailable or fails. Default: true.
    pub allow_fallback: bool,

    /// Scrape service endpoint. Default: [`DEFAULT_SCRAPE_ENDPOINT`].
    pub scrape_endpoint: String,

    /// Scrape request timeout in seconds. Default: 30.
    ///
    /// The request is never retried: a scrape failure usually means the page
    /// type does not suit this strategy, and the browser fallback is the
    /// recovery path.
    pub scrape_timeout_secs: u64,

    /// How long to wait for the page to settle after navigation. Default: 30.
    pub navigation_timeout_secs: u64,

    /// Wall-clock budget for the whole browser extraction. Default: 60.
    pub browser_timeout_secs: u64,

    // ── Relocation ───────────────────────────────────────────────────────
    /// Storage upload endpoint base. Default: [`DEFAULT_UPLOAD_ENDPOINT`].
    pub upload_endpoint: String,

    /// Storage folder receiving relocated images. Default: `wechat_articles`.
    pub upload_folder: String,

    /// Per-image upload timeout in seconds. Default: 30.
    pub upload_timeout_secs: u64,

    // ── Rewrite ──────────────────────────────────────────────────────────
    /// Ordered model candidates, most capable first.
    /// Default: [`DEFAULT_MODEL_CANDIDATES`].
    pub model_candidates: Vec<String>,

    /// Provider name for `edgequake-llm` (e.g. "openai", "anthropic").
    /// If None, the built-in Gemini client is used with the model API key.
    pub provider_name: Option<String>,

    /// Gemini REST base URL. Default: [`DEFAULT_GEMINI_ENDPOINT`].
    pub model_endpoint: String,

    /// Documents longer than this many characters are split into chunks.
    /// Default: 8000.
    ///
    /// One oversized request is more likely to fail or come back truncated
    /// than several bounded ones.
    pub max_chunk_chars: usize,

    /// Attempts for a document rewritten in a single call. Default: 3.
    pub max_attempts: u32,

    /// Attempts per chunk when the document was split. Default: 2.
    pub chunk_attempts: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for rewrite calls. Default: 0.7.
    pub temperature: f32,

    /// Maximum output tokens per rewrite call. Default: 8192.
    pub max_tokens: usize,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    // ── Pre-constructed services ─────────────────────────────────────────
    /// Scrape service. Takes precedence over the HTTP client.
    pub scraper: Option<Arc<dyn ScrapeService>>,

    /// Browser host. Takes precedence over the Chrome launcher.
    pub browser: Option<Arc<dyn BrowserHost>>,

    /// Image store. Takes precedence over the credential-built uploader.
    pub image_store: Option<Arc<dyn ImageStore>>,

    /// Model backend. Takes precedence over `provider_name` and the Gemini client.
    pub model_backend: Option<Arc<dyn ModelBackend>>,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            scrape_endpoint: DEFAULT_SCRAPE_ENDPOINT.to_string(),
            scrape_timeout_secs: 30,
            navigation_timeout_secs: 30,
            browser_timeout_secs: 60,
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            upload_folder: "wechat_articles".to_string(),
            upload_timeout_secs: 30,
            model_candidates: DEFAULT_MODEL_CANDIDATES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            provider_name: None,
            model_endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            max_chunk_chars: 8000,
            max_attempts: 3,
            chunk_attempts: 2,
            retry_backoff_ms: 500,
            temperature: 0.7,
            max_tokens: 8192,
            api_timeout_secs: 60,
            scraper: None,
            browser: None,
            image_store: None,
            model_backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("allow_fallback", &self.allow_fallback)
            .field("scrape_endpoint", &self.scrape_endpoint)
            .field("scrape_timeout_secs", &self.scrape_timeout_secs)
            .field("browser_timeout_secs", &self.browser_timeout_secs)
            .field("upload_folder", &self.upload_folder)
            .field("model_candidates", &self.model_candidates)
            .field("provider_name", &self.provider_name)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("max_attempts", &self.max_attempts)
            .field("chunk_attempts", &self.chunk_attempts)
            .field("scraper", &self.scraper.as_ref().map(|_| "<dyn ScrapeService>"))
            .field("browser", &self.browser.as_ref().map(|_| "<dyn BrowserHost>"))
            .field("image_store", &self.image_store.as_ref().map(|_| "<dyn ImageStore>"))
            .field(
                "model_backend",
                &self.model_backend.as_ref().map(|_| "<dyn ModelBackend>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn allow_fallback(mut self, v: bool) -> Self {
        self.config.allow_fallback = v;
        self
    }

    pub fn scrape_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.scrape_endpoint = endpoint.into();
        self
    }

    pub fn scrape_timeout_secs(mut self, secs: u64) -> Self {
        self.config.scrape_timeout_secs = secs;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs;
        self
    }

    pub fn browser_timeout_secs(mut self, secs: u64) -> Self {
        self.config.browser_timeout_secs = secs;
        self
    }

    pub fn upload_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.upload_endpoint = endpoint.into();
        self
    }

    pub fn upload_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.upload_folder = folder.into();
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    /// Replace the ordered model candidate list.
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.model_candidates = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.model_endpoint = endpoint.into();
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn chunk_attempts(mut self, n: u32) -> Self {
        self.config.chunk_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn scraper(mut self, scraper: Arc<dyn ScrapeService>) -> Self {
        self.config.scraper = Some(scraper);
        self
    }

    pub fn browser(mut self, host: Arc<dyn BrowserHost>) -> Self {
        self.config.browser = Some(host);
        self
    }

    pub fn image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.config.image_store = Some(store);
        self
    }

    pub fn model_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.model_backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ArticleError> {
        let c = &self.config;
        if c.model_candidates.is_empty() {
            return Err(ArticleError::InvalidConfig(
                "At least one model candidate is required".into(),
            ));
        }
        if c.model_candidates.iter().any(|m| m.trim().is_empty()) {
            return Err(ArticleError::InvalidConfig(
                "Model candidate names must not be blank".into(),
            ));
        }
        if c.max_chunk_chars < 100 {
            return Err(ArticleError::InvalidConfig(format!(
                "max_chunk_chars must be ≥ 100, got {}",
                c.max_chunk_chars
            )));
        }
        if c.max_attempts == 0 || c.chunk_attempts == 0 {
            return Err(ArticleError::InvalidConfig(
                "Attempt bounds must be ≥ 1".into(),
            ));
        }
        if c.browser_timeout_secs == 0 || c.scrape_timeout_secs == 0 {
            return Err(ArticleError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Image-storage account credentials. All three fields are required, but
/// only once there is at least one image to relocate.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageCredentials {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl StorageCredentials {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: Some(cloud_name.into()),
            api_key: Some(api_key.into()),
            api_secret: Some(api_secret.into()),
        }
    }

    /// Names of the required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("cloud_name", &self.cloud_name),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ]
        .into_iter()
        .filter(|(_, v)| non_blank(v.as_deref()).is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

/// Every secret the pipeline may need, threaded explicitly into each stage.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Scrape service API key. Absent → extraction goes straight to the browser.
    pub scrape_api_key: Option<String>,
    /// Image storage account.
    pub storage: StorageCredentials,
    /// Model service API key (Gemini).
    pub model_api_key: Option<String>,
}

impl Credentials {
    /// The scrape key, if present and not blank.
    pub fn scrape_key(&self) -> Option<&str> {
        non_blank(self.scrape_api_key.as_deref())
    }

    /// The model key, if present and not blank.
    pub fn model_key(&self) -> Option<&str> {
        non_blank(self.model_api_key.as_deref())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("scrape_api_key", &redact(&self.scrape_api_key))
            .field("storage", &self.storage)
            .field("model_api_key", &redact(&self.model_api_key))
            .finish()
    }
}

pub(crate) fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn redact(v: &Option<String>) -> Option<&'static str> {
    v.as_ref().map(|_| "<redacted>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert!(c.allow_fallback);
        assert_eq!(c.scrape_timeout_secs, 30);
        assert_eq!(c.browser_timeout_secs, 60);
        assert_eq!(c.upload_timeout_secs, 30);
        assert_eq!(c.max_chunk_chars, 8000);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.chunk_attempts, 2);
        assert_eq!(c.model_candidates[0], "gemini-2.5-pro");
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let err = PipelineConfig::builder()
            .models(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ArticleError::InvalidConfig(_)));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(PipelineConfig::builder().chunk_attempts(0).build().is_err());
        assert!(PipelineConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn storage_missing_fields_treats_blank_as_missing() {
        let creds = StorageCredentials {
            cloud_name: Some("demo".into()),
            api_key: Some("   ".into()),
            api_secret: None,
        };
        assert_eq!(creds.missing_fields(), vec!["api_key", "api_secret"]);
        assert!(!creds.is_complete());
        assert!(StorageCredentials::new("a", "b", "c").is_complete());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials {
            scrape_api_key: Some("fc-secret".into()),
            storage: StorageCredentials::new("demo", "key-123", "shh"),
            model_api_key: Some("AIza-secret".into()),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("fc-secret"));
        assert!(!dbg.contains("shh"));
        assert!(!dbg.contains("AIza-secret"));
        assert!(dbg.contains("demo"));
    }

    #[test]
    fn blank_keys_are_absent() {
        let creds = Credentials {
            scrape_api_key: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(creds.scrape_key(), None);
        assert_eq!(creds.model_key(), None);
    }
}
