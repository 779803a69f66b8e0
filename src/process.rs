//! Article processing entry points: the composition root of the pipeline.
//!
//! [`process`] wires the three stages together in order:
//!
//! ```text
//! URL ──▶ extraction ──▶ image relocation ──▶ rewrite ──▶ ProcessedArticle
//! ```
//!
//! Services come from the [`PipelineConfig`] overrides when set, otherwise
//! they are built from [`Credentials`]. Nothing is shared between calls.

use crate::config::{Credentials, PipelineConfig};
use crate::error::{ArticleError, Stage};
use crate::output::{PipelineStats, ProcessedArticle};
use crate::pipeline::assets::AssetRelocator;
use crate::pipeline::dynamic::{BrowserHost, FallbackExtractor};
use crate::pipeline::extract::{validate_url, ExtractionCoordinator};
use crate::pipeline::llm::{GeminiBackend, LlmProviderBackend, ModelBackend};
use crate::pipeline::rewrite::RewriteEngine;
use crate::pipeline::scrape::{ScrapeClient, ScrapeService};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Turn a web article into rewritten Markdown.
///
/// # Arguments
/// * `url`        : absolute http(s) URL of the article
/// * `credentials`: scrape key, storage account and model key
/// * `instruction`: rewrite instruction; `None` uses the default
/// * `config`     : pipeline configuration
///
/// # Errors
/// * [`ArticleError::InvalidUrl`] before any network call.
/// * Any other failure, wrapped in [`ArticleError::Stage`] naming the stage
///   it escaped from. Per-image upload failures are not errors; they are
///   listed in [`ProcessedArticle::asset_failures`].
pub async fn process(
    url: impl AsRef<str>,
    credentials: &Credentials,
    instruction: Option<&str>,
    config: &PipelineConfig,
) -> Result<ProcessedArticle, ArticleError> {
    let total_start = Instant::now();
    let url = validate_url(url.as_ref())?.to_string();
    info!("Processing {}", url);

    // Resolved before any work so a missing model key fails fast.
    let backend = resolve_backend(config, credentials).map_err(|e| e.in_stage(Stage::Rewrite))?;
    let cb = config.progress_callback.as_ref();
    let mut stats = PipelineStats::default();

    // ── Stage 1: Extraction ──────────────────────────────────────────────
    if let Some(cb) = cb {
        cb.on_stage_start(Stage::Extraction);
    }
    let start = Instant::now();
    let coordinator = ExtractionCoordinator::new(resolve_scraper(config), resolve_fallback(config))
        .with_progress(config.progress_callback.clone());
    let extracted = coordinator
        .extract(&url, credentials.scrape_key(), config.allow_fallback)
        .await
        .map_err(|e| e.in_stage(Stage::Extraction))?;
    stats.extraction_ms = start.elapsed().as_millis() as u64;
    info!(
        "Extracted {} bytes via {} in {}ms",
        extracted.markdown.len(),
        extracted.strategy,
        stats.extraction_ms
    );
    if let Some(cb) = cb {
        cb.on_stage_complete(Stage::Extraction, extracted.markdown.len());
    }

    // ── Stage 2: Image relocation ────────────────────────────────────────
    if let Some(cb) = cb {
        cb.on_stage_start(Stage::Relocation);
    }
    let start = Instant::now();
    let relocator = match &config.image_store {
        Some(store) => AssetRelocator::with_store(Arc::clone(store)),
        None => AssetRelocator::cloudinary(
            config.upload_endpoint.clone(),
            config.upload_folder.clone(),
            config.upload_timeout_secs,
        ),
    }
    .with_progress(config.progress_callback.clone());
    let relocated = relocator
        .relocate(&extracted.markdown, &credentials.storage)
        .await
        .map_err(|e| e.in_stage(Stage::Relocation))?;
    stats.relocation_ms = start.elapsed().as_millis() as u64;
    stats.images_found = relocated.images_found;
    stats.images_relocated = relocated.relocated.len();
    stats.images_failed = relocated.failures.len();
    info!(
        "Relocated {}/{} distinct images in {}ms",
        stats.images_relocated,
        relocated.uploads_attempted(),
        stats.relocation_ms
    );
    if let Some(cb) = cb {
        cb.on_stage_complete(Stage::Relocation, relocated.markdown.len());
    }

    // ── Stage 3: Rewrite ─────────────────────────────────────────────────
    if let Some(cb) = cb {
        cb.on_stage_start(Stage::Rewrite);
    }
    let start = Instant::now();
    let rewritten = RewriteEngine::new(backend, config)
        .rewrite(&relocated.markdown, instruction)
        .await
        .map_err(|e| e.in_stage(Stage::Rewrite))?;
    stats.rewrite_ms = start.elapsed().as_millis() as u64;
    stats.chunks = rewritten.chunks;
    stats.model = rewritten.model;
    info!(
        "Rewrote {} chunk(s) with {} in {}ms",
        stats.chunks, stats.model, stats.rewrite_ms
    );
    if let Some(cb) = cb {
        cb.on_stage_complete(Stage::Rewrite, rewritten.markdown.len());
    }

    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    debug!("Pipeline stats: {:?}", stats);

    Ok(ProcessedArticle {
        source_url: url,
        content: rewritten.markdown,
        strategy: extracted.strategy,
        asset_failures: relocated.failures,
        processed_at: Local::now(),
        stats,
    })
}

/// Process an article and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    credentials: &Credentials,
    instruction: Option<&str>,
    config: &PipelineConfig,
) -> Result<ProcessedArticle, ArticleError> {
    let article = process(url, credentials, instruction, config).await?;
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| ArticleError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    let mut body = article.content.clone();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    tokio::fs::write(&tmp_path, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Wrote {}", path.display());
    Ok(article)
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    url: impl AsRef<str>,
    credentials: &Credentials,
    instruction: Option<&str>,
    config: &PipelineConfig,
) -> Result<ProcessedArticle, ArticleError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ArticleError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(url, credentials, instruction, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn resolve_scraper(config: &PipelineConfig) -> Arc<dyn ScrapeService> {
    match &config.scraper {
        Some(scraper) => Arc::clone(scraper),
        None => Arc::new(ScrapeClient::new(
            config.scrape_endpoint.clone(),
            config.scrape_timeout_secs,
        )),
    }
}

fn resolve_fallback(config: &PipelineConfig) -> Option<FallbackExtractor> {
    let host = config.browser.clone().or_else(default_browser)?;
    Some(FallbackExtractor::new(
        host,
        Duration::from_secs(config.navigation_timeout_secs),
        Duration::from_secs(config.browser_timeout_secs),
    ))
}

#[cfg(feature = "browser")]
fn default_browser() -> Option<Arc<dyn BrowserHost>> {
    Some(Arc::new(crate::pipeline::browser::ChromeHost::new()))
}

#[cfg(not(feature = "browser"))]
fn default_browser() -> Option<Arc<dyn BrowserHost>> {
    None
}

/// Resolve the model backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.model_backend`): used as-is.
/// 2. **Named provider** (`config.provider_name`): every candidate is
///    created through `edgequake-llm`, which reads its own API key variables.
/// 3. **Gemini key** (`credentials.model_api_key`): direct REST client.
fn resolve_backend(
    config: &PipelineConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn ModelBackend>, ArticleError> {
    if let Some(backend) = &config.model_backend {
        return Ok(Arc::clone(backend));
    }

    if let Some(name) = crate::config::non_blank(config.provider_name.as_deref()) {
        debug!("Using edgequake-llm provider '{}'", name);
        return Ok(Arc::new(LlmProviderBackend::new(
            name,
            config.temperature,
            config.max_tokens,
        )));
    }

    if let Some(key) = credentials.model_key() {
        return Ok(Arc::new(
            GeminiBackend::new(config.model_endpoint.clone(), key)
                .with_generation(config.temperature, config.max_tokens)
                .with_timeout_secs(config.api_timeout_secs),
        ));
    }

    Err(ArticleError::configuration(
        "Model service",
        "no model API key was provided and no provider is configured.\n\
         Set GEMINI_API_KEY or choose a provider with --provider.",
    ))
}
