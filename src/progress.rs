//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as an article moves through extraction, image relocation and
//! rewriting.
//!
//! Callbacks keep the library ignorant of how the host reports progress: a
//! terminal spinner, a log line, a WebSocket message. This is also the
//! channel through which swallowed per-image failures are surfaced.
//!
//! # Example
//!
//! ```rust
//! use edgequake_article2md::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailedImages(AtomicUsize);
//!
//! impl PipelineProgressCallback for FailedImages {
//!     fn on_asset_error(&self, location: &str, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("kept original {location}: {error}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(FailedImages(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use crate::output::ExtractionStrategy;
use std::sync::Arc;

/// Called by the pipeline as it processes an article.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run sequentially, so events arrive in order.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    ///
    /// # Arguments
    /// * `stage`       : the finished stage
    /// * `markdown_len`: byte length of the document the stage produced
    fn on_stage_complete(&self, stage: Stage, markdown_len: usize) {
        let _ = (stage, markdown_len);
    }

    /// Called when the scrape service failed (or had no key) and the browser
    /// fallback is about to run.
    fn on_extraction_fallback(&self, reason: &str) {
        let _ = reason;
    }

    /// Called once extraction succeeded, naming the strategy that produced it.
    fn on_extracted(&self, strategy: ExtractionStrategy) {
        let _ = strategy;
    }

    /// Called after one image has been uploaded and substituted.
    fn on_asset_relocated(&self, original: &str, relocated: &str) {
        let _ = (original, relocated);
    }

    /// Called when one image could not be relocated. The pipeline continues.
    fn on_asset_error(&self, location: &str, error: &str) {
        let _ = (location, error);
    }

    /// Called when a model candidate answered its probe and was selected.
    fn on_model_selected(&self, model: &str) {
        let _ = model;
    }

    /// Called after each chunk has been rewritten.
    ///
    /// # Arguments
    /// * `chunk`       : 1-indexed chunk number
    /// * `total_chunks`: number of chunks in this rewrite
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
