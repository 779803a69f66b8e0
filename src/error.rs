//! Error types for the edgequake-article2md library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ArticleError`]: **Fatal**: the article cannot be produced (bad URL,
//!   missing credentials, every model candidate down, a chunk that would not
//!   rewrite). Returned as `Err(ArticleError)` from the top-level `process*`
//!   functions and from each stage entry point.
//!
//! * [`AssetError`]: **Non-fatal**: one image could not be relocated. Stored
//!   in [`crate::output::RelocationOutcome`]; the original reference stays in
//!   the document and the pipeline carries on.
//!
//! * [`ModelError`]: **Per-attempt**: one model call failed. The rewrite
//!   engine decides whether to retry, move on to the next candidate, or give
//!   up and wrap the last one into an [`ArticleError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to prefix errors that escape a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Extraction,
    Relocation,
    Rewrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => f.write_str("extraction"),
            Stage::Relocation => f.write_str("image relocation"),
            Stage::Rewrite => f.write_str("rewrite"),
        }
    }
}

/// Coarse classification of an [`ArticleError`].
///
/// Callers branch on this instead of matching every variant; the extraction
/// coordinator uses it to decide whether a primary failure may fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Configuration,
    Network,
    Upstream,
    Timeout,
    ServiceUnavailable,
    Rewrite,
    Io,
    Internal,
}

/// All fatal errors returned by the edgequake-article2md library.
///
/// Per-image failures use [`AssetError`] and are stored in the relocation
/// outcome rather than propagated here.
#[derive(Debug, Error)]
pub enum ArticleError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The URL is empty, unparsable, or not HTTP(S).
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// A credential needed by a stage is missing or incomplete.
    #[error("{component} is not configured: {detail}")]
    Configuration { component: String, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Remote service errors ─────────────────────────────────────────────
    /// Transport-level failure talking to a remote service.
    #[error("Network error talking to {service}: {detail}\nCheck your internet connection.")]
    Network { service: String, detail: String },

    /// The service answered but reported failure or returned an unexpected shape.
    #[error("{service} reported an error: {message}")]
    Upstream { service: String, message: String },

    /// A bounded operation exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// No model candidate answered its probe.
    #[error(
        "No usable model backend: tried {}.\nLast error: {last_error}",
        .tried.join(", ")
    )]
    ServiceUnavailable {
        tried: Vec<String>,
        last_error: String,
    },

    /// A chunk could not be rewritten within its retry budget.
    #[error("Rewrite of chunk {chunk}/{total_chunks} failed after {attempts} attempts: {detail}")]
    RewriteFailed {
        chunk: usize,
        total_chunks: usize,
        attempts: u32,
        detail: String,
    },

    // ── Context ───────────────────────────────────────────────────────────
    /// An error that escaped a pipeline stage, prefixed with that stage.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ArticleError>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArticleError {
    pub(crate) fn configuration(component: impl Into<String>, detail: impl Into<String>) -> Self {
        ArticleError::Configuration {
            component: component.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn network(service: impl Into<String>, detail: impl fmt::Display) -> Self {
        ArticleError::Network {
            service: service.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        ArticleError::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        ArticleError::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Wrap this error with the stage it escaped from.
    pub fn in_stage(self, stage: Stage) -> Self {
        ArticleError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage-free error underneath any [`ArticleError::Stage`] wrappers.
    pub fn root(&self) -> &ArticleError {
        match self {
            ArticleError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage this error escaped from, if it was wrapped by the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ArticleError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Taxonomy of the underlying failure.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ArticleError::InvalidUrl { .. } => ErrorKind::Input,
            ArticleError::Configuration { .. } | ArticleError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            ArticleError::Network { .. } => ErrorKind::Network,
            ArticleError::Upstream { .. } => ErrorKind::Upstream,
            ArticleError::Timeout { .. } => ErrorKind::Timeout,
            ArticleError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ArticleError::RewriteFailed { .. } => ErrorKind::Rewrite,
            ArticleError::OutputWriteFailed { .. } => ErrorKind::Io,
            ArticleError::Internal(_) | ArticleError::Stage { .. } => ErrorKind::Internal,
        }
    }

    /// Whether an extraction failure of this kind may be absorbed by the
    /// browser fallback. Input and configuration errors never are.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Upstream | ErrorKind::Timeout
        )
    }
}

/// A non-fatal error for a single image.
///
/// Stored in [`crate::output::RelocationOutcome::failures`]; the image keeps
/// its original location in the output.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Image '{location}' was not relocated: {detail}")]
pub struct AssetError {
    pub location: String,
    pub detail: String,
}

/// Failure of a single model call (probe or rewrite attempt).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The request never produced a response.
    #[error("model '{model}': transport error: {detail}")]
    Transport { model: String, detail: String },

    /// The service answered with an error.
    #[error("model '{model}': API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api {
        model: String,
        status: Option<u16>,
        message: String,
    },

    /// The service answered but produced no text.
    #[error("model '{model}' returned an empty response")]
    EmptyResponse { model: String },

    /// The call exceeded the per-call deadline.
    #[error("model '{model}' timed out after {secs}s")]
    Timeout { model: String, secs: u64 },

    /// The answer lost image references that were in the input.
    #[error("model '{model}' dropped image references: {}", .missing.join(", "))]
    DroppedImages { model: String, missing: Vec<String> },
}
