//! # edgequake-article2md
//!
//! Turn a web article into a rewritten, self-contained Markdown document.
//!
//! ## Why this crate?
//!
//! Republishing an article means three chores: getting clean Markdown out of
//! a page that may only render with JavaScript, copying every image somewhere
//! that will not expire or block hot-linking, and rewriting the text. This
//! crate chains those steps and keeps going when an individual image fails.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Extract   scrape service, headless-browser fallback
//!  ├─ 2. Relocate  upload each distinct image once, substitute new URLs
//!  ├─ 3. Rewrite   probe model candidates, chunk, retry with backoff
//!  └─ 4. Output    rewritten Markdown + strategy, image failures, stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_article2md::{process, Credentials, PipelineConfig, StorageCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials {
//!         scrape_api_key: std::env::var("FIRECRAWL_API_KEY").ok(),
//!         storage: StorageCredentials {
//!             cloud_name: std::env::var("CLOUDINARY_CLOUD_NAME").ok(),
//!             api_key: std::env::var("CLOUDINARY_API_KEY").ok(),
//!             api_secret: std::env::var("CLOUDINARY_API_SECRET").ok(),
//!         },
//!         model_api_key: std::env::var("GEMINI_API_KEY").ok(),
//!     };
//!     let config = PipelineConfig::default();
//!     let article = process("https://example.org/post", &credentials, None, &config).await?;
//!     println!("{}", article.content);
//!     eprintln!("{} image(s) kept their original URL", article.asset_failures.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `article2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `browser` | on      | Headless-Chrome fallback extractor (chromiumoxide) |
//!
//! Library-only, scrape-service-only usage:
//! ```toml
//! edgequake-article2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Credentials, PipelineConfig, PipelineConfigBuilder, StorageCredentials};
pub use error::{ArticleError, AssetError, ErrorKind, ModelError, Stage};
pub use output::{
    ExtractionResult, ExtractionStrategy, HistoryItem, PipelineStats, ProcessedArticle,
    RelocatedAsset, RelocationOutcome, RewriteOutcome,
};
pub use process::{process, process_sync, process_to_file};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
