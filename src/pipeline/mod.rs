//! Pipeline stages for article-to-Markdown processing.
//!
//! Each submodule implements one step or one service seam. Remote services
//! sit behind traits ([`scrape::ScrapeService`], [`dynamic::BrowserHost`],
//! [`storage::ImageStore`], [`llm::ModelBackend`]) so every stage can be
//! exercised with in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌──▶ scrape ──────────────────────┐
//! extract ───┤                                 ├──▶ assets ──▶ rewrite
//!            └──▶ dynamic ──▶ browser + html ──┘    (storage)   (chunk, llm, postprocess)
//! ```
//!
//! 1. [`extract`] : choose scrape service or browser, validate the URL
//! 2. [`scrape`]  : the managed scrape API; one bounded call
//! 3. [`dynamic`] : browser flow under a deadline; [`html`] turns the
//!    rendered page into Markdown, [`browser`] drives Chromium
//! 4. [`assets`]  : upload each distinct image once via [`storage`] and
//!    substitute the new URLs
//! 5. [`rewrite`] : probe model candidates, split long documents with
//!    [`chunk`], call [`llm`] with retry/backoff, clean with [`postprocess`]

#[cfg(feature = "browser")]
pub mod browser;
pub mod assets;
pub mod chunk;
pub mod dynamic;
pub mod extract;
pub mod html;
pub mod llm;
pub mod postprocess;
pub mod rewrite;
pub mod scrape;
pub mod storage;
