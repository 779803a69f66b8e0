//! Output types produced by each stage and by the whole pipeline.

use crate::error::AssetError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which extraction strategy produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// The managed scrape service.
    Primary,
    /// The headless-browser extractor.
    Fallback,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::Primary => f.write_str("scrape service"),
            ExtractionStrategy::Fallback => f.write_str("browser fallback"),
        }
    }
}

/// Markdown returned by the extraction coordinator, tagged with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub markdown: String,
    pub strategy: ExtractionStrategy,
}

/// One `![alt](location)` occurrence in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub alt: String,
    pub location: String,
    /// Byte offset of the leading `!` in the scanned document.
    pub position: usize,
}

/// An image that was uploaded, and where it lives now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocatedAsset {
    pub original: String,
    pub relocated: String,
    /// How many occurrences of `original` were substituted.
    pub occurrences: usize,
}

/// Result of one relocation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelocationOutcome {
    /// The document with every successfully uploaded location substituted.
    pub markdown: String,
    /// Number of image references found (including duplicates).
    pub images_found: usize,
    /// One entry per unique location that was relocated.
    pub relocated: Vec<RelocatedAsset>,
    /// One entry per unique location that kept its original reference.
    pub failures: Vec<AssetError>,
}

impl RelocationOutcome {
    /// Number of distinct upload calls this pass made.
    pub fn uploads_attempted(&self) -> usize {
        self.relocated.len() + self.failures.len()
    }
}

/// Result of one rewrite call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOutcome {
    pub markdown: String,
    /// The candidate that answered its probe and served every chunk.
    pub model: String,
    /// Number of chunks sent (1 when the document fit the budget).
    pub chunks: usize,
}

/// Timing and counters for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub extraction_ms: u64,
    pub relocation_ms: u64,
    pub rewrite_ms: u64,
    pub total_duration_ms: u64,
    pub images_found: usize,
    pub images_relocated: usize,
    pub images_failed: usize,
    pub chunks: usize,
    /// The model candidate that answered its probe.
    pub model: String,
}

/// Final product of [`crate::process::process`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedArticle {
    pub source_url: String,
    /// Rewritten Markdown.
    pub content: String,
    pub strategy: ExtractionStrategy,
    pub asset_failures: Vec<AssetError>,
    pub processed_at: DateTime<Local>,
    pub stats: PipelineStats,
}

impl ProcessedArticle {
    /// Title for history listings: the first level-1 heading, else a
    /// timestamped placeholder.
    pub fn title(&self) -> String {
        first_heading(&self.content).unwrap_or_else(|| {
            format!("Article_{}", self.processed_at.format("%Y%m%d_%H%M%S"))
        })
    }

    /// Record handed to the history layer.
    pub fn to_history_item(&self) -> HistoryItem {
        HistoryItem {
            source_url: self.source_url.clone(),
            title: self.title(),
            content: self.content.clone(),
            processed_at: self.processed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// History entry owned by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub processed_at: String,
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .filter_map(|l| l.trim_start().strip_prefix("# "))
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(content: &str) -> ProcessedArticle {
        ProcessedArticle {
            source_url: "https://mp.weixin.qq.com/s/abc".into(),
            content: content.into(),
            strategy: ExtractionStrategy::Primary,
            asset_failures: vec![],
            processed_at: Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
            stats: PipelineStats::default(),
        }
    }

    #[test]
    fn title_from_first_h1() {
        let a = article("intro\n\n## Sub\n\n# Real Title \n\nbody");
        assert_eq!(a.title(), "Real Title");
    }

    #[test]
    fn title_placeholder_without_heading() {
        let a = article("just text");
        assert_eq!(a.title(), "Article_20250304_050607");
    }

    #[test]
    fn history_item_formats_timestamp() {
        let item = article("# T\n\nHello").to_history_item();
        assert_eq!(item.processed_at, "2025-03-04 05:06:07");
        assert_eq!(item.title, "T");
        assert_eq!(item.source_url, "https://mp.weixin.qq.com/s/abc");
    }

    #[test]
    fn strategy_serialises_snake_case() {
        let json = serde_json::to_string(&ExtractionStrategy::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
    }
}
