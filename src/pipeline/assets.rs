//! Image relocation: copy every referenced image to owned storage and point
//! the document at the copies.
//!
//! Failures are per image. A location that cannot be uploaded keeps its
//! original text and is reported in [`RelocationOutcome::failures`]; only a
//! credential problem stops the stage, and only when there is at least one
//! image to move.

use crate::config::StorageCredentials;
use crate::error::{ArticleError, AssetError};
use crate::output::{ImageReference, RelocatedAsset, RelocationOutcome};
use crate::pipeline::storage::{CloudinaryStore, ImageStore};
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// `![alt](location)`, `![alt](<location>)` and `![alt](location "title")`.
/// The location may contain one level of balanced parentheses.
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(\s*<?((?:[^()\s>]|\([^()\s]*\))+)>?(?:\s+"[^"]*")?\s*\)"#)
        .unwrap()
});

/// Every image reference in `markdown`, in document order.
pub fn find_images(markdown: &str) -> Vec<ImageReference> {
    RE_IMAGE
        .captures_iter(markdown)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ImageReference {
                alt: caps[1].to_string(),
                location: caps[2].to_string(),
                position: whole.start(),
            })
        })
        .collect()
}

/// Distinct locations, first-seen order.
fn unique_locations(images: &[ImageReference]) -> Vec<&str> {
    let mut seen = HashSet::new();
    images
        .iter()
        .map(|img| img.location.as_str())
        .filter(|loc| seen.insert(*loc))
        .collect()
}

enum StoreSource {
    Fixed(Arc<dyn ImageStore>),
    Cloudinary {
        endpoint: String,
        folder: String,
        timeout_secs: u64,
    },
}

/// Uploads images and rewrites their references.
pub struct AssetRelocator {
    source: StoreSource,
    progress: Option<ProgressCallback>,
}

impl AssetRelocator {
    /// Relocator that builds a Cloudinary client from the credentials passed
    /// to each [`relocate`](Self::relocate) call.
    pub fn cloudinary(endpoint: impl Into<String>, folder: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            source: StoreSource::Cloudinary {
                endpoint: endpoint.into(),
                folder: folder.into(),
                timeout_secs,
            },
            progress: None,
        }
    }

    /// Relocator bound to an existing store; credentials are not consulted.
    pub fn with_store(store: Arc<dyn ImageStore>) -> Self {
        Self {
            source: StoreSource::Fixed(store),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    fn store(&self, credentials: &StorageCredentials) -> Result<Arc<dyn ImageStore>, ArticleError> {
        match &self.source {
            StoreSource::Fixed(store) => Ok(Arc::clone(store)),
            StoreSource::Cloudinary {
                endpoint,
                folder,
                timeout_secs,
            } => Ok(Arc::new(CloudinaryStore::from_credentials(
                credentials,
                endpoint,
                folder,
                *timeout_secs,
            )?)),
        }
    }

    /// Upload each distinct image once and substitute every occurrence.
    ///
    /// # Errors
    /// [`ArticleError::Configuration`] when images are present but the
    /// storage credentials are incomplete. Upload failures are not errors.
    pub async fn relocate(
        &self,
        markdown: &str,
        credentials: &StorageCredentials,
    ) -> Result<RelocationOutcome, ArticleError> {
        let images = find_images(markdown);
        if images.is_empty() {
            info!("No images to relocate");
            return Ok(RelocationOutcome {
                markdown: markdown.to_string(),
                ..Default::default()
            });
        }

        let store = self.store(credentials)?;
        let locations = unique_locations(&images);
        info!(
            "Relocating {} images ({} distinct)",
            images.len(),
            locations.len()
        );

        let mut mapping: Vec<(String, String)> = Vec::new();
        let mut failures = Vec::new();

        for location in locations {
            let uploaded = match store.upload(location).await {
                Ok(url) if url.trim().is_empty() => Err(AssetError {
                    location: location.to_string(),
                    detail: "storage returned an empty URL".to_string(),
                }),
                other => other,
            };
            match uploaded {
                Ok(url) => {
                    if let Some(cb) = &self.progress {
                        cb.on_asset_relocated(location, &url);
                    }
                    mapping.push((location.to_string(), url));
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Some(cb) = &self.progress {
                        cb.on_asset_error(&e.location, &e.detail);
                    }
                    failures.push(e);
                }
            }
        }

        let (markdown, counts) = substitute(markdown, &mapping);
        let relocated = mapping
            .into_iter()
            .map(|(original, relocated)| RelocatedAsset {
                occurrences: counts.get(&original).copied().unwrap_or(0),
                original,
                relocated,
            })
            .collect();

        Ok(RelocationOutcome {
            markdown,
            images_found: images.len(),
            relocated,
            failures,
        })
    }
}

/// Replace every occurrence of each original with its new location in one
/// pass. Longer originals take precedence where one is a prefix of another,
/// and replaced text is never rescanned.
fn substitute(markdown: &str, mapping: &[(String, String)]) -> (String, HashMap<String, usize>) {
    let mut counts = HashMap::new();
    if mapping.is_empty() {
        return (markdown.to_string(), counts);
    }

    let mut originals: Vec<&str> = mapping.iter().map(|(o, _)| o.as_str()).collect();
    originals.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = originals
        .iter()
        .map(|o| regex::escape(o))
        .collect::<Vec<_>>()
        .join("|");

    let Ok(re) = Regex::new(&pattern) else {
        // Literal alternation only fails on size limits; fall back to sequential replace.
        let mut out = markdown.to_string();
        for original in &originals {
            if let Some((_, new)) = mapping.iter().find(|(o, _)| o.as_str() == *original) {
                counts.insert(original.to_string(), out.matches(original).count());
                out = out.replace(original, new);
            }
        }
        return (out, counts);
    };

    let lookup: HashMap<&str, &str> = mapping.iter().map(|(o, n)| (o.as_str(), n.as_str())).collect();
    let out = re
        .replace_all(markdown, |caps: &Captures<'_>| {
            let hit = &caps[0];
            *counts.entry(hit.to_string()).or_insert(0) += 1;
            lookup.get(hit).copied().unwrap_or(hit).to_string()
        })
        .into_owned();
    (out, counts)
}
