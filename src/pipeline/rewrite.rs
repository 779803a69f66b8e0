//! Rewrite engine: pick a live model, then rewrite the document through it.
//!
//! ## Model selection
//!
//! Candidates are probed in order with [`PROBE_PROMPT`]; the first to answer
//! serves the whole call. Selection is repeated on every call, so a model that
//! recovers is picked up again next time.
//!
//! ## Retry Strategy
//!
//! Each chunk gets a fixed attempt budget (`max_attempts` for a document that
//! fits in one call, `chunk_attempts` per chunk otherwise). Model errors,
//! empty responses and answers that lost an image reference are retried with
//! exponential backoff
//! (`retry_backoff_ms * 2^(retry-1)`): with 500 ms base the waits are
//! 500 ms → 1 s. The first chunk that exhausts its budget fails the call;
//! partial output is discarded.
//!
//! ## Length policy
//!
//! A document fits in one call when its text, leading and trailing whitespace
//! excluded, is within `max_chunk_chars`. Otherwise it is split with
//! [`split_chunks`] and a whitespace-only piece is folded into the chunk
//! before it, so every call carries text and a document over budget always
//! takes more than one call.

use crate::config::PipelineConfig;
use crate::error::{ArticleError, ModelError};
use crate::output::RewriteOutcome;
use crate::pipeline::assets::find_images;
use crate::pipeline::chunk::split_chunks;
use crate::pipeline::llm::ModelBackend;
use crate::pipeline::postprocess::clean_rewrite;
use crate::progress::ProgressCallback;
use crate::prompts::{build_rewrite_prompt, PROBE_PROMPT};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Rewrites Markdown through the first available model candidate.
pub struct RewriteEngine {
    backend: Arc<dyn ModelBackend>,
    candidates: Vec<String>,
    max_chunk_chars: usize,
    max_attempts: u32,
    chunk_attempts: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl RewriteEngine {
    pub fn new(backend: Arc<dyn ModelBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            candidates: config.model_candidates.clone(),
            max_chunk_chars: config.max_chunk_chars,
            max_attempts: config.max_attempts,
            chunk_attempts: config.chunk_attempts,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
            progress: config.progress_callback.clone(),
        }
    }

    /// Probe candidates in order and return the first that answers.
    ///
    /// # Errors
    /// [`ArticleError::ServiceUnavailable`] listing every candidate tried.
    pub async fn select_model(&self) -> Result<String, ArticleError> {
        let mut last_error = String::from("no model candidates configured");

        for model in &self.candidates {
            debug!("Probing model {}", model);
            match self.call(model, PROBE_PROMPT).await {
                Ok(_) => {
                    info!("Using model {}", model);
                    if let Some(cb) = &self.progress {
                        cb.on_model_selected(model);
                    }
                    return Ok(model.clone());
                }
                Err(e) => {
                    debug!("Probe of {} failed: {}", model, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(ArticleError::ServiceUnavailable {
            tried: self.candidates.clone(),
            last_error,
        })
    }

    /// Rewrite `markdown` following `instruction` (or the default one).
    ///
    /// # Errors
    /// * [`ArticleError::ServiceUnavailable`] when no candidate answers.
    /// * [`ArticleError::RewriteFailed`] when a chunk exhausts its attempts.
    pub async fn rewrite(
        &self,
        markdown: &str,
        instruction: Option<&str>,
    ) -> Result<RewriteOutcome, ArticleError> {
        if markdown.trim().is_empty() {
            return Err(ArticleError::RewriteFailed {
                chunk: 0,
                total_chunks: 0,
                attempts: 0,
                detail: "document is empty".to_string(),
            });
        }

        let model = self.select_model().await?;

        let body = markdown.trim();
        let single = body.chars().count() <= self.max_chunk_chars;
        let (chunks, attempts) = if single {
            (vec![markdown], self.max_attempts)
        } else {
            (content_chunks(body, self.max_chunk_chars), self.chunk_attempts)
        };
        let total = chunks.len();
        if !single {
            info!(
                "Document has {} chars, rewriting in {} chunks",
                markdown.chars().count(),
                total
            );
        }

        let mut outputs = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            let start = Instant::now();
            let text = self
                .rewrite_chunk(&model, chunk, instruction, attempts, i + 1, total)
                .await?;
            debug!("Chunk {}/{} rewritten in {:?}", i + 1, total, start.elapsed());
            if let Some(cb) = &self.progress {
                cb.on_chunk_complete(i + 1, total);
            }
            outputs.push(text);
        }

        Ok(RewriteOutcome {
            markdown: outputs.join("\n\n"),
            model,
            chunks: total,
        })
    }

    async fn rewrite_chunk(
        &self,
        model: &str,
        chunk: &str,
        instruction: Option<&str>,
        attempts: u32,
        index: usize,
        total: usize,
    ) -> Result<String, ArticleError> {
        let prompt = build_rewrite_prompt(instruction, chunk);
        let expected_images: Vec<String> =
            find_images(chunk).into_iter().map(|img| img.location).collect();
        let mut last_err: Option<ModelError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 2);
                warn!(
                    "Chunk {}/{}: retry {}/{} after {}ms",
                    index,
                    total,
                    attempt - 1,
                    attempts - 1,
                    backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let result = self.call(model, &prompt).await.and_then(|raw| {
                let cleaned = clean_rewrite(&raw, chunk);
                if cleaned.is_empty() {
                    return Err(ModelError::EmptyResponse {
                        model: model.to_string(),
                    });
                }
                let missing = missing_images(&expected_images, &cleaned);
                if missing.is_empty() {
                    Ok(cleaned)
                } else {
                    Err(ModelError::DroppedImages {
                        model: model.to_string(),
                        missing,
                    })
                }
            });

            match result {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Chunk {}/{}: attempt {} failed: {}", index, total, attempt, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ArticleError::RewriteFailed {
            chunk: index,
            total_chunks: total,
            attempts,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// One backend call bounded by the per-call timeout.
    async fn call(&self, model: &str, prompt: &str) -> Result<String, ModelError> {
        match tokio::time::timeout(self.call_timeout, self.backend.generate(model, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout {
                model: model.to_string(),
                secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

/// Split `doc` into chunks that each carry some text.
///
/// Pieces from [`split_chunks`] are contiguous, so a whitespace-only piece is
/// merged into its neighbour by widening that neighbour's byte range.
fn content_chunks(doc: &str, max_chars: usize) -> Vec<&str> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut offset = 0;
    for piece in split_chunks(doc, max_chars) {
        let end = offset + piece.len();
        match ranges.last_mut() {
            Some(last) if piece.trim().is_empty() || doc[last.0..last.1].trim().is_empty() => {
                last.1 = end
            }
            _ => ranges.push((offset, end)),
        }
        offset = end;
    }
    ranges.into_iter().map(|(start, end)| &doc[start..end]).collect()
}

/// Image locations of the input that no longer appear in `output`.
fn missing_images(expected: &[String], output: &str) -> Vec<String> {
    let kept: HashSet<String> = find_images(output).into_iter().map(|img| img.location).collect();
    let mut seen = HashSet::new();
    expected
        .iter()
        .filter(|loc| !kept.contains(*loc) && seen.insert(loc.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::prompts::{CONTENT_END, CONTENT_START};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scripted backend.
    ///
    /// * probes fail for models in `down`
    /// * rewrite calls echo the delimited article (delimiters included), after
    ///   `failures_before_success` failed or empty attempts per prompt
    /// * the next `image_drops` answers per prompt lose every image
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub down: HashSet<String>,
        pub failures_before_success: usize,
        pub empty_instead_of_error: bool,
        pub image_drops: usize,
        pub probes: Mutex<Vec<String>>,
        pub rewrites: Mutex<Vec<(String, String)>>,
        attempts_by_prompt: Mutex<HashMap<String, usize>>,
    }

    impl FakeBackend {
        pub(crate) fn healthy() -> Self {
            Self::default()
        }

        pub(crate) fn rewrite_calls(&self) -> usize {
            self.rewrites.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelBackend for FakeBackend {
        async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelError> {
            if prompt == PROBE_PROMPT {
                self.probes.lock().unwrap().push(model.to_string());
                if self.down.contains(model) {
                    return Err(ModelError::Api {
                        model: model.to_string(),
                        status: Some(404),
                        message: "model not found".into(),
                    });
                }
                return Ok("ok".into());
            }

            self.rewrites
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            let seen = {
                let mut map = self.attempts_by_prompt.lock().unwrap();
                let n = map.entry(prompt.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if seen <= self.failures_before_success {
                if self.empty_instead_of_error {
                    return Ok("   ".into());
                }
                return Err(ModelError::Transport {
                    model: model.to_string(),
                    detail: "connection reset".into(),
                });
            }
            if seen <= self.failures_before_success + self.image_drops {
                return Ok("# T\n\nRewritten prose, image gone.".into());
            }

            let start = prompt.find(CONTENT_START).unwrap_or(0);
            let end = prompt.find(CONTENT_END).map(|i| i + CONTENT_END.len()).unwrap_or(prompt.len());
            Ok(format!("```markdown\n{}\n```", &prompt[start..end]))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .models(["model-a", "model-b", "model-c"])
            .retry_backoff_ms(1)
            .max_chunk_chars(200)
            .build()
            .unwrap()
    }

    fn engine(backend: &Arc<FakeBackend>) -> RewriteEngine {
        RewriteEngine::new(backend.clone(), &config())
    }

    fn engine_with_budget(backend: &Arc<FakeBackend>, max_chunk_chars: usize) -> RewriteEngine {
        let config = PipelineConfig::builder()
            .models(["model-a"])
            .retry_backoff_ms(1)
            .max_chunk_chars(max_chunk_chars)
            .build()
            .unwrap();
        RewriteEngine::new(backend.clone(), &config)
    }

    fn article_sections(backend: &FakeBackend) -> Vec<String> {
        backend
            .rewrites
            .lock()
            .unwrap()
            .iter()
            .map(|(_, prompt)| {
                let start = prompt.find(CONTENT_START).unwrap() + CONTENT_START.len();
                let end = prompt.find(CONTENT_END).unwrap();
                prompt[start..end].to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn first_live_candidate_is_selected() {
        let backend = Arc::new(FakeBackend {
            down: ["model-a".to_string()].into(),
            ..Default::default()
        });
        let out = engine(&backend).rewrite("# T\n\nHello", None).await.unwrap();
        assert_eq!(out.model, "model-b");
        assert_eq!(*backend.probes.lock().unwrap(), vec!["model-a", "model-b"]);
        assert!(backend.rewrites.lock().unwrap().iter().all(|(m, _)| m == "model-b"));
    }

    #[tokio::test]
    async fn all_probes_failing_is_service_unavailable_without_rewrites() {
        let backend = Arc::new(FakeBackend {
            down: ["model-a", "model-b", "model-c"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        let err = engine(&backend).rewrite("# T\n\nHello", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert!(err.to_string().contains("model-a, model-b, model-c"));
        assert_eq!(backend.rewrite_calls(), 0);
    }

    #[tokio::test]
    async fn short_document_is_one_call_without_delimiters() {
        let backend = Arc::new(FakeBackend::healthy());
        let out = engine(&backend).rewrite("# T\n\nHello", None).await.unwrap();
        assert_eq!(backend.rewrite_calls(), 1);
        assert_eq!(out.chunks, 1);
        assert_eq!(out.markdown, "# T\n\nHello");
        assert!(!out.markdown.contains(CONTENT_START));
        assert!(!out.markdown.contains("```"));
    }

    #[tokio::test]
    async fn long_document_is_chunked_in_order() {
        let paragraphs: Vec<String> = (0..10).map(|i| format!("Paragraph {i} {}", "x".repeat(60))).collect();
        let doc = paragraphs.join("\n\n");
        assert!(doc.chars().count() > 200);

        let backend = Arc::new(FakeBackend::healthy());
        let out = engine(&backend).rewrite(&doc, None).await.unwrap();

        assert!(backend.rewrite_calls() > 1);
        assert_eq!(out.chunks, backend.rewrite_calls());
        let positions: Vec<usize> = (0..10)
            .map(|i| out.markdown.find(&format!("Paragraph {i} ")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Arc::new(FakeBackend {
            failures_before_success: 2,
            ..Default::default()
        });
        let out = engine(&backend).rewrite("# T\n\nHello", None).await.unwrap();
        assert_eq!(out.markdown, "# T\n\nHello");
        assert_eq!(backend.rewrite_calls(), 3);
    }

    #[tokio::test]
    async fn empty_responses_are_retried() {
        let backend = Arc::new(FakeBackend {
            failures_before_success: 1,
            empty_instead_of_error: true,
            ..Default::default()
        });
        engine(&backend).rewrite("# T\n\nHello", None).await.unwrap();
        assert_eq!(backend.rewrite_calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_whole_document_budget_fails() {
        let backend = Arc::new(FakeBackend {
            failures_before_success: 3,
            ..Default::default()
        });
        let err = engine(&backend).rewrite("# T\n\nHello", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rewrite);
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(backend.rewrite_calls(), 3);
    }

    #[tokio::test]
    async fn chunk_budget_is_smaller() {
        let doc = format!("{}\n\n{}", "a".repeat(150), "b".repeat(150));
        let backend = Arc::new(FakeBackend {
            failures_before_success: 2,
            ..Default::default()
        });
        let err = engine(&backend).rewrite(&doc, None).await.unwrap_err();
        match err {
            ArticleError::RewriteFailed {
                chunk,
                total_chunks,
                attempts,
                ..
            } => {
                assert_eq!((chunk, total_chunks, attempts), (1, 2, 2));
            }
            other => panic!("unexpected {other}"),
        }
        // The second chunk was never attempted.
        assert_eq!(backend.rewrite_calls(), 2);
    }

    #[tokio::test]
    async fn custom_instruction_reaches_prompt() {
        let backend = Arc::new(FakeBackend::healthy());
        engine(&backend)
            .rewrite("# T\n\nHello", Some("Make it formal."))
            .await
            .unwrap();
        let rewrites = backend.rewrites.lock().unwrap();
        assert!(rewrites[0].1.starts_with("Make it formal."));
    }

    #[tokio::test]
    async fn empty_document_makes_no_calls() {
        let backend = Arc::new(FakeBackend::healthy());
        let err = engine(&backend).rewrite("  \n ", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rewrite);
        assert!(backend.probes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn selection_is_fresh_per_call() {
        let backend = Arc::new(FakeBackend::healthy());
        let e = engine(&backend);
        e.rewrite("one", None).await.unwrap();
        e.rewrite("two", None).await.unwrap();
        assert_eq!(backend.probes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn document_at_budget_is_one_call_with_whole_document_attempts() {
        let doc = "a".repeat(8000);
        let backend = Arc::new(FakeBackend {
            failures_before_success: 2,
            ..Default::default()
        });
        let out = engine_with_budget(&backend, 8000).rewrite(&doc, None).await.unwrap();
        assert_eq!(out.chunks, 1);
        assert_eq!(backend.rewrite_calls(), 3);
        assert_eq!(out.markdown, doc);
    }

    #[tokio::test]
    async fn document_one_over_budget_is_two_calls() {
        let doc = "a".repeat(8001);
        let backend = Arc::new(FakeBackend::healthy());
        let out = engine_with_budget(&backend, 8000).rewrite(&doc, None).await.unwrap();
        assert_eq!(out.chunks, 2);
        assert_eq!(backend.rewrite_calls(), 2);
        assert_eq!(out.markdown.matches('a').count(), 8001);
    }

    #[tokio::test]
    async fn trailing_whitespace_does_not_force_chunking() {
        let doc = format!("{}\n\n{}", "a".repeat(7990), " ".repeat(20));
        assert!(doc.chars().count() > 8000);
        let backend = Arc::new(FakeBackend {
            failures_before_success: 2,
            ..Default::default()
        });
        let out = engine_with_budget(&backend, 8000).rewrite(&doc, None).await.unwrap();
        assert_eq!(out.chunks, 1);
        assert_eq!(backend.rewrite_calls(), 3);
    }

    #[tokio::test]
    async fn whitespace_runs_never_become_their_own_chunk() {
        let doc = format!("{}\n\n{}\n\n{}", "a".repeat(150), " ".repeat(300), "b".repeat(150));
        let backend = Arc::new(FakeBackend::healthy());
        let out = engine(&backend).rewrite(&doc, None).await.unwrap();

        assert_eq!(backend.rewrite_calls(), 2);
        assert_eq!(out.chunks, 2);
        assert!(article_sections(&backend).iter().all(|a| !a.trim().is_empty()));
        assert!(out.markdown.starts_with(&"a".repeat(150)));
        assert!(out.markdown.ends_with(&"b".repeat(150)));
    }

    #[tokio::test]
    async fn answer_without_the_images_is_retried() {
        let doc = "# T\n\n![fig](https://cdn.example/x.png)\n\nHello";
        let backend = Arc::new(FakeBackend {
            image_drops: 1,
            ..Default::default()
        });
        let out = engine(&backend).rewrite(doc, None).await.unwrap();
        assert_eq!(backend.rewrite_calls(), 2);
        assert!(out.markdown.contains("![fig](https://cdn.example/x.png)"));
    }

    #[tokio::test]
    async fn persistently_dropped_images_fail_the_rewrite() {
        let doc = "# T\n\n![fig](https://cdn.example/x.png)\n\nHello";
        let backend = Arc::new(FakeBackend {
            image_drops: 10,
            ..Default::default()
        });
        let err = engine(&backend).rewrite(doc, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rewrite);
        assert!(err.to_string().contains("dropped image references: https://cdn.example/x.png"));
        assert_eq!(backend.rewrite_calls(), 3);
    }

    #[test]
    fn missing_images_lists_each_lost_location_once() {
        let expected = vec!["a.png".to_string(), "b.png".to_string(), "a.png".to_string()];
        assert_eq!(missing_images(&expected, "![x](b.png)"), vec!["a.png".to_string()]);
        assert!(missing_images(&expected, "![x](a.png) ![y](b.png)").is_empty());
    }
}
