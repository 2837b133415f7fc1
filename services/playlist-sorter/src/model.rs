//!
//! src/model.rs  Andrew Belles  Oct 2025
//!
//! The two capabilities the pipeline needs from a generative model,
//! and the prompt-driven implementation that validates model output.
//! Format mismatches and transient provider errors share one bounded
//! attempt budget; provider errors back off before the next attempt
//!

use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::SmallRng, SeedableRng};
use tracing::{debug, warn};

use crate::classifier::{format_categories, parse_classification, track_prompt};
use crate::deriver::{categories_prompt, parse_categories};
use crate::errors::SorterError;
use crate::fetch::generate_backoff;
use crate::llm::{CompletionOptions, LlmProvider};
use crate::types::{Category, ClassificationRecord, Track};

#[async_trait]
pub trait CategoryModel: Send + Sync {
    /// May return fewer than `count` categories; never errors on format alone
    async fn derive_categories(&self, corpus: &str, count: u32) ->
        Result<Vec<Category>, SorterError>;

    /// Fails with `ClassificationFailed` when no valid answer was produced
    async fn classify(&self, track: &Track, categories: &[Category]) ->
        Result<ClassificationRecord, SorterError>;
}

pub struct PromptedModel<P> {
    provider: P,
    options: CompletionOptions,
    max_attempts: u32,
    base_backoff: Duration,
    jitter: bool
}

impl<P: LlmProvider> PromptedModel<P> {
    pub fn new(provider: P, options: CompletionOptions, max_attempts: u32) -> Self {
        Self {
            provider,
            options,
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(500),
            jitter: true
        }
    }

    pub fn with_backoff(mut self, base: Duration, jitter: bool) -> Self {
        self.base_backoff = base;
        self.jitter = jitter;
        self
    }

    ///
    /// One completion. A retryable provider error with attempts left waits
    /// out the backoff and yields None so the caller moves to its next attempt.
    ///
    async fn prompt_once(&self, prompt: &str, attempt: u32) ->
        Result<Option<String>, SorterError> {
        match self.provider.complete(prompt, &self.options).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                let step = u8::try_from(attempt - 1).unwrap_or(u8::MAX);
                let backoff = generate_backoff(
                    self.base_backoff, step, self.jitter, &mut SmallRng::from_entropy()
                );
                warn!(provider = self.provider.name(), attempt, error = %e,
                    backoff = ?backoff.as_millis(), "llm.retry");
                tokio::time::sleep(backoff).await;
                Ok(None)
            }
            Err(e) => Err(e.into())
        }
    }
}

#[async_trait]
impl<P: LlmProvider> CategoryModel for PromptedModel<P> {
    async fn derive_categories(&self, corpus: &str, count: u32) ->
        Result<Vec<Category>, SorterError> {
        let prompt = categories_prompt(count, corpus);
        let mut best: Vec<Category> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let text = match self.prompt_once(&prompt, attempt).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) if !best.is_empty() => {
                    warn!(error = %e, parsed = best.len(), "derive.provider_failed");
                    break;
                }
                Err(e) => return Err(e)
            };
            let parsed = parse_categories(&text);
            debug!(
                provider = self.provider.name(),
                attempt,
                parsed = parsed.len(),
                requested = count,
                "derive.attempt"
            );

            if parsed.len() > best.len() {
                best = parsed;
            }
            if best.len() >= count as usize {
                break;
            }
        }

        if best.len() < count as usize {
            warn!(parsed = best.len(), requested = count, "derive.short");
        }
        Ok(best)
    }

    async fn classify(&self, track: &Track, categories: &[Category]) ->
        Result<ClassificationRecord, SorterError> {
        let prompt = track_prompt(track, &format_categories(categories));

        for attempt in 1..=self.max_attempts {
            let Some(text) = self.prompt_once(&prompt, attempt).await? else {
                continue;
            };
            match parse_classification(&text) {
                Some(c) if categories.iter().any(|k| k.category_number == c.category_number) => {
                    return Ok( ClassificationRecord::new(track, c) );
                }
                Some(c) => {
                    warn!(
                        track_id = %track.id,
                        attempt,
                        category_number = c.category_number,
                        "classify.unknown_category"
                    );
                }
                None => {
                    warn!(track_id = %track.id, attempt, "classify.format_mismatch");
                }
            }
        }

        Err(SorterError::ClassificationFailed(format!(
            "track {} after {} attempts", track.id, self.max_attempts
        )))
    }
}
