//! Image synthesis with bounded retries, credential rotation, and a one-shot
//! model fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use super::{CredentialPool, GenerationError, GenerativeModel, ImageAttachment};
use crate::db::{insert_error_log, Database, NewErrorLog};
use crate::themes::ReferenceImages;

/// Maximum synthesis attempts per call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Prompt excerpt length stored in the error log.
const PROMPT_EXCERPT_CHARS: usize = 120;

/// Tuning knobs for the synthesizer.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub image_model: String,
    pub fallback_model: String,
    pub reference_dir: PathBuf,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl SynthesizerConfig {
    #[must_use]
    pub fn new(image_model: String, fallback_model: String, reference_dir: PathBuf) -> Self {
        Self {
            image_model,
            fallback_model,
            reference_dir,
            max_attempts: MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

/// Produces image bytes from a prompt, optionally steered by a reference
/// image.
pub struct ImageSynthesizer {
    model: Arc<dyn GenerativeModel>,
    pool: Arc<CredentialPool>,
    config: SynthesizerConfig,
    /// When present, failed attempts are appended to the error_logs table.
    error_store: Option<Database>,
}

impl ImageSynthesizer {
    #[must_use]
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        pool: Arc<CredentialPool>,
        config: SynthesizerConfig,
        error_store: Option<Database>,
    ) -> Self {
        Self {
            model,
            pool,
            config,
            error_store,
        }
    }

    /// Synthesize an image, retrying transient failures.
    ///
    /// Up to `max_attempts` tries with capped exponential backoff. A rate
    /// limit rotates the credential before the next attempt; a missing model
    /// flips once to the fallback model and drops the reference image.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Exhausted`] embedding the last underlying
    /// error once all attempts fail.
    pub async fn synthesize(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImages>,
    ) -> Result<Vec<u8>, GenerationError> {
        let mut key = self.pool.current();
        let mut model_id = self.config.image_model.clone();
        let mut attachment = self.load_reference(reference).await;
        let mut effective_prompt = match &attachment {
            Some(_) => augment_with_reference(prompt),
            None => prompt.to_string(),
        };
        let mut fallback_used = false;
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts {
            match self
                .model
                .generate_image(&key, &model_id, &effective_prompt, attachment.as_ref())
                .await
            {
                Ok(bytes) => {
                    info!(attempt, model = %model_id, size = bytes.len(), "Image synthesized");
                    return Ok(bytes);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, model = %model_id, "Image synthesis attempt failed: {last_error}");
                    self.record_failure(attempt, &last_error, prompt).await;

                    match e {
                        GenerationError::RateLimited => {
                            key = self.pool.rotate();
                        }
                        GenerationError::ModelUnavailable(_) if !fallback_used => {
                            // The fallback generator has no reference-image support.
                            fallback_used = true;
                            model_id = self.config.fallback_model.clone();
                            attachment = None;
                            effective_prompt = prompt.to_string();
                            info!(model = %model_id, "Falling back to alternate image model");
                        }
                        _ => {}
                    }

                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(GenerationError::Exhausted {
            attempts: self.config.max_attempts,
            last: last_error,
        })
    }

    /// Exponential backoff with a cap: base, 2×base, 4×base, ... capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }

    /// Load the reference image, picking one at random when a list is
    /// configured. A load failure degrades to no reference.
    async fn load_reference(
        &self,
        reference: Option<&ReferenceImages>,
    ) -> Option<ImageAttachment> {
        let filename = match reference {
            None => return None,
            Some(ReferenceImages::One(file)) => file.clone(),
            Some(ReferenceImages::Many(files)) => {
                files.choose(&mut rand::thread_rng())?.clone()
            }
        };

        let path = self.config.reference_dir.join(&filename);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(file = %filename, size = data.len(), "Reference image loaded");
                Some(ImageAttachment {
                    mime_type: mime_for(&filename),
                    data,
                })
            }
            Err(e) => {
                warn!(file = %filename, "Reference image unavailable, proceeding without: {e}");
                None
            }
        }
    }

    /// Best-effort append to the error log; a storage failure is only logged.
    async fn record_failure(&self, attempt: u32, message: &str, prompt: &str) {
        let Some(db) = &self.error_store else {
            return;
        };
        let entry = NewErrorLog {
            stage: "image_synthesis".to_string(),
            attempt: i64::from(attempt),
            message: message.to_string(),
            prompt_excerpt: Some(truncate_chars(prompt, PROMPT_EXCERPT_CHARS)),
        };
        if let Err(e) = insert_error_log(db.pool(), &entry).await {
            warn!("Failed to record synthesis error: {e:#}");
        }
    }
}

/// Persist synthesized image bytes to a temp path for the publisher.
///
/// # Errors
///
/// Returns an error if the work directory or file cannot be written.
pub async fn save_image_to_temp(
    work_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;
    let path = work_dir.join(filename);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write image to {}", path.display()))?;
    Ok(path)
}

fn augment_with_reference(prompt: &str) -> String {
    format!(
        "{prompt}\n\nUse the attached image only as a reference for style and \
         composition. Do not copy it directly."
    )
}

fn mime_for(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
    .to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
