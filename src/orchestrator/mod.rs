//! The posting cycle: theme selection through publication and recording.
//!
//! Each collaborator sits behind an async trait so the cycle can be driven
//! with stubs in tests. The orchestrator is the single point that converts
//! any stage failure into a persisted failed post plus a structured outcome;
//! a cycle failure never crashes the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{error, info, warn};

use crate::db::{insert_post, Database, NewPostRecord, PostStatus};
use crate::generation::caption::GeneratedContent;
use crate::generation::image::save_image_to_temp;
use crate::generation::GenerationError;
use crate::metrics::Metrics;
use crate::publisher::PublicationError;
use crate::themes::{
    load_prompt, substitute_weather, ImageSettings, PromptSource, ReferenceImages, Theme,
    ThemeLibrary,
};
use crate::weather::{Verdict, WeatherError, WeatherObservation};

/// Ceiling for the cleaned caption excerpt folded into image prompts.
const CAPTION_EXCERPT_CHARS: usize = 200;

/// Theme id recorded for backup-path posts.
const BACKUP_THEME_ID: &str = "backup";

/// Image prompt used by the backup path. Deliberately generic: the backup
/// exists to get something on the feed, not to match a theme.
const BACKUP_IMAGE_PROMPT: &str =
    "A warm, inviting photograph of a cozy neighborhood bar in the evening, \
     soft golden lighting, drinks on a wooden counter, shallow depth of field, \
     photorealistic, no text or logos";

static HASHTAG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\S+").unwrap());

/// Provides a classified weather observation.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn observe(&self) -> Result<WeatherObservation, WeatherError>;
}

/// Produces caption content for a theme.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    async fn generate(
        &self,
        db: &Database,
        theme: &Theme,
        prompt_text: &str,
    ) -> Result<GeneratedContent, GenerationError>;
}

/// Produces image bytes for a prompt.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn synthesize(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImages>,
    ) -> Result<Vec<u8>, GenerationError>;
}

/// Publishes a saved image with its caption.
#[async_trait]
pub trait PostPublisher: Send + Sync {
    async fn publish(&self, image_path: &Path, caption: &str) -> Result<(), PublicationError>;
}

#[async_trait]
impl WeatherSource for crate::weather::WeatherService {
    async fn observe(&self) -> Result<WeatherObservation, WeatherError> {
        self.fetch_observation().await
    }
}

#[async_trait]
impl CaptionSource for crate::generation::caption::CaptionGenerator {
    async fn generate(
        &self,
        db: &Database,
        theme: &Theme,
        prompt_text: &str,
    ) -> Result<GeneratedContent, GenerationError> {
        Self::generate(self, db, theme, prompt_text).await
    }
}

#[async_trait]
impl ImageSource for crate::generation::image::ImageSynthesizer {
    async fn synthesize(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImages>,
    ) -> Result<Vec<u8>, GenerationError> {
        Self::synthesize(self, prompt, reference).await
    }
}

#[async_trait]
impl PostPublisher for crate::publisher::PublishDriver {
    async fn publish(&self, image_path: &Path, caption: &str) -> Result<(), PublicationError> {
        Self::publish(self, image_path, caption).await
    }
}

/// Result of one posting cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub success: bool,
    pub post_id: Option<i64>,
    pub error: Option<String>,
}

/// Post content assembled as the cycle progresses; whatever exists at the
/// time of a failure is persisted alongside the error.
#[derive(Debug, Default)]
struct Draft {
    theme_id: String,
    caption: Option<String>,
    image_prompt: Option<String>,
    image_ref: Option<String>,
    similarity_report: Option<String>,
    weather_json: Option<String>,
}

pub struct Orchestrator {
    themes: ThemeLibrary,
    weather: Arc<dyn WeatherSource>,
    captions: Arc<dyn CaptionSource>,
    images: Arc<dyn ImageSource>,
    publisher: Arc<dyn PostPublisher>,
    db: Database,
    metrics: Arc<Metrics>,
    prompts_dir: PathBuf,
    work_dir: PathBuf,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        themes: ThemeLibrary,
        weather: Arc<dyn WeatherSource>,
        captions: Arc<dyn CaptionSource>,
        images: Arc<dyn ImageSource>,
        publisher: Arc<dyn PostPublisher>,
        db: Database,
        metrics: Arc<Metrics>,
        prompts_dir: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            themes,
            weather,
            captions,
            images,
            publisher,
            db,
            metrics,
            prompts_dir,
            work_dir,
        }
    }

    /// Run one posting cycle: theme selection through publication and
    /// recording. Never returns an error; every failure is folded into the
    /// outcome and persisted best effort.
    pub async fn execute_post(&self) -> CycleOutcome {
        self.metrics.record_cycle();

        let mut draft = Draft::default();
        match self.run_cycle(&mut draft).await {
            Ok(()) => {
                self.metrics.record_success();
                let post_id = self.persist(&draft, PostStatus::Success, None).await;
                info!(theme = %draft.theme_id, post_id, "Posting cycle succeeded");
                CycleOutcome {
                    success: true,
                    post_id,
                    error: None,
                }
            }
            Err(message) => {
                self.metrics.record_failure();
                error!(theme = %draft.theme_id, "Posting cycle failed: {message}");
                let post_id = self
                    .persist(&draft, PostStatus::Failed, Some(&message))
                    .await;
                CycleOutcome {
                    success: false,
                    post_id,
                    error: Some(message),
                }
            }
        }
    }

    /// Run one cycle and, if it fails, attempt exactly one backup post.
    pub async fn execute_post_with_fallback(&self) -> CycleOutcome {
        let primary = self.execute_post().await;
        if primary.success {
            return primary;
        }

        self.metrics.record_fallback();
        let primary_error = primary
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        warn!("Primary cycle failed, attempting backup post");

        match self.run_backup().await {
            Ok(post_id) => {
                self.metrics.record_success();
                info!(post_id, "Backup post succeeded");
                CycleOutcome {
                    success: true,
                    post_id,
                    error: Some(primary_error),
                }
            }
            Err(backup_error) => {
                self.metrics.record_failure();
                let combined =
                    format!("primary: {primary_error}; backup: {backup_error}");
                error!("Backup post failed: {backup_error}");
                let draft = Draft {
                    theme_id: BACKUP_THEME_ID.to_string(),
                    ..Draft::default()
                };
                let post_id = self
                    .persist(&draft, PostStatus::Failed, Some(&combined))
                    .await;
                CycleOutcome {
                    success: false,
                    post_id,
                    error: Some(combined),
                }
            }
        }
    }

    async fn run_cycle(&self, draft: &mut Draft) -> Result<(), String> {
        self.themes
            .validate(&self.prompts_dir)
            .map_err(|e| format!("theme validation failed: {e}"))?;

        let theme = {
            let mut rng = rand::thread_rng();
            self.themes
                .select_theme(&mut rng)
                .map_err(|e| format!("theme selection failed: {e}"))?
                .clone()
        };
        draft.theme_id.clone_from(&theme.id);
        info!(theme = %theme.id, name = %theme.name, "Theme selected");

        // Weather is mandatory for gated themes; no generic-prompt fallback.
        let observation = if theme.is_weather_gated() {
            let obs = self
                .weather
                .observe()
                .await
                .map_err(|e| format!("weather resolution failed: {e}"))?;
            info!(
                verdict = ?obs.condition,
                temperature = obs.temperature,
                "Weather classified"
            );
            draft.weather_json = serde_json::to_string(&obs).ok();
            Some(obs)
        } else {
            None
        };

        let prompt_text = self.resolve_caption_prompt(&theme, observation.as_ref())?;

        let content = self
            .captions
            .generate(&self.db, &theme, &prompt_text)
            .await
            .map_err(|e| format!("caption generation failed: {e}"))?;
        draft.caption = Some(content.caption.clone());
        draft.similarity_report = Some(content.similarity_report.clone());

        let image_prompt =
            resolve_image_prompt(&theme, &content.caption, observation.as_ref());
        draft.image_prompt = Some(image_prompt.clone());

        let verdict = observation
            .as_ref()
            .map_or(Verdict::Good, |obs| obs.condition);
        let reference = theme.image.reference_for(verdict);
        draft.image_ref = reference.map(describe_reference);

        let bytes = self
            .images
            .synthesize(&image_prompt, reference)
            .await
            .map_err(|e| format!("image synthesis failed: {e}"))?;

        let filename = format!(
            "{}_{}.png",
            theme.id,
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let image_path = save_image_to_temp(&self.work_dir, &filename, &bytes)
            .await
            .map_err(|e| format!("saving image failed: {e}"))?;

        let publish_result = self
            .publisher
            .publish(&image_path, &content.caption)
            .await
            .map_err(|e| format!("publication failed: {e}"));

        cleanup_temp(&image_path).await;
        publish_result
    }

    /// The backup path: a canned caption and a generic image, recorded under
    /// the reserved `backup` theme id.
    async fn run_backup(&self) -> Result<Option<i64>, String> {
        let caption = {
            let mut rng = rand::thread_rng();
            self.themes
                .backup_captions
                .choose(&mut rng)
                .cloned()
                .ok_or_else(|| "no backup captions configured".to_string())?
        };

        let bytes = self
            .images
            .synthesize(BACKUP_IMAGE_PROMPT, None)
            .await
            .map_err(|e| format!("image synthesis failed: {e}"))?;

        let filename = format!(
            "{}_{}.png",
            BACKUP_THEME_ID,
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let image_path = save_image_to_temp(&self.work_dir, &filename, &bytes)
            .await
            .map_err(|e| format!("saving image failed: {e}"))?;

        let publish_result = self
            .publisher
            .publish(&image_path, &caption)
            .await
            .map_err(|e| format!("publication failed: {e}"));
        cleanup_temp(&image_path).await;
        publish_result?;

        let draft = Draft {
            theme_id: BACKUP_THEME_ID.to_string(),
            caption: Some(caption),
            image_prompt: Some(BACKUP_IMAGE_PROMPT.to_string()),
            ..Draft::default()
        };
        Ok(self.persist(&draft, PostStatus::Success, None).await)
    }

    fn resolve_caption_prompt(
        &self,
        theme: &Theme,
        observation: Option<&WeatherObservation>,
    ) -> Result<String, String> {
        match &theme.prompt {
            PromptSource::Static { file } => load_prompt(&self.prompts_dir, file)
                .map_err(|e| format!("loading prompt failed: {e}")),
            PromptSource::Weather {
                good_file,
                bad_file,
            } => {
                let obs = observation
                    .ok_or_else(|| "weather prompt without observation".to_string())?;
                let file = match obs.condition {
                    Verdict::Good => good_file,
                    Verdict::Bad => bad_file,
                };
                let raw = load_prompt(&self.prompts_dir, file)
                    .map_err(|e| format!("loading prompt failed: {e}"))?;
                Ok(substitute_weather(&raw, &obs.description, obs.temperature))
            }
        }
    }

    /// Write the post record, logging and counting a persistence failure
    /// without letting it mask the cycle outcome.
    async fn persist(
        &self,
        draft: &Draft,
        status: PostStatus,
        error_message: Option<&str>,
    ) -> Option<i64> {
        let record = NewPostRecord {
            theme_id: if draft.theme_id.is_empty() {
                "unknown".to_string()
            } else {
                draft.theme_id.clone()
            },
            caption: draft.caption.clone().unwrap_or_default(),
            image_prompt: draft.image_prompt.clone(),
            image_ref: draft.image_ref.clone(),
            similarity_report: draft.similarity_report.clone(),
            weather_json: draft.weather_json.clone(),
            status,
            error_message: error_message.map(ToString::to_string),
        };

        match insert_post(self.db.pool(), &record).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.metrics.record_persistence_failure();
                warn!("Failed to persist post record: {e}");
                None
            }
        }
    }
}

/// Build the image prompt for a theme from its settings and, if configured,
/// a cleaned excerpt of the generated caption.
fn resolve_image_prompt(
    theme: &Theme,
    caption: &str,
    observation: Option<&WeatherObservation>,
) -> String {
    match &theme.image {
        ImageSettings::Weather {
            good_prompt,
            bad_prompt,
            ..
        } => {
            // Weather-gated image settings require an observation upstream.
            let (prompt, obs) = match observation {
                Some(obs) => match obs.condition {
                    Verdict::Good => (good_prompt, obs),
                    Verdict::Bad => (bad_prompt, obs),
                },
                None => return good_prompt.clone(),
            };
            substitute_weather(prompt, &obs.description, obs.temperature)
        }
        ImageSettings::Standard {
            base_prompt,
            append_caption,
            extra_detail,
            ..
        } => {
            let mut prompt = base_prompt.clone();
            if *append_caption {
                let excerpt = clean_caption_excerpt(caption);
                if !excerpt.is_empty() {
                    prompt.push_str("\n\nThe mood of the post: ");
                    prompt.push_str(&excerpt);
                }
            }
            if let Some(detail) = extra_detail {
                prompt.push_str("\n\n");
                prompt.push_str(detail);
            }
            prompt
        }
    }
}

/// Strip hashtags and emoji from a caption and bound its length, producing
/// text safe to fold into an image prompt.
fn clean_caption_excerpt(caption: &str) -> String {
    let without_tags = HASHTAG_TOKEN.replace_all(caption, "");
    let without_emoji: String = without_tags.chars().filter(|c| !is_emoji(*c)).collect();
    let collapsed = without_emoji.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(CAPTION_EXCERPT_CHARS).collect()
}

fn is_emoji(c: char) -> bool {
    matches!(u32::from(c),
        0x1F000..=0x1FAFF   // pictographs, emoticons, symbols
        | 0x2600..=0x27BF   // misc symbols and dingbats
        | 0x2190..=0x21FF   // arrows
        | 0x2B00..=0x2BFF   // misc symbols and arrows
        | 0xFE00..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
    )
}

fn describe_reference(reference: &ReferenceImages) -> String {
    match reference {
        ReferenceImages::One(name) => name.clone(),
        ReferenceImages::Many(names) => names.join(","),
    }
}

async fn cleanup_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "Failed to remove temp image: {e}");
    }
}
