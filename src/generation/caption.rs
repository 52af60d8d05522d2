//! Caption generation with similarity avoidance against post history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{extract_json, CredentialPool, GenerationError, GenerativeModel};
use crate::db::{recent_successful_captions, Database};
use crate::themes::{Defaults, Theme};

/// How many recent successful posts of the same theme feed the similarity
/// check. Theme-scoped history keeps the constraints relevant to the prompt
/// actually being generated.
pub const HISTORY_LIMIT: i64 = 5;

/// Constraints derived from recent post history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityReport {
    #[serde(default)]
    pub avoid_phrases: Vec<String>,
    #[serde(default)]
    pub avoid_emojis: Vec<String>,
    #[serde(default)]
    pub avoid_structures: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

impl SimilarityReport {
    /// The synthesized no-history report: no constraints, be creative.
    #[must_use]
    pub fn unconstrained() -> Self {
        Self {
            avoid_phrases: Vec::new(),
            avoid_emojis: Vec::new(),
            avoid_structures: Vec::new(),
            recommendation: "No recent posts to avoid; be creative.".to_string(),
        }
    }
}

/// The parsed caption response from the text model.
#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
    #[serde(default)]
    hashtags: Vec<String>,
    #[serde(default)]
    tone: String,
}

/// Output of the content generator, consumed within one posting cycle.
#[derive(Debug, Clone)]
pub struct GeneratedContent {
    /// Final caption text, hashtags appended when configured.
    pub caption: String,
    pub hashtags: Vec<String>,
    pub tone: String,
    /// Serialized similarity report that constrained this caption.
    pub similarity_report: String,
}

/// Generates captions through the text model, avoiding repetition of recent
/// posts.
pub struct CaptionGenerator {
    model: Arc<dyn GenerativeModel>,
    pool: Arc<CredentialPool>,
    text_model: String,
    defaults: Defaults,
}

impl CaptionGenerator {
    #[must_use]
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        pool: Arc<CredentialPool>,
        text_model: String,
        defaults: Defaults,
    ) -> Self {
        Self {
            model,
            pool,
            text_model,
            defaults,
        }
    }

    /// Generate caption content for a theme.
    ///
    /// # Errors
    ///
    /// Returns an error when the text model is unreachable after credential
    /// rotation is exhausted, or when the caption response cannot be parsed.
    pub async fn generate(
        &self,
        db: &Database,
        theme: &Theme,
        prompt_text: &str,
    ) -> Result<GeneratedContent, GenerationError> {
        let history = recent_successful_captions(db.pool(), &theme.id, HISTORY_LIMIT)
            .await
            .map_err(|e| GenerationError::Parse(format!("history query failed: {e}")))?;

        let report = if history.is_empty() {
            debug!(theme = %theme.id, "No post history; skipping similarity analysis");
            SimilarityReport::unconstrained()
        } else {
            self.analyze_similarity(&history).await
        };

        let caption_prompt = self.build_caption_prompt(theme, prompt_text, &report);
        let raw = self.text_with_rotation(&caption_prompt).await?;

        let json = extract_json(&raw).ok_or_else(|| {
            GenerationError::Parse("caption response contained no JSON object".to_string())
        })?;
        let parsed: CaptionResponse = serde_json::from_str(json)
            .map_err(|e| GenerationError::Parse(format!("caption response malformed: {e}")))?;

        let caption = assemble_caption(
            &parsed.caption,
            &parsed.hashtags,
            self.defaults.include_hashtags,
            self.defaults.hashtag_count,
        );

        let similarity_report = serde_json::to_string(&report)
            .unwrap_or_else(|_| "{}".to_string());

        info!(theme = %theme.id, tone = %parsed.tone, chars = caption.chars().count(), "Caption generated");

        Ok(GeneratedContent {
            caption,
            hashtags: parsed.hashtags,
            tone: parsed.tone,
            similarity_report,
        })
    }

    /// Run the similarity analysis over recent captions.
    ///
    /// A parse failure here degrades to no constraints; it must never block
    /// posting.
    async fn analyze_similarity(&self, history: &[String]) -> SimilarityReport {
        let prompt = build_similarity_prompt(history);

        let raw = match self.text_with_rotation(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Similarity analysis failed, proceeding unconstrained: {e}");
                return SimilarityReport::unconstrained();
            }
        };

        extract_json(&raw)
            .and_then(|json| serde_json::from_str::<SimilarityReport>(json).ok())
            .unwrap_or_else(|| {
                warn!("Similarity response unparseable, proceeding unconstrained");
                SimilarityReport::unconstrained()
            })
    }

    /// Call the text model, rotating through the credential pool on rate
    /// limits. Bounded by the pool size so it always terminates.
    async fn text_with_rotation(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut key = self.pool.current();
        let max_attempts = self.pool.len();

        for attempt in 1..=max_attempts {
            match self
                .model
                .generate_text(&key, &self.text_model, prompt)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) if e.is_rate_limit() && attempt < max_attempts => {
                    warn!(attempt, "Text model rate limited, rotating credential");
                    key = self.pool.rotate();
                }
                Err(e) if e.is_rate_limit() => {
                    return Err(GenerationError::CredentialsExhausted(format!(
                        "rate limited on all {max_attempts} credentials"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("rotation loop always returns")
    }

    fn build_caption_prompt(
        &self,
        theme: &Theme,
        prompt_text: &str,
        report: &SimilarityReport,
    ) -> String {
        let hashtag_policy = if self.defaults.include_hashtags {
            format!("Include exactly {} hashtags.", self.defaults.hashtag_count)
        } else {
            "Do not include hashtags.".to_string()
        };

        format!(
            "You write Instagram captions for the theme \"{name}\".\n\
             {prompt_text}\n\n\
             Constraints:\n\
             - Language: {language}\n\
             - At most {max_len} characters for the caption body.\n\
             - {hashtag_policy}\n\
             - Avoid these phrases: {phrases}\n\
             - Avoid these emoji patterns: {emojis}\n\
             - Avoid these structures: {structures}\n\
             - Recommendation: {recommendation}\n\n\
             Respond with only a JSON object: \
             {{\"caption\": \"...\", \"hashtags\": [\"...\"], \"tone\": \"...\"}}",
            name = theme.name,
            language = self.defaults.language,
            max_len = self.defaults.max_caption_length,
            phrases = report.avoid_phrases.join(", "),
            emojis = report.avoid_emojis.join(", "),
            structures = report.avoid_structures.join(", "),
            recommendation = report.recommendation,
        )
    }
}

fn build_similarity_prompt(history: &[String]) -> String {
    let mut prompt = String::from(
        "Analyze these recent Instagram captions and identify patterns a new \
         caption should avoid repeating.\n\nRecent captions:\n",
    );
    for (i, caption) in history.iter().enumerate() {
        prompt.push_str(&format!("{}. {caption}\n", i + 1));
    }
    prompt.push_str(
        "\nRespond with only a JSON object: \
         {\"avoid_phrases\": [], \"avoid_emojis\": [], \
         \"avoid_structures\": [], \"recommendation\": \"...\"}",
    );
    prompt
}

/// Append hashtags to the caption body as `#tag` tokens, separated from the
/// body by a blank line.
fn assemble_caption(
    body: &str,
    hashtags: &[String],
    include_hashtags: bool,
    hashtag_count: usize,
) -> String {
    if !include_hashtags || hashtags.is_empty() {
        return body.trim().to_string();
    }

    let tags: Vec<String> = hashtags
        .iter()
        .take(hashtag_count)
        .map(|t| {
            let t = t.trim().trim_start_matches('#');
            format!("#{t}")
        })
        .collect();

    format!("{}\n\n{}", body.trim(), tags.join(" "))
}
