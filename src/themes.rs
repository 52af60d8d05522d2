//! Theme configuration: content categories, prompt sources, image settings.
//!
//! Themes are loaded once at startup from a JSON file and are immutable for
//! the process lifetime. Validation fails closed: an enabled theme whose
//! prompt file is missing prevents the scheduler from starting.

use std::path::Path;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::weather::Verdict;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("failed to read themes config {path}: {source}")]
    ReadConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse themes config: {0}")]
    ParseConfig(#[from] serde_json::Error),
    #[error("theme '{theme}': prompt file not found: {file}")]
    MissingPromptFile { theme: String, file: String },
    #[error("failed to read prompt file {file}: {source}")]
    ReadPrompt {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no enabled themes configured")]
    NoEnabledThemes,
}

/// Global defaults applied to every theme.
#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    pub max_caption_length: usize,
    pub include_hashtags: bool,
    pub hashtag_count: usize,
    pub language: String,
}

/// Where a theme's caption prompt text comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSource {
    /// A single prompt file, used regardless of conditions.
    Static { file: String },
    /// Weather-conditioned pair: one file per verdict.
    Weather { good_file: String, bad_file: String },
}

/// Reference image configuration: a single filename or a list to pick from.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReferenceImages {
    One(String),
    Many(Vec<String>),
}

/// Image generation settings for a theme.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSettings {
    Standard {
        base_prompt: String,
        #[serde(default)]
        reference: Option<ReferenceImages>,
        /// Append a cleaned excerpt of the generated caption to the image prompt.
        #[serde(default)]
        append_caption: bool,
        #[serde(default)]
        extra_detail: Option<String>,
    },
    Weather {
        good_prompt: String,
        bad_prompt: String,
        #[serde(default)]
        good_reference: Option<ReferenceImages>,
        #[serde(default)]
        bad_reference: Option<ReferenceImages>,
    },
}

impl ImageSettings {
    /// Resolve the weather-conditioned reference set, if any.
    #[must_use]
    pub fn reference_for(&self, verdict: Verdict) -> Option<&ReferenceImages> {
        match self {
            Self::Standard { reference, .. } => reference.as_ref(),
            Self::Weather {
                good_reference,
                bad_reference,
                ..
            } => match verdict {
                Verdict::Good => good_reference.as_ref(),
                Verdict::Bad => bad_reference.as_ref(),
            },
        }
    }
}

/// A configured content category.
#[derive(Debug, Clone, Deserialize)]
pub struct Theme {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub weight: f64,
    pub prompt: PromptSource,
    pub image: ImageSettings,
}

fn default_enabled() -> bool {
    true
}

impl Theme {
    /// Whether this theme branches on the weather classification.
    #[must_use]
    pub fn is_weather_gated(&self) -> bool {
        matches!(self.prompt, PromptSource::Weather { .. })
            || matches!(self.image, ImageSettings::Weather { .. })
    }
}

/// The full theme configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ThemeLibrary {
    pub defaults: Defaults,
    pub backup_captions: Vec<String>,
    pub themes: Vec<Theme>,
}

impl ThemeLibrary {
    /// Load the theme library from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ThemeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ThemeError::ReadConfig {
            path: path.display().to_string(),
            source: e,
        })?;
        let library: Self = serde_json::from_str(&raw)?;
        Ok(library)
    }

    /// Validate that every enabled theme resolves to existing prompt text.
    ///
    /// # Errors
    ///
    /// Returns the first missing prompt file, or `NoEnabledThemes` when
    /// nothing is enabled.
    pub fn validate(&self, prompts_dir: &Path) -> Result<(), ThemeError> {
        let mut any_enabled = false;
        for theme in self.themes.iter().filter(|t| t.enabled) {
            any_enabled = true;
            let files: Vec<&str> = match &theme.prompt {
                PromptSource::Static { file } => vec![file],
                PromptSource::Weather {
                    good_file,
                    bad_file,
                } => vec![good_file, bad_file],
            };
            for file in files {
                if !prompts_dir.join(file).is_file() {
                    return Err(ThemeError::MissingPromptFile {
                        theme: theme.id.clone(),
                        file: file.to_string(),
                    });
                }
            }
        }
        if !any_enabled {
            return Err(ThemeError::NoEnabledThemes);
        }
        Ok(())
    }

    /// Select a theme by weighted random choice.
    ///
    /// Draws a uniform value in `[0, total_weight)` and walks themes in
    /// declaration order subtracting each weight. A zero total weight falls
    /// back to a uniform pick by index.
    ///
    /// # Errors
    ///
    /// Returns `NoEnabledThemes` when nothing is enabled.
    pub fn select_theme<R: Rng>(&self, rng: &mut R) -> Result<&Theme, ThemeError> {
        let enabled: Vec<&Theme> = self.themes.iter().filter(|t| t.enabled).collect();
        if enabled.is_empty() {
            return Err(ThemeError::NoEnabledThemes);
        }

        let total: f64 = enabled.iter().map(|t| t.weight.max(0.0)).sum();
        if total <= 0.0 {
            let idx = rng.gen_range(0..enabled.len());
            return Ok(enabled[idx]);
        }

        let mut remainder = rng.gen_range(0.0..total);
        for theme in &enabled {
            remainder -= theme.weight.max(0.0);
            if remainder <= 0.0 {
                return Ok(theme);
            }
        }
        // Floating point slack: the draw landed at the very top of the range.
        Ok(enabled[enabled.len() - 1])
    }
}

/// Load a prompt file from the prompts directory, trimmed.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn load_prompt(prompts_dir: &Path, file: &str) -> Result<String, ThemeError> {
    let path = prompts_dir.join(file);
    let raw = std::fs::read_to_string(&path).map_err(|e| ThemeError::ReadPrompt {
        file: path.display().to_string(),
        source: e,
    })?;
    Ok(raw.trim().to_string())
}

/// Substitute weather placeholders in prompt text by literal replacement.
#[must_use]
pub fn substitute_weather(prompt: &str, description: &str, temperature: f64) -> String {
    prompt
        .replace("{{weatherDescription}}", description)
        .replace("{{temperature}}", &format!("{temperature:.1}"))
}
