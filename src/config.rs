use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// Scheduling mode for posting cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Short fixed interval between cycles, for local testing.
    Test,
    /// Randomized multi-hour window between cycles.
    Live,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,
    pub work_dir: PathBuf,
    pub screenshots_dir: PathBuf,

    // Theme / prompt configuration files
    pub themes_config_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub reference_images_dir: PathBuf,

    // Generation API
    pub gemini_api_keys: Vec<String>,
    pub text_model: String,
    pub image_model: String,
    pub image_fallback_model: String,

    // Weather
    pub weather_latitude: f64,
    pub weather_longitude: f64,
    pub weather_location_name: String,

    // Instagram
    pub instagram_url: String,
    pub instagram_username: Option<String>,
    pub instagram_password: Option<String>,
    pub cookies_file_path: Option<PathBuf>,
    pub chrome_path: Option<String>,

    // Scheduling
    pub run_mode: RunMode,
    pub test_interval: Duration,
    pub live_window_min_hours: u64,
    pub live_window_max_hours: u64,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Storage
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/poster.sqlite")),
            work_dir: PathBuf::from(env_or_default("WORK_DIR", "./data/tmp")),
            screenshots_dir: PathBuf::from(env_or_default(
                "SCREENSHOTS_DIR",
                "./data/screenshots",
            )),

            // Theme / prompt configuration files
            themes_config_path: PathBuf::from(env_or_default(
                "THEMES_CONFIG",
                "./config/themes.json",
            )),
            prompts_dir: PathBuf::from(env_or_default("PROMPTS_DIR", "./config/prompts")),
            reference_images_dir: PathBuf::from(env_or_default(
                "REFERENCE_IMAGES_DIR",
                "./config/reference-images",
            )),

            // Generation API
            gemini_api_keys: parse_key_list(&required_env("GEMINI_API_KEYS")?),
            text_model: env_or_default("TEXT_MODEL", "gemini-2.0-flash"),
            image_model: env_or_default("IMAGE_MODEL", "gemini-2.0-flash-exp-image-generation"),
            image_fallback_model: env_or_default("IMAGE_FALLBACK_MODEL", "imagen-3.0-generate-002"),

            // Weather
            weather_latitude: parse_env_f64("WEATHER_LATITUDE", 25.2048)?,
            weather_longitude: parse_env_f64("WEATHER_LONGITUDE", 55.2708)?,
            weather_location_name: env_or_default("WEATHER_LOCATION", "Dubai"),

            // Instagram
            instagram_url: env_or_default("INSTAGRAM_URL", "https://www.instagram.com"),
            instagram_username: optional_env("INSTAGRAM_USERNAME"),
            instagram_password: optional_env("INSTAGRAM_PASSWORD"),
            cookies_file_path: optional_env("COOKIES_FILE_PATH").map(PathBuf::from),
            chrome_path: optional_env("CHROME_PATH"),

            // Scheduling
            run_mode: parse_run_mode(&env_or_default("RUN_MODE", "test"))?,
            test_interval: Duration::from_secs(parse_env_u64("TEST_INTERVAL_SECS", 120)?),
            live_window_min_hours: parse_env_u64("LIVE_WINDOW_MIN_HOURS", 20)?,
            live_window_max_hours: parse_env_u64("LIVE_WINDOW_MAX_HOURS", 28)?,

            // Web server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini_api_keys.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "GEMINI_API_KEYS".to_string(),
                message: "must contain at least one key".to_string(),
            });
        }
        if self.live_window_min_hours == 0 || self.live_window_max_hours == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LIVE_WINDOW_MIN_HOURS".to_string(),
                message: "schedule window must be at least 1 hour".to_string(),
            });
        }
        if self.live_window_min_hours > self.live_window_max_hours {
            return Err(ConfigError::InvalidValue {
                name: "LIVE_WINDOW_MAX_HOURS".to_string(),
                message: "must be >= LIVE_WINDOW_MIN_HOURS".to_string(),
            });
        }
        if !self.themes_config_path.is_file() {
            return Err(ConfigError::InvalidValue {
                name: "THEMES_CONFIG".to_string(),
                message: format!("file not found: {}", self.themes_config_path.display()),
            });
        }
        Ok(())
    }
}

/// Split a comma-separated key list, dropping empty entries.
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_run_mode(value: &str) -> Result<RunMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "test" => Ok(RunMode::Test),
        "live" => Ok(RunMode::Live),
        _ => Err(ConfigError::InvalidValue {
            name: "RUN_MODE".to_string(),
            message: format!("must be 'test' or 'live', got '{value}'"),
        }),
    }
}
