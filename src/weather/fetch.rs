//! Weather data acquisition: the Open-Meteo structured API with an
//! LLM-backed fallback, both normalized into the shared sky/wind vocabulary.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Sky, WeatherDetails, WeatherError, WeatherObservation, Wind};
use crate::generation::{extract_json, CredentialPool, GenerativeModel};

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Wind speed buckets in km/h.
const WIND_MODERATE_KMH: f64 = 20.0;
const WIND_STRONG_KMH: f64 = 35.0;

/// Structured weather API client (Open-Meteo).
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    temperature_2m: f64,
    weather_code: u32,
    wind_speed_10m: f64,
    precipitation: f64,
}

impl OpenMeteoProvider {
    /// Create a provider for the given coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), latitude, longitude)
    }

    /// Create a provider against a custom endpoint (used by tests).
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed.
    #[must_use]
    pub fn with_base_url(base_url: String, latitude: f64, longitude: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url,
            latitude,
            longitude,
        }
    }

    /// Fetch and classify the current weather.
    ///
    /// # Errors
    ///
    /// Returns a classified error on transport failure, rate limiting, or an
    /// unparseable response.
    pub async fn fetch(&self) -> Result<WeatherObservation, WeatherError> {
        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&current=temperature_2m,weather_code,wind_speed_10m,precipitation",
            self.base_url, self.latitude, self.longitude
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(WeatherError::RateLimited);
        }
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        let current = body.current;
        let sky = sky_from_wmo_code(current.weather_code).unwrap_or_else(|| {
            warn!(code = current.weather_code, "Unknown WMO weather code, treating as cloudy");
            Sky::Cloudy
        });
        let details = WeatherDetails {
            sky,
            wind: wind_from_speed_kmh(current.wind_speed_10m),
            precipitation: current.precipitation > 0.0,
        };
        let description = describe(sky, current.temperature_2m);

        debug!(
            temperature = current.temperature_2m,
            code = current.weather_code,
            wind_kmh = current.wind_speed_10m,
            "Weather fetched"
        );

        Ok(WeatherObservation::classify(
            current.temperature_2m,
            details,
            description,
        ))
    }
}

/// The fixed JSON shape requested from the text model.
#[derive(Debug, Deserialize)]
struct LlmWeatherShape {
    temperature: f64,
    sky: String,
    wind: String,
    precipitation: bool,
    #[serde(default)]
    description: String,
}

/// Text-model fallback: asks for current weather in a fixed JSON shape.
pub struct LlmWeatherProvider {
    model: Arc<dyn GenerativeModel>,
    text_model: String,
    location_name: String,
}

impl LlmWeatherProvider {
    #[must_use]
    pub fn new(model: Arc<dyn GenerativeModel>, text_model: String, location_name: String) -> Self {
        Self {
            model,
            text_model,
            location_name,
        }
    }

    /// Fetch weather through the text model with the given credential.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` when the model signals quota exhaustion, or a
    /// parse error when the response does not match the expected shape.
    pub async fn fetch(&self, api_key: &str) -> Result<WeatherObservation, WeatherError> {
        let prompt = format!(
            "What is the current weather in {}? Respond with only a JSON object: \
             {{\"temperature\": <celsius number>, \"sky\": \"clear|partly-cloudy|cloudy|foggy|rainy\", \
             \"wind\": \"weak|moderate|strong\", \"precipitation\": <bool>, \
             \"description\": \"short human description\"}}",
            self.location_name
        );

        let raw = self
            .model
            .generate_text(api_key, &self.text_model, &prompt)
            .await
            .map_err(|e| {
                if e.is_rate_limit() {
                    WeatherError::RateLimited
                } else {
                    WeatherError::Fallback(e.to_string())
                }
            })?;

        let json = extract_json(&raw)
            .ok_or_else(|| WeatherError::Parse("no JSON object in weather response".to_string()))?;
        let shape: LlmWeatherShape = serde_json::from_str(json)
            .map_err(|e| WeatherError::Parse(format!("weather shape malformed: {e}")))?;

        let sky = sky_from_text(&shape.sky);
        let details = WeatherDetails {
            sky,
            wind: wind_from_text(&shape.wind),
            precipitation: shape.precipitation,
        };
        let description = if shape.description.is_empty() {
            describe(sky, shape.temperature)
        } else {
            shape.description
        };

        Ok(WeatherObservation::classify(
            shape.temperature,
            details,
            description,
        ))
    }
}

/// Weather acquisition with fallback and one rate-limit retry.
pub struct WeatherService {
    primary: OpenMeteoProvider,
    fallback: LlmWeatherProvider,
    pool: Arc<CredentialPool>,
}

impl WeatherService {
    #[must_use]
    pub fn new(
        primary: OpenMeteoProvider,
        fallback: LlmWeatherProvider,
        pool: Arc<CredentialPool>,
    ) -> Self {
        Self {
            primary,
            fallback,
            pool,
        }
    }

    /// Fetch a classified observation.
    ///
    /// The structured API is tried first, the LLM fallback on any
    /// non-rate-limit failure. A rate limit rotates the credential pool and
    /// retries the whole fetch exactly once.
    ///
    /// # Errors
    ///
    /// Propagates the classified error when both paths fail. Weather-gated
    /// themes treat this as a cycle abort, never a silent default.
    pub async fn fetch_observation(&self) -> Result<WeatherObservation, WeatherError> {
        match self.fetch_once().await {
            Err(WeatherError::RateLimited) => {
                warn!("Weather fetch rate limited, rotating credential and retrying once");
                self.pool.rotate();
                self.fetch_once().await
            }
            result => result,
        }
    }

    async fn fetch_once(&self) -> Result<WeatherObservation, WeatherError> {
        match self.primary.fetch().await {
            Ok(observation) => Ok(observation),
            Err(WeatherError::RateLimited) => Err(WeatherError::RateLimited),
            Err(e) => {
                warn!("Structured weather API failed, trying LLM fallback: {e}");
                let observation = self.fallback.fetch(&self.pool.current()).await?;
                info!(condition = ?observation.condition, "Weather resolved via LLM fallback");
                Ok(observation)
            }
        }
    }
}

/// Static WMO weather-code table.
fn sky_from_wmo_code(code: u32) -> Option<Sky> {
    match code {
        0 => Some(Sky::Clear),
        1 | 2 => Some(Sky::PartlyCloudy),
        3 => Some(Sky::Cloudy),
        45 | 48 => Some(Sky::Foggy),
        51..=67 | 71..=77 | 80..=86 | 95..=99 => Some(Sky::Rainy),
        _ => None,
    }
}

/// Free-text fallback matching for provider condition strings.
fn sky_from_text(text: &str) -> Sky {
    let lower = text.to_lowercase();
    if lower.contains("rain") || lower.contains("storm") || lower.contains("snow")
        || lower.contains("drizzle") || lower.contains("shower")
    {
        Sky::Rainy
    } else if lower.contains("fog") || lower.contains("mist") || lower.contains("haze") {
        Sky::Foggy
    } else if lower.contains("partly") {
        Sky::PartlyCloudy
    } else if lower.contains("cloud") || lower.contains("overcast") {
        Sky::Cloudy
    } else {
        Sky::Clear
    }
}

fn wind_from_speed_kmh(speed: f64) -> Wind {
    if speed < WIND_MODERATE_KMH {
        Wind::Weak
    } else if speed < WIND_STRONG_KMH {
        Wind::Moderate
    } else {
        Wind::Strong
    }
}

fn wind_from_text(text: &str) -> Wind {
    match text.to_lowercase().as_str() {
        "strong" => Wind::Strong,
        "moderate" => Wind::Moderate,
        _ => Wind::Weak,
    }
}

fn describe(sky: Sky, temperature: f64) -> String {
    let label = match sky {
        Sky::Clear => "clear skies",
        Sky::PartlyCloudy => "partly cloudy",
        Sky::Cloudy => "cloudy",
        Sky::Foggy => "foggy",
        Sky::Rainy => "rainy",
    };
    format!("{label}, {temperature:.0}°C")
}
