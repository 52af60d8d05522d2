//! Weather observation model and the good/bad classifier.

mod fetch;

pub use fetch::{LlmWeatherProvider, OpenMeteoProvider, WeatherService};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("weather provider returned status {0}")]
    Status(u16),
    #[error("weather provider rate limited")]
    RateLimited,
    #[error("failed to parse weather response: {0}")]
    Parse(String),
    #[error("weather fallback failed: {0}")]
    Fallback(String),
}

/// Sky condition vocabulary shared by all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sky {
    Clear,
    PartlyCloudy,
    Cloudy,
    Foggy,
    Rainy,
}

impl Sky {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PartlyCloudy => "partly-cloudy",
            Self::Cloudy => "cloudy",
            Self::Foggy => "foggy",
            Self::Rainy => "rainy",
        }
    }
}

/// Wind strength buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wind {
    Weak,
    Moderate,
    Strong,
}

/// Binary posting verdict for weather-gated themes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Good,
    Bad,
}

/// The raw inputs behind a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeatherDetails {
    pub sky: Sky,
    pub wind: Wind,
    pub precipitation: bool,
}

/// A single classified weather observation.
///
/// Created fresh per weather-gated posting cycle and only persisted embedded
/// in a post record, never independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub condition: Verdict,
    pub temperature: f64,
    pub description: String,
    pub details: WeatherDetails,
}

impl WeatherObservation {
    /// Build an observation by running the classifier over raw details.
    #[must_use]
    pub fn classify(temperature: f64, details: WeatherDetails, description: String) -> Self {
        Self {
            condition: classify(temperature, details.sky, details.wind, details.precipitation),
            temperature,
            description,
            details,
        }
    }
}

/// Classify raw weather inputs into a binary verdict.
///
/// Ordered rule evaluation, first match wins:
/// 1. precipitation → bad
/// 2. strong wind → bad
/// 3. below 18°C → bad
/// 4. ≥22°C and clear → good
/// 5. ≥20°C and (partly-)cloudy → good
/// 6. 18..22°C and clear → good
/// 7. otherwise → bad
#[must_use]
pub fn classify(temperature: f64, sky: Sky, wind: Wind, precipitation: bool) -> Verdict {
    if precipitation {
        return Verdict::Bad;
    }
    if wind == Wind::Strong {
        return Verdict::Bad;
    }
    if temperature < 18.0 {
        return Verdict::Bad;
    }
    if temperature >= 22.0 && sky == Sky::Clear {
        return Verdict::Good;
    }
    if temperature >= 20.0 && matches!(sky, Sky::Cloudy | Sky::PartlyCloudy) {
        return Verdict::Good;
    }
    if (18.0..22.0).contains(&temperature) && sky == Sky::Clear {
        return Verdict::Good;
    }
    Verdict::Bad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precipitation_wins_over_everything() {
        // Rule 1 fires before rule 4 even on a hot clear day.
        assert_eq!(
            classify(30.0, Sky::Clear, Wind::Weak, true),
            Verdict::Bad
        );
    }

    #[test]
    fn test_strong_wind_is_bad() {
        assert_eq!(
            classify(25.0, Sky::Clear, Wind::Strong, false),
            Verdict::Bad
        );
    }

    #[test]
    fn test_cold_is_bad() {
        assert_eq!(
            classify(17.9, Sky::Clear, Wind::Weak, false),
            Verdict::Bad
        );
    }

    #[test]
    fn test_warm_clear_is_good() {
        assert_eq!(
            classify(22.0, Sky::Clear, Wind::Weak, false),
            Verdict::Good
        );
        assert_eq!(
            classify(35.0, Sky::Clear, Wind::Moderate, false),
            Verdict::Good
        );
    }

    #[test]
    fn test_mild_cloudy_is_good() {
        assert_eq!(
            classify(20.0, Sky::Cloudy, Wind::Weak, false),
            Verdict::Good
        );
        assert_eq!(
            classify(21.0, Sky::PartlyCloudy, Wind::Moderate, false),
            Verdict::Good
        );
    }

    #[test]
    fn test_mild_clear_is_good() {
        assert_eq!(
            classify(18.0, Sky::Clear, Wind::Weak, false),
            Verdict::Good
        );
        assert_eq!(
            classify(21.9, Sky::Clear, Wind::Weak, false),
            Verdict::Good
        );
    }

    #[test]
    fn test_fallthrough_is_bad() {
        // 19°C cloudy matches neither rule 5 (needs ≥20) nor rule 6 (needs clear).
        assert_eq!(
            classify(19.0, Sky::Cloudy, Wind::Weak, false),
            Verdict::Bad
        );
        assert_eq!(
            classify(25.0, Sky::Foggy, Wind::Weak, false),
            Verdict::Bad
        );
        assert_eq!(
            classify(25.0, Sky::Rainy, Wind::Weak, false),
            Verdict::Bad
        );
    }

    #[test]
    fn test_determinism() {
        for _ in 0..3 {
            assert_eq!(
                classify(23.5, Sky::PartlyCloudy, Wind::Moderate, false),
                Verdict::Good
            );
        }
    }

    #[test]
    fn test_observation_embeds_verdict() {
        let details = WeatherDetails {
            sky: Sky::Clear,
            wind: Wind::Weak,
            precipitation: false,
        };
        let obs = WeatherObservation::classify(24.0, details, "clear sky".to_string());
        assert_eq!(obs.condition, Verdict::Good);
        assert_eq!(obs.details.sky, Sky::Clear);
    }
}
