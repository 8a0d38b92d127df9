use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Unit system
// ============================================================================

/// Temperature/wind unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Value of the provider's `units` query parameter
    pub fn as_str(self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    pub fn is_celsius(self) -> bool {
        matches!(self, UnitSystem::Metric)
    }

    pub fn toggled(self) -> Self {
        match self {
            UnitSystem::Metric => UnitSystem::Imperial,
            UnitSystem::Imperial => UnitSystem::Metric,
        }
    }

    /// Factor converting the provider's wind speed unit into km/h
    pub fn wind_to_kmh(self) -> f64 {
        match self {
            // m/s
            UnitSystem::Metric => 3.6,
            // mph
            UnitSystem::Imperial => 1.609_344,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Primary weather classification as reported by the provider.
///
/// Known groups get their own variant; anything else is kept verbatim in
/// `Other`. Mapping to icons is up to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Condition {
    Clear,
    Clouds,
    Rain,
    Drizzle,
    Thunderstorm,
    Snow,
    Mist,
    Fog,
    Haze,
    Smoke,
    Dust,
    Other(String),
}

impl Condition {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Clear => "Clear",
            Self::Clouds => "Clouds",
            Self::Rain => "Rain",
            Self::Drizzle => "Drizzle",
            Self::Thunderstorm => "Thunderstorm",
            Self::Snow => "Snow",
            Self::Mist => "Mist",
            Self::Fog => "Fog",
            Self::Haze => "Haze",
            Self::Smoke => "Smoke",
            Self::Dust => "Dust",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for Condition {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Clear" => Self::Clear,
            "Clouds" => Self::Clouds,
            "Rain" => Self::Rain,
            "Drizzle" => Self::Drizzle,
            "Thunderstorm" => Self::Thunderstorm,
            "Snow" => Self::Snow,
            "Mist" => Self::Mist,
            "Fog" => Self::Fog,
            "Haze" => Self::Haze,
            "Smoke" => Self::Smoke,
            "Dust" => Self::Dust,
            _ => Self::Other(raw),
        }
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Current weather
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Normalized current conditions for one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub city: String,
    pub country: String,
    pub coordinates: Coordinates,
    pub units: UnitSystem,
    pub temperature: i32,
    pub feels_like: i32,
    pub humidity: u8,
    pub pressure: u32,
    /// km/h regardless of unit system
    pub wind_speed: i32,
    pub wind_direction: u16,
    pub condition: Condition,
    pub description: String,
    pub icon: String,
    /// Kilometres, one decimal place
    pub visibility: Option<f64>,
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub high: i32,
    pub low: i32,
    pub retrieved_at: DateTime<Utc>,
}

// ============================================================================
// Forecast
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEntry {
    /// Local hour label, e.g. "3 PM"
    pub time: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: i32,
    pub condition: Condition,
    pub icon: String,
    /// Percent, 0-100
    pub precipitation_probability: u8,
    pub humidity: u8,
    pub wind_speed: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    pub date: NaiveDate,
    /// Short weekday label, e.g. "Mon"
    pub day: String,
    pub temperature: i32,
    pub condition: Condition,
    pub icon: String,
    pub description: String,
    pub precipitation_probability: u8,
    pub humidity: u8,
    pub wind_speed: i32,
    pub high: i32,
    pub low: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Forecast {
    pub hourly: Vec<HourlyEntry>,
    pub daily: Vec<DailyEntry>,
}

// ============================================================================
// Air quality
// ============================================================================

/// Qualitative tier for the provider's 1-5 AQI scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiLevel {
    Good,
    Fair,
    Moderate,
    Poor,
    VeryPoor,
    Unknown,
}

impl AqiLevel {
    pub fn from_index(aqi: i64) -> Self {
        match aqi {
            1 => Self::Good,
            2 => Self::Fair,
            3 => Self::Moderate,
            4 => Self::Poor,
            5 => Self::VeryPoor,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Moderate => "Moderate",
            Self::Poor => "Poor",
            Self::VeryPoor => "Very Poor",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub aqi: i64,
    pub level: AqiLevel,
    /// Raw pollutant concentrations in μg/m³, keyed by provider name (co, no2, pm2_5, ...)
    pub components: BTreeMap<String, f64>,
}

// ============================================================================
// Bundles
// ============================================================================

/// Everything the dashboard shows for one (city, units) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherBundle {
    pub current: CurrentWeather,
    pub forecast: Forecast,
    pub air_quality: Option<AirQuality>,
}
