mod models;
mod openweather;

pub use models::GeoLocation;
pub use openweather::{OpenWeatherProvider, DEFAULT_API_BASE_URL};

use async_trait::async_trait;

use crate::error::WeatherError;
use crate::models::{AirQuality, CurrentWeather, Forecast, UnitSystem};

/// Source of normalized weather records
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn get_current_weather(
        &self,
        city: &str,
        units: UnitSystem,
    ) -> Result<CurrentWeather, WeatherError>;

    async fn get_forecast(&self, city: &str, units: UnitSystem) -> Result<Forecast, WeatherError>;

    /// Best effort: any failure yields `None`
    async fn get_air_quality(&self, city: &str) -> Option<AirQuality>;
}

/// Round half up to the nearest integer (-2.5 rounds to -2)
pub(crate) fn round_half_up(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

/// Provider wind speed in `units` to whole km/h
pub(crate) fn wind_kmh(speed: f64, units: UnitSystem) -> i32 {
    round_half_up(speed * units.wind_to_kmh())
}

/// Metres to kilometres with one decimal place
pub(crate) fn visibility_km(metres: u32) -> f64 {
    (f64::from(metres) / 100.0).round() / 10.0
}

/// Probability 0.0-1.0 to a 0-100 percentage
pub(crate) fn percent(probability: f64) -> u8 {
    round_half_up(probability * 100.0).clamp(0, 100) as u8
}
