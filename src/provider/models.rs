use std::collections::BTreeMap;

use serde::Deserialize;

// ============================================================================
// Geocoding API Response
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub state: Option<String>,
}

// ============================================================================
// Shared fragments
// These structs deserialize the raw API response; not all fields are used
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct WeatherCondition {
    pub id: u32,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct MainInfo {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: u32,
    pub humidity: u8,
}

#[derive(Debug, Deserialize)]
pub struct WindInfo {
    pub speed: f64,
    #[serde(default)]
    pub deg: u16,
}

// ============================================================================
// Current Weather API Response (/data/2.5/weather)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SysInfo {
    /// Absent for coordinates outside any country
    pub country: Option<String>,
    pub sunrise: i64,
    pub sunset: i64,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct CurrentResponse {
    #[serde(default)]
    pub name: String,
    pub coord: Coord,
    pub dt: i64,
    pub sys: SysInfo,
    pub main: MainInfo,
    pub weather: Vec<WeatherCondition>,
    pub wind: WindInfo,
    /// Metres
    pub visibility: Option<u32>,
}

// ============================================================================
// 5 day / 3 hour Forecast API Response (/data/2.5/forecast)
// ============================================================================

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct ForecastSample {
    pub dt: i64,
    pub main: MainInfo,
    pub weather: Vec<WeatherCondition>,
    pub wind: WindInfo,
    /// Probability of precipitation, 0.0-1.0
    #[serde(default)]
    pub pop: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastCity {
    /// Shift in seconds from UTC
    #[serde(default)]
    pub timezone: i32,
}

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub city: ForecastCity,
    pub list: Vec<ForecastSample>,
}

// ============================================================================
// Air Pollution API Response (/data/2.5/air_pollution)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AqiMain {
    pub aqi: i64,
}

#[derive(Debug, Deserialize)]
pub struct AirSample {
    pub main: AqiMain,
    #[serde(default)]
    pub components: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct AirPollutionResponse {
    pub list: Vec<AirSample>,
}
