use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use indexmap::IndexMap;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::models::*;
use super::{percent, round_half_up, visibility_km, wind_kmh, WeatherProvider};
use crate::cache::{normalize_cache_key, GeoCache};
use crate::error::WeatherError;
use crate::models::{
    AirQuality, AqiLevel, Condition, Coordinates, CurrentWeather, DailyEntry, Forecast,
    HourlyEntry, UnitSystem,
};
use crate::transport::HttpTransport;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openweathermap.org";

const CURRENT_WEATHER_PATH: &str = "/data/2.5/weather";
const FORECAST_PATH: &str = "/data/2.5/forecast";
const AIR_POLLUTION_PATH: &str = "/data/2.5/air_pollution";
const GEOCODING_PATH: &str = "/geo/1.0/direct";
const REVERSE_GEOCODING_PATH: &str = "/geo/1.0/reverse";

/// The forecast feed has 3-hour steps, so 12 samples cover the next 36 hours
const HOURLY_LIMIT: usize = 12;
const DAILY_LIMIT: usize = 5;

/// OpenWeatherMap adapter: builds requests and normalizes responses
pub struct OpenWeatherProvider {
    transport: HttpTransport,
    base_url: Url,
    api_key: String,
    geo_cache: GeoCache,
}

impl OpenWeatherProvider {
    pub fn new(transport: HttpTransport, base_url: Url, api_key: &str, geo_cache: GeoCache) -> Self {
        Self {
            transport,
            base_url,
            api_key: api_key.to_string(),
            geo_cache,
        }
    }

    /// Build an endpoint URL; parameters are percent-encoded
    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, WeatherError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| WeatherError::Provider(format!("Invalid endpoint {}: {}", path, e)))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("appid", &self.api_key);
        Ok(url)
    }

    /// Fetch through the retrying transport; a final 404 means the place is unknown
    async fn fetch(&self, url: Url, place: &str) -> Result<Value, WeatherError> {
        self.transport.fetch_json(&url).await.map_err(|err| {
            if err.status() == Some(404) {
                WeatherError::CityNotFound(place.to_string())
            } else {
                WeatherError::Network(err)
            }
        })
    }

    /// Get coordinates for a city using the Geocoding API.
    /// Results are cached for 24 hours.
    pub async fn geocode(&self, city: &str) -> Result<Coordinates, WeatherError> {
        let cache_key = normalize_cache_key(city);

        if let Some(cached) = self.geo_cache.get(&cache_key) {
            tracing::debug!(city = %city, "Geocoding cache hit");
            return Ok(cached);
        }

        tracing::debug!(city = %city, "Geocoding city");

        let url = self.endpoint(GEOCODING_PATH, &[("q", city), ("limit", "1")])?;
        let locations: Vec<GeoLocation> = decode(self.fetch(url, city).await?, "geocoding")?;

        let location = locations
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::CityNotFound(city.to_string()))?;

        let coordinates = Coordinates {
            lat: location.lat,
            lon: location.lon,
        };
        self.geo_cache.insert(cache_key, coordinates);

        Ok(coordinates)
    }

    /// Resolve coordinates to the nearest named place, if any
    pub async fn reverse_geocode(
        &self,
        coordinates: Coordinates,
    ) -> Result<Option<GeoLocation>, WeatherError> {
        let lat = coordinates.lat.to_string();
        let lon = coordinates.lon.to_string();
        let place = format!("{},{}", lat, lon);

        let url = self.endpoint(
            REVERSE_GEOCODING_PATH,
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("limit", "1")],
        )?;
        let locations: Vec<GeoLocation> =
            decode(self.fetch(url, &place).await?, "reverse geocoding")?;

        Ok(locations.into_iter().next())
    }

    /// Current conditions at a coordinate rather than a named city
    pub async fn current_weather_at(
        &self,
        coordinates: Coordinates,
        units: UnitSystem,
    ) -> Result<CurrentWeather, WeatherError> {
        let lat = coordinates.lat.to_string();
        let lon = coordinates.lon.to_string();
        let place = format!("{},{}", lat, lon);

        let url = self.endpoint(
            CURRENT_WEATHER_PATH,
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("units", units.as_str())],
        )?;
        let data: CurrentResponse = decode(self.fetch(url, &place).await?, "current weather")?;

        normalize_current(data, units, Utc::now())
    }

    async fn fetch_air_quality(&self, city: &str) -> Result<AirQuality, WeatherError> {
        let coordinates = self.geocode(city).await?;
        let lat = coordinates.lat.to_string();
        let lon = coordinates.lon.to_string();

        let url = self.endpoint(AIR_POLLUTION_PATH, &[("lat", lat.as_str()), ("lon", lon.as_str())])?;
        let data: AirPollutionResponse = decode(self.fetch(url, city).await?, "air pollution")?;

        normalize_air_quality(data)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn get_current_weather(
        &self,
        city: &str,
        units: UnitSystem,
    ) -> Result<CurrentWeather, WeatherError> {
        tracing::debug!(city = %city, units = %units, "Fetching current weather");

        let url = self.endpoint(CURRENT_WEATHER_PATH, &[("q", city), ("units", units.as_str())])?;
        let data: CurrentResponse = decode(self.fetch(url, city).await?, "current weather")?;
        let weather = normalize_current(data, units, Utc::now())?;

        tracing::info!(city = %weather.city, temp = weather.temperature, "Current weather fetched");

        Ok(weather)
    }

    async fn get_forecast(&self, city: &str, units: UnitSystem) -> Result<Forecast, WeatherError> {
        tracing::debug!(city = %city, units = %units, "Fetching forecast");

        let url = self.endpoint(FORECAST_PATH, &[("q", city), ("units", units.as_str())])?;
        let data: ForecastResponse = decode(self.fetch(url, city).await?, "forecast")?;

        normalize_forecast(data, units)
    }

    async fn get_air_quality(&self, city: &str) -> Option<AirQuality> {
        match self.fetch_air_quality(city).await {
            Ok(air_quality) => Some(air_quality),
            Err(e) => {
                tracing::warn!(city = %city, error = %e, "Air quality data unavailable");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, WeatherError> {
    serde_json::from_value(value)
        .map_err(|e| WeatherError::Provider(format!("Malformed {} response: {}", what, e)))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, WeatherError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| WeatherError::Provider(format!("Timestamp out of range: {}", secs)))
}

fn primary_condition(weather: &[WeatherCondition]) -> Result<&WeatherCondition, WeatherError> {
    weather.first().ok_or_else(|| {
        WeatherError::Provider("No weather information available".to_string())
    })
}

fn normalize_current(
    data: CurrentResponse,
    units: UnitSystem,
    retrieved_at: DateTime<Utc>,
) -> Result<CurrentWeather, WeatherError> {
    let primary = primary_condition(&data.weather)?;

    Ok(CurrentWeather {
        city: data.name,
        country: data.sys.country.unwrap_or_default(),
        coordinates: Coordinates {
            lat: data.coord.lat,
            lon: data.coord.lon,
        },
        units,
        temperature: round_half_up(data.main.temp),
        feels_like: round_half_up(data.main.feels_like),
        humidity: data.main.humidity,
        pressure: data.main.pressure,
        wind_speed: wind_kmh(data.wind.speed, units),
        wind_direction: data.wind.deg,
        condition: Condition::from(primary.main.clone()),
        description: primary.description.clone(),
        icon: primary.icon.clone(),
        visibility: data.visibility.map(visibility_km),
        sunrise: timestamp(data.sys.sunrise)?,
        sunset: timestamp(data.sys.sunset)?,
        high: round_half_up(data.main.temp_max),
        low: round_half_up(data.main.temp_min),
        retrieved_at,
    })
}

/// Keep the first sample of each local calendar date, in order of appearance
fn first_sample_per_day(
    samples: &[ForecastSample],
    offset: FixedOffset,
) -> Result<Vec<(NaiveDate, &ForecastSample)>, WeatherError> {
    let mut days: IndexMap<NaiveDate, &ForecastSample> = IndexMap::new();

    for sample in samples {
        let date = timestamp(sample.dt)?.with_timezone(&offset).date_naive();
        days.entry(date).or_insert(sample);
    }

    Ok(days.into_iter().collect())
}

fn normalize_forecast(data: ForecastResponse, units: UnitSystem) -> Result<Forecast, WeatherError> {
    let offset = FixedOffset::east_opt(data.city.timezone).unwrap_or_else(|| Utc.fix());

    let hourly = data
        .list
        .iter()
        .take(HOURLY_LIMIT)
        .map(|sample| {
            let primary = primary_condition(&sample.weather)?;
            let at = timestamp(sample.dt)?;
            Ok(HourlyEntry {
                time: at.with_timezone(&offset).format("%-I %p").to_string(),
                timestamp: at,
                temperature: round_half_up(sample.main.temp),
                condition: Condition::from(primary.main.clone()),
                icon: primary.icon.clone(),
                precipitation_probability: percent(sample.pop),
                humidity: sample.main.humidity,
                wind_speed: wind_kmh(sample.wind.speed, units),
            })
        })
        .collect::<Result<Vec<_>, WeatherError>>()?;

    let daily = first_sample_per_day(&data.list, offset)?
        .into_iter()
        .take(DAILY_LIMIT)
        .map(|(date, sample)| {
            let primary = primary_condition(&sample.weather)?;
            Ok(DailyEntry {
                date,
                day: date.format("%a").to_string(),
                temperature: round_half_up(sample.main.temp),
                condition: Condition::from(primary.main.clone()),
                icon: primary.icon.clone(),
                description: primary.description.clone(),
                precipitation_probability: percent(sample.pop),
                humidity: sample.main.humidity,
                wind_speed: wind_kmh(sample.wind.speed, units),
                high: round_half_up(sample.main.temp_max),
                low: round_half_up(sample.main.temp_min),
            })
        })
        .collect::<Result<Vec<_>, WeatherError>>()?;

    Ok(Forecast { hourly, daily })
}

fn normalize_air_quality(data: AirPollutionResponse) -> Result<AirQuality, WeatherError> {
    let sample = data.list.into_iter().next().ok_or_else(|| {
        WeatherError::Provider("Air pollution response contained no data".to_string())
    })?;

    Ok(AirQuality {
        aqi: sample.main.aqi,
        level: AqiLevel::from_index(sample.main.aqi),
        components: sample.components,
    })
}
