//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::WeatherError;
use crate::models::{
    AirQuality, AqiLevel, Condition, Coordinates, CurrentWeather, Forecast, UnitSystem,
    WeatherBundle,
};
use crate::provider::WeatherProvider;
use crate::transport::{HttpBackend, NetworkError, TransportError};

// ============================================================================
// HTTP backend
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Json(Value),
    Status(u16, String),
    /// Never answers
    Hang,
}

/// Replies per URL path, in order; the last reply for a path repeats
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(Url, Instant)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self, path: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.path() == path)
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn call_count(&self, path: &str) -> usize {
        self.calls(path).len()
    }

    pub(crate) fn last_url(&self, path: &str) -> Option<Url> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(url, _)| url.path() == path)
            .map(|(url, _)| url.clone())
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn get_json(&self, url: &Url) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push((url.clone(), Instant::now()));

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url.path()) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Status(status, body)) => Err(TransportError::Status { status, body }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(TransportError::Status {
                status: 501,
                body: format!("no route for {}", url.path()),
            }),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug, Clone)]
struct Script {
    delay: Duration,
    failures_left: u32,
    not_found: bool,
    malformed: bool,
    air_quality: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            failures_left: 0,
            not_found: false,
            malformed: false,
            air_quality: true,
        }
    }
}

/// Provider whose answers are scripted per city; unknown cities succeed
#[derive(Default)]
pub(crate) struct StubProvider {
    scripts: Mutex<HashMap<String, Script>>,
    current_calls: Mutex<HashMap<String, u32>>,
    forecast_calls: Mutex<HashMap<String, u32>>,
}

impl StubProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self, city: &str, edit: impl FnOnce(&mut Script)) {
        edit(self.scripts.lock().unwrap().entry(city.to_string()).or_default());
    }

    pub(crate) fn delay(&self, city: &str, delay: Duration) {
        self.script(city, |s| s.delay = delay);
    }

    /// Fail the next `times` current-weather calls (u32::MAX for always)
    pub(crate) fn fail(&self, city: &str, times: u32) {
        self.script(city, |s| s.failures_left = times);
    }

    pub(crate) fn not_found(&self, city: &str) {
        self.script(city, |s| s.not_found = true);
    }

    /// Answer every current-weather call with an unexpected payload
    pub(crate) fn malformed(&self, city: &str) {
        self.script(city, |s| s.malformed = true);
    }

    pub(crate) fn no_air_quality(&self, city: &str) {
        self.script(city, |s| s.air_quality = false);
    }

    pub(crate) fn current_calls(&self, city: &str) -> u32 {
        self.current_calls.lock().unwrap().get(city).copied().unwrap_or(0)
    }

    pub(crate) fn forecast_calls(&self, city: &str) -> u32 {
        self.forecast_calls.lock().unwrap().get(city).copied().unwrap_or(0)
    }

    fn lookup(&self, city: &str) -> Script {
        self.scripts.lock().unwrap().get(city).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl WeatherProvider for StubProvider {
    async fn get_current_weather(
        &self,
        city: &str,
        units: UnitSystem,
    ) -> Result<CurrentWeather, WeatherError> {
        let attempt = {
            let mut calls = self.current_calls.lock().unwrap();
            let count = calls.entry(city.to_string()).or_default();
            *count += 1;
            *count
        };
        let script = self.lookup(city);
        tokio::time::sleep(script.delay).await;

        if script.not_found {
            return Err(WeatherError::CityNotFound(city.to_string()));
        }
        if script.malformed {
            return Err(WeatherError::Provider(format!(
                "Malformed current weather response (attempt {})",
                attempt
            )));
        }
        if script.failures_left > 0 {
            self.script(city, |s| s.failures_left = s.failures_left.saturating_sub(1));
            return Err(WeatherError::Network(NetworkError::new(
                3,
                TransportError::Status {
                    status: 503,
                    body: format!("upstream unavailable (attempt {})", attempt),
                },
            )));
        }

        Ok(sample_current(city, units))
    }

    async fn get_forecast(&self, city: &str, _units: UnitSystem) -> Result<Forecast, WeatherError> {
        *self
            .forecast_calls
            .lock()
            .unwrap()
            .entry(city.to_string())
            .or_default() += 1;
        let script = self.lookup(city);
        tokio::time::sleep(script.delay).await;

        if script.not_found {
            return Err(WeatherError::CityNotFound(city.to_string()));
        }
        Ok(Forecast::default())
    }

    async fn get_air_quality(&self, city: &str) -> Option<AirQuality> {
        if !self.lookup(city).air_quality {
            return None;
        }
        Some(AirQuality {
            aqi: 2,
            level: AqiLevel::Fair,
            components: BTreeMap::from([("pm2_5".to_string(), 12.5)]),
        })
    }
}

// ============================================================================
// Records and payloads
// ============================================================================

fn fixed_time(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// Metric temperature 20, imperial 68
pub(crate) fn sample_current(city: &str, units: UnitSystem) -> CurrentWeather {
    let temperature = if units.is_celsius() { 20 } else { 68 };
    CurrentWeather {
        city: city.to_string(),
        country: "XX".to_string(),
        coordinates: Coordinates { lat: 1.0, lon: 2.0 },
        units,
        temperature,
        feels_like: temperature,
        humidity: 50,
        pressure: 1013,
        wind_speed: 10,
        wind_direction: 90,
        condition: Condition::Clear,
        description: "clear sky".to_string(),
        icon: "01d".to_string(),
        visibility: Some(10.0),
        sunrise: fixed_time(1_709_514_000),
        sunset: fixed_time(1_709_556_000),
        high: temperature + 3,
        low: temperature - 3,
        retrieved_at: fixed_time(1_709_542_800),
    }
}

pub(crate) fn sample_bundle(city: &str) -> WeatherBundle {
    WeatherBundle {
        current: sample_current(city, UnitSystem::Metric),
        forecast: Forecast::default(),
        air_quality: None,
    }
}

pub(crate) fn current_payload(name: &str, temp: f64) -> Value {
    json!({
        "coord": {"lon": 73.86, "lat": 18.52},
        "weather": [{"id": 802, "main": "Clouds", "description": "scattered clouds", "icon": "03d"}],
        "base": "stations",
        "main": {
            "temp": temp,
            "feels_like": temp - 0.6,
            "temp_min": temp - 2.6,
            "temp_max": temp + 2.4,
            "pressure": 1012,
            "humidity": 48
        },
        "visibility": 6437,
        "wind": {"speed": 4.12, "deg": 270},
        "clouds": {"all": 40},
        "dt": 1_709_542_800,
        "sys": {"country": "IN", "sunrise": 1_709_514_000, "sunset": 1_709_556_600},
        "timezone": 19800,
        "id": 1259229,
        "name": name,
        "cod": 200
    })
}

/// `count` samples three hours apart; sample `i` has temperature `i`
pub(crate) fn forecast_payload(name: &str, start: i64, count: usize, timezone: i32) -> Value {
    let list: Vec<Value> = (0..count)
        .map(|i| {
            let temp = i as f64;
            let pop = if i % 2 == 1 { 0.5 } else { 0.0 };
            json!({
                "dt": start + (i as i64) * 3 * 3600,
                "main": {
                    "temp": temp,
                    "feels_like": temp,
                    "temp_min": temp - 1.0,
                    "temp_max": temp + 1.0,
                    "pressure": 1010,
                    "humidity": 60
                },
                "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
                "wind": {"speed": 3.0, "deg": 180},
                "pop": pop
            })
        })
        .collect();

    json!({
        "cod": "200",
        "cnt": count,
        "list": list,
        "city": {"name": name, "country": "DE", "timezone": timezone}
    })
}

pub(crate) fn geo_payload(name: &str, lat: f64, lon: f64) -> Value {
    json!([{"name": name, "lat": lat, "lon": lon, "country": "IN", "state": null}])
}

pub(crate) fn air_payload(aqi: i64) -> Value {
    json!({
        "coord": {"lon": 77.21, "lat": 28.61},
        "list": [{
            "dt": 1_709_542_800,
            "main": {"aqi": aqi},
            "components": {"co": 201.94, "no2": 0.77, "o3": 68.66, "pm2_5": 35.2, "pm10": 50.1}
        }]
    })
}
