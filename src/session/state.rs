use serde::Serialize;

use crate::models::{AirQuality, CurrentWeather, Forecast, UnitSystem, WeatherBundle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Snapshot of what the dashboard shows for the selected city
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub current_city: String,
    pub units: UnitSystem,
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub online: bool,
    pub current: Option<CurrentWeather>,
    pub forecast: Option<Forecast>,
    pub air_quality: Option<AirQuality>,
}

impl SessionState {
    pub fn new(city: impl Into<String>, units: UnitSystem, online: bool) -> Self {
        Self {
            current_city: city.into(),
            units,
            phase: SessionPhase::Idle,
            error: None,
            online,
            current: None,
            forecast: None,
            air_quality: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == SessionPhase::Loading
    }

    /// Replace all three datasets at once and mark the session ready
    pub(crate) fn show(&mut self, city: &str, units: UnitSystem, bundle: WeatherBundle) {
        self.current_city = city.to_string();
        self.units = units;
        self.current = Some(bundle.current);
        self.forecast = Some(bundle.forecast);
        self.air_quality = bundle.air_quality;
        self.phase = SessionPhase::Ready;
        self.error = None;
    }

    /// Leave the loading phase without touching the data
    pub(crate) fn settle(&mut self) {
        if self.phase == SessionPhase::Loading {
            self.phase = if self.current.is_some() {
                SessionPhase::Ready
            } else {
                SessionPhase::Idle
            };
        }
    }

    /// Put back the phase and error seen before a cycle started loading
    pub(crate) fn restore(&mut self, phase: SessionPhase, error: Option<String>) {
        self.phase = phase;
        self.error = error;
        self.settle();
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.phase = SessionPhase::Error;
        self.error = Some(message);
    }
}
