//! Weather dashboard data core.
//!
//! Fetches current conditions, forecasts and air quality from OpenWeatherMap,
//! normalizes them, caches them per city and unit system, and keeps a session
//! and a favorites list consistent while the user switches cities and units.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod dashboard;
pub mod error;
pub mod favorites;
pub mod models;
pub mod provider;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::WeatherCache;
pub use config::AppConfig;
pub use connectivity::ConnectivityMonitor;
pub use dashboard::Dashboard;
pub use error::{Diagnostic, WeatherError};
pub use favorites::{AddOutcome, FavoritesAggregator, FavoritesState};
pub use models::{AirQuality, CurrentWeather, Forecast, UnitSystem, WeatherBundle};
pub use provider::{OpenWeatherProvider, WeatherProvider};
pub use session::{FetchOutcome, SessionPhase, SessionState, WeatherSession};
