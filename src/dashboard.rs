use std::sync::Arc;

use crate::cache::WeatherCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::WeatherError;
use crate::favorites::{AddOutcome, FavoritesAggregator};
use crate::models::UnitSystem;
use crate::provider::WeatherProvider;
use crate::session::{BackoffPolicy, FetchOutcome, WeatherSession};

/// The selected-city session plus the favorites list, sharing one provider
/// and one unit preference.
#[derive(Clone)]
pub struct Dashboard {
    session: WeatherSession,
    favorites: FavoritesAggregator,
}

impl Dashboard {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        cache: WeatherCache,
        connectivity: ConnectivityMonitor,
        backoff: BackoffPolicy,
        city: impl Into<String>,
        units: UnitSystem,
    ) -> Self {
        Self {
            favorites: FavoritesAggregator::new(provider.clone(), units),
            session: WeatherSession::new(provider, cache, connectivity, backoff, city, units),
        }
    }

    pub fn session(&self) -> &WeatherSession {
        &self.session
    }

    pub fn favorites(&self) -> &FavoritesAggregator {
        &self.favorites
    }

    /// Load the initial city and the favorites side by side
    pub async fn start(&self, favorites: &[String]) -> Result<FetchOutcome, WeatherError> {
        let units = self.session.state().units;
        let (outcome, _) = tokio::join!(
            self.session.start(),
            self.favorites.sync(favorites.iter().cloned(), units),
        );
        outcome
    }

    pub async fn search_city(&self, city: &str) -> Result<FetchOutcome, WeatherError> {
        self.session.search_city(city).await
    }

    /// Flip the unit system for the session and every favorite
    pub async fn toggle_unit(&self) -> Result<FetchOutcome, WeatherError> {
        let next = self.session.state().units.toggled();
        let (outcome, _) = tokio::join!(self.session.set_units(next), self.favorites.set_units(next));
        outcome
    }

    pub async fn refresh(&self) -> Result<FetchOutcome, WeatherError> {
        let (outcome, _) = tokio::join!(self.session.refresh(), self.favorites.refresh());
        outcome
    }

    pub async fn add_favorite(&self, name: &str) -> Result<AddOutcome, WeatherError> {
        self.favorites.add_favorite(name).await
    }

    pub fn remove_favorite(&self, name: &str) -> bool {
        self.favorites.remove_favorite(name)
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
        self.favorites.shutdown();
    }
}
