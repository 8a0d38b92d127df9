use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{report, WeatherError};
use crate::models::{CurrentWeather, UnitSystem};
use crate::provider::WeatherProvider;
use crate::session::superseded;

/// Per-city slot in the favorites list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FavoriteEntry {
    pub loading: bool,
    pub weather: Option<CurrentWeather>,
    pub error: Option<String>,
}

/// Favorite cities in insertion order, unique by name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoritesState {
    pub units: UnitSystem,
    pub cities: IndexMap<String, FavoriteEntry>,
}

impl FavoritesState {
    pub fn names(&self) -> Vec<String> {
        self.cities.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

struct Inner {
    provider: Arc<dyn WeatherProvider>,
    state: watch::Sender<FavoritesState>,
    generation: watch::Sender<u64>,
}

/// Resolves current weather for every favorite, independently of the session
/// and its cache.
#[derive(Clone)]
pub struct FavoritesAggregator {
    inner: Arc<Inner>,
}

impl FavoritesAggregator {
    pub fn new(provider: Arc<dyn WeatherProvider>, units: UnitSystem) -> Self {
        let (state, _) = watch::channel(FavoritesState {
            units,
            cities: IndexMap::new(),
        });
        let (generation, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                provider,
                state,
                generation,
            }),
        }
    }

    pub fn state(&self) -> FavoritesState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoritesState> {
        self.inner.state.subscribe()
    }

    /// Replace the list and fetch every city concurrently.
    ///
    /// Duplicate names keep their first position. A later sync supersedes
    /// this one; its remaining requests are aborted.
    pub async fn sync<I, S>(&self, cities: I, units: UnitSystem)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.begin();

        let mut names = Vec::new();
        self.inner.state.send_modify(|state| {
            let mut next = IndexMap::new();
            for city in cities {
                let city = city.into();
                if next.contains_key(&city) {
                    continue;
                }
                let weather = state.cities.get(&city).and_then(|e| e.weather.clone());
                names.push(city.clone());
                next.insert(
                    city,
                    FavoriteEntry {
                        loading: true,
                        weather,
                        error: None,
                    },
                );
            }
            state.units = units;
            state.cities = next;
        });
        tracing::debug!(count = names.len(), units = %units, "Syncing favorites");

        let mut tasks = JoinSet::new();
        for city in names {
            let provider = self.inner.provider.clone();
            tasks.spawn(async move {
                let result = provider.get_current_weather(&city, units).await;
                (city, result)
            });
        }

        let cancelled = superseded(self.inner.generation.subscribe(), id);
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    tracing::debug!(request_id = id, "Favorites sync superseded");
                    return;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((city, result))) => self.apply(id, &city, result),
                    Some(Err(err)) => tracing::error!(error = %err, "Favorite fetch task failed"),
                    None => break,
                },
            }
        }
    }

    /// Refetch every favorite under the current unit system
    pub async fn refresh(&self) {
        let (names, units) = {
            let state = self.inner.state.borrow();
            (state.names(), state.units)
        };
        self.sync(names, units).await;
    }

    /// Re-sync every favorite under `units`
    pub async fn set_units(&self, units: UnitSystem) {
        let names = self.inner.state.borrow().names();
        self.sync(names, units).await;
    }

    /// Fetch the city and append it on success.
    ///
    /// Failures leave the list untouched and are returned to the caller. If
    /// the unit system changes while the request is in flight, the city is
    /// fetched again so its entry matches the rest of the list.
    pub async fn add_favorite(&self, name: &str) -> Result<AddOutcome, WeatherError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WeatherError::CityNotFound(name.to_string()));
        }

        let mut units = {
            let state = self.inner.state.borrow();
            if state.cities.contains_key(name) {
                return Ok(AddOutcome::AlreadyPresent);
            }
            state.units
        };

        loop {
            let weather = match self.inner.provider.get_current_weather(name, units).await {
                Ok(weather) => weather,
                Err(err) => {
                    report(&err, name);
                    return Err(err);
                }
            };

            let mut outcome = None;
            self.inner.state.send_if_modified(|state| {
                if state.cities.contains_key(name) {
                    outcome = Some(AddOutcome::AlreadyPresent);
                    return false;
                }
                if state.units != units {
                    units = state.units;
                    return false;
                }
                state.cities.insert(
                    name.to_string(),
                    FavoriteEntry {
                        loading: false,
                        weather: Some(weather),
                        error: None,
                    },
                );
                outcome = Some(AddOutcome::Added);
                true
            });

            match outcome {
                Some(AddOutcome::Added) => {
                    tracing::info!(city = %name, "Favorite added");
                    return Ok(AddOutcome::Added);
                }
                Some(outcome) => return Ok(outcome),
                None => {
                    tracing::debug!(city = %name, units = %units, "Units changed while adding, fetching again");
                }
            }
        }
    }

    /// Returns whether the city was in the list
    pub fn remove_favorite(&self, name: &str) -> bool {
        let removed = self
            .inner
            .state
            .send_if_modified(|state| state.cities.shift_remove(name).is_some());
        if removed {
            tracing::info!(city = %name, "Favorite removed");
        }
        removed
    }

    /// Cancel any running sync; entries it was loading keep their last data
    pub fn shutdown(&self) {
        self.begin();
        self.inner.state.send_if_modified(|state| {
            let mut changed = false;
            for entry in state.cities.values_mut().filter(|e| e.loading) {
                entry.loading = false;
                changed = true;
            }
            changed
        });
        tracing::debug!("Favorites sync stopped");
    }

    fn begin(&self) -> u64 {
        let mut id = 0;
        self.inner.generation.send_modify(|generation| {
            *generation += 1;
            id = *generation;
        });
        id
    }

    fn apply(&self, id: u64, city: &str, result: Result<CurrentWeather, WeatherError>) {
        if let Err(err) = &result {
            metrics::counter!("weatherdash_favorite_failures_total").increment(1);
            report(err, city);
        }

        let generation = self.inner.generation.borrow();
        if *generation != id {
            return;
        }
        self.inner.state.send_if_modified(|state| {
            // Removed while the request was in flight
            let Some(entry) = state.cities.get_mut(city) else {
                return false;
            };
            entry.loading = false;
            match result {
                Ok(weather) => {
                    entry.weather = Some(weather);
                    entry.error = None;
                }
                Err(err) => {
                    entry.weather = None;
                    entry.error = Some(err.to_string());
                }
            }
            true
        });
    }
}
