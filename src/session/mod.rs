//! The weather session: selected city, unit preference and the data shown for
//! them.
//!
//! Every action starts a new request generation. Only the latest generation
//! may write to the state; older cycles are dropped at their next await point,
//! which cancels their in-flight requests and any pending retry sleep.

mod state;

pub use state::{SessionPhase, SessionState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::WeatherCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{report, Diagnostic, WeatherError};
use crate::models::{UnitSystem, WeatherBundle};
use crate::provider::WeatherProvider;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Exponential backoff between whole-cycle retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl BackoffPolicy {
    /// `base_delay * 2^retry`, counting retries from zero
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    EmptyCity,
    Closed,
}

/// How an action ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Gated before any work; state unchanged
    Skipped(SkipReason),
    CacheHit,
    Fetched,
    /// A newer action took over before this one finished
    Superseded,
}

struct Inner {
    provider: Arc<dyn WeatherProvider>,
    cache: WeatherCache,
    connectivity: ConnectivityMonitor,
    backoff: BackoffPolicy,
    state: watch::Sender<SessionState>,
    generation: watch::Sender<u64>,
    closed: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

/// Handle to one dashboard session. Clones share the same session.
#[derive(Clone)]
pub struct WeatherSession {
    inner: Arc<Inner>,
}

impl WeatherSession {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        cache: WeatherCache,
        connectivity: ConnectivityMonitor,
        backoff: BackoffPolicy,
        city: impl Into<String>,
        units: UnitSystem,
    ) -> Self {
        let initial = SessionState::new(city, units, connectivity.is_online());
        let (state, _) = watch::channel(initial);
        let (generation, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                provider,
                cache,
                connectivity,
                backoff,
                state,
                generation,
                closed: AtomicBool::new(false),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Current snapshot
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Begin watching connectivity and load the initial city
    pub async fn start(&self) -> Result<FetchOutcome, WeatherError> {
        self.spawn_watcher();
        self.refresh().await
    }

    pub async fn search_city(&self, city: &str) -> Result<FetchOutcome, WeatherError> {
        let units = self.inner.state.borrow().units;
        self.fetch(city.to_string(), units).await
    }

    /// Re-run the cycle for the current city and units
    pub async fn refresh(&self) -> Result<FetchOutcome, WeatherError> {
        let (city, units) = {
            let state = self.inner.state.borrow();
            (state.current_city.clone(), state.units)
        };
        self.fetch(city, units).await
    }

    pub async fn toggle_unit(&self) -> Result<FetchOutcome, WeatherError> {
        let next = self.inner.state.borrow().units.toggled();
        self.set_units(next).await
    }

    /// Switch the unit system and load the current city in it.
    ///
    /// The switch always takes effect and supersedes any pending cycle, even
    /// when the fetch itself is gated.
    pub async fn set_units(&self, units: UnitSystem) -> Result<FetchOutcome, WeatherError> {
        if self.is_closed() {
            return Ok(FetchOutcome::Skipped(SkipReason::Closed));
        }

        let id = self.begin();
        let mut city = String::new();
        self.inner.state.send_modify(|state| {
            state.units = units;
            city = state.current_city.clone();
        });
        tracing::debug!(units = %units, "Unit system changed");

        if let Some(reason) = self.gate(&city) {
            self.inner.state.send_modify(SessionState::settle);
            return Ok(FetchOutcome::Skipped(reason));
        }
        self.run(id, &city, units).await
    }

    /// Stop the connectivity watcher and cancel any pending cycle.
    /// Later actions are skipped.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.begin();
        self.inner.state.send_modify(SessionState::settle);

        if let Some(handle) = self.inner.watcher.lock().ok().and_then(|mut w| w.take()) {
            handle.abort();
        }
        tracing::info!("Weather session shut down");
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn gate(&self, city: &str) -> Option<SkipReason> {
        if self.is_closed() {
            Some(SkipReason::Closed)
        } else if city.trim().is_empty() {
            Some(SkipReason::EmptyCity)
        } else if !self.inner.connectivity.is_online() {
            Some(SkipReason::Offline)
        } else {
            None
        }
    }

    async fn fetch(&self, city: String, units: UnitSystem) -> Result<FetchOutcome, WeatherError> {
        if let Some(reason) = self.gate(&city) {
            tracing::debug!(city = %city, reason = ?reason, "Fetch skipped");
            return Ok(FetchOutcome::Skipped(reason));
        }
        let id = self.begin();
        self.run(id, &city, units).await
    }

    /// Start a new generation; returns its id
    fn begin(&self) -> u64 {
        let mut id = 0;
        self.inner.generation.send_modify(|generation| {
            *generation += 1;
            id = *generation;
        });
        id
    }

    async fn run(&self, id: u64, city: &str, units: UnitSystem) -> Result<FetchOutcome, WeatherError> {
        let generation = self.inner.generation.subscribe();

        tokio::select! {
            biased;
            _ = superseded(generation, id) => {
                tracing::debug!(city = %city, request_id = id, "Fetch superseded");
                Ok(FetchOutcome::Superseded)
            }
            result = self.run_cycle(id, city, units) => result,
        }
    }

    async fn run_cycle(&self, id: u64, city: &str, units: UnitSystem) -> Result<FetchOutcome, WeatherError> {
        if let Some(bundle) = self.inner.cache.get(city, units) {
            self.apply_if_current(id, |state| state.show(city, units, bundle));
            return Ok(FetchOutcome::CacheHit);
        }

        let mut prior = None;
        self.apply_if_current(id, |state| {
            prior = Some((state.phase, state.error.take()));
            state.phase = SessionPhase::Loading;
        });

        let mut retry = 0;
        loop {
            let err = match self.fetch_bundle(city, units).await {
                Ok(bundle) => {
                    self.inner.cache.put(city, units, bundle.clone());
                    self.apply_if_current(id, |state| state.show(city, units, bundle));
                    tracing::info!(city = %city, units = %units, retries = retry, "Weather data loaded");
                    return Ok(FetchOutcome::Fetched);
                }
                Err(err) => err,
            };
            report(&err, city);

            if !err.is_retryable() {
                // The previous city stays on screen
                self.apply_if_current(id, |state| match prior {
                    Some((phase, error)) => state.restore(phase, error),
                    None => state.settle(),
                });
                return Err(err);
            }

            if retry < self.inner.backoff.max_retries {
                let delay = self.inner.backoff.delay_for(retry);
                retry += 1;
                metrics::counter!("weatherdash_session_retries_total").increment(1);
                tracing::info!(
                    city = %city,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying weather fetch"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let message = err.to_string();
            self.apply_if_current(id, |state| state.fail(message));
            return Err(err);
        }
    }

    async fn fetch_bundle(&self, city: &str, units: UnitSystem) -> Result<WeatherBundle, WeatherError> {
        let provider = &self.inner.provider;
        let (current, forecast, air_quality) = tokio::join!(
            provider.get_current_weather(city, units),
            provider.get_forecast(city, units),
            provider.get_air_quality(city),
        );

        Ok(WeatherBundle {
            current: current?,
            forecast: forecast?,
            air_quality,
        })
    }

    /// Apply `update` only while `id` is still the latest generation
    fn apply_if_current(&self, id: u64, update: impl FnOnce(&mut SessionState)) -> bool {
        let generation = self.inner.generation.borrow();
        if *generation != id {
            return false;
        }
        self.inner.state.send_modify(update);
        true
    }

    fn spawn_watcher(&self) {
        let Ok(mut watcher) = self.inner.watcher.lock() else {
            return;
        };
        if watcher.is_some() || self.is_closed() {
            return;
        }

        let mut online_rx = self.inner.connectivity.subscribe();
        let weak = Arc::downgrade(&self.inner);

        *watcher = Some(tokio::spawn(async move {
            while online_rx.changed().await.is_ok() {
                let online = *online_rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let session = WeatherSession { inner };

                session.inner.state.send_if_modified(|state| {
                    let changed = state.online != online;
                    state.online = online;
                    changed
                });

                if online {
                    tracing::info!("Back online, refreshing weather");
                    tokio::spawn(async move {
                        // Failures are already reported by the cycle
                        let _ = session.refresh().await;
                    });
                }
            }
        }));
    }
}

/// Resolves once the generation moves past `id`
pub(crate) async fn superseded(mut generation: watch::Receiver<u64>, id: u64) {
    let _ = generation.wait_for(|current| *current != id).await;
}
