use std::sync::Arc;

use anyhow::Context;
use reqwest::Url;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weatherdash::cache::{create_geo_cache, WeatherCache};
use weatherdash::connectivity::{spawn_probe, ConnectivityMonitor};
use weatherdash::transport::{build_http_client, HttpTransport, ReqwestBackend};
use weatherdash::{
    AppConfig, Dashboard, FavoritesState, OpenWeatherProvider, SessionState, WeatherError,
};

/// What gets printed on every change
#[derive(Serialize)]
struct Snapshot<'a> {
    session: &'a SessionState,
    favorites: &'a FavoritesState,
}

fn print_snapshot(session: &SessionState, favorites: &FavoritesState) {
    match serde_json::to_string_pretty(&Snapshot { session, favorites }) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "Failed to serialize snapshot"),
    }
}

fn log_action(result: Result<weatherdash::FetchOutcome, WeatherError>) {
    match result {
        Ok(outcome) => tracing::debug!(outcome = ?outcome, "Dashboard action finished"),
        Err(WeatherError::CityNotFound(city)) => {
            tracing::warn!(city = %city, "City not found, keeping previous city")
        }
        // Other failures are already on the session state
        Err(_) => {}
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping dashboard");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weatherdash=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = AppConfig::load()?;
    tracing::info!("Configuration loaded successfully");

    let city = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.default_city.clone());

    // Shared HTTP client with connection pooling
    let http_client = build_http_client().context("Failed to create HTTP client")?;
    let transport = HttpTransport::new(
        Arc::new(ReqwestBackend::new(http_client)),
        config.retry_policy(),
    );

    let base_url = Url::parse(&config.api_base_url)
        .with_context(|| format!("Invalid api_base_url: {}", config.api_base_url))?;
    let provider = Arc::new(OpenWeatherProvider::new(
        transport,
        base_url,
        config.api_key().unwrap_or_default(),
        create_geo_cache(),
    ));

    // Connectivity starts optimistic; the probe corrects it within one interval
    let connectivity = ConnectivityMonitor::new(true);
    let probe = spawn_probe(connectivity.clone(), config.probe_config());

    let dashboard = Dashboard::new(
        provider,
        WeatherCache::new(config.cache_ttl()),
        connectivity,
        config.backoff_policy(),
        city.clone(),
        config.units,
    );
    tracing::info!(city = %city, units = %config.units, "Starting dashboard");

    let mut session_rx = dashboard.session().subscribe();
    let mut favorites_rx = dashboard.favorites().subscribe();

    let startup = dashboard.clone();
    let favorites = config.favorites.clone();
    tokio::spawn(async move {
        log_action(startup.start(&favorites).await);
    });

    let mut refresh = tokio::time::interval(config.cache_ttl());
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately and startup already loads everything
    refresh.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = refresh.tick() => {
                let dashboard = dashboard.clone();
                tokio::spawn(async move {
                    log_action(dashboard.refresh().await);
                });
            }
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = session_rx.borrow_and_update().clone();
                print_snapshot(&session, &favorites_rx.borrow());
            }
            changed = favorites_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let favorites = favorites_rx.borrow_and_update().clone();
                print_snapshot(&session_rx.borrow(), &favorites);
            }
        }
    }

    dashboard.shutdown();
    probe.abort();
    tracing::info!("Dashboard shutdown complete");

    Ok(())
}
