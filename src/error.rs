use thiserror::Error;

use crate::transport::NetworkError;

/// Errors surfaced by the provider adapter and the session controller
#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Failed to fetch weather data: {0}")]
    Network(#[from] NetworkError),

    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("Invalid API response: {0}")]
    Provider(String),
}

/// Trait for errors that carry a stable diagnostic code
pub trait Diagnostic: std::error::Error {
    /// Stable code for programmatic handling (e.g., "CITY_NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether an automatic retry may succeed
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Diagnostic for WeatherError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK_ERROR",
            Self::CityNotFound(_) => "CITY_NOT_FOUND",
            Self::Provider(_) => "PROVIDER_ERROR",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Provider(_) => true,
            Self::CityNotFound(_) => false,
        }
    }
}

/// Log an error with its code.
///
/// Provider errors point at a contract mismatch with the upstream API and are
/// logged at error level; everything else is a warning.
pub fn report<E: Diagnostic>(err: &E, city: &str) {
    let code = err.error_code();
    let message = err.to_string();

    if code == "PROVIDER_ERROR" {
        tracing::error!(error = %message, code = code, city = %city, "Unexpected provider response");
    } else {
        tracing::warn!(
            error = %message,
            code = code,
            retryable = err.is_retryable(),
            city = %city,
            "Weather request failed"
        );
    }
}
