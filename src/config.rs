use std::time::Duration;

use config::builder::DefaultState;
use config::{Case, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::connectivity::ProbeConfig;
use crate::models::UnitSystem;
use crate::provider::DEFAULT_API_BASE_URL;
use crate::session::{BackoffPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::transport::{
    RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_MS,
};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// OpenWeatherMap API key (optional - requests are rejected upstream without one)
    #[serde(default)]
    pub openweathermap_api_key: Option<String>,

    /// Provider root, e.g. https://api.openweathermap.org
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// City shown when none is given on the command line
    #[serde(default = "default_city")]
    pub default_city: String,

    /// Temperature units: metric or imperial
    #[serde(default)]
    pub units: UnitSystem,

    /// Favorite cities, in display order
    #[serde(default = "default_favorites")]
    pub favorites: Vec<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

/// Per-request transport settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Session retry and cache settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            cache_ttl_secs: 300,
        }
    }
}

/// Reachability probe used by the binary
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// host:port opened over TCP
    pub probe_address: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_address: "api.openweathermap.org:443".to_string(),
            probe_interval_secs: 30,
            probe_timeout_ms: 3000,
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_city() -> String {
    "Pune".to_string()
}

fn default_favorites() -> Vec<String> {
    vec!["Pune".to_string(), "Mumbai".to_string(), "Delhi".to_string()]
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let builder = Config::builder()
            // Load from config file if present
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config.local").required(false))
            // Override with environment variables (prefixed with WEATHERDASH_)
            // Convert SCREAMING_SNAKE_CASE env vars to snake_case config keys
            .add_source(
                Environment::with_prefix("WEATHERDASH")
                    .prefix_separator("_")
                    .separator("__")
                    .convert_case(Case::Snake)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("favorites"),
            );

        Self::from_builder(builder)
    }

    /// Build from explicit sources; `load` layers files and environment on top
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;

        if config.api_key().is_none() {
            tracing::warn!("WEATHERDASH_OPENWEATHERMAP_API_KEY is not set; provider requests will be rejected");
        }
        Ok(config)
    }

    /// The API key, if set to something other than blanks
    pub fn api_key(&self) -> Option<&str> {
        self.openweathermap_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.http.max_attempts.max(1),
            timeout: Duration::from_millis(self.http.timeout_ms),
            retry_delay: Duration::from_millis(self.http.retry_delay_ms),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.session.max_retries,
            base_delay: Duration::from_millis(self.session.retry_base_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session.cache_ttl_secs)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            address: self.connectivity.probe_address.clone(),
            interval: Duration::from_secs(self.connectivity.probe_interval_secs.max(1)),
            timeout: Duration::from_millis(self.connectivity.probe_timeout_ms),
        }
    }
}
