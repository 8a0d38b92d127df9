use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{Coordinates, UnitSystem, WeatherBundle};

/// Freshness window for dashboard data
pub const WEATHER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Freshness window for geocoded coordinates
pub const GEO_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A thread-safe cache with TTL (time-to-live) support.
///
/// Expiry is lazy: a stale entry is reported as absent but stays in the map
/// until the key is written again.
pub struct TtlCache<K, V> {
    data: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new cache with the specified TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
        }
    }

    /// Get a value from the cache if it exists and is younger than the TTL
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.data.get(key)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Insert a value, replacing any previous entry and restarting its clock
    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.data.insert(key, entry);
    }

    /// Get the number of entries in the cache (including expired ones)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Memoizes full dashboard bundles per (city, unit system).
///
/// The key is the raw city string joined with the Celsius flag, so
/// "new york" and "New York" are cached separately.
#[derive(Clone)]
pub struct WeatherCache {
    inner: Arc<TtlCache<String, WeatherBundle>>,
}

impl WeatherCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(TtlCache::new(ttl)),
        }
    }

    pub fn get(&self, city: &str, units: UnitSystem) -> Option<WeatherBundle> {
        let hit = self.inner.get(&cache_key(city, units));
        if hit.is_some() {
            metrics::counter!("weatherdash_cache_hits_total").increment(1);
            tracing::debug!(city = %city, units = %units, "Weather cache hit");
        } else {
            metrics::counter!("weatherdash_cache_misses_total").increment(1);
            tracing::debug!(city = %city, units = %units, "Weather cache miss");
        }
        hit
    }

    pub fn put(&self, city: &str, units: UnitSystem, bundle: WeatherBundle) {
        self.inner.insert(cache_key(city, units), bundle);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for WeatherCache {
    fn default() -> Self {
        Self::new(WEATHER_CACHE_TTL)
    }
}

/// Cache key for dashboard data: no normalization of the city
pub fn cache_key(city: &str, units: UnitSystem) -> String {
    format!("{}-{}", city, units.is_celsius())
}

/// Geocoding cache for storing location lookups
pub type GeoCache = Arc<TtlCache<String, Coordinates>>;

/// Create a geocoding cache with 24-hour TTL
pub fn create_geo_cache() -> GeoCache {
    Arc::new(TtlCache::new(GEO_CACHE_TTL))
}

/// Normalize a location string for the geocoding cache key
/// Converts to lowercase and trims whitespace
pub fn normalize_cache_key(location: &str) -> String {
    location.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_bundle;

    #[test]
    fn test_cache_insert_and_get() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(60));
        cache.insert("key".to_string(), "value".to_string());
        assert_eq!(cache.get(&"key".to_string()), Some("value".to_string()));
    }

    #[test]
    fn test_cache_miss() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(&"missing".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_boundary() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_millis(300_000));
        cache.insert("key".to_string(), "value".to_string());

        tokio::time::advance(Duration::from_millis(299_999)).await;
        assert_eq!(cache.get(&"key".to_string()), Some("value".to_string()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"key".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_kept_until_overwritten() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(1));
        cache.insert("key".to_string(), "old".to_string());
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.get(&"key".to_string()), None);
        assert_eq!(cache.len(), 1);

        cache.insert("key".to_string(), "new".to_string());
        assert_eq!(cache.get(&"key".to_string()), Some("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weather_cache_absent_one_ms_after_ttl() {
        let cache = WeatherCache::default();
        cache.put("Berlin", UnitSystem::Metric, sample_bundle("Berlin"));

        tokio::time::advance(WEATHER_CACHE_TTL + Duration::from_millis(1)).await;

        assert!(cache.get("Berlin", UnitSystem::Metric).is_none());
    }

    #[test]
    fn test_weather_cache_returns_identical_bundle() {
        let cache = WeatherCache::default();
        let bundle = sample_bundle("Lisbon");
        cache.put("Lisbon", UnitSystem::Metric, bundle.clone());

        let hit = cache.get("Lisbon", UnitSystem::Metric).unwrap();
        assert_eq!(hit, bundle);
        assert_eq!(
            serde_json::to_vec(&hit).unwrap(),
            serde_json::to_vec(&bundle).unwrap()
        );
    }

    #[test]
    fn test_weather_cache_keys_are_unit_and_case_sensitive() {
        let cache = WeatherCache::default();
        cache.put("New York", UnitSystem::Metric, sample_bundle("New York"));

        assert!(cache.get("New York", UnitSystem::Imperial).is_none());
        assert!(cache.get("new york", UnitSystem::Metric).is_none());
        assert!(cache.get("New York", UnitSystem::Metric).is_some());
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("Pune", UnitSystem::Metric), "Pune-true");
        assert_eq!(cache_key("Pune", UnitSystem::Imperial), "Pune-false");
    }

    #[test]
    fn test_normalize_cache_key() {
        assert_eq!(normalize_cache_key("  Chicago  "), "chicago");
        assert_eq!(normalize_cache_key("NEW YORK"), "new york");
        assert_eq!(normalize_cache_key("London,GB"), "london,gb");
    }
}
