//! Address geocoding against Nominatim.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transform::clean_text;
use crate::config::ImportConfig;
use crate::error::Result;
use crate::metrics;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Coordinates for `address`, `None` when nothing usable was found.
    /// `label` only identifies the restaurant in logs.
    async fn geocode(&self, address: &str, label: &str) -> Option<(f64, f64)>;
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

pub struct NominatimGeocoder {
    http: Client,
    url: String,
    user_agent: String,
    max_retries: u32,
    throttle: Duration,
}

impl NominatimGeocoder {
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            url: config.geocoder_url.clone(),
            user_agent: config.geocoder_user_agent.clone(),
            max_retries: config.geocoder_max_retries.max(1),
            throttle: Duration::from_millis(config.geocoder_throttle_ms),
        })
    }

    async fn attempt(&self, query: &str) -> Result<Option<(f64, f64)>> {
        metrics::geocoding::request();
        let places: Vec<Place> = self
            .http
            .get(&self.url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(places.first().and_then(|p| {
            let lat: f64 = p.lat.parse().ok()?;
            let lon: f64 = p.lon.parse().ok()?;
            (lat != 0.0 && lon != 0.0).then_some((lat, lon))
        }))
    }
}

/// Paris is appended when the address does not name it.
pub fn geocoding_query(address: &str) -> Option<String> {
    let address = clean_text(address);
    if address.is_empty() {
        return None;
    }
    if address.to_lowercase().contains("paris") {
        Some(address)
    } else {
        Some(format!("{}, Paris, France", address))
    }
}

/// Wait before retry `attempt` (1-based): 1 s, 2 s, 4 s ... capped at 10 s.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt.saturating_sub(1)).min(10))
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str, label: &str) -> Option<(f64, f64)> {
        let query = geocoding_query(address)?;
        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            debug!(restaurant = label, attempt, "Geocoding '{}'", query);
            match self.attempt(&query).await {
                Ok(Some(coords)) => {
                    info!(restaurant = label, lat = coords.0, lon = coords.1, "Geocoded");
                    tokio::time::sleep(self.throttle).await;
                    return Some(coords);
                }
                Ok(None) => {
                    warn!(restaurant = label, attempt, "No usable geocoding result for '{}'", query);
                }
                Err(e) => {
                    warn!(restaurant = label, attempt, "Geocoding request failed: {}", e);
                }
            }
        }
        metrics::geocoding::failure();
        warn!(restaurant = label, "Geocoding gave up after {} attempts", self.max_retries);
        None
    }
}

/// Fixed answers keyed by cleaned address; records every lookup.
#[derive(Clone, Default)]
pub struct MemoryGeocoder {
    places: Arc<Mutex<HashMap<String, (f64, f64)>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryGeocoder {
    pub fn insert(&self, address: &str, coords: (f64, f64)) {
        self.places
            .lock()
            .unwrap()
            .insert(clean_text(address), coords);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for MemoryGeocoder {
    async fn geocode(&self, address: &str, _label: &str) -> Option<(f64, f64)> {
        let address = clean_text(address);
        self.calls.lock().unwrap().push(address.clone());
        self.places.lock().unwrap().get(&address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_appends_paris_when_missing() {
        assert_eq!(
            geocoding_query("12 rue Oberkampf").as_deref(),
            Some("12 rue Oberkampf, Paris, France")
        );
        assert_eq!(
            geocoding_query("12 rue Oberkampf 75011 PARIS").as_deref(),
            Some("12 rue Oberkampf 75011 PARIS")
        );
        assert_eq!(geocoding_query("  "), None);
    }

    #[test]
    fn retry_delay_doubles_up_to_ten_seconds() {
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(6), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn memory_geocoder_records_lookups() {
        let geocoder = MemoryGeocoder::default();
        geocoder.insert("1 rue A", (48.8, 2.3));
        assert_eq!(geocoder.geocode("1 rue A ", "A").await, Some((48.8, 2.3)));
        assert_eq!(geocoder.geocode("2 rue B", "B").await, None);
        assert_eq!(geocoder.calls().len(), 2);
    }
}
