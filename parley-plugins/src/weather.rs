//! Weather plugin backed by the OpenWeatherMap current-weather API.
//!
//! Responses are cached per location and unit for an hour to keep API
//! usage down.

use crate::traits::{required_str, Plugin, PluginSchema};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const CACHE_TTL: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// "lat,lon" coordinate form, passed to the API unchanged.
static COORDINATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+\.?\d*,-?\d+\.?\d*$").unwrap());

fn api_units(units: &str) -> Option<&'static str> {
    match units {
        "celsius" => Some("metric"),
        "fahrenheit" => Some("imperial"),
        "kelvin" => Some("standard"),
        _ => None,
    }
}

/// Cache occupancy snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub cache_ttl_seconds: u64,
}

/// Plugin fetching current weather for a city or coordinate pair.
pub struct WeatherPlugin {
    api_key: String,
    base_url: String,
    default_units: String,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, (Value, Instant)>>,
}

impl WeatherPlugin {
    /// Create a plugin talking to the production API.
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a plugin against an alternate endpoint (used by tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("weather plugin requires an API key");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: base_url.into(),
            default_units: "celsius".to_string(),
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Change the unit used when the caller does not pass one.
    pub fn with_default_units(mut self, units: impl Into<String>) -> anyhow::Result<Self> {
        let units = units.into();
        if api_units(&units).is_none() {
            anyhow::bail!("unsupported temperature units: {units}");
        }
        self.default_units = units;
        Ok(self)
    }

    fn normalize_location(location: &str) -> String {
        let compact: String = location.chars().filter(|c| !c.is_whitespace()).collect();
        if COORDINATES.is_match(&compact) {
            compact
        } else {
            location.trim().to_string()
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.lock().unwrap();
        match cache.get(key) {
            Some((value, stored)) if stored.elapsed() < CACHE_TTL => Some(value.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, value: Value) {
        self.cache.lock().unwrap().insert(key, (value, Instant::now()));
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
        tracing::info!("Weather cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap();
        let valid = cache
            .values()
            .filter(|(_, stored)| stored.elapsed() < CACHE_TTL)
            .count();
        CacheStats {
            total_entries: cache.len(),
            valid_entries: valid,
            expired_entries: cache.len() - valid,
            cache_ttl_seconds: CACHE_TTL.as_secs(),
        }
    }

    async fn fetch(&self, location: &str, units: &str) -> anyhow::Result<Value> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", location),
                ("appid", &self.api_key),
                ("units", api_units(units).unwrap_or("metric")),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("weather request failed: {e}"))?;

        match response.status().as_u16() {
            200 => {}
            401 => anyhow::bail!("invalid API key"),
            404 => anyhow::bail!("location not found: {location}"),
            status => anyhow::bail!("weather API returned status {status}"),
        }

        let data: Value = response.json().await?;
        Self::parse_response(&data, location, units)
    }

    fn parse_response(data: &Value, location: &str, units: &str) -> anyhow::Result<Value> {
        let main = data
            .get("main")
            .ok_or_else(|| anyhow::anyhow!("malformed weather response: missing main"))?;
        let temperature = main
            .get("temp")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("malformed weather response: missing temp"))?;
        let humidity = main.get("humidity").and_then(Value::as_u64).unwrap_or(0);
        let description = data["weather"][0]["description"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        let wind_speed = data["wind"]["speed"].as_f64().unwrap_or(0.0);

        Ok(json!({
            "location": data.get("name").and_then(Value::as_str).unwrap_or(location),
            "temperature": (temperature * 10.0).round() / 10.0,
            "description": description,
            "humidity": humidity,
            "wind_speed": (wind_speed * 10.0).round() / 10.0,
            "units": units,
        }))
    }
}

#[async_trait]
impl Plugin for WeatherPlugin {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Provides current weather conditions via the OpenWeatherMap API"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, context: &Value) -> anyhow::Result<Value> {
        let location = required_str(context, "location")?;
        let units = context
            .get("units")
            .and_then(Value::as_str)
            .filter(|u| api_units(u).is_some())
            .unwrap_or(&self.default_units)
            .to_string();

        let location = Self::normalize_location(location);
        let cache_key = format!("{location}:{units}");

        if let Some(cached) = self.cached(&cache_key) {
            tracing::info!(%location, "Weather served from cache");
            return Ok(cached);
        }

        tracing::debug!(%location, %units, "Fetching weather");
        let result = self.fetch(&location, &units).await?;
        self.store(cache_key, result.clone());

        tracing::info!(%location, temperature = %result["temperature"], "Weather fetched");
        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.clear_cache();
        Ok(())
    }

    fn schema(&self) -> anyhow::Result<PluginSchema> {
        Ok(PluginSchema {
            name: "get_weather".to_string(),
            description: "Gets current weather for a location. Accepts a city \
                          name or 'latitude,longitude' coordinates."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "Location to query, e.g. 'Oslo' or '59.91,10.75'"
                    },
                    "units": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit", "kelvin"],
                        "description": "Temperature units (default: celsius)",
                        "default": "celsius"
                    }
                },
                "required": ["location"]
            }),
        })
    }
}
