//! OpenWeatherMap-compatible provider client.
//!
//! Only the fields the tool consumes are decoded; anything missing falls back
//! to a default so partial payloads still render. A body that is not JSON at
//! all is an upstream error.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Location, Units};
use crate::core::config::WeatherConfig;
use crate::domains::tools::definitions::outbound::{http_client, request_error, status_error};
use crate::domains::tools::error::ExecutionError;

const SERVICE: &str = "weather provider";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Condition {
    pub main: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MainReadings {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Wind {
    pub speed: f64,
    pub deg: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Clouds {
    pub all: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Sys {
    pub country: String,
}

/// `/weather` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrentWeather {
    pub coord: Coord,
    pub weather: Vec<Condition>,
    pub main: MainReadings,
    pub visibility: Option<f64>,
    pub wind: Wind,
    pub clouds: Clouds,
    pub dt: i64,
    pub sys: Sys,
    /// Offset from UTC in seconds.
    pub timezone: i32,
    pub name: String,
}

/// One three-hour `/forecast` period.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForecastItem {
    pub dt: i64,
    pub main: MainReadings,
    pub weather: Vec<Condition>,
    pub wind: Wind,
    /// Probability of precipitation, 0..1.
    pub pop: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForecastCity {
    pub name: String,
    pub coord: Coord,
    pub country: String,
    pub timezone: i32,
}

/// `/forecast` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Forecast {
    pub list: Vec<ForecastItem>,
    pub city: ForecastCity,
}

/// HTTP client for the weather provider.
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl WeatherProvider {
    pub fn new(config: &WeatherConfig) -> Self {
        Self {
            http: http_client(config.request_timeout()),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn current(
        &self,
        location: &Location,
        units: Units,
    ) -> Result<CurrentWeather, ExecutionError> {
        self.fetch("weather", location, units).await
    }

    pub async fn forecast(&self, location: &Location, units: Units) -> Result<Forecast, ExecutionError> {
        self.fetch("forecast", location, units).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        resource: &str,
        location: &Location,
        units: Units,
    ) -> Result<T, ExecutionError> {
        let api_key = self.api_key.as_deref().ok_or_else(missing_api_key)?;
        let url = format!("{}/{}", self.endpoint, resource);

        let mut query: Vec<(&str, String)> = match location {
            Location::City(name) => vec![("q", name.clone())],
            Location::Coordinates { lat, lon } => {
                vec![("lat", format!("{:.4}", lat)), ("lon", format!("{:.4}", lon))]
            }
        };
        query.push(("appid", api_key.to_string()));
        query.push(("units", units.as_str().to_string()));

        debug!("Fetching {} for {}", resource, location);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(SERVICE, &e))?;

        if !status.is_success() {
            return Err(status_error(SERVICE, status, &body));
        }

        parse_payload(&body)
    }
}

/// Decode a provider payload. Never panics on malformed input.
pub fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T, ExecutionError> {
    serde_json::from_str(body).map_err(|e| {
        ExecutionError::upstream(format!("failed to parse weather response: {}", e), false)
    })
}

pub fn missing_api_key() -> ExecutionError {
    ExecutionError::upstream(
        "OpenWeatherMap API key not configured. Please set the OPENWEATHER_API_KEY environment variable. Get a free API key at https://openweathermap.org/api",
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::ExecutionErrorKind;

    #[test]
    fn test_partial_payload_decodes() {
        let current: CurrentWeather = parse_payload(r#"{"name":"London","main":{"temp":12.5}}"#).unwrap();
        assert_eq!(current.name, "London");
        assert_eq!(current.main.temp, 12.5);
        assert!(current.weather.is_empty());
    }

    #[test]
    fn test_malformed_payload() {
        let err = parse_payload::<CurrentWeather>("not json").unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(!err.retryable);

        let err = parse_payload::<Forecast>(r#"{"list": "nope"}"#).unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
    }

    #[tokio::test]
    async fn test_missing_key_names_variable() {
        let provider = WeatherProvider::new(&WeatherConfig::default());
        let err = provider
            .current(&Location::City("London".to_string()), Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(err.message.contains("OPENWEATHER_API_KEY"));
    }
}
