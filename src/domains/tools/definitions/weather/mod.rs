//! Weather tool definition.
//!
//! Current conditions or a 5-day forecast from an OpenWeatherMap-compatible
//! provider. Without an explicit location the caller's IP is geolocated first.

pub mod format;
pub mod provider;
pub mod report;

use std::fmt;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use self::provider::{WeatherProvider, missing_api_key};
use self::report::WeatherReport;
use super::geolocation::GeolocationClient;
use crate::core::config::{GeolocationConfig, WeatherConfig};
use crate::domains::tools::cancellation::CancellationSignal;
use crate::domains::tools::contract::{
    Arguments, InvocationContext, Tool, ToolDescriptor, ToolOutput, decode_validated, describe,
    parse_arguments, to_arguments,
};
use crate::domains::tools::error::{ExecutionError, ValidationError};

const MAX_LOCATION_LEN: usize = 200;

/// Location substrings that imply US customary units.
const US_INDICATORS: [&str; 4] = [",US", ", US", "USA", "UNITED STATES"];

/// State codes recognised after a comma or space.
const US_STATES: [&str; 10] = ["CA", "NY", "TX", "FL", "IL", "PA", "OH", "GA", "NC", "MI"];

// ============================================================================
// Tool Parameters
// ============================================================================

/// Measurement system for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Celsius, m/s, hPa.
    Metric,
    /// Fahrenheit, mph, inHg.
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    pub fn temperature_symbol(&self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }

    pub fn speed_unit(&self) -> &'static str {
        match self {
            Self::Metric => "m/s",
            Self::Imperial => "mph",
        }
    }

    /// Guess units from a free-form location: US places use imperial.
    pub fn for_location(location: &str) -> Self {
        let upper = location.to_uppercase();

        if upper.contains("CANADA") {
            return Self::Metric;
        }
        if US_INDICATORS.iter().any(|i| upper.contains(i)) {
            return Self::Imperial;
        }
        let has_state = US_STATES.iter().any(|state| {
            [',', ' ']
                .iter()
                .any(|sep| upper.contains(&format!("{}{}", sep, state)))
        });
        if has_state {
            return Self::Imperial;
        }
        Self::Metric
    }

    pub fn for_country_code(code: &str) -> Self {
        if code.eq_ignore_ascii_case("US") {
            Self::Imperial
        } else {
            Self::Metric
        }
    }
}

/// Where to report weather for.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    City(String),
    Coordinates { lat: f64, lon: f64 },
}

impl Location {
    /// `"lat,lon"` when both parts are numbers, otherwise a place name.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if let Some((lat, lon)) = raw.split_once(',') {
            if let (Ok(lat), Ok(lon)) = (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(ValidationError::field(
                        "location",
                        "coordinates out of range (lat -90..90, lon -180..180)",
                    ));
                }
                return Ok(Self::Coordinates { lat, lon });
            }
        }
        Ok(Self::City(raw.to_string()))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::City(name) => f.write_str(name),
            Self::Coordinates { lat, lon } => write!(f, "{:.4},{:.4}", lat, lon),
        }
    }
}

/// Parameters for the weather tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WeatherParams {
    /// City name or coordinates.
    #[schemars(
        description = "City name (e.g. 'London' or 'New York,US') or coordinates ('40.7128,-74.0060'). Uses the caller's IP location when omitted."
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Return a 5-day forecast instead of current conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<bool>,

    /// Units; derived from the location when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
}

// ============================================================================
// Tool Definition
// ============================================================================

/// Weather tool - current conditions and forecasts.
pub struct WeatherTool {
    descriptor: ToolDescriptor,
    provider: WeatherProvider,
    geolocation: GeolocationClient,
}

impl WeatherTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "weather";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Get current weather or a 5-day forecast (set 'forecast': true) for a location. Accepts a city name or 'lat,lon' coordinates; uses the caller's IP location when no location is given.";

    pub fn new(config: WeatherConfig, geolocation: GeolocationConfig) -> Self {
        let provider = WeatherProvider::new(&config);
        Self {
            descriptor: describe::<WeatherParams, WeatherReport>(Self::NAME, Self::DESCRIPTION),
            geolocation: GeolocationClient::new(geolocation, provider.http().clone()),
            provider,
        }
    }

    /// Resolve the location, the units and the label the caller asked for.
    async fn resolve(
        &self,
        params: &WeatherParams,
        context: &InvocationContext,
    ) -> Result<(Location, Units, Option<String>), ExecutionError> {
        if let Some(raw) = &params.location {
            let location = Location::parse(raw)
                .map_err(|e| ExecutionError::internal(format!("validated location rejected: {}", e)))?;
            let units = params.units.unwrap_or_else(|| Units::for_location(raw));
            return Ok((location, units, Some(raw.clone())));
        }

        let ip = context.client_ip.as_deref().ok_or_else(|| {
            ExecutionError::invalid_target(
                "could not determine client IP address and no location provided",
            )
        })?;
        let data = self.geolocation.lookup(ip).await?;
        debug!("Client {} geolocated to {}", ip, data.place());
        let units = params
            .units
            .unwrap_or_else(|| Units::for_country_code(&data.country_code));
        Ok((
            Location::Coordinates {
                lat: data.lat,
                lon: data.lon,
            },
            units,
            Some(data.place()),
        ))
    }

    async fn report(
        &self,
        params: &WeatherParams,
        context: &InvocationContext,
    ) -> Result<(String, WeatherReport), ExecutionError> {
        let (location, units, requested) = self.resolve(params, context).await?;

        if params.forecast.unwrap_or(false) {
            let data = self.provider.forecast(&location, units).await?;
            let report = WeatherReport::from_forecast(data, requested.as_deref(), units);
            Ok((format::forecast_markdown(&report), report))
        } else {
            let data = self.provider.current(&location, units).await?;
            let report = WeatherReport::from_current(data, requested.as_deref(), units);
            Ok((format::current_markdown(&report), report))
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn validate(&self, arguments: Arguments) -> Result<Arguments, ValidationError> {
        let mut params: WeatherParams = parse_arguments(&arguments)?;

        params.location = match params.location.take() {
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.len() > MAX_LOCATION_LEN {
                    return Err(ValidationError::field(
                        "location",
                        format!("location longer than {} characters", MAX_LOCATION_LEN),
                    ));
                }
                if trimmed.is_empty() {
                    None
                } else {
                    Location::parse(trimmed)?;
                    Some(trimmed.to_string())
                }
            }
            None => None,
        };

        to_arguments(&params)
    }

    #[instrument(skip_all, fields(tool = "weather"))]
    async fn execute(
        &self,
        arguments: Arguments,
        context: &InvocationContext,
        cancel: CancellationSignal,
    ) -> Result<ToolOutput, ExecutionError> {
        let params: WeatherParams = decode_validated(arguments)?;
        if !self.provider.has_api_key() {
            return Err(missing_api_key());
        }

        let (summary, report) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ExecutionError::cancelled("weather lookup cancelled"));
            }
            result = self.report(&params, context) => result?,
        };

        ToolOutput::new(summary, &report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::ExecutionErrorKind;
    use crate::domains::tools::definitions::geolocation::tests::sample_payload;
    use serde_json::{Value, json};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn current_payload() -> Value {
        json!({
            "coord": { "lon": -0.1257, "lat": 51.5085 },
            "weather": [{ "main": "Rain", "description": "light rain" }],
            "main": { "temp": 9.5, "feels_like": 7.0, "temp_min": 8.0, "temp_max": 11.0, "pressure": 1004, "humidity": 90 },
            "visibility": 8000,
            "wind": { "speed": 5.2, "deg": 200 },
            "clouds": { "all": 75 },
            "dt": 1_704_067_200,
            "sys": { "country": "GB" },
            "timezone": 0,
            "name": "London"
        })
    }

    fn tool_for(server: &MockServer, api_key: Option<&str>) -> WeatherTool {
        WeatherTool::new(
            WeatherConfig {
                endpoint: server.uri(),
                api_key: api_key.map(str::to_string),
                request_timeout_ms: 500,
            },
            GeolocationConfig {
                endpoint: server.uri(),
            },
        )
    }

    async fn run(
        tool: &WeatherTool,
        value: Value,
        context: &InvocationContext,
    ) -> Result<ToolOutput, ExecutionError> {
        let normalized = tool.validate(args(value)).expect("arguments should validate");
        tool.execute(normalized, context, CancellationSignal::never())
            .await
    }

    #[test]
    fn test_units_for_location() {
        assert_eq!(Units::for_location("New York,US"), Units::Imperial);
        assert_eq!(Units::for_location("Austin, TX"), Units::Imperial);
        assert_eq!(Units::for_location("Portland, usa"), Units::Imperial);
        assert_eq!(Units::for_location("Toronto, Canada"), Units::Metric);
        assert_eq!(Units::for_location("London"), Units::Metric);
        assert_eq!(Units::for_location("Paris, France"), Units::Metric);
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            Location::parse("40.7128, -74.0060").unwrap(),
            Location::Coordinates {
                lat: 40.7128,
                lon: -74.006
            }
        );
        assert_eq!(
            Location::parse("New York,US").unwrap(),
            Location::City("New York,US".to_string())
        );
        assert!(Location::parse("95,10").is_err());
    }

    #[test]
    fn test_validate() {
        let tool = WeatherTool::new(WeatherConfig::default(), GeolocationConfig::default());
        let normalized = tool
            .validate(args(json!({ "location": "  London  ", "forecast": true })))
            .unwrap();
        assert_eq!(normalized["location"], "London");

        let normalized = tool.validate(args(json!({ "location": "" }))).unwrap();
        assert!(!normalized.contains_key("location"));

        assert!(tool.validate(args(json!({ "location": "100,200" }))).is_err());
        assert!(tool.validate(args(json!({ "units": "kelvin" }))).is_err());
    }

    #[tokio::test]
    async fn test_current_weather_by_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "London"))
            .and(query_param("appid", "test-key"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_payload()))
            .mount(&server)
            .await;

        let tool = tool_for(&server, Some("test-key"));
        let output = run(&tool, json!({ "location": "London" }), &InvocationContext::default())
            .await
            .unwrap();

        assert_eq!(output.structured["location"], "London");
        assert_eq!(output.structured["temperature"], json!(9.5));
        assert_eq!(output.structured["wind_direction"], "SSW");
        assert_eq!(output.structured["units"], "metric");
        assert!(output.structured.get("current").is_none());
        assert!(output.summary.contains("# Weather Information: London"));

        let schema = tool.descriptor().output_schema.clone().unwrap();
        assert!(schema["properties"].get("temperature").is_some());
        assert!(schema["properties"].get("current").is_none());
    }

    #[tokio::test]
    async fn test_weather_from_client_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_payload("8.8.8.8")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("lat", "37.4220"))
            .and(query_param("lon", "-122.0840"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_payload()))
            .mount(&server)
            .await;

        let tool = tool_for(&server, Some("test-key"));
        let context = InvocationContext::new("session", Some("8.8.8.8".to_string()));
        let output = run(&tool, json!({}), &context).await.unwrap();
        assert_eq!(output.structured["units"], "imperial");
        assert_eq!(
            output.structured["requested_location"],
            "Mountain View, United States"
        );
    }

    #[tokio::test]
    async fn test_forecast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": [
                    { "dt": 1_704_067_200, "main": { "temp": 5.0, "temp_min": 4.0, "temp_max": 6.0 }, "weather": [{ "main": "Snow", "description": "light snow" }], "pop": 0.4 }
                ],
                "city": { "name": "Oslo", "country": "NO", "timezone": 3600, "coord": { "lat": 59.91, "lon": 10.75 } }
            })))
            .mount(&server)
            .await;

        let tool = tool_for(&server, Some("test-key"));
        let output = run(
            &tool,
            json!({ "location": "Oslo", "forecast": true }),
            &InvocationContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.structured["periods"][0]["label"], "Mon 1:00 AM");
        assert_eq!(output.structured["days"][0]["condition"], "Snow");
        assert!(output.summary.contains("(40% chance rain)"));
    }

    #[tokio::test]
    async fn test_provider_error_mapping() {
        let cases = [
            (404, ExecutionErrorKind::InvalidTarget, false),
            (429, ExecutionErrorKind::UpstreamError, true),
            (401, ExecutionErrorKind::UpstreamError, false),
            (503, ExecutionErrorKind::Unreachable, true),
        ];

        for (status, kind, retryable) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(status).set_body_json(json!({ "message": "provider says no" })),
                )
                .mount(&server)
                .await;

            let tool = tool_for(&server, Some("test-key"));
            let err = run(&tool, json!({ "location": "Atlantis" }), &InvocationContext::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.retryable, retryable, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"main\": [1, 2"))
            .mount(&server)
            .await;

        let tool = tool_for(&server, Some("test-key"));
        let err = run(&tool, json!({ "location": "London" }), &InvocationContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_provider_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(current_payload())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let tool = tool_for(&server, Some("test-key"));
        let err = run(&tool, json!({ "location": "London" }), &InvocationContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let server = MockServer::start().await;
        let tool = tool_for(&server, None);
        let err = run(&tool, json!({ "location": "London" }), &InvocationContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(err.message.contains("OPENWEATHER_API_KEY"));
    }

    #[tokio::test]
    async fn test_no_location_without_client_ip() {
        let server = MockServer::start().await;
        let tool = tool_for(&server, Some("test-key"));
        let err = run(&tool, json!({}), &InvocationContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::InvalidTarget);
    }
}
