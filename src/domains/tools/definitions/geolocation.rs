//! IP geolocation client (ip-api.com compatible).
//!
//! Used by the network tool's `ip_info` probe and by the weather tool when no
//! location is given.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::outbound::{http_client, request_error, status_error};
use crate::core::config::GeolocationConfig;
use crate::domains::tools::error::ExecutionError;

const SERVICE: &str = "geolocation service";

/// Geolocation data for one IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpData {
    /// The address that was looked up.
    pub query: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub region_name: String,
    pub city: String,
    pub zip: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
    pub isp: String,
    pub org: String,
    #[serde(rename = "as")]
    pub autonomous_system: String,
}

impl IpData {
    /// "City, Country", as used for display.
    pub fn place(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }
}

/// Raw provider payload; every field optional so failures still decode.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    query: Option<String>,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    zip: String,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
    #[serde(default, rename = "as")]
    autonomous_system: String,
}

/// Client for the geolocation provider.
#[derive(Debug, Clone)]
pub struct GeolocationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GeolocationClient {
    pub fn new(config: GeolocationConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Client with its own connection pool and the given request timeout.
    pub fn with_timeout(config: GeolocationConfig, timeout: std::time::Duration) -> Self {
        Self::new(config, http_client(timeout))
    }

    /// Look up `ip`.
    pub async fn lookup(&self, ip: &str) -> Result<IpData, ExecutionError> {
        let url = format!("{}/json/{}", self.endpoint, ip);
        debug!("Geolocating {}", ip);

        let response = self
            .http
            .get(&url)
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

        parse_response(ip, &body)
    }
}

fn parse_response(ip: &str, body: &str) -> Result<IpData, ExecutionError> {
    let raw: IpApiResponse = serde_json::from_str(body).map_err(|e| {
        ExecutionError::upstream(format!("failed to parse {} response: {}", SERVICE, e), false)
    })?;

    if raw.status.as_deref() != Some("success") {
        let message = raw.message.unwrap_or_else(|| "lookup failed".to_string());
        // ip-api reports unroutable or malformed queries this way.
        if matches!(message.as_str(), "private range" | "reserved range" | "invalid query") {
            return Err(ExecutionError::invalid_target(format!(
                "cannot geolocate {}: {}",
                ip, message
            )));
        }
        return Err(ExecutionError::upstream(
            format!("{} failed for {}: {}", SERVICE, ip, message),
            false,
        ));
    }

    let (Some(lat), Some(lon)) = (raw.lat, raw.lon) else {
        return Err(ExecutionError::upstream(
            format!("{} response for {} has no coordinates", SERVICE, ip),
            false,
        ));
    };

    Ok(IpData {
        query: raw.query.unwrap_or_else(|| ip.to_string()),
        country: raw.country,
        country_code: raw.country_code,
        region: raw.region,
        region_name: raw.region_name,
        city: raw.city,
        zip: raw.zip,
        lat,
        lon,
        timezone: raw.timezone,
        isp: raw.isp,
        org: raw.org,
        autonomous_system: raw.autonomous_system,
    })
}

/// Markdown rendering of an [`IpData`].
pub fn format_ip_data(data: &IpData) -> String {
    let mut out = format!("# IP Address Information: {}\n\n", data.query);

    out.push_str("## Location\n");
    out.push_str(&format!("- **Country:** {} ({})\n", data.country, data.country_code));
    out.push_str(&format!("- **Region:** {} ({})\n", data.region_name, data.region));
    out.push_str(&format!("- **City:** {}\n", data.city));
    if !data.zip.is_empty() {
        out.push_str(&format!("- **ZIP Code:** {}\n", data.zip));
    }
    out.push_str(&format!("- **Coordinates:** {:.4}, {:.4}\n", data.lat, data.lon));
    out.push_str(&format!("- **Timezone:** {}\n\n", data.timezone));

    out.push_str("## Network Information\n");
    out.push_str(&format!("- **ISP:** {}\n", data.isp));
    out.push_str(&format!("- **Organization:** {}\n", data.org));
    out.push_str(&format!("- **AS:** {}\n", data.autonomous_system));
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domains::tools::ExecutionErrorKind;
    use serde_json::{Value, json};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn sample_payload(ip: &str) -> Value {
        json!({
            "status": "success",
            "query": ip,
            "country": "United States",
            "countryCode": "US",
            "region": "CA",
            "regionName": "California",
            "city": "Mountain View",
            "zip": "94043",
            "lat": 37.422,
            "lon": -122.084,
            "timezone": "America/Los_Angeles",
            "isp": "Google LLC",
            "org": "Google Public DNS",
            "as": "AS15169 Google LLC"
        })
    }

    fn client(server: &MockServer) -> GeolocationClient {
        GeolocationClient::with_timeout(
            GeolocationConfig {
                endpoint: server.uri(),
            },
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_lookup_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_payload("8.8.8.8")))
            .mount(&server)
            .await;

        let data = client(&server).lookup("8.8.8.8").await.unwrap();
        assert_eq!(data.country_code, "US");
        assert_eq!(data.autonomous_system, "AS15169 Google LLC");
        assert_eq!(data.place(), "Mountain View, United States");
    }

    #[tokio::test]
    async fn test_private_range_is_invalid_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/10.0.0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "fail",
                "message": "private range",
                "query": "10.0.0.1"
            })))
            .mount(&server)
            .await;

        let err = client(&server).lookup("10.0.0.1").await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::InvalidTarget);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server).lookup("1.1.1.1").await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).lookup("1.1.1.1").await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UpstreamError);
        assert!(err.retryable);
    }

    #[test]
    fn test_markdown_rendering() {
        let data: IpData = serde_json::from_value(sample_payload("8.8.8.8")).unwrap();
        let text = format_ip_data(&data);
        assert!(text.starts_with("# IP Address Information: 8.8.8.8"));
        assert!(text.contains("- **ZIP Code:** 94043"));
        assert!(text.contains("- **Coordinates:** 37.4220, -122.0840"));
    }
}
