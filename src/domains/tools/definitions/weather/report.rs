//! Structured weather output and its construction from provider payloads.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use schemars::JsonSchema;
use serde::Serialize;

use super::Units;
use super::provider::{CurrentWeather, Forecast, ForecastItem};

/// Number of three-hour periods reported (24 hours).
pub const FORECAST_PERIODS: usize = 8;

/// Number of daily summaries reported.
pub const FORECAST_DAYS: usize = 5;

const COMPASS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Output of the weather tool. `current` fields are present for current
/// conditions, `periods`/`days` for a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct WeatherReport {
    /// Place name reported by the provider.
    pub location: String,
    pub country: String,
    pub units: Units,
    pub latitude: f64,
    pub longitude: f64,

    /// The location as the caller asked for it, when it differs from `location`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_location: Option<String>,

    #[serde(flatten)]
    pub current: Option<CurrentConditions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods: Option<Vec<ForecastPeriod>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<DailySummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct CurrentConditions {
    /// Short condition group, e.g. "Rain".
    pub condition: String,
    /// Detailed condition, e.g. "Light Rain".
    pub description: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Pressure in hPa.
    pub pressure: f64,
    /// m/s (metric) or mph (imperial).
    pub wind_speed: f64,
    pub wind_direction: String,
    pub wind_degrees: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_m: Option<f64>,
    /// Cloud cover, percent.
    pub cloudiness: f64,
    /// Observation time (RFC 3339, local to the location).
    pub observed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ForecastPeriod {
    /// Start of the period (RFC 3339, local to the location).
    pub time: String,
    /// Display label, e.g. "Mon 3:00 PM".
    pub label: String,
    pub temperature: f64,
    pub condition: String,
    pub description: String,
    /// Probability of precipitation, 0..1.
    pub precipitation_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DailySummary {
    /// Calendar date (YYYY-MM-DD, local to the location).
    pub date: String,
    /// Display label, e.g. "Mon Jan 2".
    pub label: String,
    pub temp_min: f64,
    pub temp_max: f64,
    /// Most frequent condition of the day.
    pub condition: String,
    /// Highest probability of precipitation of the day, 0..1.
    pub precipitation_probability: f64,
}

impl WeatherReport {
    pub fn from_current(data: CurrentWeather, requested: Option<&str>, units: Units) -> Self {
        let offset = utc_offset(data.timezone);
        let (condition, description) = data
            .weather
            .first()
            .map(|c| (c.main.clone(), to_title(&c.description)))
            .unwrap_or_default();

        let current = CurrentConditions {
            condition,
            description,
            temperature: data.main.temp,
            feels_like: data.main.feels_like,
            temp_min: data.main.temp_min,
            temp_max: data.main.temp_max,
            humidity: data.main.humidity,
            pressure: data.main.pressure,
            wind_speed: data.wind.speed,
            wind_direction: wind_direction(data.wind.deg).to_string(),
            wind_degrees: data.wind.deg,
            visibility_m: data.visibility.filter(|v| *v > 0.0),
            cloudiness: data.clouds.all,
            observed_at: local_time(data.dt, offset)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        };

        Self {
            requested_location: requested_differs(requested, &data.name),
            location: data.name,
            country: data.sys.country,
            units,
            latitude: data.coord.lat,
            longitude: data.coord.lon,
            current: Some(current),
            periods: None,
            days: None,
        }
    }

    pub fn from_forecast(data: Forecast, requested: Option<&str>, units: Units) -> Self {
        let offset = utc_offset(data.city.timezone);

        let periods = data
            .list
            .iter()
            .take(FORECAST_PERIODS)
            .filter_map(|item| {
                let time = local_time(item.dt, offset)?;
                let (condition, description) = item
                    .weather
                    .first()
                    .map(|c| (c.main.clone(), to_title(&c.description)))
                    .unwrap_or_default();
                Some(ForecastPeriod {
                    time: time.to_rfc3339(),
                    label: time.format("%a %-I:%M %p").to_string(),
                    temperature: item.main.temp,
                    condition,
                    description,
                    precipitation_probability: item.pop,
                })
            })
            .collect();

        let days = daily_summaries(&data.list, offset);

        Self {
            requested_location: requested_differs(requested, &data.city.name),
            location: data.city.name,
            country: data.city.country,
            units,
            latitude: data.city.coord.lat,
            longitude: data.city.coord.lon,
            current: None,
            periods: Some(periods),
            days: Some(days),
        }
    }
}

/// Group periods by local calendar day, in order, keeping the first five days.
fn daily_summaries(items: &[ForecastItem], offset: FixedOffset) -> Vec<DailySummary> {
    let mut days: Vec<(DateTime<FixedOffset>, Vec<&ForecastItem>)> = Vec::new();

    for item in items {
        let Some(time) = local_time(item.dt, offset) else {
            continue;
        };
        match days
            .iter_mut()
            .find(|(day, _)| day.date_naive() == time.date_naive())
        {
            Some((_, group)) => group.push(item),
            None => days.push((time, vec![item])),
        }
    }

    days.into_iter()
        .take(FORECAST_DAYS)
        .filter_map(|(day, group)| summarize_day(day, &group))
        .collect()
}

fn summarize_day(day: DateTime<FixedOffset>, items: &[&ForecastItem]) -> Option<DailySummary> {
    let first = items.first()?;
    let mut temp_min = first.main.temp_min;
    let mut temp_max = first.main.temp_max;
    let mut max_pop: f64 = 0.0;
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut dominant: Option<(&str, usize)> = None;

    for item in items {
        temp_min = temp_min.min(item.main.temp_min);
        temp_max = temp_max.max(item.main.temp_max);
        max_pop = max_pop.max(item.pop);

        if let Some(condition) = item.weather.first() {
            let name = condition.main.as_str();
            let count = match counts.iter_mut().find(|(c, _)| *c == name) {
                Some((_, n)) => {
                    *n += 1;
                    *n
                }
                None => {
                    counts.push((name, 1));
                    1
                }
            };
            if dominant.is_none_or(|(_, best)| count > best) {
                dominant = Some((name, count));
            }
        }
    }

    Some(DailySummary {
        date: day.format("%Y-%m-%d").to_string(),
        label: day.format("%a %b %-d").to_string(),
        temp_min,
        temp_max,
        condition: dominant.map(|(name, _)| name.to_string()).unwrap_or_default(),
        precipitation_probability: max_pop,
    })
}

/// 16-point compass direction for a bearing in degrees.
pub fn wind_direction(degrees: f64) -> &'static str {
    let normalized = degrees.rem_euclid(360.0);
    let index = ((normalized + 11.25) / 22.5) as usize % COMPASS.len();
    COMPASS[index]
}

/// Capitalize the first letter of every word.
pub fn to_title(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn utc_offset(seconds: i32) -> FixedOffset {
    FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix())
}

fn local_time(timestamp: i64, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp(timestamp, 0).map(|t| t.with_timezone(&offset))
}

fn requested_differs(requested: Option<&str>, name: &str) -> Option<String> {
    requested
        .filter(|r| !r.is_empty() && *r != name)
        .map(str::to_string)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::definitions::weather::provider::parse_payload;
    use serde_json::json;

    #[test]
    fn test_wind_direction() {
        assert_eq!(wind_direction(0.0), "N");
        assert_eq!(wind_direction(11.0), "N");
        assert_eq!(wind_direction(12.0), "NNE");
        assert_eq!(wind_direction(90.0), "E");
        assert_eq!(wind_direction(225.0), "SW");
        assert_eq!(wind_direction(350.0), "N");
        assert_eq!(wind_direction(360.0), "N");
    }

    #[test]
    fn test_to_title() {
        assert_eq!(to_title("light intensity drizzle"), "Light Intensity Drizzle");
        assert_eq!(to_title(""), "");
    }

    #[test]
    fn test_forecast_grouping() {
        // 2024-01-01T00:00:00Z, three-hour steps across two UTC days.
        let base: i64 = 1_704_067_200;
        let list: Vec<_> = (0..12)
            .map(|i| {
                json!({
                    "dt": base + i * 3 * 3600,
                    "main": { "temp": 10.0 + i as f64, "temp_min": 5.0 + i as f64, "temp_max": 12.0 + i as f64 },
                    "weather": [{ "main": if i % 3 == 0 { "Rain" } else { "Clouds" }, "description": "scattered clouds" }],
                    "pop": i as f64 / 20.0
                })
            })
            .collect();
        let body = json!({
            "list": list,
            "city": { "name": "London", "country": "GB", "timezone": 0, "coord": { "lat": 51.5, "lon": -0.12 } }
        })
        .to_string();

        let forecast: Forecast = parse_payload(&body).unwrap();
        let report = WeatherReport::from_forecast(forecast, Some("London"), Units::Metric);

        assert_eq!(report.requested_location, None);
        let periods = report.periods.unwrap();
        assert_eq!(periods.len(), FORECAST_PERIODS);
        assert_eq!(periods[0].label, "Mon 12:00 AM");
        assert_eq!(periods[0].description, "Scattered Clouds");

        let days = report.days.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, "2024-01-01");
        assert_eq!(days[0].label, "Mon Jan 1");
        assert_eq!(days[0].temp_min, 5.0);
        assert_eq!(days[0].temp_max, 19.0);
        assert_eq!(days[0].condition, "Clouds");
        assert_eq!(days[1].precipitation_probability, 11.0 / 20.0);
    }
}
