//! Markdown rendering of weather reports.

use std::fmt::Write;

use super::Units;
use super::report::WeatherReport;

const HPA_TO_INHG: f64 = 0.029_53;
const METERS_PER_MILE: f64 = 1_609.34;

/// Render current conditions.
pub fn current_markdown(report: &WeatherReport) -> String {
    let mut out = String::new();
    let imperial = report.units == Units::Imperial;
    let temp = report.units.temperature_symbol();

    let _ = writeln!(out, "# Weather Information: {}\n", report.location);
    requested_line(&mut out, report);

    if let Some(current) = &report.current {
        out.push_str("## Current Conditions\n");
        if !current.description.is_empty() {
            let _ = writeln!(
                out,
                "- **Condition:** {} ({})",
                current.description, current.condition
            );
        }
        let _ = writeln!(
            out,
            "- **Temperature:** {:.1}{} (feels like {:.1}{})",
            current.temperature, temp, current.feels_like, temp
        );
        if current.temp_min != current.temp_max {
            let _ = writeln!(
                out,
                "- **Range:** {:.1}{} - {:.1}{}",
                current.temp_min, temp, current.temp_max, temp
            );
        }
        let _ = writeln!(out, "- **Humidity:** {:.0}%", current.humidity);
        if imperial {
            let _ = writeln!(out, "- **Pressure:** {:.2} inHg", current.pressure * HPA_TO_INHG);
        } else {
            let _ = writeln!(out, "- **Pressure:** {:.0} hPa", current.pressure);
        }

        out.push_str("\n## Details\n");
        if current.wind_speed > 0.0 {
            let _ = writeln!(
                out,
                "- **Wind:** {:.1} {} {} ({:.0}°)",
                current.wind_speed,
                report.units.speed_unit(),
                current.wind_direction,
                current.wind_degrees
            );
        }
        if let Some(meters) = current.visibility_m {
            if imperial {
                let _ = writeln!(out, "- **Visibility:** {:.1} miles", meters / METERS_PER_MILE);
            } else {
                let _ = writeln!(out, "- **Visibility:** {:.1} km", meters / 1000.0);
            }
        }
        if current.cloudiness > 0.0 {
            let _ = writeln!(out, "- **Cloudiness:** {:.0}%", current.cloudiness);
        }
    }

    location_section(&mut out, report);
    out
}

/// Render a forecast: the next 24 hours, then daily summaries.
pub fn forecast_markdown(report: &WeatherReport) -> String {
    let mut out = String::new();
    let temp = report.units.temperature_symbol();

    let _ = writeln!(out, "# Weather Forecast: {}\n", report.location);
    requested_line(&mut out, report);

    out.push_str("## Next 24 Hours\n\n");
    for period in report.periods.iter().flatten() {
        let chance = if period.precipitation_probability > 0.0 {
            format!(" ({:.0}% chance rain)", period.precipitation_probability * 100.0)
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "**{}**: {:.1}{}, {}{}",
            period.label, period.temperature, temp, period.description, chance
        );
    }

    out.push_str("\n## 5-Day Forecast\n\n");
    for day in report.days.iter().flatten() {
        let chance = if day.precipitation_probability > 0.0 {
            format!(
                ", {:.0}% chance precipitation",
                day.precipitation_probability * 100.0
            )
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "**{}**: {:.1}{} - {:.1}{}, {}{}",
            day.label, day.temp_min, temp, day.temp_max, temp, day.condition, chance
        );
    }

    location_section(&mut out, report);
    out
}

fn requested_line(out: &mut String, report: &WeatherReport) {
    if let Some(requested) = &report.requested_location {
        let _ = writeln!(out, "*Requested location: {}*\n", requested);
    }
}

fn location_section(out: &mut String, report: &WeatherReport) {
    out.push_str("\n## Location\n");
    let _ = writeln!(out, "- **City:** {}, {}", report.location, report.country);
    let _ = writeln!(
        out,
        "- **Coordinates:** {:.4}, {:.4}",
        report.latitude, report.longitude
    );
}
