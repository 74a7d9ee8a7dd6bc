use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::tools::provider_http_client;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

/// Resolve a city name to coordinates via the open-meteo geocoder.
pub async fn geocode_city(http: &reqwest::Client, city: &str) -> Result<GeoPoint> {
    let response: Value = http
        .get(GEOCODING_URL)
        .query(&[("name", city), ("count", "1")])
        .send()
        .await
        .with_context(|| format!("geocoding request for '{city}' failed"))?
        .json()
        .await
        .with_context(|| format!("geocoding response for '{city}' was not JSON"))?;

    let result = response
        .pointer("/results/0")
        .ok_or_else(|| anyhow::anyhow!("no geocoding match for city '{city}'"))?;

    let latitude = result
        .get("latitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("geocoding result for '{city}' missing latitude"))?;
    let longitude = result
        .get("longitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("geocoding result for '{city}' missing longitude"))?;
    let name = result.get("name").and_then(Value::as_str).unwrap_or(city);
    let country = result.get("country").and_then(Value::as_str).unwrap_or("");

    Ok(GeoPoint {
        latitude,
        longitude,
        label: if country.is_empty() {
            name.to_string()
        } else {
            format!("{name}, {country}")
        },
    })
}

/// Fetch the current conditions plus today's daily aggregates for a city.
pub async fn fetch_forecast(http: &reqwest::Client, city: &str) -> Result<Value> {
    let point = geocode_city(http, city).await?;
    let response: Value = http
        .get(FORECAST_URL)
        .query(&[
            ("latitude", point.latitude.to_string().as_str()),
            ("longitude", point.longitude.to_string().as_str()),
            ("current", "temperature_2m,weather_code,wind_speed_10m"),
            (
                "daily",
                "temperature_2m_max,temperature_2m_min,precipitation_probability_max",
            ),
            ("timezone", "auto"),
            ("forecast_days", "1"),
        ])
        .send()
        .await
        .with_context(|| format!("forecast request for '{city}' failed"))?
        .json()
        .await
        .with_context(|| format!("forecast response for '{city}' was not JSON"))?;

    let mut raw = response;
    raw["city"] = json!(point.label);
    Ok(raw)
}

/// WMO weather interpretation codes, collapsed to headline conditions.
pub fn describe_weather_code(code: u64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51..=57 => "Drizzle",
        61..=67 => "Rain",
        71..=77 => "Snow",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95..=99 => "Thunderstorm",
        _ => "Mixed conditions",
    }
}

/// Outdoor favorability rating for the day. The coordinator's timeline
/// policy keys off this signal.
pub fn favorability(weather_code: u64, precipitation_chance_pct: u64, wind_kmh: f64) -> &'static str {
    if weather_code <= 1 && precipitation_chance_pct < 20 && wind_kmh < 25.0 {
        return "perfect";
    }
    if weather_code <= 3 && precipitation_chance_pct < 40 && wind_kmh < 40.0 {
        return "good";
    }
    if weather_code < 60 && precipitation_chance_pct < 60 {
        return "fair";
    }
    "poor"
}

/// Collapse a raw forecast payload into the tool's wire summary.
pub fn summarize_forecast(raw: &Value) -> Value {
    let city = raw.get("city").and_then(Value::as_str).unwrap_or("unknown");
    let code = raw
        .pointer("/current/weather_code")
        .and_then(Value::as_u64)
        .unwrap_or(3);
    let temperature = raw
        .pointer("/current/temperature_2m")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let wind = raw
        .pointer("/current/wind_speed_10m")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let precipitation = raw
        .pointer("/daily/precipitation_probability_max/0")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let high = raw
        .pointer("/daily/temperature_2m_max/0")
        .and_then(Value::as_f64)
        .unwrap_or(temperature);
    let low = raw
        .pointer("/daily/temperature_2m_min/0")
        .and_then(Value::as_f64)
        .unwrap_or(temperature);

    let condition = describe_weather_code(code);
    let rating = favorability(code, precipitation, wind);

    json!({
        "city": city,
        "condition": condition,
        "temperature_c": temperature,
        "high_c": high,
        "low_c": low,
        "wind_kmh": wind,
        "precipitation_chance_pct": precipitation,
        "favorability": rating,
        "summary": format!(
            "{condition} in {city}, {temperature:.0}\u{b0}C (high {high:.0}, low {low:.0}), wind {wind:.0} km/h, {precipitation}% rain chance. Outdoor conditions look {rating}."
        ),
    })
}

pub async fn weather_tool_response(args: &HashMap<String, String>) -> Result<String> {
    let city = args
        .get("city")
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("city argument is required"))?;

    let http = provider_http_client()?;
    let raw = fetch_forecast(&http, city).await?;
    let summary = summarize_forecast(&raw);
    serde_json::to_string(&summary).context("failed to serialize weather summary")
}
