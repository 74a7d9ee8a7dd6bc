use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::tools::provider_http_client;
use crate::tools::weather::geocode_city;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Fetch today's sun schedule for a city.
pub async fn fetch_sun_schedule(http: &reqwest::Client, city: &str) -> Result<Value> {
    let point = geocode_city(http, city).await?;
    let response: Value = http
        .get(FORECAST_URL)
        .query(&[
            ("latitude", point.latitude.to_string().as_str()),
            ("longitude", point.longitude.to_string().as_str()),
            ("daily", "sunrise,sunset,daylight_duration"),
            ("timezone", "auto"),
            ("forecast_days", "1"),
        ])
        .send()
        .await
        .with_context(|| format!("sun schedule request for '{city}' failed"))?
        .json()
        .await
        .with_context(|| format!("sun schedule response for '{city}' was not JSON"))?;

    let mut raw = response;
    raw["city"] = json!(point.label);
    Ok(raw)
}

/// `2026-08-07T05:32` -> `05:32`; anything without a time part passes through.
pub fn local_time_of(iso: &str) -> &str {
    iso.split('T').nth(1).unwrap_or(iso)
}

pub fn summarize_sun(raw: &Value) -> Value {
    let city = raw.get("city").and_then(Value::as_str).unwrap_or("unknown");
    let sunrise = raw
        .pointer("/daily/sunrise/0")
        .and_then(Value::as_str)
        .unwrap_or("");
    let sunset = raw
        .pointer("/daily/sunset/0")
        .and_then(Value::as_str)
        .unwrap_or("");
    let daylight_secs = raw
        .pointer("/daily/daylight_duration/0")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let daylight_hours = daylight_secs / 3600.0;

    json!({
        "city": city,
        "sunrise": sunrise,
        "sunset": sunset,
        "daylight_hours": (daylight_hours * 10.0).round() / 10.0,
        "summary": format!(
            "Sun in {city}: rise {}, set {}, {daylight_hours:.1}h of daylight.",
            local_time_of(sunrise),
            local_time_of(sunset)
        ),
    })
}

pub async fn sun_tool_response(args: &HashMap<String, String>) -> Result<String> {
    let city = args
        .get("city")
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("city argument is required"))?;

    let http = provider_http_client()?;
    let raw = fetch_sun_schedule(&http, city).await?;
    serde_json::to_string(&summarize_sun(&raw)).context("failed to serialize sun schedule")
}
