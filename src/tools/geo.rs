use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::tools::provider_http_client;

const LOOKUP_URL: &str = "http://ip-api.com/json";

pub async fn fetch_ip_lookup(http: &reqwest::Client, ip: &str) -> Result<Value> {
    http.get(format!("{LOOKUP_URL}/{ip}"))
        .query(&[(
            "fields",
            "status,message,country,regionName,city,lat,lon,isp,query",
        )])
        .send()
        .await
        .with_context(|| format!("IP lookup request for '{ip}' failed"))?
        .json()
        .await
        .with_context(|| format!("IP lookup response for '{ip}' was not JSON"))
}

pub fn summarize_lookup(raw: &Value) -> Result<Value> {
    if raw.get("status").and_then(Value::as_str) != Some("success") {
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("lookup failed");
        return Err(anyhow::anyhow!("IP lookup rejected: {message}"));
    }

    let ip = raw.get("query").and_then(Value::as_str).unwrap_or("");
    let city = raw.get("city").and_then(Value::as_str).unwrap_or("unknown");
    let region = raw.get("regionName").and_then(Value::as_str).unwrap_or("");
    let country = raw
        .get("country")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let isp = raw.get("isp").and_then(Value::as_str).unwrap_or("unknown");

    Ok(json!({
        "ip": ip,
        "city": city,
        "region": region,
        "country": country,
        "latitude": raw.get("lat").cloned().unwrap_or(Value::Null),
        "longitude": raw.get("lon").cloned().unwrap_or(Value::Null),
        "isp": isp,
        "summary": format!("{ip} resolves to {city}, {country} ({isp})."),
    }))
}

/// The ip argument wins; otherwise the caller-context address fills in. A
/// loopback caller has no useful public location, so it is rejected the same
/// as a missing address.
pub async fn ip_tool_response(ip: Option<String>) -> Result<String> {
    let ip = ip
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value != "127.0.0.1" && value != "::1")
        .ok_or_else(|| {
            anyhow::anyhow!("ip argument is required and no routable caller address is available")
        })?;

    let http = provider_http_client()?;
    let raw = fetch_ip_lookup(&http, &ip).await?;
    let summary = summarize_lookup(&raw)?;
    serde_json::to_string(&summary).context("failed to serialize IP lookup")
}
