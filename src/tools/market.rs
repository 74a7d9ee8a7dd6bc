use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::tools::provider_http_client;

const PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

pub async fn fetch_price(http: &reqwest::Client, asset: &str, currency: &str) -> Result<Value> {
    http.get(PRICE_URL)
        .query(&[
            ("ids", asset),
            ("vs_currencies", currency),
            ("include_24hr_change", "true"),
        ])
        .send()
        .await
        .with_context(|| format!("price request for '{asset}' failed"))?
        .json()
        .await
        .with_context(|| format!("price response for '{asset}' was not JSON"))
}

pub fn summarize_quote(asset: &str, currency: &str, raw: &Value) -> Result<Value> {
    let quote = raw
        .get(asset)
        .filter(|value| value.is_object())
        .ok_or_else(|| anyhow::anyhow!("no market data for asset '{asset}'"))?;

    let price = quote
        .get(currency)
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("no {currency} quote for asset '{asset}'"))?;
    let change_24h = quote
        .get(format!("{currency}_24h_change"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let direction = if change_24h > 0.05 {
        "up"
    } else if change_24h < -0.05 {
        "down"
    } else {
        "flat"
    };

    Ok(json!({
        "asset": asset,
        "currency": currency,
        "price": price,
        "change_24h_pct": (change_24h * 100.0).round() / 100.0,
        "direction": direction,
        "summary": format!(
            "{asset} trades at {price:.2} {currency}, {direction} {change_24h:.2}% over 24h."
        ),
    }))
}

pub async fn market_tool_response(args: &HashMap<String, String>) -> Result<String> {
    let asset = args
        .get("asset")
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("asset argument is required"))?;
    let currency = args
        .get("currency")
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "usd".to_string());

    let http = provider_http_client()?;
    let raw = fetch_price(&http, &asset, &currency).await?;
    let summary = summarize_quote(&asset, &currency, &raw)?;
    serde_json::to_string(&summary).context("failed to serialize market snapshot")
}
