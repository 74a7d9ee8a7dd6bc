use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::tools::provider_http_client;

const SEARCH_URL: &str = "https://hn.algolia.com/api/v1/search";
pub const DEFAULT_HEADLINE_LIMIT: usize = 5;

pub async fn fetch_headlines(http: &reqwest::Client, topic: &str, limit: usize) -> Result<Value> {
    http.get(SEARCH_URL)
        .query(&[
            ("query", topic),
            ("tags", "story"),
            ("hitsPerPage", limit.to_string().as_str()),
        ])
        .send()
        .await
        .with_context(|| format!("news request for '{topic}' failed"))?
        .json()
        .await
        .with_context(|| format!("news response for '{topic}' was not JSON"))
}

pub fn summarize_hits(topic: &str, raw: &Value, limit: usize) -> Value {
    let headlines = raw
        .get("hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .take(limit)
                .map(|hit| {
                    json!({
                        "title": hit.get("title").and_then(Value::as_str).unwrap_or("untitled"),
                        "url": hit.get("url").and_then(Value::as_str).unwrap_or(""),
                        "points": hit.get("points").and_then(Value::as_u64).unwrap_or(0),
                    })
                })
                .collect::<Vec<Value>>()
        })
        .unwrap_or_default();

    json!({
        "topic": topic,
        "count": headlines.len(),
        "headlines": headlines,
        "summary": format!("{} headline(s) for '{topic}'.", headlines.len()),
    })
}

pub async fn news_tool_response(args: &HashMap<String, String>) -> Result<String> {
    let topic = args
        .get("topic")
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("topic argument is required"))?;
    let limit = args
        .get("limit")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_HEADLINE_LIMIT)
        .clamp(1, 20);

    let http = provider_http_client()?;
    let raw = fetch_headlines(&http, topic, limit).await?;
    serde_json::to_string(&summarize_hits(topic, &raw, limit))
        .context("failed to serialize news headlines")
}
