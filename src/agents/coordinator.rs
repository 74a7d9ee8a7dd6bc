use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use anyhow::Result;
use serde_json::{Value, json};

use crate::agents::plan::synthesize_brief;
use crate::agents::{AgentResult, BranchOutput, ProgressReporter, StdoutProgress};
use crate::config::RuntimeConfig;
use crate::telemetry::TelemetrySink;
use crate::tools::{astronomy, market, news, provider_http_client, weather};

pub const WEATHER_AGENT: &str = "weather_outlook";
pub const MARKET_AGENT: &str = "market_pulse";
pub const NEWS_AGENT: &str = "news_digest";
pub const SKY_AGENT: &str = "sky_watch";

pub type BranchFuture = Pin<Box<dyn Future<Output = Result<BranchOutput>> + Send>>;

pub struct Branch {
    pub name: String,
    future: BranchFuture,
}

impl Branch {
    pub fn new<F>(name: &str, future: F) -> Self
    where
        F: Future<Output = Result<BranchOutput>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            future: Box::pin(future),
        }
    }
}

/// Fan out all branches concurrently, then join every one before returning.
/// Each branch is fault-contained: returned errors and panicked tasks both
/// collapse into failed [`AgentResult`]s instead of aborting the fan-out.
pub async fn run_branches(
    branches: Vec<Branch>,
    reporter: &dyn ProgressReporter,
) -> Vec<AgentResult> {
    reporter.report(&format!("Launching {} briefing agent(s)", branches.len()));

    let mut handles = Vec::with_capacity(branches.len());
    for branch in branches {
        reporter.report(&format!("Agent '{}' started", branch.name));
        let future = branch.future;
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = future.await;
            (started.elapsed().as_millis() as u64, outcome)
        });
        handles.push((branch.name, handle));
    }

    // All-must-finish join; synthesis downstream is order-independent.
    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = match handle.await {
            Ok((elapsed_ms, Ok(output))) => AgentResult::completed(&name, elapsed_ms, output),
            Ok((elapsed_ms, Err(err))) => AgentResult::failed(&name, elapsed_ms, &format!("{err:#}")),
            Err(join_err) => AgentResult::failed(&name, 0, &format!("agent task aborted: {join_err}")),
        };
        reporter.report(&format!(
            "Agent '{}' finished (success={}, {}ms)",
            name, result.success, result.elapsed_ms
        ));
        results.push(result);
    }
    results
}

async fn weather_outlook(city: String) -> Result<BranchOutput> {
    let http = provider_http_client()?;
    let raw = weather::fetch_forecast(&http, &city).await?;
    let payload = weather::summarize_forecast(&raw);

    let favorability = payload
        .get("favorability")
        .and_then(Value::as_str)
        .unwrap_or("fair")
        .to_string();
    let insights = payload
        .get("summary")
        .and_then(Value::as_str)
        .map(|summary| vec![summary.to_string()])
        .unwrap_or_default();
    let recommendations = match favorability.as_str() {
        "perfect" | "good" => vec!["Conditions favor spending time outside today.".to_string()],
        _ => vec!["Keep plans flexible and ready to move indoors.".to_string()],
    };

    Ok(BranchOutput {
        payload,
        insights,
        recommendations,
    })
}

async fn market_pulse() -> Result<BranchOutput> {
    let http = provider_http_client()?;
    let raw = market::fetch_price(&http, "bitcoin", "usd").await?;
    let payload = market::summarize_quote("bitcoin", "usd", &raw)?;

    let insights = payload
        .get("summary")
        .and_then(Value::as_str)
        .map(|summary| vec![summary.to_string()])
        .unwrap_or_default();
    let recommendations = match payload.get("direction").and_then(Value::as_str) {
        Some("down") => vec!["Markets are soft; skip the portfolio check until evening.".to_string()],
        _ => vec!["Markets are calm; no action needed today.".to_string()],
    };

    Ok(BranchOutput {
        payload,
        insights,
        recommendations,
    })
}

async fn news_digest(topic: String) -> Result<BranchOutput> {
    let http = provider_http_client()?;
    let raw = news::fetch_headlines(&http, &topic, 5).await?;
    let payload = news::summarize_hits(&topic, &raw, 5);

    let insights = payload
        .get("headlines")
        .and_then(Value::as_array)
        .map(|headlines| {
            headlines
                .iter()
                .filter_map(|headline| headline.get("title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(BranchOutput {
        payload,
        insights,
        recommendations: vec![format!("Catch up on '{topic}' reading over coffee.")],
    })
}

async fn sky_watch(city: String) -> Result<BranchOutput> {
    let http = provider_http_client()?;
    let raw = astronomy::fetch_sun_schedule(&http, &city).await?;
    let payload = astronomy::summarize_sun(&raw);

    let insights = payload
        .get("summary")
        .and_then(Value::as_str)
        .map(|summary| vec![summary.to_string()])
        .unwrap_or_default();

    Ok(BranchOutput {
        payload,
        insights,
        recommendations: Vec::new(),
    })
}

/// The fixed daily fan-out set.
pub fn build_daily_branches(city: &str) -> Vec<Branch> {
    vec![
        Branch::new(WEATHER_AGENT, weather_outlook(city.to_string())),
        Branch::new(MARKET_AGENT, market_pulse()),
        Branch::new(NEWS_AGENT, news_digest(city.to_string())),
        Branch::new(SKY_AGENT, sky_watch(city.to_string())),
    ]
}

pub async fn run_plan(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    city: Option<String>,
) -> Result<()> {
    let city = city.unwrap_or_else(|| cfg.default_city.clone());
    let reporter = StdoutProgress;

    let results = run_branches(build_daily_branches(&city), &reporter).await;
    for result in &results {
        telemetry.emit(
            if result.success {
                "agent.completed"
            } else {
                "agent.failed"
            },
            json!({
                "agent": result.agent.clone(),
                "elapsed_ms": result.elapsed_ms,
                "error": result.error.clone(),
            }),
        );
    }

    let brief = synthesize_brief(&city, &results);
    telemetry.emit(
        "plan.synthesized",
        json!({
            "city": city.clone(),
            "successful_agents": brief.successful_agents,
            "total_agents": brief.total_agents,
        }),
    );

    println!("{}", brief.format_summary());
    Ok(())
}
