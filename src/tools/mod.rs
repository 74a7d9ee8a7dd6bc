pub mod astronomy;
pub mod geo;
pub mod market;
pub mod news;
pub mod weather;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use crate::registry::{CallerContext, ParamSpec, ToolRegistry, ToolSpec};
use crate::telemetry::TelemetrySink;

pub const HELLO_WORLD_TOOL_NAME: &str = "hello_world";
pub const CURRENT_TIME_TOOL_NAME: &str = "current_time";
pub const WEATHER_TOOL_NAME: &str = "weather_forecast";
pub const SUN_SCHEDULE_TOOL_NAME: &str = "sun_schedule";
pub const MARKET_TOOL_NAME: &str = "market_snapshot";
pub const IP_LOOKUP_TOOL_NAME: &str = "ip_lookup";
pub const NEWS_TOOL_NAME: &str = "news_headlines";

pub const PROVIDER_TIMEOUT_SECS: u64 = 15;

/// HTTP client shared by the domain data providers.
pub fn provider_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .user_agent(concat!("meridian-cli/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build provider HTTP client")
}

/// Build the builtin catalog. Specs are immutable records; executors are
/// wired into the capability table here, once, at startup.
pub fn build_builtin_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register_fn(
        ToolSpec::new(
            HELLO_WORLD_TOOL_NAME,
            "Echoes a greeting. Useful for verifying tool dispatch end to end.",
        )
        .with_param(ParamSpec::required("name", "string", "Name to greet"))
        .with_test_arg("name", "world"),
        |args, _ctx| async move { Ok(hello_world_response(&args)) },
    )?;

    registry.register_fn(
        ToolSpec::new(
            CURRENT_TIME_TOOL_NAME,
            "Returns the current UTC time as ISO-8601 plus unix seconds.",
        ),
        |_args, _ctx| async move { Ok(current_time_response()) },
    )?;

    registry.register_fn(
        ToolSpec::new(
            WEATHER_TOOL_NAME,
            "Current weather and today's outlook for a city, including an outdoor favorability rating.",
        )
        .with_param(ParamSpec::required("city", "string", "City name, e.g. Lisbon"))
        .with_test_arg("city", "London"),
        |args, _ctx| async move { weather::weather_tool_response(&args).await },
    )?;

    registry.register_fn(
        ToolSpec::new(
            SUN_SCHEDULE_TOOL_NAME,
            "Sunrise, sunset, and daylight duration for a city today.",
        )
        .with_param(ParamSpec::required("city", "string", "City name, e.g. Lisbon"))
        .with_test_arg("city", "London"),
        |args, _ctx| async move { astronomy::sun_tool_response(&args).await },
    )?;

    registry.register_fn(
        ToolSpec::new(
            MARKET_TOOL_NAME,
            "Spot price and 24h change for a crypto asset.",
        )
        .with_param(ParamSpec::required(
            "asset",
            "string",
            "Asset id, e.g. bitcoin or ethereum",
        ))
        .with_param(ParamSpec::optional(
            "currency",
            "string",
            "Quote currency, defaults to usd",
        ))
        .with_test_arg("asset", "bitcoin"),
        |args, _ctx| async move { market::market_tool_response(&args).await },
    )?;

    registry.register_fn(
        ToolSpec::new(
            IP_LOOKUP_TOOL_NAME,
            "Geolocates an IP address. Without an argument it falls back to the calling client's address.",
        )
        .with_param(ParamSpec::optional("ip", "string", "IPv4/IPv6 address to look up"))
        .with_test_arg("ip", "8.8.8.8"),
        |args, ctx| async move {
            geo::ip_tool_response(args.get("ip").cloned().or(ctx.client_ip)).await
        },
    )?;

    registry.register_fn(
        ToolSpec::new(
            NEWS_TOOL_NAME,
            "Recent headlines for a topic from the Hacker News index.",
        )
        .with_param(ParamSpec::required("topic", "string", "Search topic"))
        .with_param(ParamSpec::optional(
            "limit",
            "number",
            "Maximum number of headlines, defaults to 5",
        ))
        .with_test_arg("topic", "rust")
        .with_test_arg("limit", "3"),
        |args, _ctx| async move { news::news_tool_response(&args).await },
    )?;

    Ok(registry)
}

pub fn hello_world_response(args: &HashMap<String, String>) -> String {
    let name = args.get("name").map(String::as_str).unwrap_or("world");
    format!("Hello, {name}!")
}

pub fn current_time_response() -> String {
    let now = Utc::now();
    json!({
        "utc_iso": now.to_rfc3339_opts(SecondsFormat::Secs, true),
        "unix_seconds": now.timestamp(),
    })
    .to_string()
}

pub fn run_tools_list(registry: &ToolRegistry) -> Result<()> {
    println!("Registered tools ({}):", registry.len());
    for spec in registry.specs() {
        let params = spec
            .params
            .iter()
            .map(|param| {
                if param.required {
                    param.name.clone()
                } else {
                    format!("{}?", param.name)
                }
            })
            .collect::<Vec<String>>()
            .join(", ");
        println!("- {}({}): {}", spec.name, params, spec.description);
    }
    Ok(())
}

pub async fn run_tools_call(
    registry: &ToolRegistry,
    telemetry: &TelemetrySink,
    name: &str,
    args: Option<String>,
) -> Result<()> {
    let args_json = args.unwrap_or_else(|| "{}".to_string());
    telemetry.emit("tool.requested", json!({"tool": name, "transport": "cli"}));
    let result = registry
        .execute(name, &args_json, CallerContext::default())
        .await;
    println!("{result}");
    Ok(())
}

/// Exercise every tool with its test-default arguments.
pub async fn run_tools_selftest(registry: &ToolRegistry, telemetry: &TelemetrySink) -> Result<()> {
    println!("Running registry selftest over {} tool(s):", registry.len());
    let mut failures = 0usize;
    for spec in registry.specs() {
        telemetry.emit(
            "tool.requested",
            json!({"tool": spec.name.clone(), "transport": "selftest"}),
        );
        let result = registry
            .execute_with_args(&spec.name, spec.test_arg_map(), CallerContext::default())
            .await;
        let failed = result.starts_with("Error ") || result.starts_with("Unknown function");
        if failed {
            failures += 1;
        }
        let mut preview = result.replace('\n', " ");
        if preview.chars().count() > 120 {
            preview = preview.chars().take(120).collect();
            preview.push_str("...");
        }
        println!(
            "- {} [{}]: {}",
            spec.name,
            if failed { "fail" } else { "ok" },
            preview
        );
    }

    if failures > 0 {
        return Err(anyhow::anyhow!(
            "registry selftest completed with {} failing tool(s)",
            failures
        ));
    }
    println!("All tools responded.");
    Ok(())
}
