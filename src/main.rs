use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use meridian_cli::agents::coordinator::run_plan;
use meridian_cli::chat::{run_ask, run_chat};
use meridian_cli::cli::{Cli, Commands, McpCommands, TelemetryCommands, ToolCommands};
use meridian_cli::config::{RuntimeConfig, resolve_runtime_config};
use meridian_cli::error::format_cli_error;
use meridian_cli::mcp::{run_mcp_ask, run_mcp_call, run_mcp_tools};
use meridian_cli::react::run_react;
use meridian_cli::server::run_server;
use meridian_cli::telemetry::{TelemetrySink, run_telemetry_report};
use meridian_cli::tools::{
    build_builtin_registry, run_tools_call, run_tools_list, run_tools_selftest,
};

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::React { .. } => "react".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Plan { .. } => "plan".to_string(),
        Commands::Serve { .. } => "serve".to_string(),
        Commands::Mcp { command } => match command {
            McpCommands::Tools => "mcp.tools".to_string(),
            McpCommands::Call { .. } => "mcp.call".to_string(),
            McpCommands::Ask { .. } => "mcp.ask".to_string(),
        },
        Commands::Tools { command } => match command {
            ToolCommands::List => "tools.list".to_string(),
            ToolCommands::Call { .. } => "tools.call".to_string(),
            ToolCommands::Selftest => "tools.selftest".to_string(),
        },
        Commands::Telemetry { .. } => "telemetry".to_string(),
    }
}

async fn dispatch(
    command: Commands,
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
) -> Result<()> {
    match command {
        Commands::Ask { prompt } => run_ask(cfg, telemetry, &prompt).await,
        Commands::React { prompt } => run_react(cfg, telemetry, &prompt).await,
        Commands::Chat => run_chat(cfg, telemetry).await,
        Commands::Plan { city } => run_plan(cfg, telemetry, city).await,
        Commands::Serve { host, port } => {
            let mut cfg = cfg.clone();
            if let Some(host) = host {
                cfg.server_host = host;
            }
            if let Some(port) = port {
                cfg.server_port = port;
            }
            let registry = build_builtin_registry()?;
            run_server(&cfg, registry, telemetry).await
        }
        Commands::Mcp { command } => match command {
            McpCommands::Tools => run_mcp_tools(cfg, telemetry).await,
            McpCommands::Call { name, args } => run_mcp_call(cfg, telemetry, &name, args).await,
            McpCommands::Ask { prompt } => run_mcp_ask(cfg, telemetry, &prompt).await,
        },
        Commands::Tools { command } => {
            let registry = build_builtin_registry()?;
            match command {
                ToolCommands::List => run_tools_list(&registry),
                ToolCommands::Call { name, args } => {
                    run_tools_call(&registry, telemetry, &name, args).await
                }
                ToolCommands::Selftest => run_tools_selftest(&registry, telemetry).await,
            }
        }
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(cfg, path, limit),
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = resolve_runtime_config(&cli)?;
    let telemetry = TelemetrySink::new(&cfg, command_label(&cli.command));
    telemetry.emit("command.started", json!({"profile": cfg.profile.clone()}));

    let result = dispatch(cli.command, &cfg, &telemetry).await;
    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({})),
        Err(err) => telemetry.emit("command.failed", json!({"error": format!("{err:#}")})),
    }
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    if let Err(err) = run(cli).await {
        eprintln!("{}", format_cli_error(&err));
        std::process::exit(1);
    }
}
