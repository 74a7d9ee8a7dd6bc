use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Openai,
    Groq,
    Deepseek,
    Ollama,
}

#[derive(Debug, Subcommand)]
pub enum McpCommands {
    #[command(about = "Initialize against the MCP endpoint and list discovered tools")]
    Tools,
    #[command(about = "Call one MCP tool directly with JSON arguments")]
    Call {
        #[arg(long)]
        name: String,
        #[arg(long)]
        args: Option<String>,
    },
    #[command(about = "Answer a question with model-selected MCP tool calls")]
    Ask { prompt: String },
}

#[derive(Debug, Subcommand)]
pub enum ToolCommands {
    #[command(about = "List registered tools with their parameters")]
    List,
    #[command(about = "Execute one registered tool with JSON arguments")]
    Call {
        #[arg(long)]
        name: String,
        #[arg(long)]
        args: Option<String>,
    },
    #[command(about = "Execute every registered tool with its test-default arguments")]
    Selftest,
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize the telemetry JSONL sink")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  meridian-cli ask \"What is the weather in Lisbon right now?\"\n\
  meridian-cli react \"Look up bitcoin and summarize the price move\"\n\
  meridian-cli --provider openai --model gpt-4o-mini chat\n\
  meridian-cli plan --city Porto\n\
  meridian-cli serve --port 8900\n\
  meridian-cli --mcp-endpoint http://127.0.0.1:8900/mcp mcp tools\n\
\n\
Switching behavior:\n\
  - Use --provider/--model to switch runtime model selection per invocation.\n\
  - In chat, use /status, /tools, and /reset for in-session control.";

#[derive(Debug, Parser)]
#[command(name = "meridian-cli")]
#[command(about = "Rust CLI agent orchestrating schema-described tools across ReAct, function-calling, and MCP")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "MERIDIAN_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "MERIDIAN_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "MERIDIAN_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "MERIDIAN_CONFIG", default_value = ".meridian/config.toml")]
    pub config_path: String,

    #[arg(long, env = "MERIDIAN_SESSION_ID")]
    pub session_id: Option<String>,

    #[arg(long, env = "MERIDIAN_MCP_ENDPOINT")]
    pub mcp_endpoint: Option<String>,

    #[arg(long, env = "MERIDIAN_MAX_ITERATIONS")]
    pub max_iterations: Option<u32>,

    #[arg(long, env = "MERIDIAN_HISTORY_MAX_MESSAGES")]
    pub history_max_messages: Option<usize>,

    #[arg(long, env = "MERIDIAN_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "MERIDIAN_DEFAULT_CITY")]
    pub default_city: Option<String>,

    #[arg(long, env = "MERIDIAN_TELEMETRY_ENABLED")]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "MERIDIAN_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Answer one prompt through the structured function-calling loop")]
    Ask { prompt: String },
    #[command(about = "Answer one prompt through the textual ReAct loop")]
    React { prompt: String },
    #[command(about = "Interactive session over the function-calling loop")]
    Chat,
    #[command(about = "Fan out briefing agents and synthesize a day brief")]
    Plan {
        #[arg(long)]
        city: Option<String>,
    },
    #[command(about = "Serve the tool registry over the MCP JSON-RPC endpoint")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    #[command(about = "MCP client operations against a remote server")]
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    #[command(about = "Inspect and exercise the local tool registry")]
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    #[command(about = "Telemetry sink operations")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}
