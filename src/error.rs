use anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Protocol,
    Tooling,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Protocol => "PROTOCOL",
            ErrorCategory::Tooling => "TOOLING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set provider credentials (for example OPENAI_API_KEY) or run with --provider ollama."
            }
            ErrorCategory::Protocol => {
                "Check --mcp-endpoint and confirm the server is reachable (meridian-cli serve)."
            }
            ErrorCategory::Tooling => {
                "Inspect the registry with meridian-cli tools list and retry with RUST_LOG=info."
            }
            ErrorCategory::Input => "Run meridian-cli --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api key")
        || msg.contains("api_key")
        || msg.contains("no provider could be auto-detected")
        || msg.contains("provider")
        || msg.contains("model request")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("json-rpc")
        || msg.contains("jsonrpc")
        || msg.contains("mcp")
        || msg.contains("initialize")
    {
        return ErrorCategory::Protocol;
    }

    if msg.contains("profile")
        || msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("config file")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("tool") || msg.contains("registry") || msg.contains("executor") {
        return ErrorCategory::Tooling;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}
